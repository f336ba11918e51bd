//! MarketSense batch pipeline core.
//!
//! A multi-worker crawl task queue over a shared store, plus the staged
//! batch pipeline that runs on top of it:
//!
//! - [`queue::TaskQueue`] - lease-based claim/complete/fail coordination
//! - [`maintenance::Maintenance`] - reclaim expired leases, requeue errors
//! - [`worker::CrawlWorker`] - claim-and-fetch drain loop
//! - [`analyze::Analyzer`] / [`review::QualityReviewer`] - LLM stages
//! - [`report`] - aggregate metrics
//! - [`driver::PipelineDriver`] - the staged batch run
//!
//! Concurrency safety rests on [`store::TaskStore::update_guarded`], the
//! compare-and-swap every state transition goes through.

pub mod analyze;
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod llm;
pub mod maintenance;
pub mod queue;
pub mod report;
pub mod review;
pub mod store;
pub mod task;
pub mod worker;

pub use config::{LlmApiMode, LlmSettings, Settings};
pub use error::{ConfigError, QueueError, StoreError};
pub use queue::{CrawlOutcome, EnqueueOutcome, TaskQueue};
pub use store::{LeaseGuard, MemoryTaskStore, PgTaskStore, TaskStore};
pub use task::{Analysis, Campaign, QualityReview, Task, TaskStatus};
