//! Analyzer stage: turn fetched HTML into sentiment analysis.
//!
//! Reads `done` tasks that have no analysis yet, so a crashed run can be
//! restarted and will skip work already recorded. A task whose analysis
//! fails gets an error payload recorded instead and is not retried.

use std::sync::Arc;

use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::error::QueueError;
use crate::llm::LlmClient;
use crate::queue::TaskQueue;
use crate::store::TaskStore;
use crate::task::{Task, TaskStatus};

/// Selectors tried in order for the main content area.
const MAIN_SELECTORS: [&str; 6] = ["main", "article", "[role='main']", "#content", "#main", ".content"];

const DEFAULT_SCAN_LIMIT: i64 = 500;

pub struct Analyzer<S: TaskStore> {
    queue: TaskQueue<S>,
    llm: Arc<LlmClient>,
    max_text_chars: usize,
}

impl<S: TaskStore> Analyzer<S> {
    pub fn new(queue: TaskQueue<S>, llm: Arc<LlmClient>, max_text_chars: usize) -> Self {
        Self {
            queue,
            llm,
            max_text_chars,
        }
    }

    /// Analyze up to `limit` completed tasks. Returns how many were
    /// processed (including ones that recorded an error payload).
    pub async fn run(&self, limit: Option<usize>) -> Result<usize, QueueError> {
        let scan = limit.map(|l| l as i64).unwrap_or(DEFAULT_SCAN_LIMIT);
        let tasks = self
            .queue
            .store()
            .list_by_status(TaskStatus::Done, scan)
            .await?;

        let mut processed = 0;
        for task in tasks {
            if task.analysis.is_some() {
                continue;
            }
            if let Some(max) = limit {
                if processed >= max {
                    break;
                }
            }

            match self.analyze_task(&task).await {
                Ok(recorded) => {
                    if recorded {
                        processed += 1;
                    }
                }
                Err(AnalyzeError::Queue(error)) => return Err(error),
                Err(AnalyzeError::Task(message)) => {
                    warn!(task_id = %task.id, error = %message, "analysis failed");
                    self.queue.record_analysis_error(&task.id, &message).await?;
                    processed += 1;
                }
            }
        }

        info!(processed = processed, "analyzer finished");
        Ok(processed)
    }

    async fn analyze_task(&self, task: &Task) -> Result<bool, AnalyzeError> {
        let local_path = task
            .local_path
            .as_deref()
            .ok_or_else(|| AnalyzeError::Task("no cached copy of the page".to_string()))?;
        let html = tokio::fs::read_to_string(local_path)
            .await
            .map_err(|e| AnalyzeError::Task(format!("failed to read {local_path}: {e}")))?;

        let text = extract_text(&html, self.max_text_chars);
        let title = task.title.as_deref().unwrap_or("");

        let analysis = self
            .llm
            .analyze(&text, title, &task.url)
            .await
            .map_err(|e| AnalyzeError::Task(e.to_string()))?;

        let recorded = self
            .queue
            .record_analysis(&task.id, &analysis)
            .await
            .map_err(AnalyzeError::Queue)?;
        Ok(recorded)
    }
}

enum AnalyzeError {
    /// Store-level failure; aborts the stage.
    Queue(QueueError),
    /// Per-task failure; recorded on the task, stage continues.
    Task(String),
}

/// Reduce HTML to analyzable text: take the main content area when one
/// exists, convert to Markdown, and truncate.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);

    let mut content = None;
    for selector_str in MAIN_SELECTORS {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                content = Some(element.html());
                break;
            }
        }
    }
    let fragment = content.unwrap_or_else(|| document.html());

    let markdown = htmd::convert(&fragment).unwrap_or_else(|_| {
        Html::parse_document(&fragment)
            .root_element()
            .text()
            .collect::<String>()
    });

    let trimmed = markdown.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((boundary, _)) => trimmed[..boundary].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_prefers_main_content() {
        let html = r#"<html><body>
            <nav>Site navigation</nav>
            <main><h1>Review</h1><p>Great product, would buy again.</p></main>
            <footer>Footer links</footer>
        </body></html>"#;
        let text = extract_text(html, 1000);
        assert!(text.contains("Great product"));
        assert!(!text.contains("Site navigation"));
    }

    #[test]
    fn extract_text_falls_back_to_whole_document() {
        let html = "<html><body><p>Just a paragraph.</p></body></html>";
        let text = extract_text(html, 1000);
        assert!(text.contains("Just a paragraph."));
    }

    #[test]
    fn extract_text_truncates_on_char_boundary() {
        let html = format!("<main><p>{}</p></main>", "測試".repeat(100));
        let text = extract_text(&html, 7);
        assert_eq!(text.chars().count(), 7);
    }
}
