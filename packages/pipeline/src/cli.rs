//! Shared glue for the CLI binaries.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging for a binary.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load an explicit env file before `Settings::from_env` runs.
pub fn load_env_file(path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        dotenvy::from_path(path)
            .with_context(|| format!("failed to load env file {}", path.display()))?;
    }
    Ok(())
}

/// Collect target URLs from repeated `--url` flags and an optional
/// `--urls-file` (one per line, `#` comments allowed).
pub fn load_urls(urls: &[String], urls_file: Option<&Path>) -> Result<Vec<String>> {
    let mut collected: Vec<String> = urls.to_vec();

    if let Some(path) = urls_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read urls file {}", path.display()))?;
        for line in content.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                collected.push(line.to_string());
            }
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_urls_merges_flags_and_file() {
        let dir = std::env::temp_dir().join(format!("urls-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("urls.txt");
        std::fs::write(&file, "# comment\nhttps://a.test/1\n\n  https://a.test/2  \n").unwrap();

        let urls = load_urls(&["https://flag.test/".to_string()], Some(&file)).unwrap();
        assert_eq!(
            urls,
            vec!["https://flag.test/", "https://a.test/1", "https://a.test/2"]
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_urls_errors_on_missing_file() {
        assert!(load_urls(&[], Some(Path::new("/nonexistent/urls.txt"))).is_err());
    }
}
