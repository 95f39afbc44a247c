use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

use super::types::InputEntry;

/// Where the placements for one invocation come from.
#[async_trait]
pub trait InputSupplier: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<InputEntry>>;
}

/// A JSON array of `{ "placement", "weight", "placement_name" }` objects,
/// as exported from the ad platform's placement report.
pub struct JsonFileInput {
    path: PathBuf,
}

impl JsonFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InputSupplier for JsonFileInput {
    async fn load(&self) -> anyhow::Result<Vec<InputEntry>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Could not read input {}", self.path.display()))?;
        let entries: Vec<InputEntry> = serde_json::from_slice(&raw)
            .with_context(|| format!("Input {} is not a placement list", self.path.display()))?;
        tracing::info!("Loaded {} placements from {}", entries.len(), self.path.display());
        Ok(entries)
    }
}

#[async_trait]
impl InputSupplier for Vec<InputEntry> {
    async fn load(&self) -> anyhow::Result<Vec<InputEntry>> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_placement_export() {
        let path = std::env::temp_dir().join(format!("enricher-input-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"[
                {"placement": "youtube.com/@alpha", "weight": 120, "placement_name": "Alpha"},
                {"placement": "youtube.com/channel/UCbCmjCuTUZos6Inko4u57UQ"}
            ]"#,
        )
        .await
        .unwrap();

        let entries = JsonFileInput::new(&path).load().await.unwrap();
        assert_eq!(
            entries,
            vec![
                InputEntry::new("youtube.com/@alpha", 120).with_name("Alpha"),
                InputEntry::new("youtube.com/channel/UCbCmjCuTUZos6Inko4u57UQ", 0),
            ]
        );
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let input = JsonFileInput::new("/nonexistent/placements.json");
        assert!(input.load().await.is_err());
    }
}
