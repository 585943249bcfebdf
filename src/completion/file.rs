//! JSON file completion store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::CompletionStore;

/// Completion flags kept as a single JSON object on disk.
///
/// Writes are serialized and go through a temp file + rename so a crash
/// mid-write never leaves a truncated file behind.
#[derive(Debug)]
pub struct JsonFileCompletionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCompletionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<BTreeMap<String, bool>> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(BTreeMap::new());
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    async fn write(&self, tours: &BTreeMap<String, bool>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create completion store directory")?;
        }

        let contents = serde_json::to_string_pretty(tours)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .context("Failed to write completion store")?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context("Failed to replace completion store")?;
        Ok(())
    }

    /// Remove every flag.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&BTreeMap::new()).await
    }
}

#[async_trait]
impl CompletionStore for JsonFileCompletionStore {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn hydrate(&self) -> Result<HashMap<String, bool>> {
        Ok(self.read().await?.into_iter().collect())
    }

    async fn set_completed(&self, tour_id: &str, completed: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tours = self.read().await?;
        tours.insert(tour_id.to_string(), completed);
        self.write(&tours).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_hydrates_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileCompletionStore::new(temp_dir.path().join("completed.json"));
        assert!(store.hydrate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flags_survive_a_new_store_instance() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("completed.json");

        let store = JsonFileCompletionStore::new(&path);
        store.mark_completed("home").await.unwrap();
        store.set_completed("profile", false).await.unwrap();

        let reopened = JsonFileCompletionStore::new(&path);
        let tours = reopened.hydrate().await.unwrap();
        assert_eq!(tours.get("home"), Some(&true));
        assert_eq!(tours.get("profile"), Some(&false));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("completed.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileCompletionStore::new(&path);
        let err = store.hydrate().await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
    }

    #[tokio::test]
    async fn test_concurrent_writes_keep_every_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(JsonFileCompletionStore::new(
            temp_dir.path().join("completed.json"),
        ));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.mark_completed(&format!("tour-{i}")).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.hydrate().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_clear_removes_all_flags() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileCompletionStore::new(temp_dir.path().join("completed.json"));
        store.mark_completed("home").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.hydrate().await.unwrap().is_empty());
    }
}
