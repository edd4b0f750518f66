use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub issue: u64,
    pub path: PathBuf,
    pub branch: String,
    pub created_at: DateTime<Utc>,
}

/// Write-through registry of worktrees, one JSON document under
/// `<repo>/.orch/worktrees.json`. Every mutation rewrites the file.
pub struct WorktreeRegistry {
    file: PathBuf,
}

impl WorktreeRegistry {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            file: repo_path.join(".orch").join("worktrees.json"),
        }
    }

    pub async fn load(&self) -> Result<HashMap<u64, WorktreeRecord>> {
        if !self.file.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.file).await?;
        let records: Vec<WorktreeRecord> = serde_json::from_str(&content)?;
        Ok(records.into_iter().map(|r| (r.issue, r)).collect())
    }

    async fn save(&self, records: &HashMap<u64, WorktreeRecord>) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut list: Vec<&WorktreeRecord> = records.values().collect();
        list.sort_by_key(|r| r.issue);
        let content = serde_json::to_string_pretty(&list)?;
        fs::write(&self.file, content).await?;
        Ok(())
    }

    pub async fn get(&self, issue: u64) -> Result<Option<WorktreeRecord>> {
        Ok(self.load().await?.remove(&issue))
    }

    pub async fn insert(&self, record: WorktreeRecord) -> Result<()> {
        let mut records = self.load().await?;
        records.insert(record.issue, record);
        self.save(&records).await
    }

    pub async fn remove(&self, issue: u64) -> Result<Option<WorktreeRecord>> {
        let mut records = self.load().await?;
        let removed = records.remove(&issue);
        if removed.is_some() {
            self.save(&records).await?;
        }
        Ok(removed)
    }
}
