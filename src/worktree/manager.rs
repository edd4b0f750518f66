use std::path::PathBuf;

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::{TrackerConfig, WorktreeConfig};
use crate::error::Result;
use crate::vcs::Git;

use super::registry::{WorktreeRecord, WorktreeRegistry};

/// Creates and removes per-issue worktrees. Branch convention is
/// `orch/issue-<N>`, directory convention `<basePath>/<repo>-<N>`.
pub struct WorktreeManager {
    repo_path: PathBuf,
    repo_name: String,
    base_branch: String,
    config: WorktreeConfig,
    registry: WorktreeRegistry,
}

impl WorktreeManager {
    pub fn new(tracker: &TrackerConfig, config: WorktreeConfig) -> Self {
        Self {
            repo_path: tracker.repo_path.clone(),
            repo_name: tracker.repo.clone(),
            base_branch: tracker.base_branch.clone(),
            registry: WorktreeRegistry::new(&tracker.repo_path),
            config,
        }
    }

    fn git(&self) -> Git {
        Git::new(&self.repo_path)
    }

    pub fn branch_name(&self, issue: u64) -> String {
        format!("orch/issue-{}", issue)
    }

    pub fn worktree_path(&self, issue: u64) -> PathBuf {
        self.config
            .base_path
            .join(format!("{}-{}", self.repo_name, issue))
    }

    pub async fn exists(&self, issue: u64) -> Result<bool> {
        Ok(match self.registry.get(issue).await? {
            Some(record) => record.path.exists(),
            None => false,
        })
    }

    /// Create the worktree for an issue, or hand back the existing record
    /// when resuming.
    pub async fn create(&self, issue: u64) -> Result<WorktreeRecord> {
        if let Some(record) = self.registry.get(issue).await?
            && record.path.exists()
        {
            debug!(issue, path = %record.path.display(), "Reusing existing worktree");
            return Ok(record);
        }

        let branch = self.branch_name(issue);
        let path = self.worktree_path(issue);
        let git = self.git();

        git.fetch("origin", &self.base_branch).await?;
        git.worktree_add(&path, &branch, &format!("origin/{}", self.base_branch))
            .await?;

        let record = WorktreeRecord {
            issue,
            path: path.clone(),
            branch: branch.clone(),
            created_at: Utc::now(),
        };
        self.registry.insert(record.clone()).await?;

        info!(issue, branch = %branch, path = %path.display(), "Created worktree");
        Ok(record)
    }

    /// Remove the worktree: force-remove through git, clear the registry,
    /// delete any residual directory.
    pub async fn remove(&self, issue: u64) -> Result<()> {
        let record = self.registry.remove(issue).await?;
        let path = record
            .map(|r| r.path)
            .unwrap_or_else(|| self.worktree_path(issue));

        if let Err(e) = self.git().worktree_remove(&path).await {
            debug!(issue, error = %e, "Git worktree remove failed, deleting directory");
        }
        if path.exists() {
            fs::remove_dir_all(&path).await?;
        }

        info!(issue, path = %path.display(), "Removed worktree");
        Ok(())
    }

    /// Whether the configured cleanup policy wants this worktree gone.
    pub fn should_cleanup(&self, failed: bool) -> bool {
        if failed {
            self.config.cleanup_on_failure
        } else {
            self.config.cleanup_on_completion
        }
    }

    /// Drop registry entries whose directories are gone, and directories
    /// under the base path that match our naming but have no registry
    /// entry. Returns the issues whose records were pruned.
    pub async fn prune_orphans(&self) -> Result<Vec<u64>> {
        let records = self.registry.load().await?;
        let mut pruned = Vec::new();

        for (issue, record) in &records {
            if !record.path.exists() {
                warn!(issue, path = %record.path.display(), "Registry entry without directory, pruning");
                self.registry.remove(*issue).await?;
                pruned.push(*issue);
            }
        }

        let prefix = format!("{}-", self.repo_name);
        if let Ok(mut dir) = fs::read_dir(&self.config.base_path).await {
            while let Ok(Some(entry)) = dir.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(issue) = name
                    .strip_prefix(&prefix)
                    .and_then(|n| n.parse::<u64>().ok())
                else {
                    continue;
                };
                if !records.contains_key(&issue) {
                    warn!(issue, path = %entry.path().display(), "Worktree directory without registry entry, removing");
                    if let Err(e) = self.git().worktree_remove(&entry.path()).await {
                        debug!(error = %e, "Git worktree remove failed during prune");
                    }
                    if entry.path().exists()
                        && let Err(e) = fs::remove_dir_all(entry.path()).await
                    {
                        warn!(error = %e, "Force remove failed during prune");
                    }
                }
            }
        }

        pruned.sort_unstable();
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(repo_path: &std::path::Path, base_path: &std::path::Path) -> WorktreeManager {
        let tracker = TrackerConfig {
            repo: "demo".to_string(),
            repo_path: repo_path.to_path_buf(),
            ..Default::default()
        };
        let config = WorktreeConfig {
            base_path: base_path.to_path_buf(),
            ..Default::default()
        };
        WorktreeManager::new(&tracker, config)
    }

    #[test]
    fn naming_conventions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), dir.path());
        assert_eq!(manager.branch_name(42), "orch/issue-42");
        assert!(manager
            .worktree_path(42)
            .to_string_lossy()
            .ends_with("demo-42"));
    }

    #[test]
    fn cleanup_policy_defaults_preserve_failures() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), dir.path());
        assert!(manager.should_cleanup(false));
        assert!(!manager.should_cleanup(true));
    }

    #[tokio::test]
    async fn exists_is_false_without_registry_entry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), dir.path());
        assert!(!manager.exists(7).await.unwrap());
    }

    #[tokio::test]
    async fn prune_drops_stale_registry_entries() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), dir.path());

        let registry = WorktreeRegistry::new(dir.path());
        registry
            .insert(WorktreeRecord {
                issue: 9,
                path: dir.path().join("demo-9"),
                branch: "orch/issue-9".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let pruned = manager.prune_orphans().await.unwrap();
        assert_eq!(pruned, vec![9]);
        assert!(registry.get(9).await.unwrap().is_none());
    }
}
