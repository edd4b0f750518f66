//! Thin wrapper over the `git` CLI. The orchestrator treats version
//! control as a capability interface; everything goes through subprocess
//! calls, nothing links against libgit.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{OrchError, Result};

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub short_hash: String,
    pub subject: String,
    pub author: String,
    pub date: String,
}

pub struct Git {
    working_dir: PathBuf,
}

impl Git {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr, "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchError::Git(stderr.trim().to_string()));
        }
        Ok(output)
    }

    pub async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["fetch", remote, branch]).await?;
        Ok(())
    }

    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let output = self
            .run(&["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
            .await?;
        Ok(output.status.success())
    }

    pub async fn current_branch(&self) -> Result<String> {
        let output = self
            .run_checked(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| OrchError::Other("Invalid path encoding".into()))?;

        let output = if self.branch_exists(branch).await? {
            self.run(&["worktree", "add", path_str, branch]).await?
        } else {
            self.run(&["worktree", "add", "-b", branch, path_str, base])
                .await?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchError::Worktree {
                message: stderr.to_string(),
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path
            .to_str()
            .ok_or_else(|| OrchError::Other("Invalid path encoding".into()))?;

        let output = self
            .run(&["worktree", "remove", "--force", path_str])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchError::Worktree {
                message: stderr.to_string(),
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    /// Push, retrying with `--force-with-lease` when the remote rejects the
    /// plain push.
    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let output = self.run(&["push", "-u", remote, branch]).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(branch, stderr = %stderr, "Push rejected, retrying with force");
        self.run_checked(&["push", "--force-with-lease", "-u", remote, branch])
            .await?;
        Ok(())
    }

    /// The last `limit` commits on HEAD, newest first.
    pub async fn recent_commits(&self, limit: usize) -> Result<Vec<CommitInfo>> {
        let output = self
            .run_checked(&[
                "log",
                &format!("-{}", limit),
                "--pretty=format:%h%x1f%s%x1f%an%x1f%ad",
                "--date=short",
            ])
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().filter_map(parse_commit_line).collect())
    }

    /// One-line subjects of commits on HEAD that are not on `base`.
    pub async fn commits_since(&self, base: &str) -> Result<Vec<String>> {
        let output = self
            .run_checked(&["log", &format!("{}..HEAD", base), "--oneline"])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn changed_files(&self, base: &str) -> Result<Vec<String>> {
        let output = self
            .run_checked(&["diff", "--name-only", &format!("{}...HEAD", base)])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn diff_stat(&self, base: &str) -> Result<String> {
        let output = self
            .run_checked(&["diff", "--stat", &format!("{}...HEAD", base)])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn parse_commit_line(line: &str) -> Option<CommitInfo> {
    let mut parts = line.split('\x1f');
    Some(CommitInfo {
        short_hash: parts.next()?.to_string(),
        subject: parts.next()?.to_string(),
        author: parts.next()?.to_string(),
        date: parts.next()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_line_parses_unit_separated_fields() {
        let line = "abc1234\x1fFix the parser\x1fJordan\x1f2025-03-01";
        let commit = parse_commit_line(line).unwrap();
        assert_eq!(commit.short_hash, "abc1234");
        assert_eq!(commit.subject, "Fix the parser");
        assert_eq!(commit.author, "Jordan");
        assert_eq!(commit.date, "2025-03-01");
    }

    #[test]
    fn malformed_commit_line_is_skipped() {
        assert!(parse_commit_line("just-a-hash").is_none());
    }
}
