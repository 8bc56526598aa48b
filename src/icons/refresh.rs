use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::errors::{RefreshError, RefreshResult};

/// Updates the icon directory from its git remote
///
/// Refreshes are serialized so overlapping hook calls never run git
/// concurrently in the same working tree.
#[derive(Clone)]
pub struct IconRefresher {
    icon_dir: PathBuf,
    refresh_branch: String,
    lock: Arc<Mutex<()>>,
}

impl IconRefresher {
    pub fn new(icon_dir: PathBuf, refresh_branch: impl Into<String>) -> Self {
        Self {
            icon_dir,
            refresh_branch: refresh_branch.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// `git fetch origin` then `git reset --hard <branch>`
    pub async fn refresh(&self) -> RefreshResult<()> {
        let _guard = self.lock.lock().await;
        info!("Refreshing icon dataset in {}", self.icon_dir.display());

        self.git(&["fetch", "origin"]).await?;
        self.git(&["reset", "--hard", &self.refresh_branch]).await?;

        info!("Icon dataset reset to {}", self.refresh_branch);
        Ok(())
    }

    /// Run a refresh in the background, logging the outcome
    pub fn spawn_refresh(&self) -> tokio::task::JoinHandle<()> {
        let refresher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = refresher.refresh().await {
                error!("Icon dataset refresh failed: {}", e);
            }
        })
    }

    async fn git(&self, args: &[&str]) -> RefreshResult<()> {
        let command = format!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.icon_dir)
            .args(args)
            .output()
            .await
            .map_err(|source| RefreshError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RefreshError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresh_outside_a_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = IconRefresher::new(dir.path().to_path_buf(), "origin/master");

        assert!(refresher.refresh().await.is_err());
    }

    #[tokio::test]
    async fn test_spawned_refresh_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        let refresher = IconRefresher::new(dir.path().join("missing"), "origin/master");

        refresher.spawn_refresh().await.unwrap();
    }
}
