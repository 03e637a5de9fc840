//! Git-backed publisher: stage, commit, push.
//!
//! Publishing an unchanged tree is a no-op, so the sync phase can run on
//! every sweep.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use magpie_core::config::PublisherConfig;

use crate::error::PortError;
use crate::traits::Publisher;

pub struct GitPublisher {
    repo_dir: PathBuf,
    remote: String,
    branch: String,
}

impl GitPublisher {
    pub fn new(repo_dir: impl Into<PathBuf>, config: &PublisherConfig) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: config.remote.clone(),
            branch: config.branch.clone(),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<Output, PortError> {
        debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(PortError::Command {
                program: format!("git {}", args.first().copied().unwrap_or_default()),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }

    /// Whether the index has staged changes.
    async fn has_staged_changes(&self) -> Result<bool, PortError> {
        let output = Command::new("git")
            .args(["diff", "--cached", "--quiet"])
            .current_dir(&self.repo_dir)
            .output()
            .await?;
        // Exit 1 = differences present, 0 = clean.
        Ok(!output.status.success())
    }
}

/// Relative stage arguments for a publish set; empty set stages everything
/// under the repo.
pub fn stage_args(repo_dir: &Path, paths: &[PathBuf]) -> Vec<String> {
    let mut args = vec!["add".to_string()];
    if paths.is_empty() {
        args.push("-A".to_string());
        return args;
    }
    for path in paths {
        let relative = path.strip_prefix(repo_dir).unwrap_or(path);
        args.push(relative.to_string_lossy().into_owned());
    }
    args
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn publish(&self, paths: &[PathBuf], message: &str) -> Result<(), PortError> {
        let add_args = stage_args(&self.repo_dir, paths);
        let add_refs: Vec<&str> = add_args.iter().map(String::as_str).collect();
        self.git(&add_refs).await?;

        if !self.has_staged_changes().await? {
            info!("nothing to publish, tree unchanged");
            return Ok(());
        }

        self.git(&["commit", "-m", message]).await?;
        self.git(&["push", &self.remote, &self.branch]).await?;
        info!(remote = %self.remote, branch = %self.branch, "published knowledge base");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_publish_set_stages_everything() {
        let args = stage_args(Path::new("/repo"), &[]);
        assert_eq!(args, vec!["add", "-A"]);
    }

    #[test]
    fn paths_are_relativized_to_the_repo() {
        let args = stage_args(
            Path::new("/repo"),
            &[
                PathBuf::from("/repo/kb/software/testing/item/README.md"),
                PathBuf::from("outside.md"),
            ],
        );
        assert_eq!(
            args,
            vec!["add", "kb/software/testing/item/README.md", "outside.md"]
        );
    }
}
