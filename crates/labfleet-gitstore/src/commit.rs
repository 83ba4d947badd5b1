//! Write path: create → edit → publish → approve → submit.
//!
//! A created change is held by a [`ChangeGuard`]. Any exit other than a
//! completed submit abandons it, so failed attempts never leave open
//! changes behind.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::error::{GitStoreError, GitStoreResult};
use crate::gerrit::{AUTO_APPROVAL, ChangeInfo, GerritClient};

/// Commits single-file changes to one project/branch.
#[derive(Clone)]
pub struct RepoCommitter {
    gerrit: Arc<dyn GerritClient>,
    gerrit_host: String,
    project: String,
    branch: String,
}

impl RepoCommitter {
    pub fn new(
        gerrit: Arc<dyn GerritClient>,
        gerrit_host: impl Into<String>,
        project: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            gerrit,
            gerrit_host: gerrit_host.into(),
            project: project.into(),
            branch: branch.into(),
        }
    }

    /// Write `contents` to `path` and submit it as one change.
    ///
    /// Returns the change's human-viewable URL.
    pub async fn commit(&self, path: &str, contents: &str, subject: &str) -> GitStoreResult<String> {
        let change = self
            .gerrit
            .create_change(&self.project, &self.branch, subject)
            .await?;
        debug!(change = change.number, %path, "change created");

        let guard = ChangeGuard::new(self.gerrit.clone(), change);
        if let Err(e) = self.land(guard.change(), path, contents).await {
            warn!(change = guard.change().number, error = %e, "commit failed, abandoning change");
            guard.abandon().await;
            return Err(e);
        }
        let change = guard.release();
        info!(change = change.number, %path, project = %self.project, "change submitted");

        self.change_url(&change)
    }

    async fn land(&self, change: &ChangeInfo, path: &str, contents: &str) -> GitStoreResult<()> {
        self.gerrit.edit_file(change, path, contents).await?;
        self.gerrit.publish_edit(change).await?;
        let revision = self.gerrit.current_revision(change).await?;
        self.gerrit.set_review(change, &revision, &AUTO_APPROVAL).await?;
        self.gerrit.submit(change).await
    }

    /// `{host}/c/{project}/+/{number}`.
    pub fn change_url(&self, change: &ChangeInfo) -> GitStoreResult<String> {
        let host = Url::parse(&self.gerrit_host)
            .map_err(|e| GitStoreError::Config(format!("bad review host {:?}: {e}", self.gerrit_host)))?;
        Ok(format!(
            "{}/c/{}/+/{}",
            host.as_str().trim_end_matches('/'),
            self.project,
            change.number
        ))
    }
}

/// Owns an open change until it is either submitted or abandoned.
///
/// Dropping an armed guard (for example when the caller's future is
/// cancelled) schedules the abandon on the current runtime.
pub struct ChangeGuard {
    gerrit: Arc<dyn GerritClient>,
    change: ChangeInfo,
    armed: bool,
}

impl ChangeGuard {
    pub fn new(gerrit: Arc<dyn GerritClient>, change: ChangeInfo) -> Self {
        Self {
            gerrit,
            change,
            armed: true,
        }
    }

    pub fn change(&self) -> &ChangeInfo {
        &self.change
    }

    /// Keep the change; it was submitted.
    pub fn release(mut self) -> ChangeInfo {
        self.armed = false;
        self.change.clone()
    }

    /// Abandon the change now. Failures are logged, never returned.
    pub async fn abandon(mut self) {
        self.armed = false;
        abandon_logged(self.gerrit.as_ref(), &self.change).await;
    }
}

impl Drop for ChangeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let gerrit = self.gerrit.clone();
                let change = self.change.clone();
                handle.spawn(async move { abandon_logged(gerrit.as_ref(), &change).await });
            }
            Err(_) => warn!(change = self.change.number, "change guard dropped outside a runtime, change left open"),
        }
    }
}

async fn abandon_logged(gerrit: &dyn GerritClient, change: &ChangeInfo) {
    match gerrit.abandon(change).await {
        Ok(()) => info!(change = change.number, "change abandoned"),
        Err(e) => warn!(change = change.number, error = %e, "failed to abandon change"),
    }
}
