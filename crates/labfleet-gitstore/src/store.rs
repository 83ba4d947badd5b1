//! InventoryStore — the Lab + Infrastructure snapshot and its lifecycle.
//!
//! ```text
//!            refresh              commit (ok)
//!   Empty ───────────▶ Valid ───────────────▶ Committed
//!                      ▲  │ commit (err)          │
//!                      │  └── stays Valid         │ refresh
//!                      └──────────────────────────┘
//! ```
//!
//! Commit is only possible in `Valid`; any other state fails with
//! [`GitStoreError::InvalidStore`] before the review service is contacted.
//!
//! A commit that fails after Infrastructure landed leaves the store
//! `Valid` and [partially committed](InventoryStore::is_partially_committed).
//! Committing again submits only Lab. Refreshing and redoing the mutation
//! instead would run it against a half-applied inventory.

use std::sync::Arc;

use labfleet_inventory::codec;
use labfleet_inventory::{Infrastructure, Lab};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::archive::{ArchiveFetcher, GitilesClient};
use crate::commit::RepoCommitter;
use crate::error::{GitStoreError, GitStoreResult};
use crate::gerrit::GerritClient;

/// Where the inventory lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub gitiles_host: String,
    pub gerrit_host: String,
    pub project: String,
    pub branch: String,
    pub lab_path: String,
    pub infrastructure_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gitiles_host: String::new(),
            gerrit_host: String::new(),
            project: String::new(),
            branch: "main".to_string(),
            lab_path: "data/skylab/lab.textpb".to_string(),
            infrastructure_path: "data/skylab/server_db.textpb".to_string(),
        }
    }
}

/// A parsed snapshot plus the text it was parsed from.
struct Snapshot {
    revision: String,
    lab: Lab,
    infrastructure: Infrastructure,
    lab_text: String,
    infrastructure_text: String,
    /// Infrastructure landed but Lab did not.
    partial: bool,
}

enum StoreState {
    Empty,
    Valid(Box<Snapshot>),
    Committed,
}

impl StoreState {
    fn name(&self) -> &'static str {
        match self {
            StoreState::Empty => "empty",
            StoreState::Valid(_) => "valid",
            StoreState::Committed => "committed",
        }
    }
}

pub struct InventoryStore {
    config: StoreConfig,
    fetcher: ArchiveFetcher,
    committer: RepoCommitter,
    state: StoreState,
}

impl InventoryStore {
    pub fn new(config: StoreConfig, gitiles: Arc<dyn GitilesClient>, gerrit: Arc<dyn GerritClient>) -> Self {
        let fetcher = ArchiveFetcher::new(gitiles, config.project.clone(), config.branch.clone());
        let committer = RepoCommitter::new(
            gerrit,
            config.gerrit_host.clone(),
            config.project.clone(),
            config.branch.clone(),
        );
        Self {
            config,
            fetcher,
            committer,
            state: StoreState::Empty,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, StoreState::Valid(_))
    }

    /// Whether a failed commit left part of the snapshot submitted.
    pub fn is_partially_committed(&self) -> bool {
        matches!(&self.state, StoreState::Valid(snapshot) if snapshot.partial)
    }

    /// Replace the snapshot with the branch tip. Both files come from one revision.
    pub async fn refresh(&mut self) -> GitStoreResult<()> {
        if self.config.lab_path.trim().is_empty() || self.config.infrastructure_path.trim().is_empty() {
            return Err(GitStoreError::Config("inventory file paths must be set".to_string()));
        }
        let fetched = self
            .fetcher
            .fetch(&[self.config.lab_path.as_str(), self.config.infrastructure_path.as_str()])
            .await?;
        let mut contents = fetched.contents.into_iter();
        let (Some(lab_text), Some(infrastructure_text)) = (contents.next(), contents.next()) else {
            return Err(GitStoreError::Archive("archive fetch returned too few files".to_string()));
        };

        let lab = codec::load_lab(&lab_text)?;
        let infrastructure = codec::load_infrastructure(&infrastructure_text)?;
        info!(
            revision = %fetched.revision,
            duts = lab.duts.len(),
            servers = infrastructure.servers.len(),
            "inventory refreshed"
        );
        self.state = StoreState::Valid(Box::new(Snapshot {
            revision: fetched.revision,
            lab,
            infrastructure,
            lab_text,
            infrastructure_text,
            partial: false,
        }));
        Ok(())
    }

    fn snapshot(&self) -> GitStoreResult<&Snapshot> {
        match &self.state {
            StoreState::Valid(snapshot) => Ok(snapshot.as_ref()),
            other => Err(GitStoreError::InvalidStore(other.name())),
        }
    }

    fn snapshot_mut(&mut self) -> GitStoreResult<&mut Snapshot> {
        match &mut self.state {
            StoreState::Valid(snapshot) => Ok(snapshot.as_mut()),
            other => Err(GitStoreError::InvalidStore(other.name())),
        }
    }

    /// Revision the snapshot was read at.
    pub fn revision(&self) -> GitStoreResult<&str> {
        Ok(&self.snapshot()?.revision)
    }

    pub fn lab(&self) -> GitStoreResult<&Lab> {
        Ok(&self.snapshot()?.lab)
    }

    pub fn infrastructure(&self) -> GitStoreResult<&Infrastructure> {
        Ok(&self.snapshot()?.infrastructure)
    }

    /// Both halves, borrowed mutably together for building an index.
    pub fn inventory_mut(&mut self) -> GitStoreResult<(&mut Lab, &mut Infrastructure)> {
        let snapshot = self.snapshot_mut()?;
        Ok((&mut snapshot.lab, &mut snapshot.infrastructure))
    }

    /// Write every changed file back and invalidate the snapshot.
    ///
    /// Infrastructure is committed before Lab; the URL of the last
    /// change is returned. If nothing changed this fails with
    /// [`GitStoreError::EmptyCommit`] and the snapshot stays valid.
    pub async fn commit(&mut self, description: &str) -> GitStoreResult<String> {
        let snapshot = self.snapshot()?;
        let lab_text = codec::write_lab(&snapshot.lab)?;
        let infrastructure_text = codec::write_infrastructure(&snapshot.infrastructure)?;
        let infra_changed = infrastructure_text != snapshot.infrastructure_text;
        let lab_changed = lab_text != snapshot.lab_text;
        if !infra_changed && !lab_changed {
            debug!(revision = %snapshot.revision, "commit skipped, inventory unchanged");
            return Err(GitStoreError::EmptyCommit);
        }

        let mut url = String::new();
        if infra_changed {
            url = self
                .committer
                .commit(&self.config.infrastructure_path, &infrastructure_text, description)
                .await?;
            // A retried commit after a later failure must not resubmit this file.
            let snapshot = self.snapshot_mut()?;
            snapshot.infrastructure_text = infrastructure_text;
            snapshot.partial = lab_changed;
        }
        if lab_changed {
            url = self
                .committer
                .commit(&self.config.lab_path, &lab_text, description)
                .await?;
        }

        info!(%url, infra_changed, lab_changed, "inventory committed");
        self.state = StoreState::Committed;
        Ok(url)
    }
}
