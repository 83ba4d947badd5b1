//! Read path: resolve the branch tip, fetch its archive, extract files.

use std::io::Read;
use std::path::{Component, Path};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{debug, info};

use crate::BoxFuture;
use crate::error::{GitStoreError, GitStoreResult};

/// Read-only access to the repository host.
pub trait GitilesClient: Send + Sync {
    /// Commit hash at the tip of `branch`.
    fn latest_revision<'a>(&'a self, project: &'a str, branch: &'a str) -> BoxFuture<'a, String>;

    /// The `.tar.gz` archive of the whole tree at `revision`.
    fn archive<'a>(&'a self, project: &'a str, revision: &'a str) -> BoxFuture<'a, Vec<u8>>;
}

/// Files read from a single revision.
#[derive(Debug, Clone)]
pub struct FetchedFiles {
    pub revision: String,
    /// Contents in the order the paths were requested.
    pub contents: Vec<String>,
}

/// Fetches named files from the tip of a configured project/branch.
#[derive(Clone)]
pub struct ArchiveFetcher {
    client: Arc<dyn GitilesClient>,
    project: String,
    branch: String,
}

impl ArchiveFetcher {
    pub fn new(client: Arc<dyn GitilesClient>, project: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            client,
            project: project.into(),
            branch: branch.into(),
        }
    }

    /// Fetch every path in `paths` from one revision at the branch tip.
    pub async fn fetch(&self, paths: &[&str]) -> GitStoreResult<FetchedFiles> {
        if let Some(empty) = paths.iter().position(|p| p.trim().is_empty()) {
            return Err(GitStoreError::Config(format!("inventory file path #{empty} is empty")));
        }

        let revision = self.client.latest_revision(&self.project, &self.branch).await?;
        debug!(project = %self.project, branch = %self.branch, %revision, "resolved branch tip");

        let bytes = self.client.archive(&self.project, &revision).await?;
        let contents = extract_files(&bytes, paths)?;
        info!(
            project = %self.project,
            %revision,
            files = paths.len(),
            archive_bytes = bytes.len(),
            "fetched inventory files"
        );
        Ok(FetchedFiles { revision, contents })
    }
}

/// Extract the named files from a gzipped tarball as UTF-8 text.
///
/// Entry paths are compared after dropping any leading `./`.
pub fn extract_files(archive: &[u8], paths: &[&str]) -> GitStoreResult<Vec<String>> {
    let mut found: Vec<Option<String>> = vec![None; paths.len()];
    let mut tar = Archive::new(GzDecoder::new(archive));
    let entries = tar
        .entries()
        .map_err(|e| GitStoreError::Archive(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| GitStoreError::Archive(e.to_string()))?;
        let entry_path = entry
            .path()
            .map_err(|e| GitStoreError::Archive(e.to_string()))?
            .into_owned();
        let Some(slot) = paths
            .iter()
            .position(|p| same_path(&entry_path, Path::new(p)))
        else {
            continue;
        };
        let mut text = String::new();
        entry
            .read_to_string(&mut text)
            .map_err(|e| GitStoreError::Archive(format!("{}: {e}", entry_path.display())))?;
        found[slot] = Some(text);
    }

    found
        .into_iter()
        .zip(paths)
        .map(|(text, path)| text.ok_or_else(|| GitStoreError::MissingFile(path.to_string())))
        .collect()
}

fn same_path(entry: &Path, wanted: &Path) -> bool {
    fn normal(p: &Path) -> Vec<Component<'_>> {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir | Component::RootDir))
            .collect()
    }
    normal(entry) == normal(wanted)
}
