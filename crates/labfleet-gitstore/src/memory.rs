//! In-memory repository implementing both the archive host and the
//! review host.
//!
//! Submitted edits are applied back into the tree and bump the revision,
//! so a fetch after a commit sees the committed contents. Failures can be
//! injected per review step, per edited path or per fetch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::BoxFuture;
use crate::archive::GitilesClient;
use crate::error::{GitStoreError, GitStoreResult};
use crate::gerrit::{ChangeInfo, GerritClient, ReviewStep};

/// Record of one change created against the repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryChange {
    pub number: u64,
    pub subject: String,
    pub edits: BTreeMap<String, String>,
    pub published: bool,
    pub labels: Vec<(String, i32)>,
    pub submitted: bool,
    pub abandoned: bool,
}

#[derive(Default)]
struct Inner {
    files: BTreeMap<String, String>,
    revision: u64,
    changes: Vec<MemoryChange>,
    /// Remaining injected failures per step.
    failures: HashMap<ReviewStep, usize>,
    /// Remaining injected edit failures per file path.
    edit_failures: HashMap<String, usize>,
    /// Contents served in place of the tree for the next archive only.
    next_archive: BTreeMap<String, String>,
    fetch_failures: usize,
    fetches: usize,
}

#[derive(Default)]
pub struct MemoryRepo {
    inner: Mutex<Inner>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_file(&self, path: impl Into<String>, contents: impl Into<String>) {
        let mut inner = self.lock();
        inner.files.insert(path.into(), contents.into());
        inner.revision += 1;
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    pub fn revision(&self) -> String {
        format!("rev{}", self.lock().revision)
    }

    pub fn changes(&self) -> Vec<MemoryChange> {
        self.lock().changes.clone()
    }

    /// Numbers of abandoned changes, in creation order.
    pub fn abandoned(&self) -> Vec<u64> {
        self.lock()
            .changes
            .iter()
            .filter(|c| c.abandoned)
            .map(|c| c.number)
            .collect()
    }

    pub fn submitted(&self) -> usize {
        self.lock().changes.iter().filter(|c| c.submitted).count()
    }

    /// Number of completed archive fetches.
    pub fn fetches(&self) -> usize {
        self.lock().fetches
    }

    /// Fail `step` from now on.
    pub fn fail_at(&self, step: ReviewStep) {
        self.lock().failures.insert(step, usize::MAX);
    }

    /// Fail the next `times` calls of `step`.
    pub fn fail_times(&self, step: ReviewStep, times: usize) {
        self.lock().failures.insert(step, times);
    }

    /// Fail the next `times` branch-tip lookups.
    pub fn fail_fetches(&self, times: usize) {
        self.lock().fetch_failures = times;
    }

    /// Fail the next `times` edits of `path`; edits of other files succeed.
    pub fn fail_edits_of(&self, path: impl Into<String>, times: usize) {
        self.lock().edit_failures.insert(path.into(), times);
    }

    /// Serve `contents` for `path` in the next archive, then the real tree again.
    pub fn serve_once(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.lock().next_archive.insert(path.into(), contents.into());
    }

    fn check(inner: &mut Inner, step: ReviewStep) -> GitStoreResult<()> {
        match inner.failures.get_mut(&step) {
            Some(left) if *left > 0 => {
                if *left != usize::MAX {
                    *left -= 1;
                }
                Err(GitStoreError::Review {
                    step: step.as_str(),
                    message: "injected failure".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn change_mut<'a>(inner: &'a mut Inner, change: &ChangeInfo, step: ReviewStep) -> GitStoreResult<&'a mut MemoryChange> {
        inner
            .changes
            .iter_mut()
            .find(|c| c.number == change.number)
            .ok_or_else(|| GitStoreError::Review {
                step: step.as_str(),
                message: format!("no change {}", change.number),
            })
    }

    fn run<T>(&self, step: ReviewStep, f: impl FnOnce(&mut Inner) -> GitStoreResult<T>) -> GitStoreResult<T> {
        let mut inner = self.lock();
        Self::check(&mut inner, step)?;
        f(&mut inner)
    }

    fn tarball(files: &BTreeMap<String, String>) -> GitStoreResult<Vec<u8>> {
        let io = |e: std::io::Error| GitStoreError::Archive(e.to_string());
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .map_err(io)?;
        }
        builder.into_inner().map_err(io)?.finish().map_err(io)
    }
}

impl GitilesClient for MemoryRepo {
    fn latest_revision<'a>(&'a self, _project: &'a str, _branch: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.fetch_failures > 0 {
                inner.fetch_failures -= 1;
                return Err(GitStoreError::Transport {
                    op: "resolve branch tip",
                    message: "injected failure".to_string(),
                });
            }
            Ok(format!("rev{}", inner.revision))
        })
    }

    fn archive<'a>(&'a self, _project: &'a str, revision: &'a str) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let current = format!("rev{}", inner.revision);
            if revision != current {
                return Err(GitStoreError::Transport {
                    op: "fetch archive",
                    message: format!("unknown revision {revision}"),
                });
            }
            inner.fetches += 1;
            if inner.next_archive.is_empty() {
                return Self::tarball(&inner.files);
            }
            let mut files = inner.files.clone();
            files.append(&mut inner.next_archive);
            Self::tarball(&files)
        })
    }
}

impl GerritClient for MemoryRepo {
    fn create_change<'a>(&'a self, _project: &'a str, _branch: &'a str, subject: &'a str) -> BoxFuture<'a, ChangeInfo> {
        Box::pin(async move {
            self.run(ReviewStep::Create, |inner| {
                let number = inner.changes.len() as u64 + 1;
                inner.changes.push(MemoryChange {
                    number,
                    subject: subject.to_string(),
                    ..Default::default()
                });
                Ok(ChangeInfo {
                    id: format!("change~{number}"),
                    number,
                })
            })
        })
    }

    fn edit_file<'a>(&'a self, change: &'a ChangeInfo, path: &'a str, contents: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run(ReviewStep::EditFile, |inner| {
                if let Some(left) = inner.edit_failures.get_mut(path).filter(|left| **left > 0) {
                    *left -= 1;
                    return Err(GitStoreError::Review {
                        step: ReviewStep::EditFile.as_str(),
                        message: format!("injected failure editing {path}"),
                    });
                }
                let c = Self::change_mut(inner, change, ReviewStep::EditFile)?;
                c.edits.insert(path.to_string(), contents.to_string());
                Ok(())
            })
        })
    }

    fn publish_edit<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run(ReviewStep::Publish, |inner| {
                Self::change_mut(inner, change, ReviewStep::Publish)?.published = true;
                Ok(())
            })
        })
    }

    fn current_revision<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, String> {
        Box::pin(async move {
            self.run(ReviewStep::CurrentRevision, |inner| {
                let c = Self::change_mut(inner, change, ReviewStep::CurrentRevision)?;
                Ok(format!("patchset-{}-{}", c.number, c.edits.len()))
            })
        })
    }

    fn set_review<'a>(
        &'a self,
        change: &'a ChangeInfo,
        _revision: &'a str,
        labels: &'a [(&'a str, i32)],
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run(ReviewStep::SetReview, |inner| {
                let c = Self::change_mut(inner, change, ReviewStep::SetReview)?;
                c.labels = labels.iter().map(|(k, v)| (k.to_string(), *v)).collect();
                Ok(())
            })
        })
    }

    fn submit<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run(ReviewStep::Submit, |inner| {
                let c = Self::change_mut(inner, change, ReviewStep::Submit)?;
                if !c.published || c.abandoned {
                    return Err(GitStoreError::Review {
                        step: ReviewStep::Submit.as_str(),
                        message: format!("change {} is not submittable", c.number),
                    });
                }
                c.submitted = true;
                let edits = c.edits.clone();
                inner.files.extend(edits);
                inner.revision += 1;
                Ok(())
            })
        })
    }

    fn abandon<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run(ReviewStep::Abandon, |inner| {
                Self::change_mut(inner, change, ReviewStep::Abandon)?.abandoned = true;
                Ok(())
            })
        })
    }
}
