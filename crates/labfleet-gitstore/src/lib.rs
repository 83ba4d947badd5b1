//! labfleet-gitstore — a version-controlled repository used as a
//! transactional inventory store.
//!
//! Reads fetch a compressed archive of the branch tip and extract the
//! two inventory files. Writes go through the review service as one
//! change per file: create, edit, publish, approve, submit. A failed
//! write abandons its change.
//!
//! # Architecture
//!
//! ```text
//! InventoryStore (Empty → Valid → Committed)
//!   ├── ArchiveFetcher ── dyn GitilesClient (HttpGitiles | MemoryRepo)
//!   └── RepoCommitter  ── dyn GerritClient  (HttpGerrit  | MemoryRepo)
//!         └── ChangeGuard (abandon on any exit but submit)
//! ```

pub mod archive;
pub mod commit;
pub mod error;
pub mod gerrit;
pub mod http;
pub mod memory;
pub mod store;

use std::future::Future;
use std::pin::Pin;

pub use archive::{ArchiveFetcher, FetchedFiles, GitilesClient, extract_files};
pub use commit::{ChangeGuard, RepoCommitter};
pub use error::{GitStoreError, GitStoreResult};
pub use gerrit::{AUTO_APPROVAL, ChangeInfo, GerritClient, ReviewStep};
pub use http::{HttpGerrit, HttpGitiles};
pub use memory::{MemoryChange, MemoryRepo};
pub use store::{InventoryStore, StoreConfig};

/// Boxed future returned by the client traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = GitStoreResult<T>> + Send + 'a>>;
