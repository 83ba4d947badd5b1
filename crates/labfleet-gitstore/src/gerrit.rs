//! Review-service seam used by the write path.

use serde::{Deserialize, Serialize};

use crate::BoxFuture;

/// A change as reported by the review service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    pub id: String,
    #[serde(rename = "_number")]
    pub number: u64,
}

/// Labels applied to every inventory change before submission.
pub const AUTO_APPROVAL: [(&str, i32); 2] = [("Code-Review", 2), ("Verified", 1)];

/// The narrow subset of the review service's API the committer needs.
pub trait GerritClient: Send + Sync {
    fn create_change<'a>(&'a self, project: &'a str, branch: &'a str, subject: &'a str) -> BoxFuture<'a, ChangeInfo>;

    fn edit_file<'a>(&'a self, change: &'a ChangeInfo, path: &'a str, contents: &'a str) -> BoxFuture<'a, ()>;

    fn publish_edit<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()>;

    fn current_revision<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, String>;

    fn set_review<'a>(
        &'a self,
        change: &'a ChangeInfo,
        revision: &'a str,
        labels: &'a [(&'a str, i32)],
    ) -> BoxFuture<'a, ()>;

    fn submit<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()>;

    fn abandon<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()>;
}

/// Steps of the review protocol, named as they appear in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewStep {
    Create,
    EditFile,
    Publish,
    CurrentRevision,
    SetReview,
    Submit,
    Abandon,
}

impl ReviewStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStep::Create => "create change",
            ReviewStep::EditFile => "edit file",
            ReviewStep::Publish => "publish edit",
            ReviewStep::CurrentRevision => "current revision",
            ReviewStep::SetReview => "set review",
            ReviewStep::Submit => "submit",
            ReviewStep::Abandon => "abandon",
        }
    }
}
