use serde::Serialize;

use crate::models::{Id, Target};
use crate::store::StoreError;

/// Local rejections: raised before any store call, with no state change.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValidationError {
    #[error("text is empty")] EmptyText,
    #[error("message {0} is not in this thread")] UnknownTarget(Id),
    #[error("a post to {} is already in flight", target_label(.0))] TargetBusy(Target),
    #[error("store rejected the post: {0}")] Rejected(String),
    #[error("no failed post to retry")] NothingToRetry,
}

fn target_label(target: &Target) -> String {
    match target {
        Some(id) => format!("message {id}"),
        None => "the thread".to_string(),
    }
}

/// Why a post did not commit. Always scoped to one target.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PostError {
    #[error("invalid post: {0}")] Validation(ValidationError),
    #[error("permission denied")] PermissionDenied,
    #[error("thread or parent not found")] NotFound,
    #[error("network failure: {0}")] Network(String),
    #[error("timed out")] Timeout,
    #[error("too many posts, slow down")] RateLimited,
}

impl PostError {
    /// Whether re-submitting the same text could succeed without user changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PostError::Network(_) | PostError::Timeout | PostError::RateLimited)
    }
}

impl From<ValidationError> for PostError {
    fn from(e: ValidationError) -> Self { PostError::Validation(e) }
}

impl From<StoreError> for PostError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied => PostError::PermissionDenied,
            StoreError::Validation(msg) => PostError::Validation(ValidationError::Rejected(msg)),
            StoreError::NotFound => PostError::NotFound,
            StoreError::Network(msg) => PostError::Network(msg),
            StoreError::Timeout => PostError::Timeout,
        }
    }
}
