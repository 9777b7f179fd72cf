pub mod builder;
pub mod commit;
pub mod config;
pub mod error;
pub mod focus;
pub mod models;
pub mod rate_limit;
pub mod store;
pub mod view;

// Re-export commonly used items for tests / external users
pub use builder::{build, build_overlay, build_with_report, flatten, Anomaly, BuildOutput, ThreadNode};
pub use commit::{CommitAttempt, CommitState, SubmitRequest};
pub use config::ViewConfig;
pub use error::{PostError, ValidationError};
pub use focus::ReplyFocus;
pub use view::{FailedPost, ThreadView, ViewEvent};
