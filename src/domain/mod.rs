pub mod detection;
pub mod input;
pub mod issue;
pub mod result;
pub mod submission;
pub mod types;

pub use detection::{rank_by_confidence, Detection};
pub use input::{ImageFormat, ImageInput};
pub use issue::IssueType;
pub use result::{Alternative, ClassificationResult};
pub use submission::{Submission, SubmissionKind};
pub use types::QueueSnapshot;
