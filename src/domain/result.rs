use serde::{Deserialize, Serialize};

use super::{Detection, IssueType};

/// The decision produced for one image. Built once by the classifier and
/// never mutated afterwards; cached and returned verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub success: bool,
    pub issue_type: Option<IssueType>,
    pub confidence: f32,
    pub raw_class: Option<String>,
    pub alternatives: Vec<Alternative>,
    pub all_detections: Vec<Detection>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub issue_type: IssueType,
    pub raw_class: String,
    pub confidence: f32,
}
