use serde::{Deserialize, Serialize};

/// One raw recognition from a detector, before any domain mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(alias = "class_name")]
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in image pixels. Passed through untouched.
    #[serde(alias = "bbox")]
    pub bounding_box: [f32; 4],
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bounding_box: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }
}

/// Orders detections by confidence, highest first. Equal confidences keep
/// their input order.
pub fn rank_by_confidence(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}
