mod confidence;
mod labels;

pub use confidence::ConfidenceLevel;
pub use labels::LabelMapping;

use crate::domain::{Alternative, ClassificationResult, Detection, IssueType};

/// Detections after the first that are considered for alternatives.
const ALTERNATIVE_WINDOW: usize = 5;
const MAX_ALTERNATIVES: usize = 5;

pub const NO_DETECTIONS_MESSAGE: &str = "no objects detected";
pub const SUCCESS_MESSAGE: &str = "classification successful";

/// Turns ranked detector output into a civic issue decision.
#[derive(Debug, Clone)]
pub struct Classifier {
    mapping: LabelMapping,
}

impl Classifier {
    pub fn new(mapping: LabelMapping) -> Self {
        Self { mapping }
    }

    /// `detections` must already be ranked by confidence, highest first.
    ///
    /// The primary result is the highest ranked detection whose label maps to
    /// an issue type, even when an unmapped detection outranks it.
    ///
    /// # Panics
    ///
    /// Panics if any confidence is outside `[0, 1]`. Detector adapters
    /// reject such output before it gets here.
    pub fn classify(&self, detections: Vec<Detection>) -> ClassificationResult {
        for detection in &detections {
            assert!(
                (0.0..=1.0).contains(&detection.confidence),
                "detection `{}` has confidence {} outside [0, 1]",
                detection.label,
                detection.confidence
            );
        }

        let Some(top) = detections.first() else {
            return ClassificationResult {
                success: false,
                issue_type: None,
                confidence: 0.0,
                raw_class: None,
                alternatives: Vec::new(),
                all_detections: detections,
                message: NO_DETECTIONS_MESSAGE.to_string(),
            };
        };

        let primary = detections.iter().enumerate().find_map(|(idx, detection)| {
            self.mapping
                .resolve(&detection.label)
                .map(|issue| (idx, issue))
        });

        let Some((primary_idx, issue_type)) = primary else {
            let message = format!(
                "detected {} but no mapping to known issue type",
                top.label
            );
            let (confidence, raw_class) = (top.confidence, top.label.clone());
            return ClassificationResult {
                success: false,
                issue_type: None,
                confidence,
                raw_class: Some(raw_class),
                alternatives: Vec::new(),
                all_detections: detections,
                message,
            };
        };

        let alternatives = self.alternatives(&detections, primary_idx, issue_type);
        let chosen = &detections[primary_idx];
        ClassificationResult {
            success: true,
            issue_type: Some(issue_type),
            confidence: chosen.confidence,
            raw_class: Some(chosen.label.clone()),
            alternatives,
            all_detections: detections,
            message: SUCCESS_MESSAGE.to_string(),
        }
    }

    fn alternatives(
        &self,
        detections: &[Detection],
        primary_idx: usize,
        primary: IssueType,
    ) -> Vec<Alternative> {
        let mut seen = vec![primary];
        let mut alternatives = Vec::new();

        for (idx, detection) in detections
            .iter()
            .enumerate()
            .skip(1)
            .take(ALTERNATIVE_WINDOW)
        {
            if idx == primary_idx {
                continue;
            }
            let Some(issue_type) = self.mapping.resolve(&detection.label) else {
                continue;
            };
            if seen.contains(&issue_type) {
                continue;
            }
            seen.push(issue_type);
            alternatives.push(Alternative {
                issue_type,
                raw_class: detection.label.clone(),
                confidence: detection.confidence,
            });
            if alternatives.len() == MAX_ALTERNATIVES {
                break;
            }
        }

        alternatives
    }
}
