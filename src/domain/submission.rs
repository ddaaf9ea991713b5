use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// How the bytes of a spooled file are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Bytes,
    Base64,
}

#[derive(Debug, Clone)]
pub struct Submission {
    /// File name as it arrived in the inbox.
    pub name: String,
    /// Location after being claimed.
    pub path: PathBuf,
    pub kind: SubmissionKind,
    pub claimed_at: DateTime<Utc>,
}

impl SubmissionKind {
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".b64") || lower.ends_with(".txt") {
            SubmissionKind::Base64
        } else {
            SubmissionKind::Bytes
        }
    }
}
