use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed civic issue taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Pothole,
    Garbage,
    Debris,
    StrayCattle,
    BrokenRoad,
    OpenManhole,
}

impl IssueType {
    pub const ALL: [IssueType; 6] = [
        IssueType::Pothole,
        IssueType::Garbage,
        IssueType::Debris,
        IssueType::StrayCattle,
        IssueType::BrokenRoad,
        IssueType::OpenManhole,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::Pothole => "pothole",
            IssueType::Garbage => "garbage",
            IssueType::Debris => "debris",
            IssueType::StrayCattle => "stray_cattle",
            IssueType::BrokenRoad => "broken_road",
            IssueType::OpenManhole => "open_manhole",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown issue type `{0}`")]
pub struct UnknownIssueType(pub String);

impl FromStr for IssueType {
    type Err = UnknownIssueType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        IssueType::ALL
            .into_iter()
            .find(|issue| issue.as_str() == wanted)
            .ok_or_else(|| UnknownIssueType(value.to_string()))
    }
}
