use std::collections::HashMap;

use crate::domain::IssueType;

const BUILTIN_LABELS: &[(&str, IssueType)] = &[
    ("pothole", IssueType::Pothole),
    ("road_damage", IssueType::Pothole),
    ("garbage", IssueType::Garbage),
    ("trash", IssueType::Garbage),
    ("waste", IssueType::Garbage),
    ("debris", IssueType::Debris),
    ("rubble", IssueType::Debris),
    ("construction_waste", IssueType::Debris),
    ("cow", IssueType::StrayCattle),
    ("cattle", IssueType::StrayCattle),
    ("buffalo", IssueType::StrayCattle),
    ("animal", IssueType::StrayCattle),
    ("broken_road", IssueType::BrokenRoad),
    ("road_crack", IssueType::BrokenRoad),
    ("damaged_road", IssueType::BrokenRoad),
    ("manhole", IssueType::OpenManhole),
    ("open_drain", IssueType::OpenManhole),
    ("uncovered_drain", IssueType::OpenManhole),
];

/// Canonical form of a detector label: lower-case, with spaces and hyphens
/// turned into underscores.
pub fn normalize_label(label: &str) -> String {
    label
        .chars()
        .map(|ch| match ch {
            ' ' | '-' => '_',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Detector label to issue type table. Built at startup, read-only after.
#[derive(Debug, Clone)]
pub struct LabelMapping {
    entries: HashMap<String, IssueType>,
}

impl LabelMapping {
    pub fn builtin() -> Self {
        Self::from_pairs(
            BUILTIN_LABELS
                .iter()
                .map(|(label, issue)| ((*label).to_string(), *issue)),
        )
    }

    /// Keys are normalized on the way in; later pairs win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, IssueType)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(label, issue)| (normalize_label(&label), issue))
            .collect();
        Self { entries }
    }

    pub fn with_overrides(mut self, overrides: &[(String, IssueType)]) -> Self {
        for (label, issue) in overrides {
            self.entries.insert(normalize_label(label), *issue);
        }
        self
    }

    pub fn resolve(&self, raw_label: &str) -> Option<IssueType> {
        self.entries.get(&normalize_label(raw_label)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unifies_case_and_separators() {
        assert_eq!(normalize_label("Road Crack"), "road_crack");
        assert_eq!(normalize_label("open-drain"), "open_drain");
        assert_eq!(normalize_label("Construction Waste-Pile"), "construction_waste_pile");
        assert_eq!(normalize_label("cow"), "cow");
    }

    #[test]
    fn builtin_table_resolves_detector_spellings() {
        let mapping = LabelMapping::builtin();
        assert_eq!(mapping.len(), BUILTIN_LABELS.len());
        assert_eq!(mapping.resolve("Road-Damage"), Some(IssueType::Pothole));
        assert_eq!(mapping.resolve("Uncovered Drain"), Some(IssueType::OpenManhole));
        assert_eq!(mapping.resolve("bicycle"), None);
    }

    #[test]
    fn overrides_add_and_replace_entries() {
        let mapping = LabelMapping::builtin().with_overrides(&[
            ("Litter Pile".to_string(), IssueType::Garbage),
            ("animal".to_string(), IssueType::Debris),
        ]);
        assert_eq!(mapping.resolve("litter pile"), Some(IssueType::Garbage));
        assert_eq!(mapping.resolve("animal"), Some(IssueType::Debris));
    }
}
