use crate::constants::DEFAULT_DENYLIST;
use crate::models::JournalEntry;
use thiserror::Error;

/// Why a resolved entry was dropped instead of saved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscardReason {
    #[error("no landmark name")]
    MissingLandmark,
    #[error("{field} matches placeholder pattern \"{pattern}\"")]
    Placeholder { field: &'static str, pattern: String },
}

/// Placeholder substrings that mark an annotation as non-informative.
/// Matching is case-insensitive and applies to both the place label and the landmark name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denylist {
    patterns: Vec<String>,
}

impl Default for Denylist {
    fn default() -> Self {
        Self::new(DEFAULT_DENYLIST.iter().copied())
    }
}

impl Denylist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut denylist = Self { patterns: Vec::new() };
        denylist.extend(patterns);
        denylist
    }

    /// Adds patterns, skipping blanks and duplicates.
    pub fn extend<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().to_lowercase();
            if !pattern.is_empty() && !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// First pattern contained in `value`, if any.
    pub fn matching_pattern(&self, value: &str) -> Option<&str> {
        let lowered = value.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| lowered.contains(pattern.as_str()))
            .map(String::as_str)
    }

    /// Returns the reason the entry must be discarded, or `None` when it may be saved.
    pub fn rejects(&self, entry: &JournalEntry) -> Option<DiscardReason> {
        let landmark = entry
            .landmark_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(landmark) = landmark else {
            return Some(DiscardReason::MissingLandmark);
        };

        let fields = [("landmark name", Some(landmark)), ("place label", entry.place_label.as_deref())];
        fields.into_iter().find_map(|(field, value)| {
            let pattern = self.matching_pattern(value?)?;
            Some(DiscardReason::Placeholder {
                field,
                pattern: pattern.to_string(),
            })
        })
    }
}
