//! Case-insensitive labels for engines and song usage tags

use serde::{Deserialize, Deserializer};
use std::{
    cmp::Ordering,
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
};

/// A label that compares, hashes and orders without regard to ASCII case
///
/// Engine names (`"ft"` vs `"FT"`) and song usage tags come from hand-written
/// JSON, so lookups must not depend on the author's spelling. Comparison folds
/// ASCII case byte by byte rather than going through the locale; the original
/// spelling is kept for display.
#[derive(Debug, Clone)]
pub struct Tag(String);

/// A set of [`Tag`]s, deduplicated case-insensitively
pub type TagSet = HashSet<Tag>;

impl Tag {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The label in its original spelling
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|byte| byte.to_ascii_lowercase())
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.folded() {
            state.write_u8(byte);
        }
    }
}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Tag {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(String::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_folds_case() {
        assert_eq!(Tag::new("ft"), Tag::new("FT"));
        assert_eq!(Tag::new("Boss Theme"), Tag::new("boss theme"));
        assert_ne!(Tag::new("ft"), Tag::new("nsf"));
    }

    #[test]
    fn set_lookup_folds_case() {
        let mut tags = TagSet::new();
        tags.insert(Tag::new("Overworld"));

        assert!(tags.contains(&Tag::new("overworld")));
        assert!(!tags.insert(Tag::new("OVERWORLD")));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn ordering_folds_case() {
        let mut tags = vec![Tag::new("b"), Tag::new("A"), Tag::new("C")];
        tags.sort();
        assert_eq!(tags, vec![Tag::new("a"), Tag::new("B"), Tag::new("c")]);
    }

    #[test]
    fn display_keeps_spelling() {
        assert_eq!(format!("{}", Tag::new("Ft")), "Ft");
    }
}
