//! Identifier and set types shared by every tether crate.

use std::collections::BTreeSet;
use std::collections::btree_set;
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn validate(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid_identifier(
            value,
            "identifier must not be blank",
        ));
    }
    if value.trim() != value {
        return Err(Error::invalid_identifier(
            value,
            "identifier must not carry leading or trailing whitespace",
        ));
    }
    Ok(())
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, rejecting blank or padded values.
            pub fn new(value: impl Into<String>) -> Result<Self> {
                let value = value.into();
                validate(&value)?;
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                Self::new(value)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier! {
    /// The single entity whose relationship set is being reconciled (e.g. a user id).
    Owner
}

identifier! {
    /// A related entity on the far side of a membership edge (e.g. a group id).
    RelatedId
}

/// A set of related-entity identifiers.
///
/// Used for both the desired and the observed side of a reconciliation.
/// Backed by an ordered set so iteration and display are deterministic;
/// order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationSet(BTreeSet<RelatedId>);

impl RelationSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw string identifiers, validating each one.
    pub fn from_ids<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter().map(RelatedId::new).collect()
    }

    /// Parse a comma-separated list such as `"g1, g2,g3"`.
    ///
    /// Empty segments are skipped, so `""` yields the empty set.
    pub fn parse_list(list: &str) -> Result<Self> {
        list.split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(RelatedId::new)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &RelatedId) -> bool {
        self.0.contains(id)
    }

    /// Insert an identifier. Returns `false` if it was already present.
    pub fn insert(&mut self, id: RelatedId) -> bool {
        self.0.insert(id)
    }

    /// Remove an identifier. Returns `false` if it was absent.
    pub fn remove(&mut self, id: &RelatedId) -> bool {
        self.0.remove(id)
    }

    pub fn iter(&self) -> btree_set::Iter<'_, RelatedId> {
        self.0.iter()
    }

    /// True when every member of `self` is also in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// True when every member of `other` is also in `self`.
    pub fn is_superset(&self, other: &Self) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Members of `self` that are not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        self.0.difference(&other.0).cloned().collect()
    }

    /// Members of either set.
    pub fn union(&self, other: &Self) -> Self {
        self.0.union(&other.0).cloned().collect()
    }

    /// Members of both sets.
    pub fn intersection(&self, other: &Self) -> Self {
        self.0.intersection(&other.0).cloned().collect()
    }
}

impl FromIterator<RelatedId> for RelationSet {
    fn from_iter<T: IntoIterator<Item = RelatedId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<RelatedId> for RelationSet {
    fn extend<T: IntoIterator<Item = RelatedId>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for RelationSet {
    type Item = RelatedId;
    type IntoIter = btree_set::IntoIter<RelatedId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RelationSet {
    type Item = &'a RelatedId;
    type IntoIter = btree_set::Iter<'a, RelatedId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for RelationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> RelationSet {
        RelationSet::from_ids(ids.iter().copied()).unwrap_or_default()
    }

    #[test]
    fn test_identifier_rejects_blank() {
        assert!(Owner::new("").is_err());
        assert!(RelatedId::new("   ").is_err());
        assert!(RelatedId::new(" g1").is_err());
        assert_eq!(Owner::new("user-1").ok().map(String::from), Some("user-1".to_string()));
    }

    #[test]
    fn test_duplicates_collapse() {
        let ids = set(&["g1", "g2", "g1"]);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_parse_list() {
        let parsed = RelationSet::parse_list(" g2, g1,,g3 ");
        assert_eq!(parsed.ok(), Some(set(&["g1", "g2", "g3"])));
        assert_eq!(RelationSet::parse_list("").ok(), Some(RelationSet::new()));
        assert!(RelationSet::parse_list("g1, ,g2").is_ok());
    }

    #[test]
    fn test_display_is_sorted() {
        assert_eq!(set(&["b", "a"]).to_string(), "{a, b}");
        assert_eq!(RelationSet::new().to_string(), "{}");
    }

    #[test]
    fn test_subset_and_superset() {
        let small = set(&["a"]);
        let big = set(&["a", "b"]);
        assert!(small.is_subset(&big));
        assert!(big.is_superset(&small));
        assert!(!big.is_subset(&small));
    }

    #[test]
    fn test_serde_rejects_blank_member() {
        let parsed: std::result::Result<RelationSet, _> = serde_json::from_str(r#"["g1", ""]"#);
        assert!(parsed.is_err());

        let parsed: std::result::Result<RelationSet, _> = serde_json::from_str(r#"["g2", "g1"]"#);
        assert_eq!(parsed.ok(), Some(set(&["g1", "g2"])));
    }
}
