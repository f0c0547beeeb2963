//! Advisory ids the user has chosen to accept.

use std::collections::HashSet;
use std::convert::Infallible;
use std::str::FromStr;

use tracing::warn;

use crate::advisory::{is_numeric, AdvisoryId};

/// Separator between ids in the `--ignore` option.
pub const IGNORE_SEPARATOR: char = ',';

/// Set of advisory ids excluded from the verdict.
///
/// Tokens are kept verbatim. A token that is not purely numeric is accepted
/// but can never match an extracted id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    ids: HashSet<String>,
}

impl IgnoreSet {
    /// Parse a comma-delimited list. `None` gives an empty set.
    pub fn parse(raw: Option<&str>) -> Self {
        let mut set = Self::default();
        if let Some(raw) = raw {
            set.extend(raw.split(IGNORE_SEPARATOR));
        }
        set
    }

    /// Add tokens, trimming each and skipping empty ones.
    pub fn extend<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            let token = token.as_ref().trim();
            if token.is_empty() {
                continue;
            }
            if !is_numeric(token) {
                warn!("ignore entry {:?} is not a numeric advisory id and will never match", token);
            }
            self.ids.insert(token.to_string());
        }
    }

    pub fn contains(&self, id: &AdvisoryId) -> bool {
        self.ids.contains(id.as_str())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order, for display.
    pub fn sorted(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl FromStr for IgnoreSet {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(Some(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AdvisoryId {
        AdvisoryId::parse(s).unwrap()
    }

    #[test]
    fn test_parse_absent() {
        assert!(IgnoreSet::parse(None).is_empty());
    }

    #[test]
    fn test_parse_trims_tokens() {
        let set = IgnoreSet::parse(Some(" 534, 118 ,975"));
        assert_eq!(set.len(), 3);
        assert!(set.contains(&id("534")));
        assert!(set.contains(&id("118")));
        assert!(set.contains(&id("975")));
        assert!(!set.contains(&id("976")));
    }

    #[test]
    fn test_parse_skips_empty_tokens() {
        let set: IgnoreSet = "534,,118,".parse().unwrap();
        assert_eq!(set.sorted(), vec!["118", "534"]);
    }

    #[test]
    fn test_non_numeric_kept_verbatim() {
        let set = IgnoreSet::parse(Some("GHSA-1234,0042"));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&id("0042")));
        assert!(!set.contains(&id("42")));
        assert!(!set.contains(&id("1234")));
    }

    #[test]
    fn test_extend_merges() {
        let mut set = IgnoreSet::parse(Some("534"));
        set.extend(["118", "534"]);
        assert_eq!(set.sorted(), vec!["118", "534"]);
    }
}
