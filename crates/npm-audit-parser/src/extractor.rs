//! Scrapes advisory ids out of `npm audit` text output.
//!
//! The text report ends every advisory row with a "More info" URL such as
//! `https://npmjs.com/advisories/118`. Splitting the report on the URL prefix
//! leaves each id at the start of the following fragment, so the first few
//! characters of every fragment are the only candidates looked at.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::advisory::AdvisoryId;

/// URL prefixes that directly precede an advisory id.
pub const ADVISORY_MARKERS: [&str; 2] = [
    "https://nodesecurity.io/advisories/",
    "https://npmjs.com/advisories/",
];

/// Number of leading characters of a fragment that may hold an id.
pub const CANDIDATE_WIDTH: usize = 4;

static MARKER_RE: OnceLock<Regex> = OnceLock::new();

pub(crate) fn marker_re() -> &'static Regex {
    MARKER_RE.get_or_init(|| {
        let alternatives = ADVISORY_MARKERS
            .iter()
            .map(|m| regex::escape(m))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&alternatives).unwrap()
    })
}

/// Length in bytes of the longest marker.
pub(crate) fn longest_marker_len() -> usize {
    ADVISORY_MARKERS.iter().map(|m| m.len()).max().unwrap_or(0)
}

/// Candidate token of a fragment: up to `CANDIDATE_WIDTH` characters after
/// leading whitespace, with trailing whitespace removed.
pub(crate) fn candidate(fragment: &str) -> &str {
    let rest = fragment.trim_start();
    let end = rest
        .char_indices()
        .nth(CANDIDATE_WIDTH)
        .map_or(rest.len(), |(i, _)| i);
    rest[..end].trim_end()
}

/// True once more text can no longer change the fragment's candidate.
///
/// The fragment must be long enough that a marker starting inside the
/// candidate would already be complete and would have ended the fragment.
pub(crate) fn is_settled(fragment: &str) -> bool {
    let rest = fragment.trim_start();
    rest.char_indices()
        .nth(CANDIDATE_WIDTH)
        .is_some_and(|(end, _)| rest.len() >= end + longest_marker_len())
}

/// Extract advisory ids from a complete piece of report text.
///
/// Ids are deduplicated and returned in the order they first appear.
/// Only text following a marker is looked at, so marker-free text yields nothing.
pub fn extract_advisory_ids(text: &str) -> Vec<AdvisoryId> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for fragment in marker_re().split(text).skip(1) {
        let Some(id) = AdvisoryId::parse(candidate(fragment)) else {
            continue;
        };
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    ids
}
