//! ReportAccumulator: fold streamed report chunks into a verdict.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::advisory::AdvisoryId;
use crate::error::AuditError;
use crate::extractor::{candidate, is_settled, longest_marker_len, marker_re};
use crate::ignore::IgnoreSet;

/// Incrementally extracts advisory ids from a report delivered in chunks.
///
/// Text that could still be part of an id or a marker is carried over to the
/// next chunk, so where the stream happens to be cut never changes the result.
#[derive(Debug)]
pub struct ReportAccumulator {
    seen: HashSet<AdvisoryId>,
    ids: Vec<AdvisoryId>,
    /// Unconsumed tail of the text seen so far.
    carry: String,
    /// `carry` begins a fragment whose candidate is not decided yet.
    open_fragment: bool,
    raw: String,
    chunks: usize,
}

impl Default for ReportAccumulator {
    fn default() -> Self {
        Self {
            seen: HashSet::new(),
            ids: Vec::new(),
            carry: String::new(),
            // nothing before the first marker can hold an id
            open_fragment: false,
            raw: String::new(),
            chunks: 0,
        }
    }
}

impl ReportAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk of report text into the state.
    pub fn update(&mut self, chunk: &str) {
        self.chunks += 1;
        self.raw.push_str(chunk);

        let mut text = std::mem::take(&mut self.carry);
        text.push_str(chunk);

        let mut open = self.open_fragment;
        let mut tail_start = 0;
        for marker in marker_re().find_iter(&text) {
            if open {
                self.record(candidate(&text[tail_start..marker.start()]));
            }
            open = true;
            tail_start = marker.end();
        }

        let tail = &text[tail_start..];
        if open && is_settled(tail) {
            self.record(candidate(tail));
            open = false;
        }

        self.carry = if open {
            // leading whitespace never reaches the candidate
            tail.trim_start().to_string()
        } else {
            // enough to complete a marker cut by the chunk boundary
            suffix(tail, longest_marker_len() - 1).to_string()
        };
        self.open_fragment = open;
        debug!(
            "chunk {} folded, {} ids so far, carrying {} bytes",
            self.chunks,
            self.ids.len(),
            self.carry.len()
        );
    }

    /// Ids seen so far, in first-seen order.
    pub fn ids(&self) -> &[AdvisoryId] {
        &self.ids
    }

    /// Close the stream and freeze the state.
    pub fn finish(mut self) -> ReportState {
        if self.open_fragment {
            let carry = std::mem::take(&mut self.carry);
            self.record(candidate(&carry));
        }
        ReportState {
            ids: self.ids,
            raw: self.raw,
        }
    }

    /// Close the stream and decide against `ignore`.
    pub fn finalize(self, ignore: &IgnoreSet) -> Verdict {
        self.finish().verdict(ignore)
    }

    fn record(&mut self, token: &str) {
        let Some(id) = AdvisoryId::parse(token) else {
            return;
        };
        if self.seen.insert(id.clone()) {
            debug!("found advisory {}", id);
            self.ids.push(id);
        }
    }
}

fn suffix(s: &str, max_bytes: usize) -> &str {
    let mut start = s.len().saturating_sub(max_bytes);
    while !s.is_char_boundary(start) {
        start -= 1;
    }
    &s[start..]
}

/// Final, read-only result of reading one report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportState {
    ids: Vec<AdvisoryId>,
    raw: String,
}

impl ReportState {
    /// Build a state from ids obtained elsewhere, dropping duplicates.
    pub fn from_ids(ids: impl IntoIterator<Item = AdvisoryId>, raw: String) -> Self {
        let mut seen = HashSet::new();
        let ids = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();
        Self { ids, raw }
    }

    pub fn ids(&self) -> &[AdvisoryId] {
        &self.ids
    }

    /// The report text exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `ids − ignore`, keeping first-seen order.
    pub fn verdict(&self, ignore: &IgnoreSet) -> Verdict {
        let ids: Vec<AdvisoryId> = self
            .ids
            .iter()
            .filter(|id| !ignore.contains(id))
            .cloned()
            .collect();
        if ids.is_empty() {
            Verdict::Clean
        } else {
            Verdict::Failed(Unresolved { ids })
        }
    }
}

/// Pass/fail outcome of one audit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Failed(Unresolved),
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Clean)
    }

    pub fn into_result(self) -> Result<(), AuditError> {
        match self {
            Verdict::Clean => Ok(()),
            Verdict::Failed(unresolved) => Err(AuditError::VulnerabilitiesFound(unresolved)),
        }
    }
}

/// Advisories left after removing the ignored ones. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    ids: Vec<AdvisoryId>,
}

impl Unresolved {
    pub fn ids(&self) -> &[AdvisoryId] {
        &self.ids
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .ids
            .iter()
            .map(AdvisoryId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "{} vulnerabilities found. Node security advisories: {}",
            self.count(),
            joined
        )
    }
}
