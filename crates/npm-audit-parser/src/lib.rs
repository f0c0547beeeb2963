//! # npm-audit-parser
//!
//! Run `npm audit`, pull advisory ids out of its report and decide whether
//! the build may pass.
//!
//! ## Overview
//!
//! - **extractor**: scrapes ids that follow advisory URLs in the text report
//! - **ignore**: the user's list of accepted advisories
//! - **report**: folds streamed chunks into a deduplicated id set and a verdict
//! - **structured**: reads ids from `npm audit --json` when asked to
//! - **runner**: spawns the audit, streams its output, enforces cancellation
//!
//! ## Example
//!
//! ```ignore
//! use npm_audit_parser::{AuditOptions, AuditRunner, IgnoreSet};
//! use tokio_util::sync::CancellationToken;
//!
//! let ignore = IgnoreSet::parse(Some("534,118"));
//! let runner = AuditRunner::new(AuditOptions::default());
//!
//! match runner.check(&ignore, CancellationToken::new()).await {
//!     Ok(report) => println!("{report}\nAll good!"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```
//!
//! Reading a report that is already in memory:
//!
//! ```
//! use npm_audit_parser::{IgnoreSet, ReportAccumulator, Verdict};
//!
//! let mut acc = ReportAccumulator::new();
//! acc.update("│ More info │ https://npmjs.com/advisories/11");
//! acc.update("8   │\n│ More info │ https://npmjs.com/advisories/975   │\n");
//!
//! let verdict = acc.finalize(&IgnoreSet::parse(Some("118")));
//! let Verdict::Failed(unresolved) = verdict else { panic!() };
//! assert_eq!(
//!     unresolved.to_string(),
//!     "1 vulnerabilities found. Node security advisories: 975"
//! );
//! ```

mod advisory;
mod error;
mod extractor;
mod ignore;
mod report;
mod runner;
mod structured;

pub use advisory::AdvisoryId;
pub use error::AuditError;
pub use extractor::{extract_advisory_ids, ADVISORY_MARKERS, CANDIDATE_WIDTH};
pub use ignore::{IgnoreSet, IGNORE_SEPARATOR};
pub use report::{ReportAccumulator, ReportState, Unresolved, Verdict};
pub use runner::{AuditCommand, AuditOptions, AuditOutcome, AuditRunner, ReportFormat};
pub use structured::read_json_report;
