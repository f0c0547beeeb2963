//! Reads advisory ids from `npm audit --json`.
//!
//! Two shapes are understood:
//! - npm 6: `{"advisories": {"118": {"id": 118, ...}}}`
//! - npm 7+: `{"vulnerabilities": {"lodash": {"via": [{"source": 1523, ...}, "other-pkg"]}}}`
//!
//! Anything else falls back to scraping the text for advisory URLs.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::advisory::AdvisoryId;
use crate::extractor::extract_advisory_ids;

#[derive(Debug, Deserialize)]
struct AuditJson {
    #[serde(default)]
    advisories: Option<BTreeMap<String, LegacyAdvisory>>,
    #[serde(default)]
    vulnerabilities: Option<BTreeMap<String, Vulnerability>>,
}

#[derive(Debug, Deserialize)]
struct LegacyAdvisory {
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Vulnerability {
    #[serde(default)]
    via: Vec<Via>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Via {
    Advisory {
        #[serde(default)]
        source: Option<Value>,
    },
    /// Name of another vulnerable package in the chain.
    Package(String),
}

/// Extract advisory ids from a complete JSON report.
///
/// Returns ids in document order without duplicates removed; callers dedup.
pub fn read_json_report(text: &str) -> Vec<AdvisoryId> {
    match parse_json(text) {
        Some(ids) => ids,
        None => {
            warn!("audit output is not a recognised JSON report, scanning it as text");
            extract_advisory_ids(text)
        }
    }
}

fn parse_json(text: &str) -> Option<Vec<AdvisoryId>> {
    let report: AuditJson = match serde_json::from_str(text) {
        Ok(report) => report,
        Err(e) => {
            debug!("failed to parse audit json: {}", e);
            return None;
        }
    };
    if report.advisories.is_none() && report.vulnerabilities.is_none() {
        return None;
    }

    let mut ids = Vec::new();
    for (key, advisory) in report.advisories.iter().flatten() {
        ids.extend(AdvisoryId::parse(key));
        ids.extend(advisory.id.as_ref().and_then(id_from_value));
    }
    for vulnerability in report.vulnerabilities.iter().flat_map(|v| v.values()) {
        for via in &vulnerability.via {
            if let Via::Advisory {
                source: Some(source),
            } = via
            {
                ids.extend(id_from_value(source));
            }
        }
    }
    Some(ids)
}

fn id_from_value(value: &Value) -> Option<AdvisoryId> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| AdvisoryId::parse(&n.to_string())),
        Value::String(s) => AdvisoryId::parse(s),
        _ => None,
    }
}
