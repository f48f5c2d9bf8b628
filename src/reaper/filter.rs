//! Line-oriented wire filter shared by the reaper client and daemon.
//!
//! A filter is one line of ampersand-joined `label=<value>` terms, where
//! each value is a URL-encoded `key=value` label equality. The daemon
//! replies `ACK` once the filter is registered; connection closure is the
//! only subsequent signal on the wire.

use std::collections::HashMap;

use crate::reaper::error::{ReaperError, Result};

/// The daemon's acknowledgement line.
pub const ACK: &str = "ACK";

/// A label-equality filter describing which resources to destroy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapFilter {
    labels: Vec<(String, String)>,
}

impl ReapFilter {
    /// Empty filter; matches nothing until terms are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label equality term.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// The label equality terms, in send order.
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// Encode as one wire line (without the trailing newline).
    pub fn encode(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("label={}", urlencoding::encode(&format!("{k}={v}"))))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Parse a wire line. Rejects unknown term keys and malformed terms.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ReaperError::BadFilter {
                line: line.to_string(),
                reason: "empty filter".to_string(),
            });
        }

        let mut labels = Vec::new();
        for term in line.split('&') {
            let Some((key, value)) = term.split_once('=') else {
                return Err(ReaperError::BadFilter {
                    line: line.to_string(),
                    reason: format!("term '{term}' is not key=value"),
                });
            };
            if key != "label" {
                return Err(ReaperError::BadFilter {
                    line: line.to_string(),
                    reason: format!("unknown term key '{key}'"),
                });
            }
            let decoded = urlencoding::decode(value).map_err(|e| ReaperError::BadFilter {
                line: line.to_string(),
                reason: format!("undecodable term value: {e}"),
            })?;
            let Some((label_key, label_value)) = decoded.split_once('=') else {
                return Err(ReaperError::BadFilter {
                    line: line.to_string(),
                    reason: format!("label term '{decoded}' is not key=value"),
                });
            };
            labels.push((label_key.to_string(), label_value.to_string()));
        }

        Ok(Self { labels })
    }

    /// Whether a resource with `labels` matches every term.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl std::fmt::Display for ReapFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
