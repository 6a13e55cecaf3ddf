//! Topic names
//!
//! A `Topic` is a normalised name: surrounding whitespace trimmed and
//! upper-cased, so `" aapl"` and `"AAPL"` address the same publisher.
//! Clients send topic interest as a comma-separated list.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Normalise `raw`. Blank names are not topics.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim();
        if name.is_empty() {
            None
        } else {
            Some(Self(name.to_uppercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a comma-separated topic list. Duplicates collapse; empty entries are
/// dropped, so an empty frame means "no topics".
pub fn parse_topic_list(text: &str) -> BTreeSet<Topic> {
    text.split(',').filter_map(Topic::parse).collect()
}
