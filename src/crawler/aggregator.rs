//! Collects accepted search results across all keywords.
//!
//! Records are kept in emission order (batch order, then page order, then
//! in-page order). The collection is read once, through
//! [`ResultAggregator::finish`]. An optional stream forwards each record to a
//! consumer as soon as it is accepted, tagged with its position so the
//! consumer can restore the order later.

use crate::models::ResultRecord;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

/// A record together with its position in the final collection.
pub type Sequenced = (usize, ResultRecord);

#[derive(Debug, Default)]
pub struct ResultAggregator {
    records: Vec<ResultRecord>,
    links: HashSet<String>,
    stream: Option<UnboundedSender<Sequenced>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every accepted record to `sender` as well.
    pub fn with_stream(sender: UnboundedSender<Sequenced>) -> Self {
        Self {
            stream: Some(sender),
            ..Self::default()
        }
    }

    /// Append a record. Returns `false` (and keeps nothing) if its link is
    /// already present; the engine's visited set makes that unreachable.
    pub fn push(&mut self, record: ResultRecord) -> bool {
        if !self.links.insert(record.link.clone()) {
            error!(link = %record.link, "Duplicate link reached the aggregator; dropping");
            return false;
        }
        let seq = self.records.len();
        if let Some(stream) = &self.stream {
            if stream.send((seq, record.clone())).is_err() {
                debug!("Result stream receiver dropped; continuing without streaming");
                self.stream = None;
            }
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of records per keyword, in first-seen keyword order.
    pub fn counts_by_keyword(&self) -> Vec<(String, usize)> {
        let counts: HashMap<&str, usize> = self.records.iter().map(|r| r.keyword.as_str()).counts();
        self.records
            .iter()
            .map(|r| r.keyword.as_str())
            .unique()
            .map(|k| (k.to_string(), counts[k]))
            .collect()
    }

    /// Close the stream (if any) and hand over the collection.
    pub fn finish(self) -> Vec<ResultRecord> {
        self.records
    }
}
