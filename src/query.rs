use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConsoleLogEntry, NetworkRequestEntry, ResourceType};

pub const DEFAULT_LIMIT: usize = 50;

/// Anything recorded with an arrival time
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for ConsoleLogEntry {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for NetworkRequestEntry {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Time window and page over a recorded stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventQuery {
    pub limit: usize,
    pub offset: usize,
    /// Inclusive lower bound
    pub time_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub time_to: Option<DateTime<Utc>>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            time_from: None,
            time_to: None,
        }
    }
}

impl EventQuery {
    fn in_window(&self, ts: DateTime<Utc>) -> bool {
        self.time_from.is_none_or(|from| ts >= from) && self.time_to.is_none_or(|to| ts <= to)
    }
}

/// Filter by time window and `extra`, sort newest first, then page.
///
/// The sort is stable so entries sharing a timestamp keep arrival order.
pub fn query<T, F>(entries: &[T], q: &EventQuery, extra: F) -> Vec<T>
where
    T: Timestamped + Clone,
    F: Fn(&T) -> bool,
{
    let mut matched: Vec<&T> = entries
        .iter()
        .filter(|e| q.in_window(e.timestamp()) && extra(e))
        .collect();
    matched.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));

    matched
        .into_iter()
        .skip(q.offset)
        .take(q.limit)
        .cloned()
        .collect()
}

pub fn query_console(entries: &[ConsoleLogEntry], q: &EventQuery) -> Vec<ConsoleLogEntry> {
    query(entries, q, |_| true)
}

pub fn query_network(
    entries: &[NetworkRequestEntry],
    q: &EventQuery,
    resource_type: Option<ResourceType>,
) -> Vec<NetworkRequestEntry> {
    query(entries, q, |e| {
        resource_type.is_none_or(|wanted| e.resource_type == wanted)
    })
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
