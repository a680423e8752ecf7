// Unit tests for the event query layer

use super::*;
use crate::types::ConsoleLevel;
use chrono::TimeZone;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
}

fn log(level: ConsoleLevel, text: &str, ts: DateTime<Utc>) -> ConsoleLogEntry {
    ConsoleLogEntry {
        level,
        text: text.to_string(),
        timestamp: ts,
        location: None,
    }
}

fn request(url: &str, kind: ResourceType, ts: DateTime<Utc>) -> NetworkRequestEntry {
    NetworkRequestEntry {
        url: url.to_string(),
        method: "GET".to_string(),
        headers: BTreeMap::new(),
        timestamp: ts,
        resource_type: kind,
    }
}

fn texts(entries: &[ConsoleLogEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.text.as_str()).collect()
}

#[test]
fn test_newest_first_with_limit() {
    let logs = vec![
        log(ConsoleLevel::Log, "first", at(10, 0)),
        log(ConsoleLevel::Error, "second", at(10, 1)),
        log(ConsoleLevel::Log, "third", at(10, 2)),
    ];
    let q = EventQuery {
        limit: 2,
        ..Default::default()
    };

    let out = query_console(&logs, &q);
    assert_eq!(texts(&out), vec!["third", "second"]);
    assert_eq!(out[1].level, ConsoleLevel::Error);
}

#[test]
fn test_ties_keep_arrival_order() {
    let logs = vec![
        log(ConsoleLevel::Log, "a", at(10, 0)),
        log(ConsoleLevel::Log, "b", at(10, 5)),
        log(ConsoleLevel::Log, "c", at(10, 5)),
        log(ConsoleLevel::Log, "d", at(10, 5)),
    ];
    let out = query_console(&logs, &EventQuery::default());
    assert_eq!(texts(&out), vec!["b", "c", "d", "a"]);
}

#[test]
fn test_time_window_is_inclusive() {
    let logs: Vec<_> = (0..6)
        .map(|m| log(ConsoleLevel::Info, &m.to_string(), at(12, m)))
        .collect();

    let from_only = EventQuery {
        time_from: Some(at(12, 3)),
        ..Default::default()
    };
    assert_eq!(texts(&query_console(&logs, &from_only)), vec!["5", "4", "3"]);

    let to_only = EventQuery {
        time_to: Some(at(12, 1)),
        ..Default::default()
    };
    assert_eq!(texts(&query_console(&logs, &to_only)), vec!["1", "0"]);

    let both = EventQuery {
        time_from: Some(at(12, 2)),
        time_to: Some(at(12, 3)),
        ..Default::default()
    };
    assert_eq!(texts(&query_console(&logs, &both)), vec!["3", "2"]);

    let inverted = EventQuery {
        time_from: Some(at(12, 4)),
        time_to: Some(at(12, 1)),
        ..Default::default()
    };
    assert!(query_console(&logs, &inverted).is_empty());
}

#[test]
fn test_pagination_sizes() {
    let logs: Vec<_> = (0..7)
        .map(|m| log(ConsoleLevel::Log, &m.to_string(), at(9, m)))
        .collect();

    for (limit, offset) in [(3, 0), (3, 5), (10, 0), (0, 0), (2, 7), (5, 100)] {
        let q = EventQuery {
            limit,
            offset,
            ..Default::default()
        };
        let expected = limit.min(logs.len().saturating_sub(offset));
        assert_eq!(query_console(&logs, &q).len(), expected, "limit {limit} offset {offset}");
    }

    let q = EventQuery {
        limit: 2,
        offset: 2,
        ..Default::default()
    };
    assert_eq!(texts(&query_console(&logs, &q)), vec!["4", "3"]);
}

#[test]
fn test_network_resource_type_filter() {
    let requests = vec![
        request("http://x/", ResourceType::Document, at(8, 0)),
        request("http://x/app.js", ResourceType::Script, at(8, 1)),
        request("http://x/api/a", ResourceType::Fetch, at(8, 2)),
        request("http://x/api/b", ResourceType::Fetch, at(8, 3)),
    ];

    let out = query_network(&requests, &EventQuery::default(), Some(ResourceType::Fetch));
    let urls: Vec<_> = out.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls, vec!["http://x/api/b", "http://x/api/a"]);

    let windowed = EventQuery {
        time_to: Some(at(8, 2)),
        ..Default::default()
    };
    let out = query_network(&requests, &windowed, Some(ResourceType::Fetch));
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].url, "http://x/api/a");

    assert_eq!(query_network(&requests, &EventQuery::default(), None).len(), 4);
}

#[test]
fn test_query_does_not_mutate_buffer() {
    let logs = vec![
        log(ConsoleLevel::Log, "a", at(1, 0)),
        log(ConsoleLevel::Log, "b", at(2, 0)),
    ];
    let _ = query_console(&logs, &EventQuery::default());
    assert_eq!(texts(&logs), vec!["a", "b"]);
}
