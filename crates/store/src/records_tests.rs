// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn instance(name: &str) -> InstanceRecord {
    InstanceRecord {
        name: name.to_string(),
        app: "drover".to_string(),
        queues: BTreeSet::new(),
        max_concurrency: 1,
        min_concurrency: 1,
        pool: None,
        is_enabled: true,
        created_at: Utc::now(),
        broker: None,
        arguments: None,
        extra_config: None,
    }
}

#[test]
fn direct_queue_is_prefixed_name() {
    assert_eq!(instance("n1").direct_queue(), "dq.n1");
}

#[test]
fn queue_set_serializes_comma_joined() {
    let mut record = instance("n1");
    record.queues = split_queues("b,a,b,,c");
    let raw = serde_json::to_value(&record).unwrap();
    assert_eq!(raw["queues"], json!("a,b,c"));

    let decoded: InstanceRecord = serde_json::from_value(raw).unwrap();
    assert_eq!(decoded.queues, record.queues);
}

#[test]
fn work_dir_is_created_on_first_access() {
    let root = tempfile::tempdir().unwrap();
    let record = instance("n1");
    let dir = record.work_dir(root.path()).unwrap();
    assert!(dir.is_dir());
    assert_eq!(record.pidfile(root.path()), dir.join("worker.pid"));
    assert_eq!(record.logfile(root.path()), dir.join("worker.log"));
    assert_eq!(record.statedb(root.path()), dir.join("worker.statedb"));
}

#[test]
fn queue_options_parse_to_map() {
    let mut queue = QueueRecord::new("q1");
    queue.options = Some(r#"{"durable": true}"#.to_string());
    assert_eq!(queue.options_map()["durable"], json!(true));
}

#[test]
fn malformed_queue_options_behave_as_empty() {
    let mut queue = QueueRecord::new("q1");
    queue.options = Some("{not json".to_string());
    assert!(queue.options_map().is_empty());

    queue.options = Some(r#"["not", "an", "object"]"#.to_string());
    assert!(queue.options_map().is_empty());

    queue.options = None;
    assert!(queue.options_map().is_empty());
}
