// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn task_state_serializes_screaming() {
    assert_eq!(serde_json::to_value(TaskState::Pending).unwrap(), json!("PENDING"));
    assert_eq!(serde_json::to_value(TaskState::Success).unwrap(), json!("SUCCESS"));
    assert_eq!(TaskState::Failure.to_string(), "FAILURE");
}

#[test]
fn receipt_shape_matches_http_contract() {
    let receipt = TaskReceipt {
        uuid: "u1".into(),
        url: "http://example.test/hook".into(),
        queue: Some("q1".into()),
        method: "POST".into(),
        params: HashMap::from([("x".to_string(), "1".to_string())]),
        data: HashMap::from([("y".to_string(), "2".to_string())]),
        broker: "amqp://127.0.0.1:5672//".into(),
    };
    let raw = serde_json::to_value(&receipt).unwrap();
    assert_eq!(raw["url"], json!("http://example.test/hook"));
    assert_eq!(raw["params"], json!({"x": "1"}));
    assert_eq!(raw["data"], json!({"y": "2"}));
}

#[test]
fn task_result_defaults_result_to_null() {
    let result: TaskResult =
        serde_json::from_value(json!({"id": "u1", "state": "SUCCESS"})).unwrap();
    assert_eq!(result.state, TaskState::Success);
    assert_eq!(result.result, Value::Null);
}
