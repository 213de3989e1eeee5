// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::supervisor::OfflineSupervisor;
use drover_adapters::{FakeRunner, StoreQueueDirectory};
use drover_broker::{BrokerRegistry, MemoryTransport};

fn store() -> Store {
    Store::in_memory(MemoryTransport::unique_url())
}

fn instance_actor(store: &Store) -> InstanceActorState {
    let registry =
        Arc::new(BrokerRegistry::new(Arc::new(MemoryTransport), Duration::from_millis(100)));
    let dir = std::env::temp_dir().join(format!("drover-test-{}", drover_core::uuid()));
    let config = Config {
        instance_dir: dir,
        broker_url: store.default_broker_url().to_string(),
        ..Config::default()
    };
    let adapter = Arc::new(
        InstanceAdapter::new(
            store.clone(),
            registry,
            Arc::new(FakeRunner::new()),
            Arc::new(StoreQueueDirectory::new(store.clone())),
            &config,
        )
        .with_reply_timeout(Duration::from_millis(50)),
    );
    let local = Arc::new(LocalInstanceManager::new(store.clone(), Arc::new(OfflineSupervisor)));
    InstanceActorState { spec: instance_spec(), store: store.clone(), local, adapter }
}

#[tokio::test]
async fn app_actor_add_get_delete() {
    let store = store();
    let actor = AppActorState {
        spec: app_spec(),
        store: store.clone(),
        instance_dir: std::env::temp_dir(),
    };

    let added = actor
        .dispatch("add", &json!({"name": "a1", "arguments": "-A proj"}))
        .await
        .unwrap();
    assert_eq!(added["name"], json!("a1"));
    assert_eq!(added["broker"], json!(store.default_broker_url()));

    let got = actor.dispatch("get", &json!({"name": "a1"})).await.unwrap();
    assert_eq!(got["arguments"], json!("-A proj"));

    // a miss yields to the next peer
    assert!(matches!(
        actor.dispatch("get", &json!({"name": "ghost"})).await,
        Err(HandlerError::Next)
    ));

    actor.dispatch("delete", &json!({"name": "a1"})).await.unwrap();
    assert!(store.app_get("a1").is_none());
}

#[tokio::test]
async fn app_actor_metrics_reports_numbers() {
    let actor = AppActorState {
        spec: app_spec(),
        store: store(),
        instance_dir: std::env::temp_dir(),
    };
    let metrics = actor.dispatch("metrics", &json!({})).await.unwrap();
    assert!(metrics["load_average"].is_array());
    assert!(metrics["disk_use"].is_number());
}

#[tokio::test]
async fn queue_actor_round_trip_and_meta() {
    let store = store();
    let actor = QueueActorState { spec: queue_spec(), store: store.clone() };

    let added = actor
        .dispatch(
            "add",
            &json!({
                "name": "q1", "exchange": "q1", "exchange_type": "direct",
                "routing_key": "q1", "options": {"durable": true}
            }),
        )
        .await
        .unwrap();
    assert_eq!(added["name"], json!("q1"));

    let got = actor.dispatch("get", &json!({"name": "q1"})).await.unwrap();
    assert_eq!(got["exchange_type"], json!("direct"));
    assert_eq!(store.queue_get("q1").unwrap().options_map()["durable"], json!(true));

    assert_eq!(actor.meta()["queues"], vec!["q1".to_string()]);

    actor.dispatch("delete", &json!({"name": "q1"})).await.unwrap();
    assert!(matches!(
        actor.dispatch("get", &json!({"name": "q1"})).await,
        Err(HandlerError::Next)
    ));
}

#[tokio::test]
async fn instance_actor_mutations_and_meta() {
    let store = store();
    let actor = instance_actor(&store);

    let added = actor
        .dispatch("add", &json!({"name": "n1", "max_concurrency": 2, "min_concurrency": 1}))
        .await
        .unwrap();
    assert_eq!(added["name"], json!("n1"));
    assert_eq!(added["max_concurrency"], json!(2));
    assert_eq!(actor.meta()["instances"], vec!["n1".to_string()]);

    actor.dispatch("disable", &json!({"name": "n1"})).await.unwrap();
    assert!(!store.instance_get("n1").unwrap().is_enabled);

    actor.dispatch("add_consumer", &json!({"name": "n1", "queue": "q1"})).await.unwrap();
    assert!(store.instance_get("n1").unwrap().queues.contains("q1"));

    let removed =
        actor.dispatch("remove_queue_from_all", &json!({"queue": "q1"})).await.unwrap();
    assert_eq!(removed, json!(["n1"]));

    actor.dispatch("remove", &json!({"name": "n1"})).await.unwrap();
    assert!(store.instance_get("n1").is_none());
    assert!(actor.meta()["instances"].is_empty());
}

#[tokio::test]
async fn instance_actor_rejects_bad_concurrency() {
    let actor = instance_actor(&store());
    let err = actor
        .dispatch("add", &json!({"name": "n1", "max_concurrency": 1, "min_concurrency": 3}))
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::Failure { .. }));
}

#[tokio::test]
async fn branch_actor_shutdown_is_addressed() {
    let exit = CancellationToken::new();
    let info = BranchInfo {
        id: "b1".into(),
        numc: 2,
        sup_interval: 60.0,
        loglevel: "info".into(),
        logfile: None,
        port: Some(8000),
        url: Some("http://127.0.0.1:8000".into()),
    };
    let actor = BranchActorState { spec: branch_spec(), info, exit: exit.clone() };

    assert_eq!(actor.dispatch("id", &json!({})).await.unwrap(), json!("b1"));
    let about = actor.dispatch("about", &json!({})).await.unwrap();
    assert_eq!(about["numc"], json!(2));

    // addressed to someone else: yield, do not exit
    assert!(matches!(
        actor.dispatch("shutdown", &json!({"id": "b2"})).await,
        Err(HandlerError::Next)
    ));
    assert!(!exit.is_cancelled());

    actor.dispatch("shutdown", &json!({"id": "*"})).await.unwrap();
    assert!(exit.is_cancelled());
}

#[tokio::test]
async fn announce_covers_every_meta_carrying_actor() {
    let store = store();
    store.queue_add("q1", None, None, None, None);
    let exit = CancellationToken::new();
    let info = BranchInfo {
        id: "b1".into(),
        numc: 2,
        sup_interval: 60.0,
        loglevel: "info".into(),
        logfile: None,
        port: None,
        url: None,
    };
    let actors: Vec<Arc<dyn ActorState>> = vec![
        Arc::new(BranchActorState { spec: branch_spec(), info, exit }),
        Arc::new(QueueActorState { spec: queue_spec(), store }),
    ];
    let announce = Controller::build_announce("b1", &actors);
    assert_eq!(announce.branch_id, "b1");
    assert_eq!(announce.advertised("Branch", "this"), Some(&["b1".to_string()][..]));
    assert_eq!(announce.advertised("Queue", "queues"), Some(&["q1".to_string()][..]));
}
