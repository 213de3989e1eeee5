// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A well-behaved loop that drains pings until stopped.
struct Responsive {
    after_ran: Arc<AtomicBool>,
}

#[async_trait]
impl Task for Responsive {
    fn name(&self) -> String {
        "responsive".to_string()
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        while !ctx.should_stop() {
            ctx.respond_to_ping();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    async fn after(&mut self) {
        self.after_ran.store(true, Ordering::SeqCst);
    }
}

/// A loop that never answers pings.
struct Mute;

#[async_trait]
impl Task for Mute {
    fn name(&self) -> String {
        "mute".to_string()
    }

    async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        ctx.cancelled().await;
        Ok(())
    }
}

#[tokio::test]
async fn ping_round_trips_through_the_run_loop() {
    let hub = SignalHub::new();
    let mut cell = TaskCell::new(Responsive { after_ran: Arc::new(AtomicBool::new(false)) }, hub);
    let handle = cell.start().await.unwrap();
    assert!(handle.ping(Duration::from_secs(1)).await);
    handle.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn ping_times_out_on_a_mute_loop() {
    let hub = SignalHub::new();
    let mut cell = TaskCell::new(Mute, hub);
    let handle = cell.start().await.unwrap();
    assert!(!handle.ping(Duration::from_millis(50)).await);
    handle.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn second_start_fails() {
    let hub = SignalHub::new();
    let mut cell = TaskCell::new(Mute, hub);
    let _handle = cell.start().await.unwrap();
    assert!(matches!(cell.start().await, Err(TaskError::AlreadyStarted)));
    cell.stop(true, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn stop_runs_after_and_unblocks_join() {
    let hub = SignalHub::new();
    let after_ran = Arc::new(AtomicBool::new(false));
    let mut cell = TaskCell::new(Responsive { after_ran: Arc::clone(&after_ran) }, hub);
    let handle = cell.start().await.unwrap();
    handle.stop(true, Duration::from_secs(1)).await;
    assert!(after_ran.load(Ordering::SeqCst));
    // exit event is one-shot: a second join returns immediately
    handle.join(Duration::from_millis(10)).await.unwrap();
}

#[tokio::test]
async fn lifecycle_signals_are_emitted_in_order() {
    let hub = SignalHub::new();
    let mut rx = hub.subscribe();
    let mut cell =
        TaskCell::new(Responsive { after_ran: Arc::new(AtomicBool::new(false)) }, hub.clone());
    let handle = cell.start().await.unwrap();
    handle.stop(true, Duration::from_secs(1)).await;

    let mut seen = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        seen.push(signal);
    }
    let position = |s: &Signal| seen.iter().position(|x| x == s);
    let pre_start = position(&Signal::PreStart("responsive".into())).unwrap();
    let post_start = position(&Signal::PostStart("responsive".into())).unwrap();
    let pre_shutdown = position(&Signal::PreShutdown("responsive".into())).unwrap();
    let post_shutdown = position(&Signal::PostShutdown("responsive".into())).unwrap();
    assert!(pre_start < post_start);
    assert!(post_start < pre_shutdown);
    assert!(pre_shutdown < post_shutdown);
    assert!(seen.contains(&Signal::Exit("responsive".into())));
}

#[tokio::test]
async fn timers_fire_until_stop_cancels_them() {
    struct Ticky {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Task for Ticky {
        fn name(&self) -> String {
            "ticky".to_string()
        }

        async fn before(&mut self, timers: &Timers) -> Result<(), TaskError> {
            let count = Arc::clone(&self.count);
            timers.start_periodic(Duration::from_millis(10), move || {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
            Ok(())
        }

        async fn run(&mut self, ctx: &mut TaskContext) -> Result<(), TaskError> {
            ctx.cancelled().await;
            Ok(())
        }
    }

    let count = Arc::new(AtomicUsize::new(0));
    let mut cell = TaskCell::new(Ticky { count: Arc::clone(&count) }, SignalHub::new());
    let handle = cell.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.stop(true, Duration::from_secs(1)).await;
    let after_stop = count.load(Ordering::SeqCst);
    assert!(after_stop >= 2, "timer should have ticked, got {after_stop}");
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(count.load(Ordering::SeqCst), after_stop, "timer kept ticking after stop");
}
