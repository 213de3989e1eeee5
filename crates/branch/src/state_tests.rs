// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::supervisor::Completion;
use drover_store::InstanceRecord;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct CountingSupervisor {
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

impl Supervise for CountingSupervisor {
    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        false
    }

    fn verify(&self, _instances: Vec<InstanceRecord>, _ratelimit: bool) -> Arc<Completion> {
        Completion::completed()
    }

    fn restart(&self, _instances: Vec<InstanceRecord>) -> Arc<Completion> {
        Completion::completed()
    }

    fn shutdown(&self, _instances: Vec<InstanceRecord>) -> Arc<Completion> {
        Completion::completed()
    }
}

#[test]
fn revival_is_stamped_and_resumes_the_supervisor() {
    let state = BranchState::new();
    assert!(state.time_since_broker_revived().is_none());

    let supervisor = Arc::new(CountingSupervisor::default());
    state.set_supervisor(supervisor.clone());
    state.on_broker_revive();

    assert!(state.time_since_broker_revived().is_some());
    assert_eq!(supervisor.resumes.load(Ordering::SeqCst), 1);
}

#[test]
fn connection_error_pauses_the_supervisor() {
    let state = BranchState::new();
    let supervisor = Arc::new(CountingSupervisor::default());
    state.set_supervisor(supervisor.clone());

    state.on_connection_error(&"connection refused", Duration::from_secs(1));
    assert_eq!(supervisor.pauses.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_supervisor_falls_back_to_offline_null_object() {
    let state = BranchState::new();
    // must not panic, and the completion is pre-resolved
    state.supervisor().pause();
    state.on_broker_revive();
    let completion = state.supervisor().verify(vec![], true);
    assert!(completion.is_complete());
}
