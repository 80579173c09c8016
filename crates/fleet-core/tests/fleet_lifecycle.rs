// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end fleet behaviour over in-memory fakes.

use fleet_core::{Fleet, Worker, WorkerId, WorkerSpec, WorkerStatus};
use fleet_dry_tests::{InMemoryRegistrationStore, RunScript, ScriptedFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn fleet_with(store: &InMemoryRegistrationStore, factory: &ScriptedFactory) -> Fleet {
    Fleet::new(Arc::new(store.clone()), Arc::new(factory.clone()))
}

async fn settle(fleet: &Fleet, ids: &[WorkerId], status: WorkerStatus) {
    timeout(Duration::from_secs(2), async {
        while !ids
            .iter()
            .all(|id| fleet.detail(id).is_some_and(|d| d.status == status))
        {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn added_worker_is_visible_before_it_reports_anything() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::Silent);
    let fleet = fleet_with(&store, &factory);

    let id = fleet.add(WorkerSpec::proxied("alice7", "http://p:8080"));
    let detail = fleet.detail(&id).unwrap();
    assert_eq!(detail.status, WorkerStatus::Disconnected);
    assert_eq!(detail.proxy_url.as_deref(), Some("http://p:8080"));
    assert!(detail.logs.is_empty());
    assert_eq!(store.lines(), ["alice7==http://p:8080"]);

    fleet.shutdown().await;
}

#[tokio::test]
async fn detail_logs_are_newest_first_and_capped() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::Silent);
    let fleet = fleet_with(&store, &factory);
    let id = fleet.enroll(WorkerSpec::direct("chatty9"));

    let worker = factory.find("chatty9").unwrap();
    for n in 0..60 {
        worker.log(format!("line {n}"));
    }
    let logs = fleet.detail(&id).unwrap().logs;
    assert_eq!(logs.len(), fleet_core::DETAIL_LOG_LIMIT);
    assert_eq!(logs[0].message(), "line 59");
    assert_eq!(logs[49].message(), "line 10");
}

#[tokio::test]
async fn remove_is_idempotent() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::UntilStopped);
    let fleet = fleet_with(&store, &factory);

    let id = fleet.add(WorkerSpec::direct("bob2"));
    settle(&fleet, &[id], WorkerStatus::Connected).await;

    assert!(fleet.remove(id).await);
    assert!(!fleet.remove(id).await);
    assert!(fleet.detail(&id).is_none());
    assert!(fleet.overview().is_empty());
    assert_eq!(factory.find("bob2").unwrap().stop_count(), 1);
    // Removal never touches the persisted list.
    assert_eq!(store.lines(), ["bob2"]);
}

#[tokio::test]
async fn same_user_twice_is_persisted_once_but_registered_twice() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::Silent);
    let fleet = fleet_with(&store, &factory);

    let first = fleet.add(WorkerSpec::direct("A"));
    let second = fleet.add(WorkerSpec::proxied("A", "http://other"));
    assert_ne!(first, second);
    assert_eq!(fleet.overview().len(), 2);
    assert_eq!(store.lines(), ["A"]);

    fleet.shutdown().await;
}

#[tokio::test]
async fn restore_runs_every_persisted_record_without_rewriting() {
    let store = InMemoryRegistrationStore::with_text("u1==http://p1\nu2\n");
    let factory = ScriptedFactory::new(RunScript::UntilStopped);
    let fleet = fleet_with(&store, &factory);

    let ids = fleet.restore();
    assert_eq!(ids.len(), 2);
    settle(&fleet, &ids, WorkerStatus::Connected).await;

    let rows = fleet.overview();
    assert_eq!(rows[0].user_id, "u1");
    assert_eq!(rows[0].proxy_url.as_deref(), Some("http://p1"));
    assert_eq!(rows[1].user_id, "u2");
    assert_eq!(rows[1].proxy_url, None);
    assert_eq!(store.contents(), "u1==http://p1\nu2\n");
    assert_eq!(store.load_count(), 1);
    assert_eq!(factory.built().iter().map(|w| w.run_count()).sum::<usize>(), 2);

    fleet.shutdown().await;
}

#[tokio::test]
async fn restore_of_empty_store_does_nothing() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::default();
    let fleet = fleet_with(&store, &factory);

    assert!(fleet.restore().is_empty());
    assert!(factory.built().is_empty());
    assert_eq!(store.append_count(), 0);
}

#[tokio::test]
async fn remove_all_stops_each_worker_once() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::UntilStopped);
    let fleet = fleet_with(&store, &factory);

    let ids: Vec<_> = ["a1", "b2", "c3"]
        .into_iter()
        .map(|u| fleet.add(WorkerSpec::direct(u)))
        .collect();
    settle(&fleet, &ids, WorkerStatus::Connected).await;

    let removed = fleet.remove_all().await;
    assert_eq!(removed, ids);
    assert!(fleet.overview().is_empty());
    for worker in factory.built() {
        assert_eq!(worker.stop_count(), 1);
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }
}

#[tokio::test]
async fn batch_registers_valid_lines_and_launch_is_separate() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::UntilStopped);
    let fleet = fleet_with(&store, &factory);

    let ids = fleet.load_batch("u1==http://p1\n\n==http://orphan\nu2\n");
    assert_eq!(ids.len(), 2);
    assert_eq!(store.lines(), ["u1==http://p1", "u2"]);
    assert!(factory.built().iter().all(|w| w.run_count() == 0));

    fleet.launch_all(&ids);
    settle(&fleet, &ids, WorkerStatus::Connected).await;

    fleet.shutdown().await;
    for worker in factory.built() {
        assert_eq!(worker.status(), WorkerStatus::Stopped);
    }
}

#[tokio::test]
async fn bare_word_in_batch_registers_nothing() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::Silent);
    let fleet = fleet_with(&store, &factory);

    let ids = fleet.load_batch("u1==http://p1\nbadline\nu2\n");
    assert_eq!(ids.len(), 2);
    let users: Vec<_> = fleet.overview().into_iter().map(|row| row.user_id).collect();
    assert_eq!(users, ["u1", "u2"]);
    assert_eq!(store.lines(), ["u1==http://p1", "u2"]);
    assert!(factory.find("badline").is_none());
}

#[tokio::test]
async fn failing_store_does_not_block_registration() {
    let store = InMemoryRegistrationStore::new();
    store.set_fail_on_append(true);
    let factory = ScriptedFactory::new(RunScript::Silent);
    let fleet = fleet_with(&store, &factory);

    let id = fleet.add(WorkerSpec::direct("u1"));
    assert!(fleet.detail(&id).is_some());
    assert_eq!(store.append_count(), 1);
    assert!(store.contents().is_empty());

    fleet.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crashing_worker_stays_registered_and_siblings_run() {
    let store = InMemoryRegistrationStore::new();
    let factory = ScriptedFactory::new(RunScript::UntilStopped)
        .script_for("doomed1", RunScript::Panic)
        .script_for("failing2", RunScript::Fail);
    let fleet = fleet_with(&store, &factory);

    let doomed = fleet.add(WorkerSpec::direct("doomed1"));
    let ok = fleet.add(WorkerSpec::direct("ok3"));
    let failing = fleet.add(WorkerSpec::direct("failing2"));

    timeout(Duration::from_secs(2), async {
        while fleet.supervisor().is_active(&doomed) || fleet.supervisor().is_active(&failing) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    settle(&fleet, &[ok], WorkerStatus::Connected).await;
    assert!(fleet.supervisor().is_active(&ok));

    let crashed = fleet.detail(&doomed).unwrap();
    assert_eq!(crashed.status, WorkerStatus::Stopped);
    assert_eq!(crashed.logs[0].message(), "fault: panicked: scripted panic");

    let failed = fleet.detail(&failing).unwrap();
    assert_eq!(failed.status, WorkerStatus::Stopped);
    assert_eq!(failed.logs[0].message(), "fault: protocol error: scripted failure");

    let steady = fleet.detail(&ok).unwrap();
    assert_eq!(steady.logs.len(), 1);
    assert_eq!(steady.logs[0].message(), "connected");
    assert_eq!(fleet.overview().len(), 3);

    fleet.shutdown().await;
}
