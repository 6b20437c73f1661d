use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{RuntimeError, TaskError};
use crate::events::{Event, EventKind};
use crate::policies::RetryPolicy;
use crate::registry::{Registry, RegistryBuilder};
use crate::tasks::TaskId;
use crate::{Config, Engine, TaskStatus};

/// Dependency table used by most tests: `b → a`, `c → a`, `top → b, c`.
fn deps_of(name: &str) -> Vec<TaskId> {
    match name {
        "b" | "c" => vec!["a".into()],
        "top" => vec!["b".into(), "c".into()],
        _ => vec![],
    }
}

fn base() -> RegistryBuilder<u32> {
    Registry::builder().dependencies(|d| Ok(deps_of(d.name())))
}

/// Waits (in small steps) until `cond` holds; background cleanup runs on spawned tasks.
async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn single_task_resolves() {
    let registry = base().run(|_, _, _| async { Ok(3) }).build().unwrap();
    let engine = Engine::new(registry);

    assert_eq!(engine.run("a").await.unwrap(), 3);
}

#[tokio::test]
async fn dependent_receives_dependency_values() {
    let registry = base()
        .run(|d, deps, _| {
            let name = d.name().to_string();
            async move {
                match name.as_str() {
                    "a" => Ok(3),
                    "b" => Ok(5 + deps[0]),
                    _ => Err(TaskError::fail("unexpected")),
                }
            }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert_eq!(engine.run("b").await.unwrap(), 8);
}

#[tokio::test]
async fn empty_admission_deadlocks() {
    let registry = base()
        .run(|_, _, _| async { Ok(3) })
        .schedule(|_| vec![])
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    let mut rx = engine.subscribe();

    let err = engine.run("a").await.unwrap_err();
    assert!(err.is_deadlock(), "{err}");

    eventually(|| engine.task("a").is_none()).await;
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| e.kind == EventKind::DeadlockDetected)
    );
    assert!(engine.snapshot().is_idle());
}

#[tokio::test]
async fn retries_until_the_policy_gives_up_failing() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let registry = base()
        .run(move |_, _, _| {
            let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(TaskError::fail("flaky"))
                } else {
                    Ok(3)
                }
            }
        })
        .retry(|_, snapshot, _| snapshot.failures < 3)
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("a");

    assert_eq!(engine.run("a").await.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let snap = engine.task("a").unwrap();
    assert_eq!(snap.failures, 2);
    assert_eq!(snap.status, TaskStatus::Complete);
    assert_eq!(snap.progress, 1.0);
    assert!(snap.error.is_none());
}

#[tokio::test]
async fn exhausted_retries_reject_with_the_last_error() {
    let registry = base()
        .run(|_, _, _| async { Err::<u32, _>(TaskError::fail("always")) })
        .retry_policy(RetryPolicy::MaxAttempts(2))
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("a");
    let mut rx = engine.subscribe();

    let err = engine.run("a").await.unwrap_err();
    assert_eq!(err.to_string(), "always");
    assert_eq!(engine.task("a").unwrap().failures, 2);

    let kinds: Vec<EventKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    let count = |k: EventKind| kinds.iter().filter(|x| **x == k).count();
    assert_eq!(count(EventKind::TaskStarting), 2);
    assert_eq!(count(EventKind::RetryScheduled), 1);
    assert_eq!(count(EventKind::TaskFailed), 2);
}

/// Counter task `a`; `b` depends on it and returns its value.
fn counter_registry(counter: Arc<AtomicU32>, retry_invalidated: bool) -> Registry<u32> {
    base()
        .run(move |d, deps, _| {
            let value = if d.name() == "a" {
                counter.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                deps[0]
            };
            async move { Ok(value) }
        })
        .retry(move |_, _, err| retry_invalidated && matches!(err, TaskError::Fail { .. }))
        .build()
        .unwrap()
}

#[tokio::test]
async fn invalidated_result_is_recomputed_for_a_dependent() {
    let counter = Arc::new(AtomicU32::new(0));
    let engine = Engine::new(counter_registry(Arc::clone(&counter), true));
    engine.retain("a");

    assert_eq!(engine.run("a").await.unwrap(), 1);
    engine.fail("a", "X").unwrap();

    let snap = engine.task("a").unwrap();
    assert_eq!(snap.status, TaskStatus::Error);
    assert!(snap.retry);
    assert!(engine.result("a").is_none());

    assert_eq!(engine.run("b").await.unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(engine.result("a"), Some(2));
}

#[tokio::test]
async fn unreferenced_result_is_recomputed_after_disposal() {
    let counter = Arc::new(AtomicU32::new(0));
    let engine = Engine::new(counter_registry(Arc::clone(&counter), false));

    assert_eq!(engine.run("a").await.unwrap(), 1);
    eventually(|| engine.task("a").is_none()).await;
    assert_eq!(
        engine.fail("a", "X"),
        Err(RuntimeError::UnknownTask { id: "a".into() })
    );

    assert_eq!(engine.run("b").await.unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn in_flight_results_cannot_be_invalidated() {
    let registry = base()
        .run(|_, _, _| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(5)
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("a");

    let handle = engine.run("a");
    tokio::task::yield_now().await;
    assert_eq!(
        engine.fail("a", "X"),
        Err(RuntimeError::NotSettled { id: "a".into() })
    );

    assert_eq!(handle.await.unwrap(), 5);
    let snap = engine.task("a").unwrap();
    assert_eq!(snap.status, TaskStatus::Complete);
    assert_eq!(snap.failures, 0);
    assert_eq!(engine.result("a"), Some(5));

    engine.fail("a", "X").unwrap();
    assert_eq!(engine.task("a").unwrap().status, TaskStatus::Error);
}

#[tokio::test]
async fn invalidated_result_without_retry_rejects_dependents() {
    let counter = Arc::new(AtomicU32::new(0));
    let engine = Engine::new(counter_registry(counter, false));
    engine.retain("a");

    assert_eq!(engine.run("a").await.unwrap(), 1);
    engine.fail("a", "X").unwrap();

    assert_eq!(engine.run("a").await.unwrap_err().to_string(), "X");
    match engine.run("b").await.unwrap_err() {
        TaskError::Dependency { dependency, source } => {
            assert_eq!(dependency.as_str(), "a");
            assert_eq!(source.to_string(), "X");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_runs_share_one_execution() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let registry = base()
        .run(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(7)
            }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    let first = engine.run("a");
    let second = engine.run("a");
    let (x, y) = tokio::join!(first, second);

    assert_eq!((x.unwrap(), y.unwrap()), (7, 7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shared_dependency_is_disposed_after_both_dependents() {
    let disposed = Arc::new(Mutex::new(Vec::<String>::new()));
    let log = Arc::clone(&disposed);
    let registry = base()
        .run(|_, deps, _| async move { Ok(deps.iter().sum::<u32>() + 1) })
        .dispose(move |d, _| {
            log.lock().push(d.name().to_string());
            async { Ok(()) }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert_eq!(engine.run("top").await.unwrap(), 5);
    eventually(|| engine.snapshot().is_empty()).await;

    let order = disposed.lock().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "top");
    assert_eq!(order[3], "a");
    assert_eq!(order.iter().filter(|n| *n == "a").count(), 1);
}

#[tokio::test]
async fn retained_dependency_survives_until_released() {
    let disposed = Arc::new(AtomicU32::new(0));
    let count = Arc::clone(&disposed);
    let registry = base()
        .run(|_, _, _| async { Ok(1) })
        .dispose(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("a");

    engine.run("b").await.unwrap();
    eventually(|| engine.task("b").is_none()).await;
    assert_eq!(engine.task("a").unwrap().refs, 1);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);

    assert_eq!(engine.release("a"), 0);
    eventually(|| engine.task("a").is_none()).await;
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert_eq!(engine.release("a"), 0);
}

#[tokio::test]
async fn dependency_failure_is_wrapped_and_skips_the_queue() {
    let registry = base()
        .run(|d, _, _| {
            let fails = d.name() == "a";
            async move {
                if fails {
                    Err(TaskError::fail("socket closed"))
                } else {
                    Ok(0)
                }
            }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("top");

    let err = engine.run("top").await.unwrap_err();
    assert!(err.is_dependency());
    assert_eq!(err.root_cause().to_string(), "socket closed");

    let snap = engine.task("top").unwrap();
    assert_eq!(snap.status, TaskStatus::Error);
    assert!(snap.queued_at.is_none());
    assert!(!snap.retry);
}

#[tokio::test]
async fn cycles_are_rejected() {
    let registry = Registry::<u32>::builder()
        .dependencies(|d| {
            Ok(match d.name() {
                "x" => vec!["y".into()],
                "y" => vec!["x".into()],
                _ => vec![],
            })
        })
        .run(|_, _, _| async { Ok(0) })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    let err = engine.run("x").await.unwrap_err();
    assert!(matches!(err.root_cause(), TaskError::Cycle { id } if id.as_str() == "x"));
    eventually(|| engine.snapshot().is_empty()).await;
}

#[tokio::test]
async fn resolution_failures_register_nothing() {
    let registry = base()
        .task(|id| Err(TaskError::Unresolved { id: id.clone() }))
        .run(|_, _, _| async { Ok(0) })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert!(matches!(
        engine.run("a").await,
        Err(TaskError::Unresolved { .. })
    ));
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn panicking_work_is_a_contract_violation() {
    let registry = base()
        .run(|d, _, _| {
            if d.name() == "a" {
                panic!("no future for you");
            }
            async { Ok(0) }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    match engine.run("a").await {
        Err(TaskError::ContractViolation { reason }) => {
            assert!(reason.contains("no future for you"))
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn panicking_future_is_a_contract_violation() {
    let registry = base()
        .run(|_, _, _| async {
            if true {
                panic!("exploded while polled");
            }
            Ok(0)
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert!(matches!(
        engine.run("a").await,
        Err(TaskError::ContractViolation { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn timeout_rejects_and_late_result_is_disposed() {
    let late = Arc::new(Mutex::new(Vec::<Result<u32, String>>::new()));
    let log = Arc::clone(&late);
    let registry = base()
        .run(|_, _, _| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(42)
        })
        .timeout(|_| Some(Duration::from_millis(100)))
        .dispose(move |_, outcome| {
            log.lock()
                .push(outcome.clone().map_err(|e| e.as_label().to_string()));
            async { Ok(()) }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    let mut rx = engine.subscribe();

    let err = engine.run("a").await.unwrap_err();
    assert!(err.is_timeout());

    tokio::time::sleep(Duration::from_secs(1)).await;
    eventually(|| late.lock().len() == 2).await;

    let outcomes = late.lock().clone();
    assert!(outcomes.contains(&Ok(42)));
    assert!(outcomes.contains(&Err("task_timeout".to_string())));

    let kinds: Vec<EventKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::TimeoutHit));
    assert!(kinds.contains(&EventKind::LateResultDisposed));
}

#[tokio::test(start_paused = true)]
async fn cancellation_hint_reaches_the_context() {
    let registry = base()
        .run(|_, _, ctx| async move {
            ctx.cancelled().await;
            Err(TaskError::fail("stopped"))
        })
        .build()
        .unwrap();
    let mut cfg = Config::default();
    cfg.timeout = Duration::from_millis(50);
    let engine = Engine::builder(registry).with_config(cfg).build();

    assert!(engine.run("a").await.unwrap_err().is_timeout());
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempt_is_retried_in_place() {
    let disposed = Arc::new(Mutex::new(Vec::<u32>::new()));
    let log = Arc::clone(&disposed);
    let registry = base()
        .run(|_, _, ctx| async move {
            if ctx.attempt() == 1 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(ctx.attempt())
        })
        .timeout(|_| Some(Duration::from_millis(100)))
        .retry_policy(RetryPolicy::OnTimeout(2))
        .dispose(move |_, outcome| {
            if let Ok(value) = outcome {
                log.lock().push(*value);
            }
            async { Ok(()) }
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("a");
    let mut rx = engine.subscribe();

    assert_eq!(engine.run("a").await.unwrap(), 2);
    let snap = engine.task("a").unwrap();
    assert_eq!(snap.status, TaskStatus::Complete);
    assert_eq!(snap.failures, 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    eventually(|| *disposed.lock() == vec![1]).await;
    assert_eq!(engine.result("a"), Some(2));

    let kinds: Vec<EventKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::TimeoutHit));
    assert!(kinds.contains(&EventKind::RetryScheduled));
    assert!(kinds.contains(&EventKind::LateResultDisposed));
}

#[tokio::test]
async fn panicking_timeout_policy_fails_the_attempt_and_frees_the_slot() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&calls);
    let registry = base()
        .run(|_, _, _| async { Ok(1) })
        .timeout(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("timeout table missing");
            }
            None
        })
        .limit("grid", 1)
        .bucket(|_| Some("grid".into()))
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert!(matches!(
        engine.run("a").await,
        Err(TaskError::ContractViolation { .. })
    ));
    eventually(|| engine.snapshot().is_empty()).await;
    assert!(engine.snapshot().running.is_empty());

    assert_eq!(engine.run("a").await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_disables_the_timer() {
    let registry = base()
        .run(|_, _, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        })
        .timeout(|_| Some(Duration::ZERO))
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert_eq!(engine.run("a").await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn bucket_limit_caps_concurrency() {
    let active = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    let registry = Registry::<u32>::builder()
        .dependencies(|_| Ok(vec![]))
        .run(move |_, _, _| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(now)
            }
        })
        .bucket(|_| Some("browsers".into()))
        .limit("browsers", 2)
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    let handles: Vec<_> = (0..5).map(|i| engine.run(format!("s{i}"))).collect();
    for res in futures::future::join_all(handles).await {
        assert!(res.is_ok());
    }
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_admission_ids_are_reported() {
    let registry = base()
        .run(|_, _, _| async { Ok(1) })
        .schedule(|queued| {
            let mut ids = queued.to_vec();
            ids.push("ghost".into());
            ids
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    let mut rx = engine.subscribe();

    assert_eq!(engine.run("a").await.unwrap(), 1);

    let rejected: Vec<Event> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.kind == EventKind::AdmissionRejected)
        .collect();
    assert!(!rejected.is_empty());
    assert!(rejected[0].reason.as_deref().unwrap_or("").contains("ghost"));
}

#[tokio::test]
async fn panicking_schedule_policy_rejects_queued_tasks() {
    let registry = base()
        .run(|_, _, _| async { Ok(1) })
        .schedule(|_| panic!("admission table missing"))
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    let mut rx = engine.subscribe();

    let outcome = tokio::time::timeout(Duration::from_secs(2), engine.run("a"))
        .await
        .expect("run settles");
    assert!(matches!(outcome, Err(TaskError::ContractViolation { .. })));
    eventually(|| engine.snapshot().is_empty()).await;

    let kinds: Vec<EventKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::AdmissionRejected));
    assert!(!kinds.contains(&EventKind::TaskStarting));
}

#[tokio::test]
async fn panicking_bucket_policy_rejects_without_registering() {
    let registry = base()
        .run(|_, _, _| async { Ok(1) })
        .bucket(|_| panic!("bucket table missing"))
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    assert!(matches!(
        engine.run("a").await,
        Err(TaskError::ContractViolation { .. })
    ));
    assert!(engine.snapshot().is_empty());
}

#[tokio::test]
async fn progress_is_clamped_and_published() {
    let registry = base()
        .run(|_, _, ctx| async move {
            ctx.progress(0.5);
            Ok(1)
        })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    engine.retain("a");
    let mut rx = engine.subscribe();

    engine.run("a").await.unwrap();
    let reported: Vec<f64> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.kind == EventKind::TaskProgress)
        .filter_map(|e| e.progress)
        .collect();
    assert_eq!(reported, vec![0.5]);

    engine.progress("a", 7.0).unwrap();
    assert_eq!(engine.task("a").unwrap().progress, 1.0);
    engine.progress("a", -1.0).unwrap();
    assert_eq!(engine.task("a").unwrap().progress, 0.0);

    assert_eq!(
        engine.progress("nope", 0.5),
        Err(RuntimeError::UnknownTask { id: "nope".into() })
    );
}

#[tokio::test]
async fn failing_dispose_is_reported_and_does_not_block() {
    let registry = base()
        .run(|_, _, _| async { Ok(1) })
        .dispose(|_, _| async { Err(TaskError::fail("quit failed")) })
        .build()
        .unwrap();
    let engine = Engine::new(registry);
    let mut rx = engine.subscribe();

    engine.run("b").await.unwrap();
    eventually(|| engine.snapshot().is_empty()).await;

    let failures = drain(&mut rx)
        .into_iter()
        .filter(|e| e.kind == EventKind::DisposeFailed)
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn shutdown_cancels_running_contexts() {
    let registry = base()
        .run(|_, _, ctx| async move {
            ctx.cancelled().await;
            Ok(9)
        })
        .timeout(|_| Some(Duration::ZERO))
        .build()
        .unwrap();
    let engine = Engine::new(registry);

    let handle = engine.run("a");
    tokio::task::yield_now().await;
    engine.shutdown();

    assert!(engine.is_shutdown());
    assert_eq!(handle.await.unwrap(), 9);
}
