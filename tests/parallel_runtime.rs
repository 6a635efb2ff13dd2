// tests/parallel_runtime.rs

mod common;
use crate::common::recording::RecordingEmitter;
use crate::common::{init_tracing, with_timeout};

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use taskdag::errors::{CompileErrorKind, TaskdagError};
use taskdag::parallel::{Map, Parallel, ParallelTask, Slice};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn counting_task(name: &str, counter: &Arc<AtomicUsize>) -> ParallelTask {
    let counter = Arc::clone(counter);
    ParallelTask::new(name).run(move |_ctx| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        anyhow::Ok(())
    })
}

fn failing_task(name: &str, message: &'static str) -> ParallelTask {
    ParallelTask::new(name).run(move |_ctx| async move { Err::<(), _>(anyhow!(message)) })
}

#[tokio::test]
async fn independent_tasks_all_run() -> TestResult {
    init_tracing();

    let counter = Arc::new(AtomicUsize::new(0));
    let rec = RecordingEmitter::new();
    Parallel::builder("warm")
        .task(counting_task("a", &counter))
        .tasks(["b", "c"].map(|name| counting_task(name, &counter)))
        .emitter(Arc::new(rec.clone()))
        .build()?
        .run(&CancellationToken::new())
        .await?;

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(rec.task_events("b"), vec!["task_success", "task_done"]);
    assert!(rec.has("flow_success warm"));
    assert!(rec.has("flow_done warm"));
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_is_respected() -> TestResult {
    init_tracing();

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<ParallelTask> = (0..6)
        .map(|i| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            ParallelTask::new(format!("t{i}")).run(move |_ctx| async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(())
            })
        })
        .collect();

    let parallel = Parallel::builder("limited").tasks(tasks).concurrency(2).build()?;
    with_timeout(parallel.run(&CancellationToken::new())).await?;

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    Ok(())
}

#[tokio::test]
async fn slice_visits_every_element_before_its_end_function() -> TestResult {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_at_end = Arc::new(Mutex::new(None));
    let rec = RecordingEmitter::new();

    let visit = Arc::clone(&seen);
    let slice = Slice::new("squares", vec![1u32, 2, 3, 4], move |_ctx, idx, item| {
        let visit = Arc::clone(&visit);
        async move {
            visit.lock().unwrap().push((idx, item * item));
            anyhow::Ok(())
        }
    });
    let (visited, at_end) = (Arc::clone(&seen), Arc::clone(&seen_at_end));
    let slice = slice.end(move |_ctx| async move {
        *at_end.lock().unwrap() = Some(visited.lock().unwrap().len());
        anyhow::Ok(())
    });

    let parallel = Parallel::builder("slice")
        .slice(slice)
        .emitter(Arc::new(rec.clone()))
        .build()?;
    with_timeout(parallel.run(&CancellationToken::new())).await?;

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![(0, 1), (1, 4), (2, 9), (3, 16)]);
    assert_eq!(*seen_at_end.lock().unwrap(), Some(4));
    assert_eq!(rec.task_events("squares"), vec!["task_success", "task_done"]);
    Ok(())
}

#[tokio::test]
async fn map_visits_every_entry() -> TestResult {
    init_tracing();

    let entries: BTreeMap<&'static str, u32> = [("a", 1), ("b", 2), ("c", 3)].into();
    let total = Arc::new(AtomicUsize::new(0));
    let keys = Arc::new(Mutex::new(Vec::new()));

    let (sum, names) = (Arc::clone(&total), Arc::clone(&keys));
    let map = Map::new("sum", entries, move |_ctx, key, value| {
        let (sum, names) = (Arc::clone(&sum), Arc::clone(&names));
        async move {
            sum.fetch_add(value as usize, Ordering::SeqCst);
            names.lock().unwrap().push(key);
            anyhow::Ok(())
        }
    });

    let parallel = Parallel::builder("map").map(map).build()?;
    with_timeout(parallel.run(&CancellationToken::new())).await?;

    let mut keys = keys.lock().unwrap().clone();
    keys.sort();
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert_eq!(total.load(Ordering::SeqCst), 6);
    Ok(())
}

#[tokio::test]
async fn first_failure_stops_tasks_that_have_not_started() -> TestResult {
    init_tracing();

    let counter = Arc::new(AtomicUsize::new(0));
    let rec = RecordingEmitter::new();
    let parallel = Parallel::builder("stop")
        .task(failing_task("first", "broken"))
        .task(counting_task("second", &counter))
        .concurrency(1)
        .emitter(Arc::new(rec.clone()))
        .build()?;

    let err = match with_timeout(parallel.run(&CancellationToken::new())).await {
        Ok(()) => panic!("parallel should fail"),
        Err(err) => err,
    };

    assert!(matches!(&err, TaskdagError::Task { task, .. } if task == "first"));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(rec.task_events("first"), vec!["task_error", "task_done"]);
    assert_eq!(rec.task_events("second"), vec!["task_skipped FlowFailed"]);
    assert!(rec.has("flow_error stop"));
    Ok(())
}

#[tokio::test]
async fn continue_on_error_runs_everything_and_reports_every_failure() -> TestResult {
    init_tracing();

    let counter = Arc::new(AtomicUsize::new(0));
    let parallel = Parallel::builder("all")
        .task(failing_task("first", "one"))
        .task(counting_task("middle", &counter))
        .task(failing_task("last", "two"))
        .concurrency(1)
        .continue_on_error(true)
        .build()?;

    let err = match with_timeout(parallel.run(&CancellationToken::new())).await {
        Ok(()) => panic!("parallel should fail"),
        Err(err) => err,
    };

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let TaskdagError::Multiple(errors) = &err else {
        panic!("expected every failure, got {err}");
    };
    let failed: Vec<&str> = errors
        .iter()
        .filter_map(|e| match e {
            TaskdagError::Task { task, .. } => Some(task.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["first", "last"]);
    assert!(err.to_string().starts_with("2 jobs failed"));
    Ok(())
}

#[tokio::test]
async fn single_failure_with_continue_on_error_is_returned_as_is() -> TestResult {
    init_tracing();

    let parallel = Parallel::builder("one")
        .task(failing_task("only", "broken"))
        .continue_on_error(true)
        .build()?;

    let err = match with_timeout(parallel.run(&CancellationToken::new())).await {
        Ok(()) => panic!("parallel should fail"),
        Err(err) => err,
    };
    assert!(matches!(err, TaskdagError::Task { .. }));
    Ok(())
}

#[tokio::test]
async fn panicking_slice_element_names_its_index() -> TestResult {
    init_tracing();

    let slice = Slice::new("items", vec![10u32, 20, 30], |_ctx, idx, _item| async move {
        if idx == 1 {
            panic!("bad element");
        }
        anyhow::Ok(())
    });
    let rec = RecordingEmitter::new();
    let parallel = Parallel::builder("panics")
        .slice(slice)
        .emitter(Arc::new(rec.clone()))
        .build()?;

    let err = match with_timeout(parallel.run(&CancellationToken::new())).await {
        Ok(()) => panic!("parallel should fail"),
        Err(err) => err,
    };

    let panic = err.as_panic().expect("panic error");
    assert_eq!(panic.task(), Some("items[1]"));
    assert_eq!(panic.message(), "bad element");
    assert!(rec.task_events("items").contains(&"task_panic".to_string()));
    assert!(!rec.task_events("items").contains(&"task_success".to_string()));
    Ok(())
}

#[tokio::test]
async fn cancelled_token_stops_the_run() -> TestResult {
    init_tracing();

    let counter = Arc::new(AtomicUsize::new(0));
    let rec = RecordingEmitter::new();
    let parallel = Parallel::builder("cancelled")
        .task(counting_task("never", &counter))
        .emitter(Arc::new(rec.clone()))
        .build()?;

    let token = CancellationToken::new();
    token.cancel();
    let err = match with_timeout(parallel.run(&token)).await {
        Ok(()) => panic!("cancelled run should fail"),
        Err(err) => err,
    };

    assert!(err.is_cancelled());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(rec.task_events("never"), vec!["task_skipped Cancelled"]);
    Ok(())
}

#[test]
fn empty_parallel_is_rejected() {
    let err = match Parallel::builder("empty").build() {
        Ok(_) => panic!("empty parallel should not build"),
        Err(err) => err,
    };
    let compile = err.as_compile().expect("compile errors");
    let kinds: Vec<_> = compile.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(kinds, vec![CompileErrorKind::InvalidOption]);
    assert!(compile.messages()[0].contains("at least one"));
}

#[test]
fn end_function_cannot_be_combined_with_continue_on_error() {
    let slice = Slice::new("items", vec![1u32], |_ctx, _idx, _item| async { anyhow::Ok(()) })
        .end(|_ctx| async { anyhow::Ok(()) });
    let map = Map::new("entries", vec![("k", 1u32)], |_ctx, _key, _value| async {
        anyhow::Ok(())
    })
    .end(|_ctx| async { anyhow::Ok(()) });

    let err = match Parallel::builder("ends")
        .slice(slice)
        .map(map)
        .continue_on_error(true)
        .build()
    {
        Ok(_) => panic!("end functions with continue_on_error should not build"),
        Err(err) => err,
    };

    let compile = err.as_compile().expect("compile errors");
    assert_eq!(
        compile.messages(),
        vec![
            "slice end function cannot be used with continue_on_error",
            "map end function cannot be used with continue_on_error",
        ]
    );
    assert!(compile.iter().all(|e| e.kind == CompileErrorKind::InvalidOption));
}

#[test]
fn end_function_is_accepted_without_continue_on_error() {
    let slice = Slice::new("items", vec![1u32], |_ctx, _idx, _item| async { anyhow::Ok(()) })
        .end(|_ctx| async { anyhow::Ok(()) });
    assert!(Parallel::builder("ends").slice(slice).build().is_ok());
}

#[test]
fn task_without_body_is_rejected() {
    let err = match Parallel::builder("bodiless").task(ParallelTask::new("idle")).build() {
        Ok(_) => panic!("task without body should not build"),
        Err(err) => err,
    };
    let compile = err.as_compile().expect("compile errors");
    let kinds: Vec<_> = compile.iter().map(|e| e.kind.clone()).collect();
    assert_eq!(kinds, vec![CompileErrorKind::InvalidSignature]);
}
