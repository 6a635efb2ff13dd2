// tests/engine_scheduler.rs

mod common;
use crate::common::fake_job::{Behavior, JobRecorder};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use taskdag::config::SchedulerConfig;
use taskdag::engine::{Job, JobState, Scheduler, SkipCause};
use taskdag::errors::TaskdagError;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
}

#[tokio::test]
async fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    let a = scheduler.enqueue(rec.succeed("A"))?;
    let b = scheduler.enqueue(rec.succeed("B").after(a))?;
    scheduler.enqueue(rec.succeed("C").after(b))?;

    with_timeout(scheduler.wait(&CancellationToken::new())).await?;

    assert_eq!(rec.started(), vec!["A", "B", "C"]);
    assert_eq!(rec.finished(), vec!["A", "B", "C"]);
    Ok(())
}

#[tokio::test]
async fn job_starts_only_after_every_dependency_finished() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    let slow = scheduler.enqueue(rec.job("slow", Behavior::Sleep(Duration::from_millis(50))))?;
    let fast = scheduler.enqueue(rec.succeed("fast"))?;
    scheduler.enqueue(rec.succeed("join").with_dependencies([slow, fast]))?;

    with_timeout(scheduler.wait(&CancellationToken::new())).await?;

    let finished = rec.finished();
    let pos = |name: &str| finished.iter().position(|n| n == name).expect("finished");
    assert!(pos("slow") < pos("join"));
    assert!(pos("fast") < pos("join"));
    assert_eq!(rec.start_position("join"), Some(2));
    Ok(())
}

#[tokio::test]
async fn panic_is_contained_and_dependents_never_start() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    let a = scheduler.enqueue(rec.job("A", Behavior::Panic("boom".into())))?;
    let b = scheduler.enqueue(rec.succeed("B").after(a))?;

    let report = with_timeout(scheduler.run(&CancellationToken::new())).await;

    assert!(!rec.was_started("B"));
    assert_eq!(report.state_of(a), Some(JobState::Failed));
    assert_eq!(
        report.state_of(b),
        Some(JobState::Skipped(SkipCause::DependencyFailed))
    );

    let err = report.into_result().unwrap_err();
    assert!(err.is_panic(), "{err}");
    let panic = err.as_panic().expect("panic error");
    assert_eq!(panic.message(), "boom");

    let payload = panic.take_payload().expect("payload kept");
    assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("boom"));
    assert!(panic.take_payload().is_none(), "payload is taken once");
    Ok(())
}

#[tokio::test]
async fn panic_while_building_the_job_future_is_contained() -> TestResult {
    init_tracing();

    let mut scheduler = Scheduler::new(config());
    scheduler.enqueue(Job::new(|_ctx| -> std::future::Ready<taskdag::Result<()>> {
        panic!("eager")
    }))?;

    let err = with_timeout(scheduler.wait(&CancellationToken::new()))
        .await
        .unwrap_err();
    assert_eq!(err.as_panic().map(|p| p.message()), Some("eager"));
    Ok(())
}

#[tokio::test]
async fn continue_on_error_runs_unrelated_jobs_and_returns_the_failure() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config().with_continue_on_error(true));
    let b = scheduler.enqueue(rec.job("B", Behavior::Fail("B failed".into())))?;
    scheduler.enqueue(rec.job("C", Behavior::Sleep(Duration::from_millis(20))))?;
    let after_b = scheduler.enqueue(rec.succeed("after B").after(b))?;

    let report = with_timeout(scheduler.run(&CancellationToken::new())).await;

    assert!(rec.finished().contains(&"C".to_string()));
    assert!(!rec.was_started("after B"));
    assert_eq!(
        report.state_of(after_b),
        Some(JobState::Skipped(SkipCause::DependencyFailed))
    );
    assert_eq!(report.errors().len(), 1);
    assert_eq!(report.into_result().unwrap_err().to_string(), "B failed");
    Ok(())
}

#[tokio::test]
async fn failure_stops_jobs_that_have_not_started() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config().with_concurrency(1));
    scheduler.enqueue(rec.job("A", Behavior::Fail("A failed".into())))?;
    let b = scheduler.enqueue(rec.succeed("B"))?;

    let report = with_timeout(scheduler.run(&CancellationToken::new())).await;

    assert_eq!(rec.started(), vec!["A"]);
    assert_eq!(report.state_of(b), Some(JobState::Skipped(SkipCause::FlowFailed)));
    assert!(!report.is_success());
    Ok(())
}

#[tokio::test]
async fn first_failure_by_completion_wins() -> TestResult {
    init_tracing();

    let mut scheduler = Scheduler::new(config().with_continue_on_error(true));
    scheduler.enqueue(Job::new(|_ctx| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err::<(), _>(TaskdagError::Other(anyhow::anyhow!("slow failure")))
    }))?;
    scheduler.enqueue(Job::new(|_ctx| async {
        Err::<(), _>(TaskdagError::Other(anyhow::anyhow!("fast failure")))
    }))?;

    let report = with_timeout(scheduler.run(&CancellationToken::new())).await;
    let messages: Vec<String> = report.errors().iter().map(ToString::to_string).collect();
    assert_eq!(messages, vec!["fast failure", "slow failure"]);
    assert_eq!(report.first_error().map(ToString::to_string).as_deref(), Some("fast failure"));
    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    let a = scheduler.enqueue(rec.succeed("A"))?;
    scheduler.enqueue(rec.succeed("B").after(a))?;

    let token = CancellationToken::new();
    token.cancel();
    let report = with_timeout(scheduler.run(&token)).await;

    assert!(rec.started().is_empty());
    assert!(report
        .states()
        .iter()
        .all(|s| *s == JobState::Skipped(SkipCause::Cancelled)));
    assert!(report.into_result().unwrap_err().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn cancellation_mid_run_lets_running_jobs_finish() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    let waiting = scheduler.enqueue(rec.job("waiter", Behavior::WaitForCancel))?;
    let next = scheduler.enqueue(rec.succeed("next").after(waiting))?;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let report = with_timeout(scheduler.run(&token)).await;

    assert_eq!(rec.finished(), vec!["waiter"]);
    assert_eq!(report.state_of(waiting), Some(JobState::Succeeded));
    assert_eq!(report.state_of(next), Some(JobState::Skipped(SkipCause::Cancelled)));
    assert!(report.into_result().unwrap_err().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_is_never_exceeded() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config().with_concurrency(2));
    for i in 0..6 {
        scheduler.enqueue(rec.job(&format!("job{i}"), Behavior::Sleep(Duration::from_millis(10))))?;
    }

    with_timeout(scheduler.wait(&CancellationToken::new())).await?;

    assert_eq!(rec.finished().len(), 6);
    assert!(rec.peak_concurrency() <= 2, "peak {}", rec.peak_concurrency());
    Ok(())
}

#[tokio::test]
async fn unbounded_scheduler_runs_independent_jobs_together() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    for i in 0..4 {
        scheduler.enqueue(rec.job(&format!("job{i}"), Behavior::Sleep(Duration::from_millis(50))))?;
    }

    with_timeout(scheduler.wait(&CancellationToken::new())).await?;
    assert_eq!(rec.peak_concurrency(), 4);
    Ok(())
}

#[tokio::test]
async fn declined_job_is_not_an_error() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut scheduler = Scheduler::new(config());
    let gate = scheduler.enqueue(rec.job("gate", Behavior::Decline))?;
    let gated = scheduler.enqueue(rec.succeed("gated").after(gate))?;
    scheduler.enqueue(rec.succeed("free"))?;

    let report = with_timeout(scheduler.run(&CancellationToken::new())).await;

    assert!(report.is_success());
    assert_eq!(report.state_of(gate), Some(JobState::Skipped(SkipCause::Declined)));
    assert_eq!(
        report.state_of(gated),
        Some(JobState::Skipped(SkipCause::DependencyDeclined))
    );
    assert!(rec.was_started("free"));
    assert!(!rec.was_started("gated"));
    Ok(())
}

#[tokio::test]
async fn handles_from_another_scheduler_are_rejected() -> TestResult {
    init_tracing();

    let rec = JobRecorder::new();
    let mut first = Scheduler::new(config());
    let foreign = first.enqueue(rec.succeed("A"))?;

    let mut second = Scheduler::new(config());
    let err = second.enqueue(rec.succeed("B").after(foreign)).unwrap_err();
    assert!(matches!(err, TaskdagError::Scheduler(_)), "{err}");
    assert!(second.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_scheduler_succeeds() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new(config());
    with_timeout(scheduler.wait(&CancellationToken::new())).await?;
    Ok(())
}

#[tokio::test]
async fn job_bodies_see_the_run_cancellation() -> TestResult {
    init_tracing();

    let saw_cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&saw_cancel);

    let mut scheduler = Scheduler::new(config());
    scheduler.enqueue(Job::new(move |ctx| async move {
        ctx.cancelled().await;
        flag.store(ctx.is_cancelled(), Ordering::SeqCst);
        Ok(())
    }))?;

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = with_timeout(scheduler.wait(&token)).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(saw_cancel.load(Ordering::SeqCst));
    Ok(())
}
