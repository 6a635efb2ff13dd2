// tests/engine_core.rs

mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::num::NonZeroUsize;

use taskdag::engine::{CoreScheduler, JobOutcome, JobState, SchedulerState, SkipCause};

type TestResult = Result<(), Box<dyn Error>>;

fn limit(n: usize) -> Option<NonZeroUsize> {
    NonZeroUsize::new(n)
}

#[test]
fn dependent_job_waits_for_its_dependency() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(None, false);
    let a = core.add_job(&[])?;
    let b = core.add_job(&[a])?;

    assert_eq!(core.next_dispatch(), Some(a));
    assert_eq!(core.next_dispatch(), None);
    assert_eq!(core.state_of(b), Some(JobState::Pending));

    core.complete(a, JobOutcome::Succeeded);
    assert_eq!(core.next_dispatch(), Some(b));
    core.complete(b, JobOutcome::Succeeded);

    assert!(core.is_finished());
    assert_eq!(core.states(), vec![JobState::Succeeded, JobState::Succeeded]);
    Ok(())
}

#[test]
fn concurrency_limit_caps_running_jobs() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(limit(1), false);
    let a = core.add_job(&[])?;
    let b = core.add_job(&[])?;

    assert_eq!(core.next_dispatch(), Some(a));
    assert_eq!(core.next_dispatch(), None);
    assert_eq!(core.running(), 1);

    core.complete(a, JobOutcome::Succeeded);
    assert_eq!(core.next_dispatch(), Some(b));
    Ok(())
}

#[test]
fn failure_halts_dispatch_and_skips_dependents() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(None, false);
    let a = core.add_job(&[])?;
    let b = core.add_job(&[a])?;
    let c = core.add_job(&[])?;
    let d = core.add_job(&[c])?;

    assert_eq!(core.next_dispatch(), Some(a));
    assert_eq!(core.next_dispatch(), Some(c));

    core.complete(a, JobOutcome::Failed);
    assert!(core.is_halted());
    assert_eq!(core.state_of(b), Some(JobState::Skipped(SkipCause::DependencyFailed)));
    assert_eq!(core.state_of(d), Some(JobState::Skipped(SkipCause::FlowFailed)));
    assert!(!core.is_finished(), "c is still running");

    core.complete(c, JobOutcome::Succeeded);
    assert_eq!(core.next_dispatch(), None);
    assert!(core.is_finished());
    assert_eq!(core.state_of(c), Some(JobState::Succeeded));
    Ok(())
}

#[test]
fn continue_on_error_keeps_independent_jobs_going() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(None, true);
    let a = core.add_job(&[])?;
    let b = core.add_job(&[a])?;
    let c = core.add_job(&[b])?;
    let d = core.add_job(&[])?;

    assert_eq!(core.next_dispatch(), Some(a));
    assert_eq!(core.next_dispatch(), Some(d));

    core.complete(a, JobOutcome::Failed);
    assert!(!core.is_halted());
    assert_eq!(core.next_dispatch(), None);
    assert_eq!(core.state_of(b), Some(JobState::Skipped(SkipCause::DependencyFailed)));
    assert_eq!(core.state_of(c), Some(JobState::Skipped(SkipCause::DependencyFailed)));

    core.complete(d, JobOutcome::Succeeded);
    assert!(core.is_finished());
    Ok(())
}

#[test]
fn declined_job_skips_dependents_cleanly() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(None, false);
    let a = core.add_job(&[])?;
    let b = core.add_job(&[a])?;
    let c = core.add_job(&[b])?;

    assert_eq!(core.next_dispatch(), Some(a));
    core.complete(a, JobOutcome::Declined);
    assert_eq!(core.next_dispatch(), None);

    assert!(!core.is_halted());
    assert!(core.is_finished());
    assert_eq!(core.state_of(a), Some(JobState::Skipped(SkipCause::Declined)));
    assert_eq!(core.state_of(b), Some(JobState::Skipped(SkipCause::DependencyDeclined)));
    assert_eq!(core.state_of(c), Some(JobState::Skipped(SkipCause::DependencyDeclined)));
    assert!(SkipCause::DependencyDeclined.is_clean());
    Ok(())
}

#[test]
fn job_added_after_its_dependency_finished_is_ready_at_once() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(None, false);
    let a = core.add_job(&[])?;
    assert_eq!(core.next_dispatch(), Some(a));
    core.complete(a, JobOutcome::Succeeded);

    let b = core.add_job(&[a])?;
    assert_eq!(core.next_dispatch(), Some(b));
    Ok(())
}

#[test]
fn dependency_on_a_job_not_yet_added_is_rejected() {
    init_tracing();

    let mut core = CoreScheduler::new(None, false);
    let err = core.add_job(&[3]).unwrap_err();
    assert!(err.to_string().contains("not enqueued before it"), "{err}");
    assert!(core.is_empty());
}

#[test]
fn cancellation_skips_jobs_that_have_not_started() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(limit(1), false);
    let a = core.add_job(&[])?;
    let b = core.add_job(&[])?;

    assert_eq!(core.next_dispatch(), Some(a));
    core.halt(SkipCause::Cancelled);
    assert_eq!(core.state_of(b), Some(JobState::Skipped(SkipCause::Cancelled)));
    assert_eq!(core.state_of(a), Some(JobState::Running));

    core.complete(a, JobOutcome::Succeeded);
    assert!(core.is_finished());

    // Jobs added to a halted scheduler never run.
    let c = core.add_job(&[])?;
    assert_eq!(core.state_of(c), Some(JobState::Skipped(SkipCause::Cancelled)));
    assert_eq!(core.next_dispatch(), None);
    Ok(())
}

#[test]
fn snapshot_counts_ready_waiting_and_idle_workers() -> TestResult {
    init_tracing();

    let mut core = CoreScheduler::new(limit(2), false);
    let a = core.add_job(&[])?;
    core.add_job(&[])?;
    core.add_job(&[])?;
    core.add_job(&[a])?;

    assert_eq!(core.next_dispatch(), Some(a));
    assert_eq!(
        core.snapshot(),
        SchedulerState {
            pending: 4,
            ready: 2,
            waiting: 1,
            idle_workers: Some(1),
            concurrency: Some(2),
        }
    );
    Ok(())
}
