// tests/panic_backtrace.rs
//
// Kept in its own binary: it clears the backtrace environment variables,
// which must not race with other tests.

mod common;
use crate::common::with_timeout;

use std::backtrace::BacktraceStatus;
use std::error::Error;

use taskdag::config::SchedulerConfig;
use taskdag::engine::{Job, Scheduler};
use taskdag::errors::TaskdagError;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

#[inline(never)]
fn raise_in_job() {
    panic!("boom");
}

#[tokio::test]
async fn panic_carries_a_backtrace_without_env_configuration() -> TestResult {
    // SAFETY: the only test in this binary, run before any other thread reads
    // the environment.
    unsafe {
        std::env::remove_var("RUST_BACKTRACE");
        std::env::remove_var("RUST_LIB_BACKTRACE");
    }

    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    scheduler.enqueue(Job::new(|_ctx| async {
        raise_in_job();
        Ok::<(), TaskdagError>(())
    }))?;

    let err = match with_timeout(scheduler.wait(&CancellationToken::new())).await {
        Ok(()) => panic!("job should have panicked"),
        Err(err) => err,
    };
    let panic = err.as_panic().expect("panic error");
    assert_eq!(panic.message(), "boom");
    assert_eq!(panic.backtrace().status(), BacktraceStatus::Captured);
    Ok(())
}
