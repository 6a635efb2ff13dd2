// src/engine/guard.rs

//! Panic containment at the job boundary.
//!
//! A process-wide panic hook (chained in front of whatever hook was already
//! installed) records a backtrace into a thread-local slot whenever a panic
//! starts while a guarded future is being polled on that thread. The guard
//! takes it back once `catch_unwind` returns, so the trace shows where the
//! panic was raised rather than where it was caught.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::{Future, poll_fn};
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::Once;

use futures_util::FutureExt;

use crate::errors::PanicError;

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PANIC_TRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) > 0 {
                let trace = Backtrace::force_capture();
                PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            }
            previous(info);
        }));
    });
}

/// Marks the current thread as polling a guarded future.
struct Polling;

impl Polling {
    fn enter() -> Self {
        GUARD_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Polling
    }
}

impl Drop for Polling {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn take_trace() -> Backtrace {
    PANIC_TRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(Backtrace::force_capture)
}

/// Poll `fut` to completion, converting a panic into a [`PanicError`].
///
/// Job state shared across the boundary is only touched through `Mutex`es
/// and write-once slots, so observing it after an unwind is sound.
pub async fn catch_panic<F>(fut: F) -> Result<F::Output, PanicError>
where
    F: Future,
{
    install_hook();

    let mut fut = pin!(fut);
    let guarded = poll_fn(move |cx| {
        let _polling = Polling::enter();
        fut.as_mut().poll(cx)
    });

    match AssertUnwindSafe(guarded).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => Err(PanicError::from_payload(payload, take_trace())),
    }
}
