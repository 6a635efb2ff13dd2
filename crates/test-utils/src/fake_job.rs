//! Scripted engine jobs that record what they did.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use taskdag::engine::{Completion, Job};
use taskdag::errors::TaskdagError;

/// What a fake job does once started.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    Panic(String),
    Decline,
    Sleep(Duration),
    /// Block until the run is cancelled, then succeed.
    WaitForCancel,
}

#[derive(Default)]
struct Log {
    started: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Hands out fake jobs sharing one log.
#[derive(Clone, Default)]
pub struct JobRecorder {
    log: Arc<Log>,
}

impl JobRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, name: &str, behavior: Behavior) -> Job {
        let log = Arc::clone(&self.log);
        let job_name = name.to_string();

        Job::with_completion(move |ctx| async move {
            log.started.lock().unwrap().push(job_name.clone());
            let now = log.active.fetch_add(1, Ordering::SeqCst) + 1;
            log.peak.fetch_max(now, Ordering::SeqCst);

            let result = match behavior {
                Behavior::Succeed => Ok(Completion::Done),
                Behavior::Fail(msg) => Err(TaskdagError::Other(anyhow!(msg))),
                Behavior::Panic(msg) => {
                    log.active.fetch_sub(1, Ordering::SeqCst);
                    panic!("{msg}");
                }
                Behavior::Decline => Ok(Completion::Skip),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(Completion::Done)
                }
                Behavior::WaitForCancel => {
                    ctx.cancelled().await;
                    Ok(Completion::Done)
                }
            };

            log.active.fetch_sub(1, Ordering::SeqCst);
            log.finished.lock().unwrap().push(job_name);
            result
        })
        .named(name)
    }

    pub fn succeed(&self, name: &str) -> Job {
        self.job(name, Behavior::Succeed)
    }

    pub fn started(&self) -> Vec<String> {
        self.log.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.log.finished.lock().unwrap().clone()
    }

    pub fn was_started(&self, name: &str) -> bool {
        self.started().iter().any(|n| n == name)
    }

    /// Position in start order.
    pub fn start_position(&self, name: &str) -> Option<usize> {
        self.started().iter().position(|n| n == name)
    }

    /// Highest number of jobs observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.log.peak.load(Ordering::SeqCst)
    }
}
