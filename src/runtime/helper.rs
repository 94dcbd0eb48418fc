//! Paced helper threads for sources and sinks that are not queue driven.
//!
//! A helper owns a worker thread and shares one slot with the runtime loop.
//! The slot mutex is the only synchronization between the two: the worker
//! locks it for each step, then sleeps for the pacing period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What the worker wants after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperControl {
    Continue,
    Stop,
}

pub struct Helper<T> {
    name: String,
    slot: Arc<Mutex<T>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Helper<T> {
    /// Spawn a worker running `step` on the shared slot every `period`.
    pub fn spawn<F>(name: impl Into<String>, slot: T, period: Duration, mut step: F) -> std::io::Result<Self>
    where
        F: FnMut(&mut T) -> HelperControl + Send + 'static,
    {
        let name = name.into();
        let slot = Arc::new(Mutex::new(slot));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let slot = slot.clone();
            let running = running.clone();
            let thread_name = name.clone();
            std::thread::Builder::new()
                .name(format!("helper-{}", name))
                .spawn(move || {
                    tracing::debug!("Helper '{}' started", thread_name);
                    while running.load(Ordering::SeqCst) {
                        let started = Instant::now();
                        let control = {
                            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
                            step(&mut guard)
                        };
                        if control == HelperControl::Stop {
                            break;
                        }
                        // Pace to the period, not the period plus the step time
                        if let Some(rest) = period.checked_sub(started.elapsed()) {
                            std::thread::sleep(rest);
                        }
                    }
                    tracing::debug!("Helper '{}' stopped", thread_name);
                })?
        };

        Ok(Self {
            name,
            slot,
            running,
            handle: Some(handle),
        })
    }
}

impl<T> Helper<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the shared slot.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the worker to stop and wait for it. Idempotent.
    pub fn join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Helper '{}' panicked", self.name);
            }
        }
    }
}

impl<T> Drop for Helper<T> {
    fn drop(&mut self) {
        self.join();
    }
}
