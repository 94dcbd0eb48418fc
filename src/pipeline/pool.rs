//! Buffer pools attached to boundary pads.
//!
//! A pool owns a fixed set of interchangeable buffers. Each buffer lives in
//! exactly one place at a time:
//!
//! ```text
//!            acquire                enqueue
//!  free-list ───────▶  caller  ───────────────▶  in-flight ring ──▶ backend
//!      ▲                 │  ▲                          │
//!      └──── release ────┘  └──────── dequeue ─────────┘
//! ```
//!
//! `Buffer` is a move-only handle: `enqueue` consumes it and `dequeue`
//! produces a fresh one. Dropping a `Buffer` returns it to the free-list, so
//! `release` is just an explicit drop.
//!
//! The in-flight ring has `capacity + 1` slots so that `head == tail` always
//! means empty.

use crate::pipeline::backend::Backend;
use crate::pipeline::error::{BackendError, EnqueueError, PipelineError, PipelineResult, QueueError};
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::id::{PadId, ParamId};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Largest number of buffers a single pool may hold.
pub const MAX_POOL_CAPACITY: usize = 16;

/// Per-channel storage of one buffer.
type Storage = Vec<Vec<u8>>;

/// Snapshot of a pool's accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub free: usize,
    pub in_flight: usize,
    pub checked_out: usize,
}

impl PoolStats {
    /// `free + in_flight + checked_out == capacity`.
    pub fn is_conserved(&self) -> bool {
        self.free + self.in_flight + self.checked_out == self.capacity
    }
}

struct PoolState {
    /// Stack of free buffer indices.
    free: Vec<usize>,
    ring: Vec<usize>,
    head: usize,
    tail: usize,
    /// Storage of every buffer not currently held by a caller.
    storage: Vec<Option<Storage>>,
    checked_out: usize,
}

impl PoolState {
    fn ring_slots(&self) -> usize {
        self.ring.len()
    }

    fn in_flight(&self) -> usize {
        (self.head + self.ring_slots() - self.tail) % self.ring_slots()
    }

    fn ring_full(&self) -> bool {
        (self.head + 1) % self.ring_slots() == self.tail
    }

    /// Remove `index` from the in-flight ring wherever it sits, keeping the
    /// order of the other entries.
    fn remove_in_flight(&mut self, index: usize) -> bool {
        let slots = self.ring_slots();
        let mut pos = self.tail;
        while pos != self.head {
            if self.ring[pos] == index {
                let mut next = (pos + 1) % slots;
                while next != self.head {
                    self.ring[pos] = self.ring[next];
                    pos = next;
                    next = (next + 1) % slots;
                }
                self.head = (self.head + slots - 1) % slots;
                return true;
            }
            pos = (pos + 1) % slots;
        }
        false
    }

    fn push_free(&mut self, index: usize, data: Storage) {
        self.storage[index] = Some(data);
        self.free.push(index);
        self.checked_out -= 1;
    }
}

struct PoolInner {
    pad: PadId,
    param: ParamId,
    exemplar: Arc<Exemplar>,
    channels: u32,
    capacity: usize,
    backend: Arc<dyn Backend>,
    state: Mutex<PoolState>,
    /// Signalled whenever a buffer returns to the free-list.
    available: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, index: usize, data: Storage) {
        let mut state = self.lock();
        state.push_free(index, data);
        drop(state);
        self.available.notify_one();
    }
}

/// Fixed-capacity set of buffers bound to one boundary pad.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool of `capacity` buffers shaped after `exemplar`.
    pub fn new(
        pad: PadId,
        param: ParamId,
        exemplar: Arc<Exemplar>,
        channels: u32,
        capacity: usize,
        backend: Arc<dyn Backend>,
    ) -> PipelineResult<Self> {
        if capacity == 0 || capacity > MAX_POOL_CAPACITY {
            return Err(PipelineError::Pool(format!(
                "pad {:?}: capacity {} outside 1..={}",
                pad, capacity, MAX_POOL_CAPACITY
            )));
        }
        if channels == 0 {
            return Err(PipelineError::Pool(format!("pad {:?}: zero channels", pad)));
        }
        let size = exemplar.byte_size().ok_or_else(|| {
            PipelineError::Pool(format!("pad {:?}: cannot size buffers for {}", pad, exemplar))
        })?;

        let storage = (0..capacity)
            .map(|_| Some(vec![vec![0u8; size]; channels as usize]))
            .collect();
        // Pop order hands out index 0 first.
        let free = (0..capacity).rev().collect();

        Ok(Self {
            inner: Arc::new(PoolInner {
                pad,
                param,
                exemplar,
                channels,
                capacity,
                backend,
                state: Mutex::new(PoolState {
                    free,
                    ring: vec![0; capacity + 1],
                    head: 0,
                    tail: 0,
                    storage,
                    checked_out: 0,
                }),
                available: Condvar::new(),
            }),
        })
    }

    pub fn pad(&self) -> PadId {
        self.inner.pad
    }

    pub fn param(&self) -> ParamId {
        self.inner.param
    }

    pub fn exemplar(&self) -> &Arc<Exemplar> {
        &self.inner.exemplar
    }

    pub fn channels(&self) -> u32 {
        self.inner.channels
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            capacity: self.inner.capacity,
            free: state.free.len(),
            in_flight: state.in_flight(),
            checked_out: state.checked_out,
        }
    }

    fn take_free(&self, state: &mut PoolState) -> Option<Buffer> {
        let index = state.free.pop()?;
        let data = state.storage[index].take()?;
        state.checked_out += 1;
        Some(Buffer {
            pool: self.inner.clone(),
            index,
            data: Some(data),
        })
    }

    /// Take a free buffer, failing fast with `Empty`.
    pub fn acquire(&self) -> Result<Buffer, QueueError> {
        let mut state = self.inner.lock();
        self.take_free(&mut state).ok_or(QueueError::Empty)
    }

    /// Take a free buffer, waiting up to `timeout` for one to be released.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Buffer, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            if let Some(buffer) = self.take_free(&mut state) {
                return Ok(buffer);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(QueueError::Empty);
            }
            state = self
                .inner
                .available
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Return a buffer to the free-list.
    pub fn release(&self, buffer: Buffer) {
        drop(buffer);
    }

    /// Hand a buffer to the backend. On failure the buffer comes back inside
    /// the error.
    pub fn enqueue(&self, mut buffer: Buffer) -> Result<(), EnqueueError> {
        if !Arc::ptr_eq(&buffer.pool, &self.inner) {
            tracing::error!(
                "pad {:?}: buffer {} enqueued on a foreign pool",
                self.inner.pad,
                buffer.index
            );
            return Err(EnqueueError {
                error: QueueError::ForeignBuffer {
                    index: buffer.index,
                },
                buffer,
            });
        }

        let index = buffer.index;
        {
            let mut state = self.inner.lock();
            if state.ring_full() {
                drop(state);
                return Err(EnqueueError {
                    error: QueueError::Full,
                    buffer,
                });
            }
            let Some(data) = buffer.data.take() else {
                return Err(EnqueueError {
                    error: QueueError::Closed,
                    buffer,
                });
            };
            state.storage[index] = Some(data);
            let head = state.head;
            state.ring[head] = index;
            state.head = (head + 1) % state.ring_slots();
            state.checked_out -= 1;
        }
        // Storage moved to the ring; dropping the empty shell releases nothing.
        drop(buffer);

        if let Err(e) = self.inner.backend.submit(self.inner.param, index) {
            // Other enqueues may have landed since the lock was dropped, so
            // pull out this buffer's own entry rather than the newest one.
            let mut state = self.inner.lock();
            let data = if state.remove_in_flight(index) {
                state.checked_out += 1;
                state.storage[index].take()
            } else {
                tracing::error!(
                    "pad {:?}: failed buffer {} is no longer in flight",
                    self.inner.pad,
                    index
                );
                None
            };
            drop(state);
            return Err(EnqueueError {
                error: map_backend_error(&e),
                buffer: Buffer {
                    pool: self.inner.clone(),
                    index,
                    data,
                },
            });
        }
        Ok(())
    }

    /// Take back the oldest in-flight buffer, blocking until the backend has
    /// completed it.
    pub fn dequeue(&self) -> Result<Buffer, QueueError> {
        self.dequeue_inner(None)
    }

    /// Like [`dequeue`](Self::dequeue) but gives up after `timeout`. A timeout
    /// leaves the in-flight ring untouched.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Result<Buffer, QueueError> {
        self.dequeue_inner(Some(timeout))
    }

    fn dequeue_inner(&self, timeout: Option<Duration>) -> Result<Buffer, QueueError> {
        let expected = {
            let state = self.inner.lock();
            if state.head == state.tail {
                return Err(QueueError::Empty);
            }
            state.ring[state.tail]
        };

        let completed = self
            .inner
            .backend
            .wait(self.inner.param, timeout)
            .map_err(|e| map_backend_error(&e))?;

        let mut state = self.inner.lock();
        let tail = state.tail;
        let next = if state.head == tail {
            expected
        } else {
            state.ring[tail]
        };
        if state.head == tail || next != completed {
            tracing::error!(
                "pad {:?}: backend completed buffer {} but ring tail holds {}",
                self.inner.pad,
                completed,
                next
            );
            return Err(QueueError::OutOfOrder {
                expected: next,
                completed,
            });
        }
        let index = completed;
        state.tail = (tail + 1) % state.ring_slots();
        let data = state.storage[index].take().unwrap_or_default();
        state.checked_out += 1;
        Ok(Buffer {
            pool: self.inner.clone(),
            index,
            data: Some(data),
        })
    }
}

fn map_backend_error(error: &BackendError) -> QueueError {
    match error {
        BackendError::TimedOut => QueueError::TimedOut,
        BackendError::NotReady(_) => QueueError::Full,
        _ => QueueError::Closed,
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("pad", &self.inner.pad)
            .field("param", &self.inner.param)
            .field("exemplar", &self.inner.exemplar)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Exclusively owned handle to one pool buffer.
pub struct Buffer {
    pool: Arc<PoolInner>,
    index: usize,
    data: Option<Storage>,
}

impl Buffer {
    /// Index within the pool, stable for the pool's lifetime.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pad(&self) -> PadId {
        self.pool.pad
    }

    pub fn exemplar(&self) -> &Exemplar {
        &self.pool.exemplar
    }

    pub fn channels(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn channel(&self, channel: usize) -> Option<&[u8]> {
        self.data.as_ref()?.get(channel).map(Vec::as_slice)
    }

    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut [u8]> {
        self.data.as_mut()?.get_mut(channel).map(Vec::as_mut_slice)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(self.index, data);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("pad", &self.pool.pad)
            .field("index", &self.index)
            .field("channels", &self.channels())
            .finish()
    }
}
