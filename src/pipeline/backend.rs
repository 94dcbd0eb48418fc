//! Execution backend abstraction.
//!
//! The graph engine never executes kernels itself. It describes each node as
//! a `KernelDesc`, asks the backend to create it, connects linked pads and
//! registers every boundary pad as a graph parameter. At run time buffer
//! pools submit buffer indices per parameter and wait for completions.
//!
//! `SoftwareBackend` is an in-process implementation that models scheduling
//! and completion (not pixel math): a graph execution consumes one queued
//! buffer from every parameter and completes all of them in FIFO order.

use crate::pipeline::error::BackendError;
use crate::pipeline::exemplar::Exemplar;
use crate::pipeline::id::{KernelHandle, ParamId};
use crate::pipeline::module_kind::ModuleKind;
use crate::pipeline::pad::PadDirection;
use crate::pipeline::target::Target;
use crate::types::ScheduleMode;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Everything a backend needs to instantiate one execution unit.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDesc {
    pub name: String,
    pub kind: ModuleKind,
    pub target: Option<Target>,
    pub inputs: Vec<Arc<Exemplar>>,
    pub outputs: Vec<Arc<Exemplar>>,
}

/// One parameter slot of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelPort {
    pub kernel: KernelHandle,
    pub port: usize,
}

/// Interface of an execution backend.
#[cfg_attr(test, mockall::automock)]
pub trait Backend: Send + Sync {
    /// Create the concrete execution unit for a node.
    fn create_kernel(&self, desc: &KernelDesc) -> Result<KernelHandle, BackendError>;

    /// Release a kernel created by `create_kernel`.
    fn release_kernel(&self, kernel: KernelHandle);

    /// Direct, unqueued connection between two kernel ports.
    fn connect(&self, from: KernelPort, to: KernelPort) -> Result<(), BackendError>;

    /// Promote a kernel port to a graph-level parameter with its own queue.
    fn add_parameter(
        &self,
        param: ParamId,
        port: KernelPort,
        direction: PadDirection,
        depth: usize,
    ) -> Result<(), BackendError>;

    /// Verify the composed graph and fix the schedule mode.
    fn verify(&self, mode: ScheduleMode) -> Result<(), BackendError>;

    /// One-time configuration of a verified kernel (coefficients, tables).
    fn upload(&self, kernel: KernelHandle, key: &str, data: &[u8]) -> Result<(), BackendError>;

    /// Queue a buffer on a parameter.
    fn submit(&self, param: ParamId, buffer: usize) -> Result<(), BackendError>;

    /// Block until the oldest submitted buffer of `param` completes.
    fn wait(&self, param: ParamId, timeout: Option<Duration>) -> Result<usize, BackendError>;

    /// Run one graph execution (manual schedule mode).
    fn process(&self) -> Result<(), BackendError>;

    /// Complete every pending submission without executing.
    fn flush(&self);

    /// Drop all parameters and kernels; waiters observe `Closed`.
    fn shutdown(&self);
}

#[derive(Debug)]
struct ParamState {
    port: KernelPort,
    direction: PadDirection,
    depth: usize,
    pending: VecDeque<usize>,
    done_tx: Sender<usize>,
    done_rx: Receiver<usize>,
}

#[derive(Debug, Default)]
struct SoftwareState {
    kernels: Vec<Option<KernelDesc>>,
    connections: Vec<(KernelPort, KernelPort)>,
    params: Vec<Option<ParamState>>,
    uploads: Vec<(KernelHandle, String, usize)>,
    mode: Option<ScheduleMode>,
    executions: u64,
    closed: bool,
}

impl SoftwareState {
    fn kernel_alive(&self, kernel: KernelHandle) -> bool {
        matches!(self.kernels.get(kernel.index()), Some(Some(_)))
    }

    fn ready(&self) -> bool {
        let mut params = self.params.iter().flatten().peekable();
        params.peek().is_some() && params.all(|p| !p.pending.is_empty())
    }

    fn execute_once(&mut self) {
        for param in self.params.iter_mut().flatten() {
            if let Some(buffer) = param.pending.pop_front() {
                let _ = param.done_tx.send(buffer);
            }
        }
        self.executions += 1;
    }
}

/// In-process backend modelling queueing and completion.
#[derive(Debug)]
pub struct SoftwareBackend {
    state: Mutex<SoftwareState>,
    kernel_budget: usize,
}

impl SoftwareBackend {
    pub fn new(kernel_budget: usize) -> Self {
        Self {
            state: Mutex::new(SoftwareState::default()),
            kernel_budget,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SoftwareState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of graph executions so far.
    pub fn executions(&self) -> u64 {
        self.lock().executions
    }

    /// Number of live kernels.
    pub fn kernel_count(&self) -> usize {
        self.lock().kernels.iter().flatten().count()
    }

    /// Descriptions of all live kernels, in creation order.
    pub fn kernels(&self) -> Vec<KernelDesc> {
        self.lock().kernels.iter().flatten().cloned().collect()
    }

    /// Number of direct connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Registered parameters as (port, direction, depth).
    pub fn parameters(&self) -> Vec<(KernelPort, PadDirection, usize)> {
        self.lock()
            .params
            .iter()
            .flatten()
            .map(|p| (p.port, p.direction, p.depth))
            .collect()
    }

    /// Uploads so far as (kernel, key, byte length).
    pub fn uploads(&self) -> Vec<(KernelHandle, String, usize)> {
        self.lock().uploads.clone()
    }

    pub fn schedule_mode(&self) -> Option<ScheduleMode> {
        self.lock().mode
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Backend for SoftwareBackend {
    fn create_kernel(&self, desc: &KernelDesc) -> Result<KernelHandle, BackendError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BackendError::Closed);
        }
        let handle = KernelHandle(state.kernels.len() as u32);
        state.kernels.push(Some(desc.clone()));
        tracing::trace!("software backend: kernel {:?} = {}", handle, desc.name);
        Ok(handle)
    }

    fn release_kernel(&self, kernel: KernelHandle) {
        let mut state = self.lock();
        if let Some(slot) = state.kernels.get_mut(kernel.index()) {
            *slot = None;
        }
        state
            .connections
            .retain(|(from, to)| from.kernel != kernel && to.kernel != kernel);
        for slot in state.params.iter_mut() {
            if matches!(slot, Some(p) if p.port.kernel == kernel) {
                *slot = None;
            }
        }
    }

    fn connect(&self, from: KernelPort, to: KernelPort) -> Result<(), BackendError> {
        let mut state = self.lock();
        if !state.kernel_alive(from.kernel) || !state.kernel_alive(to.kernel) {
            return Err(BackendError::Other(format!(
                "connect {:?} -> {:?}: kernel not alive",
                from, to
            )));
        }
        state.connections.push((from, to));
        Ok(())
    }

    fn add_parameter(
        &self,
        param: ParamId,
        port: KernelPort,
        direction: PadDirection,
        depth: usize,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        if !state.kernel_alive(port.kernel) {
            return Err(BackendError::Other(format!(
                "parameter {} on dead kernel {:?}",
                param, port.kernel
            )));
        }
        let index = param.index();
        if state.params.len() <= index {
            state.params.resize_with(index + 1, || None);
        }
        let (done_tx, done_rx) = unbounded();
        state.params[index] = Some(ParamState {
            port,
            direction,
            depth,
            pending: VecDeque::with_capacity(depth),
            done_tx,
            done_rx,
        });
        Ok(())
    }

    fn verify(&self, mode: ScheduleMode) -> Result<(), BackendError> {
        let mut state = self.lock();
        let live = state.kernels.iter().flatten().count();
        if live > self.kernel_budget {
            return Err(BackendError::Verification(format!(
                "{} kernels exceed the budget of {}",
                live, self.kernel_budget
            )));
        }
        if let Some(p) = state.params.iter().flatten().find(|p| p.depth == 0) {
            return Err(BackendError::Verification(format!(
                "parameter on {:?} has zero depth",
                p.port
            )));
        }
        state.mode = Some(mode);
        Ok(())
    }

    fn upload(&self, kernel: KernelHandle, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let mut state = self.lock();
        if !state.kernel_alive(kernel) {
            return Err(BackendError::Other(format!("upload to dead kernel {:?}", kernel)));
        }
        state.uploads.push((kernel, key.to_string(), data.len()));
        Ok(())
    }

    fn submit(&self, param: ParamId, buffer: usize) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BackendError::Closed);
        }
        let mode = state
            .mode
            .ok_or_else(|| BackendError::NotReady("graph not verified".to_string()))?;
        let slot = state
            .params
            .get_mut(param.index())
            .and_then(Option::as_mut)
            .ok_or(BackendError::UnknownParameter(param.0))?;
        slot.pending.push_back(buffer);

        if mode == ScheduleMode::Automatic {
            while state.ready() {
                state.execute_once();
            }
        }
        Ok(())
    }

    fn wait(&self, param: ParamId, timeout: Option<Duration>) -> Result<usize, BackendError> {
        // Clone the receiver so the state lock is not held while blocking.
        let done_rx = {
            let state = self.lock();
            if state.closed {
                return Err(BackendError::Closed);
            }
            state
                .params
                .get(param.index())
                .and_then(Option::as_ref)
                .map(|p| p.done_rx.clone())
                .ok_or(BackendError::UnknownParameter(param.0))?
        };

        match timeout {
            Some(timeout) => done_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => BackendError::TimedOut,
                RecvTimeoutError::Disconnected => BackendError::Closed,
            }),
            None => done_rx.recv().map_err(|_| BackendError::Closed),
        }
    }

    fn process(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BackendError::Closed);
        }
        if state.mode.is_none() {
            return Err(BackendError::NotReady("graph not verified".to_string()));
        }
        if !state.ready() {
            return Err(BackendError::NotReady(
                "not every parameter has a queued buffer".to_string(),
            ));
        }
        state.execute_once();
        Ok(())
    }

    fn flush(&self) {
        let mut state = self.lock();
        for param in state.params.iter_mut().flatten() {
            while let Some(buffer) = param.pending.pop_front() {
                let _ = param.done_tx.send(buffer);
            }
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.params.clear();
        state.connections.clear();
        state.kernels.iter_mut().for_each(|k| *k = None);
    }
}
