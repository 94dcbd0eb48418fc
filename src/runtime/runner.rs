//! Steady-state driver of a compiled pipeline.
//!
//! # Iteration
//!
//! 1. For each input: run its statistics feedback (dequeue H3A stats,
//!    update AEWB, enqueue parameters), then acquire-or-dequeue a frame
//!    buffer, let the producer fill it and enqueue it.
//! 2. In manual schedule mode, step the graph once.
//! 3. For each output: dequeue a composed frame, hand it to the consumer and
//!    enqueue it back.
//!
//! Back-pressure (`Empty`, `Full`, `TimedOut`) skips the pad for this
//! iteration and never ends the loop.
//!
//! # Termination
//!
//! The loop stops when the running flag is cleared, the iteration limit is
//! reached or every input has hit end of stream. Shutdown then joins helper
//! threads, flushes the backend, drains every boundary pool and tears the
//! graph down.

use crate::config::{sensor_info, EngineSettings};
use crate::error::{Result, VisionFlowError};
use crate::flow::CompiledPipeline;
use crate::pipeline::modules::{AewbParams, H3aStats};
use crate::pipeline::{BackendError, Buffer, BufferPool, Graph, PadId, PipelineError, QueueError};
use crate::runtime::aewb::AewbController;
use crate::runtime::io::{consumer_for, producer_for, FrameConsumer, FrameProducer, Produced};
use crate::types::ScheduleMode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Completed loop iterations
    pub iterations: u64,

    /// Frames enqueued on input pads
    pub frames_in: u64,

    /// Frames handed to output consumers
    pub frames_out: u64,

    /// AEWB parameter updates fed back to ISPs
    pub feedback_updates: u64,

    /// Pads skipped because of back-pressure
    pub skipped: u64,

    /// Whether the run ended because every input was exhausted
    pub end_of_stream: bool,

    /// Buffers that did not return to their free-list during shutdown
    pub leaked: usize,

    /// Wall time of the loop in milliseconds
    pub elapsed_ms: u64,
}

/// Result of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Continue,
    EndOfStream,
}

struct FeedbackLoop {
    stats: BufferPool,
    params: BufferPool,
    aewb: AewbController,
}

struct InputPort {
    name: String,
    pool: BufferPool,
    producer: Box<dyn FrameProducer>,
    feedback: Option<FeedbackLoop>,
    finished: bool,
}

struct OutputPort {
    name: String,
    pool: BufferPool,
    consumer: Box<dyn FrameConsumer>,
}

fn boundary_pool(graph: &Graph, pad: PadId, owner: &str) -> Result<BufferPool> {
    graph.pool(pad).cloned().ok_or_else(|| {
        VisionFlowError::Runtime(format!("{}: pad {:?} has no buffer pool", owner, pad))
    })
}

fn fatal(owner: &str, error: QueueError) -> VisionFlowError {
    VisionFlowError::Runtime(format!("{}: {}", owner, error))
}

/// Free buffer if there is one, otherwise the oldest completed one.
fn next_buffer(pool: &BufferPool, timeout: Duration) -> std::result::Result<Buffer, QueueError> {
    match pool.acquire() {
        Err(QueueError::Empty) => pool.dequeue_timeout(timeout),
        other => other,
    }
}

/// Enqueue; `false` if back-pressure sent the buffer back to the free-list.
fn requeue(pool: &BufferPool, buffer: Buffer, owner: &str) -> Result<bool> {
    match pool.enqueue(buffer) {
        Ok(()) => Ok(true),
        Err(e) if e.error.is_transient() => {
            tracing::trace!("{}: enqueue skipped ({})", owner, e.error);
            pool.release(e.into_buffer());
            Ok(false)
        }
        Err(e) => Err(fatal(owner, e.error)),
    }
}

impl FeedbackLoop {
    /// One-frame-behind AEWB update. Never blocks on statistics.
    fn run(&mut self, owner: &str, timeout: Duration) -> Result<bool> {
        let stats = match self.stats.dequeue_timeout(Duration::ZERO) {
            Ok(buffer) => buffer,
            Err(e) if e.is_transient() => return Ok(false),
            Err(e) => return Err(fatal(owner, e)),
        };
        let params = match H3aStats::decode(stats.channel(0).unwrap_or_default()) {
            Some(decoded) => self.aewb.update(&decoded),
            None => self.aewb.params(),
        };
        requeue(&self.stats, stats, owner)?;

        let mut buffer = match next_buffer(&self.params, timeout) {
            Ok(buffer) => buffer,
            Err(e) if e.is_transient() => return Ok(false),
            Err(e) => return Err(fatal(owner, e)),
        };
        if let Some(out) = buffer.channel_mut(0) {
            params.encode(out);
        }
        requeue(&self.params, buffer, owner)
    }
}

pub struct Runner {
    pipeline: CompiledPipeline,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    running: Arc<AtomicBool>,
    timeout: Duration,
    max_iterations: Option<u64>,
    pacing: Option<Duration>,
    stats: RunStats,
    primed: bool,
    shut_down: bool,
}

impl Runner {
    /// Runner with the default producer and consumer of every input/output.
    pub fn new(pipeline: CompiledPipeline, settings: &EngineSettings) -> Result<Self> {
        let mut producers = Vec::with_capacity(pipeline.inputs.len());
        for binding in &pipeline.inputs {
            let pool = boundary_pool(&pipeline.graph, binding.frame, &binding.name)?;
            let frame_size = pool.exemplar().byte_size().unwrap_or_default();
            producers.push(producer_for(&binding.name, &binding.spec, frame_size)?);
        }
        let consumers = pipeline
            .outputs
            .iter()
            .map(|binding| consumer_for(&binding.name, &binding.spec))
            .collect::<Result<Vec<_>>>()?;

        let framerate = pipeline
            .inputs
            .iter()
            .map(|b| b.spec.framerate)
            .max()
            .unwrap_or(crate::config::DEFAULT_FRAMERATE);

        let runner = Self::with_io(pipeline, producers, consumers, settings.dequeue_timeout())?;
        Ok(runner.with_pacing(Some(Duration::from_secs(1) / framerate.max(1))))
    }

    /// Runner with explicit producers and consumers, in binding order.
    pub fn with_io(
        pipeline: CompiledPipeline,
        producers: Vec<Box<dyn FrameProducer>>,
        consumers: Vec<Box<dyn FrameConsumer>>,
        timeout: Duration,
    ) -> Result<Self> {
        if producers.len() != pipeline.inputs.len() || consumers.len() != pipeline.outputs.len() {
            return Err(VisionFlowError::Runtime(format!(
                "{} producers / {} consumers for {} inputs / {} outputs",
                producers.len(),
                consumers.len(),
                pipeline.inputs.len(),
                pipeline.outputs.len()
            )));
        }

        let graph = &pipeline.graph;
        let mut inputs = Vec::with_capacity(producers.len());
        for (binding, producer) in pipeline.inputs.iter().zip(producers) {
            let feedback = match binding.feedback {
                Some(fb) => {
                    let sensor_name = binding.spec.sensor.as_deref().unwrap_or_default();
                    let sensor = sensor_info(sensor_name).ok_or_else(|| {
                        VisionFlowError::config_at(
                            format!("inputs.{}.sensor", binding.name),
                            format!("unsupported sensor '{}'", sensor_name),
                        )
                    })?;
                    Some(FeedbackLoop {
                        stats: boundary_pool(graph, fb.stats, &binding.name)?,
                        params: boundary_pool(graph, fb.params, &binding.name)?,
                        aewb: AewbController::new(&sensor),
                    })
                }
                None => None,
            };
            inputs.push(InputPort {
                name: binding.name.clone(),
                pool: boundary_pool(graph, binding.frame, &binding.name)?,
                producer,
                feedback,
                finished: false,
            });
        }

        let outputs = pipeline
            .outputs
            .iter()
            .zip(consumers)
            .map(|(binding, consumer)| {
                Ok(OutputPort {
                    name: binding.name.clone(),
                    pool: boundary_pool(graph, binding.frame, &binding.name)?,
                    consumer,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pipeline,
            inputs,
            outputs,
            running: Arc::new(AtomicBool::new(true)),
            timeout,
            max_iterations: None,
            pacing: None,
            stats: RunStats::default(),
            primed: false,
            shut_down: false,
        })
    }

    /// Share an externally owned running flag (e.g. cleared by Ctrl-C).
    pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Stop after this many iterations.
    pub fn with_iteration_limit(mut self, limit: Option<u64>) -> Self {
        self.max_iterations = limit;
        self
    }

    /// Minimum duration of one iteration; `None` runs unpaced.
    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn pipeline(&self) -> &CompiledPipeline {
        &self.pipeline
    }

    /// Pre-enqueue every output frame buffer and both feedback pools, so the
    /// backend has somewhere to write from the first frame on.
    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        for output in &self.outputs {
            let mut primed = 0;
            while let Ok(buffer) = output.pool.acquire() {
                if !requeue(&output.pool, buffer, &output.name)? {
                    break;
                }
                primed += 1;
            }
            tracing::debug!("Output '{}': {} buffers primed", output.name, primed);
        }
        for input in &self.inputs {
            let Some(feedback) = &input.feedback else {
                continue;
            };
            while let Ok(buffer) = feedback.stats.acquire() {
                if !requeue(&feedback.stats, buffer, &input.name)? {
                    break;
                }
            }
            while let Ok(mut buffer) = feedback.params.acquire() {
                if let Some(out) = buffer.channel_mut(0) {
                    AewbParams::default().encode(out);
                }
                if !requeue(&feedback.params, buffer, &input.name)? {
                    break;
                }
            }
            tracing::debug!("Input '{}': AEWB feedback primed", input.name);
        }
        self.primed = true;
        Ok(())
    }

    /// Run one iteration of the loop.
    pub fn iterate(&mut self) -> Result<Iteration> {
        self.prime()?;
        let timeout = self.timeout;

        for input in self.inputs.iter_mut().filter(|i| !i.finished) {
            if let Some(feedback) = input.feedback.as_mut() {
                if feedback.run(&input.name, timeout)? {
                    self.stats.feedback_updates += 1;
                }
            }

            let mut buffer = match next_buffer(&input.pool, timeout) {
                Ok(buffer) => buffer,
                Err(e) if e.is_transient() => {
                    tracing::trace!("Input '{}': no free buffer ({})", input.name, e);
                    self.stats.skipped += 1;
                    continue;
                }
                Err(e) => return Err(fatal(&input.name, e)),
            };
            match input.producer.fill(&mut buffer)? {
                Produced::Frame => {
                    if requeue(&input.pool, buffer, &input.name)? {
                        self.stats.frames_in += 1;
                    } else {
                        self.stats.skipped += 1;
                    }
                }
                Produced::Pending => {
                    input.pool.release(buffer);
                    self.stats.skipped += 1;
                }
                Produced::EndOfStream => {
                    input.pool.release(buffer);
                    input.finished = true;
                    tracing::info!("Input '{}' reached end of stream", input.name);
                }
            }
        }
        if !self.inputs.is_empty() && self.inputs.iter().all(|i| i.finished) {
            return Ok(Iteration::EndOfStream);
        }

        if self.pipeline.graph.schedule_mode() == ScheduleMode::Manual {
            match self.pipeline.graph.step() {
                Ok(()) => {}
                Err(PipelineError::Backend(BackendError::NotReady(reason))) => {
                    tracing::trace!("Graph step skipped: {}", reason);
                    self.stats.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        for output in &mut self.outputs {
            let buffer = match output.pool.dequeue_timeout(timeout) {
                Ok(buffer) => buffer,
                Err(e) if e.is_transient() => {
                    tracing::trace!("Output '{}': no frame ({})", output.name, e);
                    self.stats.skipped += 1;
                    continue;
                }
                Err(e) => return Err(fatal(&output.name, e)),
            };
            output.consumer.consume(&buffer)?;
            self.stats.frames_out += 1;
            requeue(&output.pool, buffer, &output.name)?;
        }

        self.stats.iterations += 1;
        Ok(Iteration::Continue)
    }

    /// Loop until stopped, then shut down. Shutdown runs even when the loop
    /// fails.
    pub fn run(mut self) -> Result<RunStats> {
        tracing::info!(
            "Runtime loop started ({} inputs, {} outputs, {:?} schedule)",
            self.inputs.len(),
            self.outputs.len(),
            self.pipeline.graph.schedule_mode()
        );
        let started = Instant::now();
        let result = self.run_loop();
        self.stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let shutdown = self.shutdown();
        result.and(shutdown)?;

        tracing::info!(
            "Runtime loop finished: {} iterations, {} frames in, {} frames out, {} skipped in {}ms",
            self.stats.iterations,
            self.stats.frames_in,
            self.stats.frames_out,
            self.stats.skipped,
            self.stats.elapsed_ms
        );
        Ok(self.stats.clone())
    }

    fn run_loop(&mut self) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            if self.max_iterations.is_some_and(|limit| self.stats.iterations >= limit) {
                tracing::info!("Iteration limit reached");
                break;
            }
            let tick = Instant::now();
            if self.iterate()? == Iteration::EndOfStream {
                self.stats.end_of_stream = true;
                tracing::info!("All inputs reached end of stream");
                break;
            }
            if let Some(rest) = self.pacing.and_then(|p| p.checked_sub(tick.elapsed())) {
                std::thread::sleep(rest);
            }
        }
        Ok(())
    }

    /// Join helpers, flush, drain every boundary pool, tear down. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        tracing::info!("Stopping runtime loop");

        for input in &mut self.inputs {
            input.producer.close();
        }
        let mut result = Ok(());
        for output in &mut self.outputs {
            tracing::debug!(
                "Output '{}': {} frames consumed",
                output.consumer.name(),
                output.consumer.frames()
            );
            if let Err(e) = output.consumer.close() {
                tracing::warn!("Output '{}' failed to close: {}", output.name, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        let graph = &mut self.pipeline.graph;
        graph.flush();
        let (drained, leaked) = drain(graph);
        tracing::debug!("Drained {} in-flight buffers", drained);
        self.stats.leaked = leaked;
        graph.teardown();
        result
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Shutdown on drop failed: {}", e);
        }
    }
}

/// Dequeue-then-release every in-flight buffer. Returns the number drained
/// and the number of buffers still missing from their free-lists.
fn drain(graph: &Graph) -> (usize, usize) {
    let mut drained = 0;
    let mut leaked = 0;
    for &pad in graph.boundary_pads() {
        let Some(pool) = graph.pool(pad) else {
            continue;
        };
        while let Ok(buffer) = pool.dequeue_timeout(Duration::ZERO) {
            pool.release(buffer);
            drained += 1;
        }
        let stats = pool.stats();
        if stats.free != stats.capacity {
            tracing::warn!(
                "pad {:?}: {} of {} buffers not returned",
                pad,
                stats.capacity - stats.free,
                stats.capacity
            );
            leaked += stats.capacity - stats.free;
        }
    }
    (drained, leaked)
}
