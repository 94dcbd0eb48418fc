//! Frame producers and consumers at the graph boundary.
//!
//! The runtime loop obtains buffers through pool operations and hands them
//! to a producer to fill or a consumer to read; neither side ever talks to
//! the backend directly.

use crate::config::{InputSpec, OutputSpec, SinkKind, SourceKind};
use crate::error::{Result, VisionFlowError};
use crate::pipeline::{Buffer, Exemplar};
use crate::runtime::helper::{Helper, HelperControl};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

/// Outcome of asking a producer for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produced {
    /// The buffer holds a new frame.
    Frame,
    /// No frame yet; try again next iteration.
    Pending,
    /// The source is exhausted.
    EndOfStream,
}

pub trait FrameProducer: Send {
    fn name(&self) -> &str;

    /// Fill `buffer` with the next frame.
    fn fill(&mut self, buffer: &mut Buffer) -> Result<Produced>;

    /// Stop any helper thread.
    fn close(&mut self) {}
}

pub trait FrameConsumer: Send {
    fn name(&self) -> &str;

    fn consume(&mut self, buffer: &Buffer) -> Result<()>;

    /// Frames accepted so far.
    fn frames(&self) -> u64;

    /// Stop any helper thread and flush.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn first_channel<'b>(buffer: &'b mut Buffer, owner: &str) -> Result<&'b mut [u8]> {
    buffer
        .channel_mut(0)
        .ok_or_else(|| VisionFlowError::Runtime(format!("{}: buffer has no storage", owner)))
}

// ==================== Producers ====================

/// Moving diagonal gradient in NV12, neutral chroma.
pub struct TestPatternProducer {
    name: String,
    frame: u64,
}

impl TestPatternProducer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frame: 0,
        }
    }
}

impl FrameProducer for TestPatternProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fill(&mut self, buffer: &mut Buffer) -> Result<Produced> {
        let dims = buffer.exemplar().dimensions().unwrap_or_default();
        let width = dims.width as usize;
        let luma_size = width * dims.height as usize;
        let shift = (self.frame * 4) as usize;
        let data = first_channel(buffer, &self.name)?;

        let (luma, chroma) = data.split_at_mut(luma_size.min(data.len()));
        if width > 0 {
            for (y, row) in luma.chunks_mut(width).enumerate() {
                for (x, px) in row.iter_mut().enumerate() {
                    *px = ((x + y + shift) & 0xff) as u8;
                }
            }
        }
        chroma.fill(128);

        self.frame += 1;
        Ok(Produced::Frame)
    }
}

/// Bayer frames shaped like a sensor's output, for running camera inputs
/// without a sensor driver.
pub struct SyntheticSensorProducer {
    name: String,
    frame: u64,
}

impl SyntheticSensorProducer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frame: 0,
        }
    }
}

impl FrameProducer for SyntheticSensorProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fill(&mut self, buffer: &mut Buffer) -> Result<Produced> {
        let (dims, bit_depth, container) = match buffer.exemplar() {
            Exemplar::Raw {
                dims,
                bit_depth,
                container,
                ..
            } => (*dims, *bit_depth, container.bytes()),
            other => {
                return Err(VisionFlowError::Runtime(format!(
                    "{}: expected a raw frame pad, got {}",
                    self.name, other
                )))
            }
        };
        let mask = (1u32 << bit_depth.min(16)) - 1;
        let width = dims.width as usize;
        let frame = self.frame as u32;
        let data = first_channel(buffer, &self.name)?;

        for (i, px) in data.chunks_exact_mut(container).enumerate() {
            let (x, y) = (i % width.max(1), i / width.max(1));
            // RGGB mosaic: red and blue sites a little darker than green
            let site = match (y & 1, x & 1) {
                (0, 0) => 3,
                (1, 1) => 2,
                _ => 4,
            };
            let value = ((((x ^ y) as u32).wrapping_add(frame) & 0xff) * site) & mask;
            px.copy_from_slice(&value.to_le_bytes()[..container]);
        }

        self.frame += 1;
        Ok(Produced::Frame)
    }
}

/// Shared between the runtime loop and the reader thread.
struct ReaderSlot {
    frame: Vec<u8>,
    ready: bool,
    eos: bool,
    error: Option<String>,
}

/// Raw frames read from a file on a paced helper thread.
pub struct RawFileProducer {
    name: String,
    helper: Helper<ReaderSlot>,
}

impl RawFileProducer {
    pub fn open(
        name: impl Into<String>,
        path: &Path,
        frame_size: usize,
        framerate: u32,
        looping: bool,
    ) -> Result<Self> {
        let name = name.into();
        let mut reader = File::open(path).map(BufReader::new).map_err(|e| {
            VisionFlowError::Io(e).with_context(format!("Failed to open {:?}", path))
        })?;
        let period = Duration::from_secs(1) / framerate.max(1);
        let slot = ReaderSlot {
            frame: vec![0; frame_size],
            ready: false,
            eos: false,
            error: None,
        };

        let helper = Helper::spawn(name.clone(), slot, period, move |slot| {
            if slot.ready {
                return HelperControl::Continue;
            }
            match read_frame(&mut reader, &mut slot.frame, looping) {
                Ok(true) => {
                    slot.ready = true;
                    HelperControl::Continue
                }
                Ok(false) => {
                    slot.eos = true;
                    HelperControl::Stop
                }
                Err(e) => {
                    slot.error = Some(e.to_string());
                    HelperControl::Stop
                }
            }
        })?;

        tracing::info!(
            "Input '{}': reading {:?} ({} bytes/frame, {} fps{})",
            name,
            path,
            frame_size,
            framerate,
            if looping { ", looping" } else { "" }
        );
        Ok(Self { name, helper })
    }
}

/// Read one whole frame; `false` at end of stream.
fn read_frame<R: Read + Seek>(reader: &mut R, frame: &mut [u8], looping: bool) -> std::io::Result<bool> {
    match reader.read_exact(frame) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            if !looping {
                return Ok(false);
            }
            // A trailing partial frame is dropped
            reader.seek(SeekFrom::Start(0))?;
            reader.read_exact(frame)?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

impl FrameProducer for RawFileProducer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fill(&mut self, buffer: &mut Buffer) -> Result<Produced> {
        let mut slot = self.helper.lock();
        if slot.ready {
            let data = first_channel(buffer, &self.name)?;
            let n = data.len().min(slot.frame.len());
            data[..n].copy_from_slice(&slot.frame[..n]);
            slot.ready = false;
            return Ok(Produced::Frame);
        }
        if let Some(error) = slot.error.take() {
            return Err(VisionFlowError::Runtime(format!("{}: {}", self.name, error)));
        }
        if slot.eos {
            return Ok(Produced::EndOfStream);
        }
        Ok(Produced::Pending)
    }

    fn close(&mut self) {
        self.helper.join();
    }
}

// ==================== Consumers ====================

/// Counts frames and drops them.
pub struct NullConsumer {
    name: String,
    frames: u64,
}

impl NullConsumer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
        }
    }
}

impl FrameConsumer for NullConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, _buffer: &Buffer) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn frames(&self) -> u64 {
        self.frames
    }
}

struct WriterSlot {
    writer: BufWriter<File>,
    pending: Option<Vec<u8>>,
    written: u64,
    error: Option<String>,
}

impl WriterSlot {
    fn write_pending(&mut self) -> std::io::Result<()> {
        if let Some(frame) = self.pending.take() {
            self.writer.write_all(&frame)?;
            self.written += 1;
        }
        Ok(())
    }
}

/// Raw frames appended to a file on a helper thread. Frames arriving while
/// the previous one is still being written are dropped.
pub struct RawFileConsumer {
    name: String,
    helper: Helper<WriterSlot>,
    accepted: u64,
    dropped: u64,
}

impl RawFileConsumer {
    pub fn create(name: impl Into<String>, path: &Path) -> Result<Self> {
        let name = name.into();
        let writer = File::create(path).map(BufWriter::new).map_err(|e| {
            VisionFlowError::Io(e).with_context(format!("Failed to create {:?}", path))
        })?;
        let slot = WriterSlot {
            writer,
            pending: None,
            written: 0,
            error: None,
        };
        let helper = Helper::spawn(name.clone(), slot, Duration::from_millis(1), |slot| {
            match slot.write_pending() {
                Ok(()) => HelperControl::Continue,
                Err(e) => {
                    slot.error = Some(e.to_string());
                    HelperControl::Stop
                }
            }
        })?;
        tracing::info!("Output '{}': writing raw frames to {:?}", name, path);
        Ok(Self {
            name,
            helper,
            accepted: 0,
            dropped: 0,
        })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameConsumer for RawFileConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, buffer: &Buffer) -> Result<()> {
        let mut slot = self.helper.lock();
        if let Some(error) = slot.error.take() {
            return Err(VisionFlowError::Runtime(format!("{}: {}", self.name, error)));
        }
        if slot.pending.is_some() {
            self.dropped += 1;
            tracing::trace!("Output '{}': writer busy, frame dropped", self.name);
            return Ok(());
        }
        slot.pending = Some(buffer.channel(0).unwrap_or_default().to_vec());
        self.accepted += 1;
        Ok(())
    }

    fn frames(&self) -> u64 {
        self.accepted
    }

    fn close(&mut self) -> Result<()> {
        self.helper.join();
        let mut slot = self.helper.lock();
        if let Some(error) = slot.error.take() {
            return Err(VisionFlowError::Runtime(format!("{}: {}", self.name, error)));
        }
        slot.write_pending()?;
        slot.writer.flush()?;
        tracing::info!(
            "Output '{}': {} frames written, {} dropped",
            self.name,
            slot.written,
            self.dropped
        );
        Ok(())
    }
}

// ==================== Factories ====================

/// Producer for an input; `frame_size` is the byte size of its boundary pad.
pub fn producer_for(name: &str, spec: &InputSpec, frame_size: usize) -> Result<Box<dyn FrameProducer>> {
    Ok(match spec.source {
        SourceKind::Camera => {
            tracing::warn!(
                "Input '{}': no sensor driver in the software runtime, using synthetic {} frames",
                name,
                spec.sensor.as_deref().unwrap_or("sensor")
            );
            Box::new(SyntheticSensorProducer::new(name))
        }
        SourceKind::TestPattern => Box::new(TestPatternProducer::new(name)),
        SourceKind::RawFile => {
            let path = spec.path.as_deref().ok_or_else(|| {
                VisionFlowError::config_at(format!("inputs.{}.path", name), "raw_file inputs need a path")
            })?;
            Box::new(RawFileProducer::open(name, path, frame_size, spec.framerate, spec.looping)?)
        }
    })
}

pub fn consumer_for(name: &str, spec: &OutputSpec) -> Result<Box<dyn FrameConsumer>> {
    Ok(match spec.sink {
        SinkKind::Display | SinkKind::Encode => {
            tracing::warn!(
                "Output '{}': no {:?} driver in the software runtime, frames are counted and dropped",
                name,
                spec.sink
            );
            Box::new(NullConsumer::new(name))
        }
        SinkKind::Null => Box::new(NullConsumer::new(name)),
        SinkKind::File => {
            let path = spec.path.as_deref().ok_or_else(|| {
                VisionFlowError::config_at(format!("outputs.{}.path", name), "file sinks need a path")
            })?;
            Box::new(RawFileConsumer::create(name, path)?)
        }
    })
}
