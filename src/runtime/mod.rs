//! Runtime loop and boundary I/O.
//!
//! - [`Runner`]: feeds input pads, runs the AEWB feedback, steps the graph
//!   in manual mode and drains output pads
//! - [`io`]: frame producers and consumers
//! - [`helper`]: paced helper threads for file-backed sources and sinks
//! - [`aewb`]: exposure / white-balance controller

pub mod aewb;
pub mod helper;
pub mod io;
pub mod runner;

pub use aewb::AewbController;
pub use helper::{Helper, HelperControl};
pub use io::{
    consumer_for, producer_for, FrameConsumer, FrameProducer, NullConsumer, Produced,
    RawFileConsumer, RawFileProducer, SyntheticSensorProducer, TestPatternProducer,
};
pub use runner::{Iteration, RunStats, Runner};
