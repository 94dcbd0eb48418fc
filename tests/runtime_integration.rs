//! Integration tests for the runtime loop
//!
//! These tests run compiled pipelines end to end on the software backend:
//! - File-backed inputs reaching end of stream
//! - File-backed outputs
//! - Cooperative cancellation through the running flag
//! - Manual schedule mode with the AEWB feedback loop

mod common;

use common::builders::{file_output, null_output, ConfigBuilder, InputBuilder, ModelBuilder};
use common::software_backend;
use std::sync::atomic::Ordering;
use std::time::Duration;
use visionflow_rs::flow::FlowCompiler;
use visionflow_rs::pipeline::modules::ModelTask;
use visionflow_rs::runtime::{FrameConsumer, RawFileConsumer, Runner};
use visionflow_rs::types::{Rect, ScheduleMode};

const FRAME_SIZE: usize = 64 * 48 * 3 / 2;

#[test]
fn test_raw_file_input_stops_at_end_of_stream() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("in.nv12");
    let output_path = dir.path().join("out.nv12");
    std::fs::write(&input_path, vec![0x40u8; FRAME_SIZE * 3]).unwrap();

    let config = ConfigBuilder::new()
        .input(
            "file0",
            InputBuilder::raw_file(&input_path, 64, 48)
                .framerate(1000)
                .looping(false)
                .build(),
        )
        .output("rec", file_output(&output_path, 64, 48))
        .flow("file0", None, "rec", Rect::new(0, 0, 64, 48))
        .dequeue_timeout_ms(20)
        .build();

    let pipeline = FlowCompiler::new(&config).compile(software_backend()).unwrap();
    let stats = Runner::new(pipeline, &config.engine)
        .unwrap()
        .with_pacing(Some(Duration::from_millis(5)))
        .with_iteration_limit(Some(1000))
        .run()
        .unwrap();

    assert!(stats.end_of_stream);
    assert_eq!(stats.frames_in, 3);
    assert_eq!(stats.frames_out, 3);
    assert_eq!(stats.leaked, 0);

    // Frames arriving while the writer is busy may be dropped
    let written = std::fs::metadata(&output_path).unwrap().len() as usize;
    assert_eq!(written % FRAME_SIZE, 0);
    assert!((1..=3).contains(&(written / FRAME_SIZE)), "{} bytes", written);
}

#[test]
fn test_missing_input_file_fails_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigBuilder::new()
        .input("file0", InputBuilder::raw_file(dir.path().join("nope.nv12"), 64, 48).build())
        .output("out0", null_output(64, 48))
        .flow("file0", None, "out0", Rect::new(0, 0, 64, 48))
        .build();

    let pipeline = FlowCompiler::new(&config).compile(software_backend()).unwrap();
    let err = Runner::new(pipeline, &config.engine).err().unwrap();
    assert!(err.to_string().contains("nope.nv12"), "{}", err);
}

#[test]
fn test_file_consumer_flushes_pending_frame_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.nv12");
    let config = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(64, 48).build())
        .output("out0", null_output(64, 48))
        .flow("in0", None, "out0", Rect::new(0, 0, 64, 48))
        .build();
    let pipeline = FlowCompiler::new(&config).compile(software_backend()).unwrap();
    let pool = pipeline.graph.pool(pipeline.outputs[0].frame).unwrap().clone();

    let mut consumer = RawFileConsumer::create("out0", &path).unwrap();
    let buffer = pool.acquire().unwrap();
    consumer.consume(&buffer).unwrap();
    drop(buffer);
    consumer.close().unwrap();

    assert_eq!(consumer.frames(), 1);
    assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, FRAME_SIZE);
}

#[test]
fn test_clearing_running_flag_stops_the_loop() {
    let config = ConfigBuilder::new()
        .input("in0", InputBuilder::test_pattern(64, 48).build())
        .output("out0", null_output(64, 48))
        .flow("in0", None, "out0", Rect::new(0, 0, 32, 24))
        .build();
    let pipeline = FlowCompiler::new(&config).compile(software_backend()).unwrap();
    let runner = Runner::new(pipeline, &config.engine)
        .unwrap()
        .with_pacing(Some(Duration::from_millis(1)));

    let running = runner.running();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
    });
    let stats = runner.run().unwrap();
    stopper.join().unwrap();

    assert!(stats.iterations > 0);
    assert!(!stats.end_of_stream);
    assert_eq!(stats.frames_in, stats.frames_out);
    assert_eq!(stats.leaked, 0);
}

#[test]
fn test_manual_camera_pipeline_with_inference() {
    let config = ConfigBuilder::new()
        .input("cam0", InputBuilder::camera("ov2312").build())
        .model("cls", ModelBuilder::new(ModelTask::Classification).build())
        .output("disp0", null_output(1600, 1300))
        .flow("cam0", Some("cls"), "disp0", Rect::new(0, 0, 800, 650))
        .flow("cam0", None, "disp0", Rect::new(800, 0, 800, 650))
        .schedule(ScheduleMode::Manual)
        .dequeue_timeout_ms(20)
        .build();

    let pipeline = FlowCompiler::new(&config).compile(software_backend()).unwrap();
    let stats = Runner::new(pipeline, &config.engine)
        .unwrap()
        .with_pacing(None)
        .with_iteration_limit(Some(5))
        .run()
        .unwrap();

    assert_eq!(stats.iterations, 5);
    assert_eq!(stats.frames_out, 5);
    assert_eq!(stats.feedback_updates, 4);
    assert_eq!(stats.leaked, 0);
}
