mod common;

use std::io::Write;
use std::time::Duration;

use common::{app_writer, event_ids, new_log, recording_engine, with_preamble, Call, Recorder, TICK};
use tracepump::analysis::AnalysisEngine;
use tracepump::config::{EngineConfig, ProcessorConfig};
use tracepump::domain::{ProcessorError, ProtocolVersion, TransportKind};
use tracepump::processor::{
    AnalysisProcessor, ChannelSource, ProcessorExit, ProcessorState, ReaderSource,
};

fn fast_config() -> ProcessorConfig {
    ProcessorConfig { read_size: 16, poll_interval_ms: 1, ..ProcessorConfig::default() }
}

fn tick_stream(ids: impl IntoIterator<Item = u32>) -> Vec<u8> {
    let mut writer = app_writer(ProtocolVersion::V1);
    for id in ids {
        writer.event(TICK).u32(id).finish();
    }
    with_preamble(TransportKind::Raw, ProtocolVersion::V1, writer.bytes())
}

fn ends(log: &common::CallLog) -> usize {
    log.lock().unwrap().iter().filter(|call| matches!(call, Call::End { .. })).count()
}

#[test]
fn test_channel_source_runs_to_end_of_stream() {
    let log = new_log();
    let stream = tick_stream(1..=20);
    let (sender, receiver) = crossbeam_channel::unbounded();
    for chunk in stream.chunks(7) {
        sender.send(chunk.to_vec()).unwrap();
    }
    drop(sender);

    let source = ChannelSource::with_timeout(receiver, Duration::from_millis(5));
    let mut processor = AnalysisProcessor::new(recording_engine(&log), source, fast_config());
    processor.start().unwrap();
    let report = processor.wait().unwrap();

    assert_eq!(report.exit, ProcessorExit::EndOfStream);
    assert_eq!(report.bytes_read, stream.len() as u64);
    assert_eq!(event_ids(&log, "App.Tick"), (1..=20).collect::<Vec<u64>>());
    assert_eq!(ends(&log), 1);
}

#[test]
fn test_pause_holds_data_until_resume() {
    let log = new_log();
    let (sender, receiver) = crossbeam_channel::unbounded();
    let source = ChannelSource::with_timeout(receiver, Duration::from_millis(1));
    let mut processor = AnalysisProcessor::new(recording_engine(&log), source, fast_config());

    processor.start().unwrap();
    assert!(processor.pause());
    assert_eq!(processor.state(), ProcessorState::Paused);
    // Let an in-flight poll finish so the loop parks at the gate
    std::thread::sleep(Duration::from_millis(20));

    sender.send(tick_stream([5])).unwrap();
    drop(sender);
    std::thread::sleep(Duration::from_millis(30));
    assert!(event_ids(&log, "App.Tick").is_empty());

    assert!(processor.resume());
    let report = processor.wait().unwrap();
    assert_eq!(report.exit, ProcessorExit::EndOfStream);
    assert_eq!(event_ids(&log, "App.Tick"), vec![5]);
}

#[test]
fn test_stop_ends_engine_once() {
    let log = new_log();
    let (sender, receiver) = crossbeam_channel::unbounded();
    sender.send(tick_stream([1, 2])).unwrap();
    let source = ChannelSource::with_timeout(receiver, Duration::from_millis(1));
    let mut processor = AnalysisProcessor::new(recording_engine(&log), source, fast_config());

    processor.start().unwrap();
    let control = processor.control();
    std::thread::sleep(Duration::from_millis(20));
    control.stop();

    let report = processor.wait().unwrap();
    assert_eq!(report.exit, ProcessorExit::Stopped);
    assert_eq!(ends(&log), 1);
    assert_eq!(control.state(), ProcessorState::Stopped);
    drop(sender);
}

#[test]
fn test_decode_failure_is_reported() {
    let log = new_log();
    let source = ReaderSource::new(std::io::Cursor::new(vec![1, 7, 0, 0, 0, 0]));
    let mut processor = AnalysisProcessor::new(recording_engine(&log), source, fast_config());

    processor.start().unwrap();
    let report = processor.wait().unwrap();
    assert_eq!(report.exit, ProcessorExit::DecodeFailed);
    assert_eq!(ends(&log), 1);
}

#[test]
fn test_retired_analyzers_end_the_loop() {
    let log = new_log();
    let idle = Recorder::new("idle", &[], &log);
    let engine = AnalysisEngine::new(vec![Box::new(idle)], EngineConfig::default());
    let source = ReaderSource::new(std::io::Cursor::new(tick_stream(1..=100)));
    let mut processor = AnalysisProcessor::new(engine, source, fast_config());

    processor.start().unwrap();
    let report = processor.wait().unwrap();
    assert_eq!(report.exit, ProcessorExit::AnalyzersRetired);
    assert_eq!(report.engine.active_analyzer_count(), 0);
}

#[test]
fn test_file_source_decodes_recorded_trace() {
    let log = new_log();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&tick_stream([3, 4])).unwrap();
    file.flush().unwrap();

    let source = ReaderSource::new(std::fs::File::open(file.path()).unwrap());
    let mut processor = AnalysisProcessor::new(recording_engine(&log), source, fast_config());
    processor.start().unwrap();
    let report = processor.wait().unwrap();

    assert_eq!(report.exit, ProcessorExit::EndOfStream);
    assert_eq!(event_ids(&log, "App.Tick"), vec![3, 4]);
}

#[test]
fn test_lifecycle_misuse_is_rejected() {
    let log = new_log();
    let source = ReaderSource::new(std::io::Cursor::new(Vec::new()));
    let processor = AnalysisProcessor::new(recording_engine(&log), source, fast_config());
    assert!(matches!(processor.wait(), Err(ProcessorError::NotStarted)));
}
