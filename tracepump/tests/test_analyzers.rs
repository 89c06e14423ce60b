mod common;

use common::{app_writer, with_preamble, LABEL, TICK};
use tracepump::analysis::{AnalysisEngine, Analyzer};
use tracepump::analyzers::{EventLogAnalyzer, EventStatsAnalyzer};
use tracepump::config::EngineConfig;
use tracepump::domain::{ProtocolVersion, TransportKind};
use tracepump::stream::SliceReader;

fn labelled_stream() -> Vec<u8> {
    let mut writer = app_writer(ProtocolVersion::V1);
    writer.event(TICK).u32(1).finish();
    writer.event(LABEL).u32(2).aux(1, b"boot").finish();
    writer.event(TICK).u32(3).finish();
    with_preamble(TransportKind::Raw, ProtocolVersion::V1, writer.bytes())
}

#[test]
fn test_stats_count_events_per_type() {
    let stats_analyzer = EventStatsAnalyzer::new();
    let stats = stats_analyzer.handle();
    let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(stats_analyzer)];
    let mut engine = AnalysisEngine::new(analyzers, EngineConfig::default());

    engine.on_data(&mut SliceReader::new(&labelled_stream()));
    engine.end();

    let stats = stats.lock().unwrap();
    assert!(stats.is_finished());
    assert_eq!(stats.count_of("App", "Tick"), 2);
    assert_eq!(stats.count_of("App", "Label"), 1);

    let report = stats.report();
    assert_eq!(report.session.trace_version(), 2);
    assert_eq!(report.events[0].event, "Tick");
    assert_eq!(report.events[0].bytes, 8);
    assert_eq!(report.threads, 1);
}

#[test]
fn test_log_formats_user_events() {
    let (sender, receiver) = crossbeam_channel::bounded(16);
    let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(EventLogAnalyzer::new(sender))];
    let mut engine = AnalysisEngine::new(analyzers, EngineConfig::default());

    engine.on_data(&mut SliceReader::new(&labelled_stream()));
    drop(engine);

    let lines: Vec<String> = receiver.iter().map(|event| event.to_string()).collect();
    assert_eq!(
        lines,
        vec![
            "[TID:0] App.Tick Id=1",
            "[TID:0] App.Label Id=2 Name=\"boot\"",
            "[TID:0] App.Tick Id=3",
        ]
    );
}

#[test]
fn test_log_filter_selects_event_types() {
    let (sender, receiver) = crossbeam_channel::bounded(16);
    let log = EventLogAnalyzer::new(sender).with_filter(["App.Label"]);
    let mut engine = AnalysisEngine::new(vec![Box::new(log)], EngineConfig::default());

    engine.on_data(&mut SliceReader::new(&labelled_stream()));
    drop(engine);

    let names: Vec<String> = receiver.iter().map(|event| event.event).collect();
    assert_eq!(names, vec!["Label"]);
}

#[test]
fn test_log_retires_when_receiver_is_gone() {
    let (sender, receiver) = crossbeam_channel::bounded(16);
    drop(receiver);
    let analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(EventLogAnalyzer::new(sender))];
    let mut engine = AnalysisEngine::new(analyzers, EngineConfig::default());

    assert!(!engine.on_data(&mut SliceReader::new(&labelled_stream())));
    assert_eq!(engine.active_analyzer_count(), 0);
}
