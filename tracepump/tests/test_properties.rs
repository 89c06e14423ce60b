mod common;

use common::{app_writer, feed_chunks, new_log, recording_engine, with_preamble, Call, LABEL, TICK};
use proptest::prelude::*;
use tracepump::analysis::DispatchBuilder;
use tracepump::domain::{ProtocolVersion, ThreadId, TransportKind, Uid};
use tracepump::encode::{EventWriter, PacketFramer, TidPacketFramer, TlsFramer};
use tracepump::stream::StreamBuffer;
use tracepump::transport::TidPacketTransport;

/// Splits `bytes` at the given (unsorted, possibly repeated) cut points.
fn split_at_cuts(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut cuts: Vec<usize> = cuts.iter().map(|cut| cut % (bytes.len() + 1)).collect();
    cuts.sort_unstable();
    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(bytes.len())) {
        chunks.push(bytes[start..cut].to_vec());
        start = cut;
    }
    chunks
}

fn replay(stream: &[u8], cuts: &[usize]) -> Vec<Call> {
    let log = new_log();
    let mut engine = recording_engine(&log);
    let chunks = split_at_cuts(stream, cuts);
    feed_chunks(&mut engine, chunks.iter().map(Vec::as_slice));
    engine.end();
    let calls = log.lock().unwrap().clone();
    calls
}

fn raw_stream_with_aux(labels: &[(u32, String)]) -> Vec<u8> {
    let mut writer = app_writer(ProtocolVersion::V1);
    for (id, name) in labels {
        writer.event(TICK).u32(*id).finish();
        writer.event(LABEL).u32(*id).aux(1, name.as_bytes()).finish();
    }
    with_preamble(TransportKind::Raw, ProtocolVersion::V1, writer.bytes())
}

/// One record per frame, alternating between threads 7 and 8 with a
/// global serial order.
fn tid_packet_stream(ids: &[u32]) -> Vec<u8> {
    let framer = TidPacketFramer::new(true);
    let mut stream = EventWriter::preamble(TransportKind::TidPacket, ProtocolVersion::V2).to_vec();
    stream.extend_from_slice(&framer.frame(0, app_writer(ProtocolVersion::V2).bytes()));
    for (serial, id) in (0u32..).zip(ids) {
        let mut writer = EventWriter::new(ProtocolVersion::V2);
        writer.event(TICK).serial(serial).u32(*id).finish();
        let thread = 7 + u16::try_from(serial % 2).unwrap();
        stream.extend_from_slice(&framer.frame(thread, writer.bytes()));
    }
    stream
}

/// Reorders `items` by sort keys drawn from `keys`, ties kept in order.
fn shuffle<T>(items: Vec<T>, keys: &[u8]) -> Vec<T> {
    let mut keyed: Vec<(u8, usize, T)> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| (keys[index % keys.len()], index, item))
        .collect();
    keyed.sort_by_key(|(key, index, _)| (*key, *index));
    keyed.into_iter().map(|(_, _, item)| item).collect()
}

fn tick_body(ids: &[u32]) -> Vec<u8> {
    let mut writer = app_writer(ProtocolVersion::V1);
    for id in ids {
        writer.event(TICK).u32(*id).finish();
    }
    writer.into_bytes()
}

/// Packet frames of at most 24 payload bytes, delivered in shuffled order.
fn shuffled_packet_stream(ids: &[u32], keys: &[u8]) -> Vec<u8> {
    let frames = PacketFramer::new().frame_all(&tick_body(ids), 24);
    let mut stream = EventWriter::preamble(TransportKind::Packet, ProtocolVersion::V1).to_vec();
    stream.extend(shuffle(frames, keys).concat());
    stream
}

/// Tls records of at most 24 payload bytes, delivered in shuffled order.
fn shuffled_tls_stream(ids: &[u32], keys: &[u8]) -> Vec<u8> {
    let mut framer = TlsFramer::new();
    let records: Vec<Vec<u8>> =
        tick_body(ids).chunks(24).map(|payload| framer.record(payload)).collect();
    let mut stream = EventWriter::preamble(TransportKind::Tls, ProtocolVersion::V1).to_vec();
    stream.extend(shuffle(records, keys).concat());
    stream
}

/// Serials alternate between threads 7 and 8, but the two threads' frames
/// are merged in the order `picks` chooses, so a thread often holds a serial
/// the other thread has not delivered yet.
fn interleaved_tid_packet_stream(ids: &[u32], picks: &[bool], compress: bool) -> Vec<u8> {
    let framer = TidPacketFramer::new(compress);
    let mut queues: [Vec<Vec<u8>>; 2] = [Vec::new(), Vec::new()];
    for (serial, id) in (0u32..).zip(ids) {
        let mut writer = EventWriter::new(ProtocolVersion::V2);
        writer.event(TICK).serial(serial).u32(*id).finish();
        let lane = usize::try_from(serial % 2).unwrap();
        queues[lane].push(framer.frame(7 + u16::try_from(lane).unwrap(), writer.bytes()));
    }

    let mut stream = EventWriter::preamble(TransportKind::TidPacket, ProtocolVersion::V2).to_vec();
    stream.extend_from_slice(&framer.frame(0, app_writer(ProtocolVersion::V2).bytes()));
    let [mut even, mut odd] = queues.map(|queue| queue.into_iter());
    let mut picks = picks.iter().cycle();
    loop {
        let frame = if picks.next().copied().unwrap_or(true) {
            even.next().or_else(|| odd.next())
        } else {
            odd.next().or_else(|| even.next())
        };
        match frame {
            Some(frame) => stream.extend_from_slice(&frame),
            None => break,
        }
    }
    stream
}

fn tick_ids(calls: &[Call]) -> Vec<u64> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::Event { name, id, .. } if name == "App.Tick" => *id,
            _ => None,
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_raw_aux_stream_is_chunking_invariant(
        labels in prop::collection::vec((any::<u32>(), "[a-z]{0,12}"), 1..8),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let stream = raw_stream_with_aux(&labels);
        let whole = replay(&stream, &[]);
        prop_assert_eq!(whole.iter().filter(|call| call.is_event("App.Label")).count(), labels.len());
        prop_assert_eq!(replay(&stream, &cuts), whole);
    }

    #[test]
    fn prop_tid_packet_stream_is_chunking_invariant(
        ids in prop::collection::vec(any::<u32>(), 1..10),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let stream = tid_packet_stream(&ids);
        let whole = replay(&stream, &[]);
        prop_assert_eq!(whole.iter().filter(|call| call.is_event("App.Tick")).count(), ids.len());
        prop_assert_eq!(replay(&stream, &cuts), whole);
    }

    #[test]
    fn prop_tid_packet_reassembles_thread_payloads(
        frames in prop::collection::vec((1u16..6, prop::collection::vec(any::<u8>(), 0..300)), 1..12),
        compress in any::<bool>(),
        cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let framer = TidPacketFramer::new(compress);
        let wire: Vec<u8> =
            frames.iter().flat_map(|(thread, payload)| framer.frame(*thread, payload)).collect();

        let mut transport = TidPacketTransport::new();
        let mut input = StreamBuffer::new();
        for chunk in split_at_cuts(&wire, &cuts) {
            input.append(&chunk);
            transport.pump(&mut input).unwrap();
        }
        prop_assert!(input.unread().is_empty());

        for stream in transport.threads() {
            let expected: Vec<u8> = frames
                .iter()
                .filter(|(thread, _)| ThreadId(*thread) == stream.thread)
                .flat_map(|(_, payload)| payload.iter().copied())
                .collect();
            prop_assert_eq!(stream.buffer.unread(), expected.as_slice());
        }
    }

    #[test]
    fn prop_dispatch_hash_depends_only_on_names(
        logger in "[A-Za-z]{1,16}",
        event in "[A-Za-z]{1,16}",
        other in "[A-Za-z]{1,16}",
        uid_a in 5u16..100,
        uid_b in 100u16..200,
    ) {
        let a = DispatchBuilder::new(Uid(uid_a), &logger, &event, 0).finalize().unwrap();
        let b = DispatchBuilder::new(Uid(uid_b), &logger, &event, 0).finalize().unwrap();
        prop_assert_eq!(a.hash(), b.hash());

        prop_assume!(other != event);
        let c = DispatchBuilder::new(Uid(uid_b), &logger, &other, 0).finalize().unwrap();
        prop_assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn prop_shuffled_packet_frames_are_chunking_invariant(
        ids in prop::collection::vec(any::<u32>(), 1..10),
        keys in prop::collection::vec(any::<u8>(), 1..32),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let stream = shuffled_packet_stream(&ids, &keys);
        let whole = replay(&stream, &[]);
        let expected: Vec<u64> = ids.iter().map(|id| u64::from(*id)).collect();
        prop_assert_eq!(tick_ids(&whole), expected);
        prop_assert_eq!(replay(&stream, &cuts), whole);
    }

    #[test]
    fn prop_shuffled_tls_records_are_chunking_invariant(
        ids in prop::collection::vec(any::<u32>(), 1..10),
        keys in prop::collection::vec(any::<u8>(), 1..32),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let stream = shuffled_tls_stream(&ids, &keys);
        let whole = replay(&stream, &[]);
        let expected: Vec<u64> = ids.iter().map(|id| u64::from(*id)).collect();
        prop_assert_eq!(tick_ids(&whole), expected);
        prop_assert_eq!(replay(&stream, &cuts), whole);
    }

    #[test]
    fn prop_interleaved_thread_serials_are_chunking_invariant(
        ids in prop::collection::vec(any::<u32>(), 1..12),
        picks in prop::collection::vec(any::<bool>(), 1..16),
        compress in any::<bool>(),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    ) {
        let stream = interleaved_tid_packet_stream(&ids, &picks, compress);
        let whole = replay(&stream, &[]);
        let expected: Vec<u64> = ids.iter().map(|id| u64::from(*id)).collect();
        prop_assert_eq!(tick_ids(&whole), expected);
        prop_assert_eq!(replay(&stream, &cuts), whole);
    }
}
