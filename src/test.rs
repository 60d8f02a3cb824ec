use crate::{
    io::{Cursor, CursorError},
    num::{u14, u15, u24, u28, u4, u7},
    parse_many, Chunk, ChunkKind, ChunkLengthDecoder, ChunkTagDecoder, EncodeOptions, Error,
    ErrorKind, EventKind, EventStreamDecoder, FileDecoder, FileEncoder, Format, Fps, Header,
    HeaderDecoder, MessageDecoder, MetaDecoder, MetaMessage, MidiMessage, ParamDecoder, PitchBend,
    Result, Smf, Status, SysexDecoder, Timing, Track, TrackDecoder, TrackEncoder, TrackEvent,
    UnknownChunk, VlqDecoder, VlqEncoder,
};

/// Install a subscriber so that decoder logs show up in failing tests.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// Build a chunk out of a tag and a body.
fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut raw = tag.to_vec();
    raw.extend_from_slice(&(body.len() as u32).to_be_bytes());
    raw.extend_from_slice(body);
    raw
}

fn header(format: u16, ntrks: u16, division: u16) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&format.to_be_bytes());
    body.extend_from_slice(&ntrks.to_be_bytes());
    body.extend_from_slice(&division.to_be_bytes());
    chunk(b"MThd", &body)
}

const LEAD_TRACK: &[u8] = &[
    0x00, 0xFF, 0x03, 0x04, b'L', b'e', b'a', b'd', //Track name
    0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, //Tempo
    0x00, 0xC0, 0x05, //Program change
    0x00, 0x90, 0x3C, 0x40, //Note on
    0x60, 0x3C, 0x00, //Note on, running status
    0x81, 0x00, 0x80, 0x3C, 0x40, //Note off
    0x00, 0xF0, 0x03, 0x43, 0x12, 0xF7, //SysEx
    0x00, 0xFF, 0x2F, 0x00, //End of track
];

const DRUM_TRACK: &[u8] = &[
    0x00, 0xB1, 0x07, 0x64, //Controller
    0x00, 0xF8, //Timing clock
    0x00, 0xFF, 0x2F, 0x00, //End of track
];

/// A format 1 file with two tracks and an unknown chunk between them.
fn song() -> Vec<u8> {
    let mut raw = header(1, 3, 480);
    raw.extend(chunk(b"MTrk", LEAD_TRACK));
    raw.extend(chunk(b"XFIH", &[1, 2, 3]));
    raw.extend(chunk(b"MTrk", DRUM_TRACK));
    raw
}

/// Feed bytes one at a time, collecting the status of every call.
fn feed_file(decoder: &mut FileDecoder, smf: &mut Smf, raw: &[u8]) -> Result<Vec<Status>> {
    raw.iter().map(|&byte| decoder.feed(byte, smf)).collect()
}

fn encode_file(encoder: &mut FileEncoder) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let (byte, status) = encoder.encode_byte().unwrap();
        out.push(byte);
        if status == Status::Success {
            return out;
        }
    }
}

fn encode_vlq(value: u32) -> Vec<u8> {
    let mut encoder = VlqEncoder::new();
    encoder.set_data(value).unwrap();
    let mut out = Vec::new();
    loop {
        let (byte, status) = encoder.encode_byte().unwrap();
        out.push(byte);
        if status == Status::Success {
            return out;
        }
    }
}

fn decode_vlq(raw: &[u8]) -> Result<u32> {
    let mut decoder = VlqDecoder::new();
    for (i, &byte) in raw.iter().enumerate() {
        let status = decoder.feed(byte)?;
        assert_eq!(status == Status::Success, i == raw.len() - 1);
    }
    Ok(decoder.value().as_int())
}

mod varlen {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_boundaries() {
        assert_eq!(decode_vlq(&[0x00]).unwrap(), 0);
        assert_eq!(decode_vlq(&[0x7F]).unwrap(), 0x7F);
        assert_eq!(decode_vlq(&[0x81, 0x00]).unwrap(), 0x80);
        assert_eq!(decode_vlq(&[0xFF, 0x7F]).unwrap(), 0x3FFF);
        assert_eq!(decode_vlq(&[0x81, 0x80, 0x00]).unwrap(), 0x4000);
        assert_eq!(decode_vlq(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(), 0x0FFF_FFFF);
    }

    #[test]
    fn decode_too_long() {
        let mut decoder = VlqDecoder::new();
        for _ in 0..3 {
            assert_eq!(decoder.feed(0x80).unwrap(), Status::Pending);
        }
        let err = decoder.feed(0x80).unwrap_err();
        assert!(err.kind().is_malformed_vlq(), "{:?}", err);
        assert!(decoder.feed(0x00).unwrap_err().kind().is_terminal());
        decoder.reset();
        assert_eq!(decoder.feed(0x05).unwrap(), Status::Success);
        assert_eq!(decoder.value(), u28::new(5));
    }

    #[test]
    fn encode_minimal() {
        assert_eq!(encode_vlq(0), [0x00]);
        assert_eq!(encode_vlq(0x7F), [0x7F]);
        assert_eq!(encode_vlq(0x80), [0x81, 0x00]);
        assert_eq!(encode_vlq(0x2000), [0xC0, 0x00]);
        assert_eq!(encode_vlq(0x3FFF), [0xFF, 0x7F]);
        assert_eq!(encode_vlq(0x4000), [0x81, 0x80, 0x00]);
        assert_eq!(encode_vlq(0x10_0000), [0xC0, 0x80, 0x00]);
        assert_eq!(encode_vlq(0x0FFF_FFFF), [0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn sweep() {
        let boundaries = [0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0x0FFF_FFFF];
        let values = (0..1 << 28)
            .step_by(809)
            .chain(0..0x4000)
            .chain(boundaries.iter().copied());
        for value in values {
            let raw = encode_vlq(value);
            assert_eq!(raw.len(), u28::new(value).varlen_len(), "{:#x}", value);
            assert_eq!(decode_vlq(&raw).unwrap(), value);
        }
    }

    #[test]
    fn encode_out_of_range() {
        let mut encoder = VlqEncoder::new();
        let err = encoder.set_data(0x1000_0000).unwrap_err();
        assert!(err.kind().is_invalid_data());
        assert!(encoder.encode_byte().unwrap_err().kind().is_invalid_data());
    }

    #[test]
    fn encode_after_success() {
        let mut encoder = VlqEncoder::new();
        encoder.set_data(3).unwrap();
        assert_eq!(encoder.encode_byte().unwrap(), (0x03, Status::Success));
        assert!(encoder.encode_byte().unwrap_err().kind().is_terminal());
    }
}

mod fields {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chunk_length() {
        let mut decoder = ChunkLengthDecoder::new();
        let statuses: Vec<_> = [0, 0, 1, 0]
            .iter()
            .map(|&b| decoder.feed(b).unwrap())
            .collect();
        assert_eq!(
            statuses,
            [
                Status::Pending,
                Status::Pending,
                Status::Pending,
                Status::Success
            ]
        );
        assert_eq!(decoder.value(), 256);
        assert!(decoder.feed(0).unwrap_err().kind().is_terminal());
    }

    #[test]
    fn param() {
        let mut decoder = ParamDecoder::new();
        assert_eq!(decoder.feed(0x01).unwrap(), Status::Pending);
        assert_eq!(decoder.feed(0xE0).unwrap(), Status::Success);
        assert_eq!(decoder.value(), 480);
    }

    #[test]
    fn chunk_tag() {
        let mut decoder = ChunkTagDecoder::new();
        for &b in b"MTrk" {
            decoder.feed(b).unwrap();
        }
        assert_eq!(decoder.kind(), ChunkKind::Track);
        decoder.reset();
        for &b in b"XFIH" {
            decoder.feed(b).unwrap();
        }
        assert_eq!(decoder.kind(), ChunkKind::Unknown);
        assert_eq!(&decoder.tag(), b"XFIH");
    }

    #[test]
    fn format_and_timing() {
        assert_eq!(Format::from_raw(1).unwrap(), Format::Parallel);
        assert!(Format::from_raw(3).unwrap_err().kind().is_unexpected());
        assert_eq!(
            Timing::from_raw(0x01E0).unwrap(),
            Timing::Metrical(u15::new(480))
        );
        let smpte = Timing::from_raw(0xE728).unwrap();
        assert_eq!(smpte, Timing::Timecode(Fps::Fps25, 40));
        assert_eq!(smpte.as_raw(), 0xE728);
        assert!(Timing::from_raw(0x9C00).is_err());
    }
}

mod events {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed_message(raw: &[u8]) -> (Vec<Status>, TrackEvent) {
        let mut decoder = MessageDecoder::new();
        let mut event = TrackEvent::default();
        let statuses = raw
            .iter()
            .map(|&b| decoder.feed(b, &mut event).unwrap())
            .collect();
        (statuses, event)
    }

    #[test]
    fn channel_message() {
        let (statuses, event) = feed_message(&[0x90, 0x3C, 0x40]);
        assert_eq!(
            statuses,
            [Status::Pending, Status::Pending, Status::Success]
        );
        assert_eq!(event.bytes, [0x90, 0x3C, 0x40]);
        let (statuses, _) = feed_message(&[0xC3, 0x05]);
        assert_eq!(statuses, [Status::Pending, Status::Success]);
    }

    #[test]
    fn system_messages() {
        let (statuses, event) = feed_message(&[0xF8]);
        assert_eq!(statuses, [Status::Success]);
        assert_eq!(event.bytes, [0xF8]);
        let (statuses, _) = feed_message(&[0xF2, 0x10, 0x20]);
        assert_eq!(
            statuses,
            [Status::Pending, Status::Pending, Status::Success]
        );
    }

    #[test]
    fn message_rejects_data_status() {
        let mut decoder = MessageDecoder::new();
        let mut event = TrackEvent::default();
        assert!(decoder.feed(0x40, &mut event).unwrap_err().kind().is_unexpected());
        assert!(event.bytes.is_empty());
    }

    #[test]
    fn message_is_terminal() {
        let mut decoder = MessageDecoder::new();
        let mut event = TrackEvent::default();
        decoder.feed(0xF6, &mut event).unwrap();
        let before = event.clone();
        assert!(decoder.feed(0x90, &mut event).unwrap_err().kind().is_terminal());
        assert_eq!(event, before);
    }

    #[test]
    fn meta() {
        let raw = [0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20];
        let mut decoder = MetaDecoder::new();
        let mut event = TrackEvent::default();
        for (i, &b) in raw.iter().enumerate() {
            let status = decoder.feed(b, &mut event).unwrap();
            assert_eq!(status == Status::Success, i == raw.len() - 1);
        }
        assert_eq!(event.bytes, raw);
        assert_eq!(
            event.kind().unwrap(),
            EventKind::Meta(MetaMessage::Tempo(u24::from(500_000)))
        );
    }

    #[test]
    fn empty_meta() {
        let mut decoder = MetaDecoder::new();
        let mut event = TrackEvent::default();
        assert_eq!(decoder.feed(0xFF, &mut event).unwrap(), Status::Pending);
        assert_eq!(decoder.feed(0x2F, &mut event).unwrap(), Status::Pending);
        assert_eq!(decoder.feed(0x00, &mut event).unwrap(), Status::Success);
        assert_eq!(event.kind().unwrap(), EventKind::Meta(MetaMessage::EndOfTrack));
    }

    #[test]
    fn sysex() {
        let mut decoder = SysexDecoder::new();
        let mut event = TrackEvent::default();
        let statuses: Vec<_> = [0xF0, 0x03, 0x43, 0xF7, 0xF7]
            .iter()
            .map(|&b| decoder.feed(b, &mut event).unwrap())
            .collect();
        assert_eq!(statuses.last(), Some(&Status::Success));
        assert_eq!(event.bytes, [0xF0, 0x43, 0xF7, 0xF7]);
        assert_eq!(
            event.kind().unwrap(),
            EventKind::SysEx(&[0x43, 0xF7, 0xF7])
        );
    }

    #[test]
    fn sysex_rejects_status_byte() {
        let mut decoder = SysexDecoder::new();
        let mut event = TrackEvent::default();
        decoder.feed(0xF0, &mut event).unwrap();
        decoder.feed(0x03, &mut event).unwrap();
        decoder.feed(0x43, &mut event).unwrap();
        let err = decoder.feed(0x90, &mut event).unwrap_err();
        assert!(err.kind().is_unexpected(), "{:?}", err);
        assert_eq!(event.bytes, [0xF0, 0x43]);
        assert!(decoder.feed(0x00, &mut event).unwrap_err().kind().is_terminal());
    }

    #[test]
    fn empty_escape() {
        let mut decoder = SysexDecoder::new();
        let mut event = TrackEvent::default();
        assert_eq!(decoder.feed(0xF7, &mut event).unwrap(), Status::Pending);
        assert_eq!(decoder.feed(0x00, &mut event).unwrap(), Status::Success);
        assert_eq!(event.kind().unwrap(), EventKind::Escape(&[]));
    }

    #[test]
    fn typed_views() {
        let bend = TrackEvent::from_raw(u28::new(0), vec![0xE2, 0x00, 0x40]).unwrap();
        assert_eq!(
            bend.kind().unwrap(),
            EventKind::Midi {
                channel: u4::new(2),
                message: MidiMessage::PitchBend {
                    bend: PitchBend::mid_raw_value()
                },
            }
        );
        let clock = TrackEvent::from_raw(u28::new(0), vec![0xF8]).unwrap();
        assert_eq!(
            clock.kind().unwrap(),
            EventKind::System {
                status: 0xF8,
                data: &[]
            }
        );
        assert!(TrackEvent::default().kind().unwrap_err().kind().is_invalid_data());
        assert!(TrackEvent::from_raw(u28::new(0), vec![0x90, 0x3C]).is_err());
    }

    #[test]
    fn constructors() {
        let on = TrackEvent::midi(
            u28::new(10),
            u4::new(9),
            MidiMessage::NoteOn {
                key: u7::new(36),
                vel: u7::new(100),
            },
        );
        assert_eq!(on.bytes, [0x99, 36, 100]);
        let bend = TrackEvent::midi(
            u28::new(0),
            u4::new(0),
            MidiMessage::PitchBend {
                bend: PitchBend(u14::new(0x3FFF)),
            },
        );
        assert_eq!(bend.bytes, [0xE0, 0x7F, 0x7F]);
        let name = TrackEvent::meta(u28::new(0), MetaMessage::TrackName(b"Bass")).unwrap();
        assert_eq!(name.bytes, [0xFF, 0x03, 0x04, b'B', b'a', b's', b's']);
        let sysex = TrackEvent::sysex(u28::new(0), &[0x7E, 0xF7]).unwrap();
        assert_eq!(sysex.bytes, [0xF0, 0x7E, 0xF7]);
    }
}

mod stream {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed_stream(raw: &[u8]) -> (Result<Vec<Status>>, Track) {
        let mut decoder = EventStreamDecoder::new();
        let mut track = Track::new();
        let statuses = raw
            .iter()
            .map(|&b| decoder.feed(b, &mut track))
            .collect();
        (statuses, track)
    }

    #[test]
    fn running_status() {
        let raw = [
            0x00, 0x90, 0x3C, 0x40, 0x10, 0x3C, 0x00, 0x00, 0xFF, 0x2F, 0x00,
        ];
        let (statuses, track) = feed_stream(&raw);
        let ends: Vec<_> = statuses
            .unwrap()
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s == Status::Success)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(ends, [3, 6, 10]);
        assert_eq!(track.events.len(), 3);
        assert_eq!(track.events[1].delta, u28::new(0x10));
        assert_eq!(track.events[1].bytes, [0x90, 0x3C, 0x00]);
    }

    #[test]
    fn running_status_survives_meta() {
        let raw = [
            0x00, 0x90, 0x3C, 0x40, 0x00, 0xFF, 0x01, 0x00, 0x00, 0x3C, 0x00,
        ];
        let (statuses, track) = feed_stream(&raw);
        statuses.unwrap();
        assert_eq!(track.events[2].bytes, [0x90, 0x3C, 0x00]);
    }

    #[test]
    fn progress_accessors() {
        let mut decoder = EventStreamDecoder::new();
        let mut track = Track::new();
        assert!(decoder.at_event_boundary());
        assert_eq!(decoder.running_status(), None);

        decoder.feed(0x81, &mut track).unwrap();
        assert!(!decoder.at_event_boundary());
        decoder.feed(0x00, &mut track).unwrap();
        assert!(!decoder.at_event_boundary());
        decoder.feed(0x90, &mut track).unwrap();
        assert!(!decoder.at_event_boundary());
        assert_eq!(decoder.running_status(), Some(0x90));
        decoder.feed(0x3C, &mut track).unwrap();
        assert_eq!(decoder.feed(0x40, &mut track).unwrap(), Status::Success);
        assert!(decoder.at_event_boundary());

        for &b in [0x00, 0xFF, 0x01, 0x00, 0x00, 0xF0, 0x01, 0xF7].iter() {
            decoder.feed(b, &mut track).unwrap();
        }
        assert!(decoder.at_event_boundary());
        assert_eq!(decoder.running_status(), Some(0x90));

        decoder.feed(0x00, &mut track).unwrap();
        assert_eq!(decoder.feed(0xF1, &mut track).unwrap(), Status::Success);
        assert_eq!(decoder.running_status(), Some(0xF1));
        decoder.feed(0x00, &mut track).unwrap();
        decoder.feed(0x10, &mut track).unwrap_err();
        assert!(decoder.is_failed());
        assert!(!decoder.at_event_boundary());
    }

    #[test]
    fn data_byte_without_running_status() {
        let mut decoder = EventStreamDecoder::new();
        let mut track = Track::new();
        decoder.feed(0x00, &mut track).unwrap();
        let err = decoder.feed(0x3C, &mut track).unwrap_err();
        assert!(err.kind().is_unexpected(), "{:?}", err);
        assert!(decoder.is_failed());
        assert!(decoder.feed(0x00, &mut track).unwrap_err().kind().is_terminal());
    }

    #[test]
    fn data_byte_after_parameterless_status() {
        let (statuses, _) = feed_stream(&[0x00, 0xF8, 0x00, 0x10]);
        assert!(statuses.unwrap_err().kind().is_unexpected());
    }
}

mod chunks {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn track() {
        let mut decoder = TrackDecoder::new();
        let mut track = Track::new();
        let raw = [0, 0, 0, 4, 0x00, 0xFF, 0x2F, 0x00];
        for (i, &b) in raw.iter().enumerate() {
            let status = decoder.feed(b, &mut track).unwrap();
            assert_eq!(status == Status::Success, i == raw.len() - 1);
        }
        assert_eq!(track.len, 4);
        assert_eq!(track.events.len(), 1);
    }

    #[test]
    fn empty_track() {
        let mut decoder = TrackDecoder::new();
        let mut track = Track::new();
        for _ in 0..3 {
            assert_eq!(decoder.feed(0, &mut track).unwrap(), Status::Pending);
        }
        assert_eq!(decoder.feed(0, &mut track).unwrap(), Status::Success);
        assert!(track.events.is_empty());
    }

    #[test]
    fn track_length_mismatch() {
        let mut decoder = TrackDecoder::new();
        let mut track = Track::new();
        let raw = [0, 0, 0, 3, 0x00, 0xFF];
        for &b in raw.iter() {
            assert_eq!(decoder.feed(b, &mut track).unwrap(), Status::Pending);
        }
        let err = decoder.feed(0x2F, &mut track).unwrap_err();
        assert!(err.kind().is_length_mismatch(), "{:?}", err);
    }

    #[test]
    fn header() {
        let mut decoder = HeaderDecoder::new();
        let mut header = Header::default();
        let raw = [0, 0, 0, 8, 0, 1, 0, 2, 0, 96, 0xAA, 0xBB];
        for (i, &b) in raw.iter().enumerate() {
            let status = decoder.feed(b, &mut header).unwrap();
            assert_eq!(status == Status::Success, i == raw.len() - 1);
        }
        assert_eq!(
            header,
            Header {
                format: 1,
                ntrks: 2,
                division: 96,
                extra: vec![0xAA, 0xBB],
            }
        );
        assert_eq!(header.chunk_len(), 8);
    }

    #[test]
    fn short_header() {
        let mut decoder = HeaderDecoder::new();
        let mut header = Header::default();
        for &b in [0, 0, 0].iter() {
            decoder.feed(b, &mut header).unwrap();
        }
        let err = decoder.feed(5, &mut header).unwrap_err();
        assert!(err.kind().is_length_mismatch());
    }
}

mod file {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_song() {
        init_logging();
        let raw = song();
        let mut decoder = FileDecoder::new();
        let mut smf = Smf::default();
        let statuses = feed_file(&mut decoder, &mut smf, &raw).unwrap();
        assert_eq!(statuses.last(), Some(&Status::Success));
        assert!(statuses[..statuses.len() - 1]
            .iter()
            .all(|&s| s == Status::Pending));
        assert!(decoder.is_done());
        assert_eq!(decoder.position(), raw.len() as u64);

        assert_eq!(smf.header.format().unwrap(), Format::Parallel);
        assert_eq!(smf.header.timing().unwrap(), Timing::Metrical(u15::new(480)));
        assert_eq!(smf.chunks.len(), 3);
        assert_eq!(smf.tracks().count(), 2);
        let unknown: Vec<_> = smf.unknown_chunks().collect();
        assert_eq!(
            unknown,
            [&UnknownChunk {
                tag: *b"XFIH",
                data: vec![1, 2, 3],
            }]
        );
        assert_eq!(smf.chunks[1].tag(), *b"XFIH");
        let lead = smf.tracks().next().unwrap();
        assert_eq!(lead.len, LEAD_TRACK.len() as u32);
        assert_eq!(lead.events.len(), 8);
        assert_eq!(
            lead.events[0].kind().unwrap(),
            EventKind::Meta(MetaMessage::TrackName(b"Lead"))
        );
        assert_eq!(lead.events[4].delta, u28::new(0x60));
        assert_eq!(lead.events[4].bytes, [0x90, 0x3C, 0x00]);
        assert_eq!(lead.events[5].delta, u28::new(0x80));
    }

    #[test]
    fn no_tracks() {
        let raw = header(0, 0, 96);
        let mut decoder = FileDecoder::new();
        let mut smf = Smf::default();
        let statuses = feed_file(&mut decoder, &mut smf, &raw).unwrap();
        assert_eq!(statuses.last(), Some(&Status::Success));
        assert!(smf.chunks.is_empty());
        let err = decoder.feed(b'M', &mut smf).unwrap_err();
        assert!(err.kind().is_unexpected());
    }

    #[test]
    fn chunk_beyond_track_count() {
        let mut raw = header(0, 1, 96);
        raw.extend(chunk(b"MTrk", &[0x00, 0xFF, 0x2F, 0x00]));
        let len = raw.len() as u64;
        raw.extend(chunk(b"MTrk", &[]));
        let err = Smf::parse(&raw).unwrap_err();
        assert!(err.kind().is_unexpected(), "{:?}", err);
        assert_eq!(err.position(), Some(len));
    }

    #[test]
    fn must_start_with_header() {
        let raw = chunk(b"MTrk", &[]);
        let err = Smf::parse(&raw).unwrap_err();
        assert!(err.kind().is_unexpected());
        assert_eq!(err.position(), Some(3));
    }

    #[test]
    fn duplicate_header() {
        let mut raw = header(0, 1, 96);
        raw.extend(header(0, 1, 96));
        assert!(Smf::parse(&raw).unwrap_err().kind().is_unexpected());
    }

    #[test]
    fn error_position_and_context() {
        init_logging();
        let mut raw = header(0, 1, 96);
        raw.extend(chunk(b"MTrk", &[0x00, 0xF0, 0x02, 0x43, 0x90]));
        let mut decoder = FileDecoder::new();
        let mut smf = Smf::default();
        let err: Error = feed_file(&mut decoder, &mut smf, &raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected("status byte inside sysex data"));
        assert_eq!(err.position(), Some(26));
        assert_eq!(err.context(), ["invalid sysex event", "invalid track chunk"]);
        assert!(err.to_string().contains("at byte 26"), "{}", err);
        assert!(decoder.is_failed());
    }

    #[test]
    fn terminal_states_keep_output() {
        let raw = song();
        let mut decoder = FileDecoder::new();
        let mut smf = Smf::default();
        feed_file(&mut decoder, &mut smf, &raw).unwrap();
        let decoded = smf.clone();
        assert!(decoder.feed(0x00, &mut smf).is_err());
        assert_eq!(smf, decoded);

        let mut decoder = FileDecoder::new();
        let mut smf = Smf::default();
        feed_file(&mut decoder, &mut smf, &raw[..22]).unwrap();
        decoder.feed(0x00, &mut smf).unwrap();
        decoder.feed(0x3C, &mut smf).unwrap_err();
        let partial = smf.clone();
        let err = decoder.feed(0x00, &mut smf).unwrap_err();
        assert!(err.kind().is_terminal());
        assert_eq!(smf, partial);

        decoder.reset();
        feed_file(&mut decoder, &mut smf, &raw).unwrap();
        assert_eq!(smf, decoded);
    }

    #[test]
    fn track_overruns_into_next_chunk() {
        let mut raw = header(1, 2, 96);
        raw.extend(chunk(b"MTrk", &[0x00, 0xFF, 0x2F, 0x00]));
        raw[21] = 6;
        raw.extend(chunk(b"MTrk", &[0x00, 0xFF, 0x2F, 0x00]));
        let err = Smf::parse(&raw).unwrap_err();
        assert_eq!(
            err.kind(),
            ErrorKind::Unexpected("data byte with no running status active")
        );
        assert_eq!(err.position(), Some(27));
        assert_eq!(err.context(), ["invalid track chunk"]);
    }

    #[test]
    fn track_overruns_input() {
        let mut raw = header(0, 1, 96);
        raw.extend(chunk(b"MTrk", &[0x00, 0xFF, 0x2F, 0x00]));
        raw[21] = 6;
        let err = Smf::parse(&raw).unwrap_err();
        assert!(err.kind().is_length_mismatch(), "{:?}", err);
        assert_eq!(err.position(), Some(raw.len() as u64));
    }

    #[test]
    fn save_and_load() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("smfstream-load-{}.mid", std::process::id()));
        let smf = Smf::parse(&song()).unwrap();
        smf.save(&good).unwrap();
        assert_eq!(Smf::load(&good).unwrap(), smf);

        let bad = dir.join(format!("smfstream-truncated-{}.mid", std::process::id()));
        std::fs::write(&bad, &song()[..30]).unwrap();
        let err = Smf::load(&bad).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        std::fs::remove_file(&good).unwrap();
        std::fs::remove_file(&bad).unwrap();
    }

    #[test]
    fn truncated_input() {
        let raw = song();
        let err = Smf::parse(&raw[..raw.len() - 1]).unwrap_err();
        assert!(err.kind().is_length_mismatch());
        assert_eq!(err.position(), Some(raw.len() as u64 - 1));
        assert!(Smf::parse(&[]).unwrap_err().kind().is_length_mismatch());
    }

    #[test]
    fn batch() {
        let good = song();
        let bad = chunk(b"MTrk", &[]);
        let results = parse_many(&[&good[..], &bad[..], &good[..]]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().chunks.len(), 3);
    }
}

mod encode {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip() {
        init_logging();
        let raw = song();
        let smf = Smf::parse(&raw).unwrap();
        let mut encoder = FileEncoder::new();
        encoder.set_data(&smf).unwrap();
        assert_eq!(encode_file(&mut encoder), raw);
        assert!(encoder.encode_byte().unwrap_err().kind().is_terminal());
        assert_eq!(smf.to_bytes().unwrap(), raw);
    }

    #[test]
    fn extended_header_round_trip() {
        let raw = chunk(b"MThd", &[0, 7, 0, 0, 0x01, 0xE0, 0xAA, 0xBB]);
        let smf = Smf::parse(&raw).unwrap();
        assert_eq!(smf.header.extra, [0xAA, 0xBB]);
        assert!(smf.header.format().is_err());
        assert_eq!(smf.to_bytes().unwrap(), raw);
    }

    #[test]
    fn without_running_status() {
        let smf = Smf::parse(&song()).unwrap();
        let options = EncodeOptions::new().running_status(false);
        let raw = smf.to_bytes_with(options).unwrap();
        assert_eq!(raw.len(), song().len() + 1);
        let reparsed = Smf::parse(&raw).unwrap();
        let lead = reparsed.tracks().next().unwrap();
        assert_eq!(lead.len, LEAD_TRACK.len() as u32 + 1);
        assert_eq!(lead.events, smf.tracks().next().unwrap().events);
    }

    #[test]
    fn stored_length_is_ignored() {
        let mut smf = Smf::parse(&song()).unwrap();
        if let Chunk::Track(track) = &mut smf.chunks[0] {
            track.len = 999;
        }
        assert_eq!(smf.to_bytes().unwrap(), song());
    }

    #[test]
    fn track_encoder() {
        let track = Track::from_events(vec![
            TrackEvent::midi(
                u28::new(0),
                u4::new(0),
                MidiMessage::NoteOn {
                    key: u7::new(60),
                    vel: u7::new(64),
                },
            ),
            TrackEvent::midi(
                u28::new(96),
                u4::new(0),
                MidiMessage::NoteOn {
                    key: u7::new(60),
                    vel: u7::new(0),
                },
            ),
            TrackEvent::meta(u28::new(0), MetaMessage::EndOfTrack).unwrap(),
        ])
        .unwrap();
        assert_eq!(track.len, 11);
        let mut encoder = TrackEncoder::new();
        encoder.set_data(&track).unwrap();
        let mut out = Vec::new();
        loop {
            let (byte, status) = encoder.encode_byte().unwrap();
            out.push(byte);
            if status == Status::Success {
                break;
            }
        }
        assert_eq!(
            out,
            [
                b'M', b'T', b'r', b'k', 0, 0, 0, 11, //Head
                0x00, 0x90, 60, 64, //Note on
                0x60, 60, 0, //Running status
                0x00, 0xFF, 0x2F, 0x00, //End of track
            ]
        );
    }

    #[test]
    fn build_and_write() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Timecode(Fps::Fps30, 80),
        ));
        let mut track = Track::new();
        track
            .events
            .push(TrackEvent::meta(u28::new(0), MetaMessage::EndOfTrack).unwrap());
        track.refresh_len().unwrap();
        smf.push_track(track).unwrap();
        smf.push_unknown(UnknownChunk::new(*b"XYZW")).unwrap();
        assert_eq!(smf.header.ntrks, 2);

        let mut out = Vec::new();
        smf.write(&mut out).unwrap();
        assert_eq!(Smf::parse(&out).unwrap(), smf);

        let mut buf = [0; 16];
        let mut cursor = Cursor::new(&mut buf);
        assert_eq!(smf.write(&mut cursor), Err(CursorError::OutOfSpace));
        assert_eq!(cursor.cursor(), 16);
    }

    #[test]
    fn invalid_data() {
        let mut smf = Smf::parse(&song()).unwrap();
        smf.header.ntrks = 2;
        let mut encoder = FileEncoder::new();
        assert!(encoder.set_data(&smf).unwrap_err().kind().is_invalid_data());
        assert!(encoder.encode_byte().unwrap_err().kind().is_invalid_data());

        let bad_events: [&[u8]; 4] = [
            &[],
            &[0x3C, 0x40],
            &[0x90, 0x3C],
            &[0xFF, 0x01, 0x05, b'a'],
        ];
        for bytes in bad_events.iter() {
            let track = Track {
                len: 0,
                events: vec![TrackEvent {
                    delta: u28::new(0),
                    bytes: bytes.to_vec(),
                }],
            };
            let err = TrackEncoder::new().set_data(&track).unwrap_err();
            assert!(err.kind().is_invalid_data(), "{:?}: {:?}", bytes, err);
        }
    }

    #[test]
    fn unbound_encoder() {
        let mut encoder = FileEncoder::new();
        assert!(encoder.encode_byte().unwrap_err().kind().is_invalid_data());
        assert!(encoder.encode_byte().unwrap_err().kind().is_terminal());
        encoder.reset();
        let smf = Smf::parse(&header(0, 0, 96)).unwrap();
        encoder.set_data(&smf).unwrap();
        assert_eq!(encode_file(&mut encoder), header(0, 0, 96));
    }
}

mod generated {
    use super::*;
    use proptest::prelude::*;

    fn arb_delta() -> impl Strategy<Value = u28> {
        prop_oneof![0u32..0x80, 0u32..0x1000_0000].prop_map(u28::new)
    }

    /// Messages drawn mostly from a few statuses, so that running status kicks in often.
    fn arb_message() -> impl Strategy<Value = Vec<u8>> {
        let status = prop_oneof![
            prop::sample::select(vec![0x90u8, 0x80, 0xB3, 0xC5, 0xE0, 0xF2, 0xF3, 0xF8]),
            0x80u8..=0xEF,
            prop::sample::select(vec![0xF1u8, 0xF6, 0xFE]),
        ];
        (status, [0u8..0x80, 0u8..0x80]).prop_map(|(status, params)| {
            let mut bytes = vec![status];
            bytes.extend_from_slice(&params[..crate::event::param_count(status).unwrap()]);
            bytes
        })
    }

    fn arb_event() -> impl Strategy<Value = TrackEvent> {
        let sysex_data = prop::collection::vec(prop_oneof![0u8..0x80, Just(0xF7)], 0..24);
        prop_oneof![
            6 => (arb_delta(), arb_message())
                .prop_map(|(delta, bytes)| TrackEvent::from_raw(delta, bytes).unwrap()),
            2 => (arb_delta(), any::<u8>(), prop::collection::vec(any::<u8>(), 0..200))
                .prop_map(|(delta, kind, data)| {
                    TrackEvent::meta(delta, MetaMessage::Unknown(kind, &data)).unwrap()
                }),
            1 => (arb_delta(), any::<bool>(), sysex_data).prop_map(|(delta, escape, data)| {
                if escape {
                    TrackEvent::escape(delta, &data).unwrap()
                } else {
                    TrackEvent::sysex(delta, &data).unwrap()
                }
            }),
        ]
    }

    fn arb_chunk() -> impl Strategy<Value = Chunk> {
        let tag = any::<[u8; 4]>().prop_filter("known chunk tag", |tag| {
            ChunkKind::classify(*tag) == ChunkKind::Unknown
        });
        prop_oneof![
            4 => prop::collection::vec(arb_event(), 0..40)
                .prop_map(|events| Chunk::Track(Track::from_events(events).unwrap())),
            1 => (tag, prop::collection::vec(any::<u8>(), 0..32))
                .prop_map(|(tag, data)| Chunk::Unknown(UnknownChunk { tag, data })),
        ]
    }

    fn arb_smf() -> impl Strategy<Value = Smf> {
        let extra = prop::collection::vec(any::<u8>(), 0..4);
        (any::<u16>(), any::<u16>(), extra, prop::collection::vec(arb_chunk(), 0..5)).prop_map(
            |(format, division, extra, chunks)| {
                let mut smf = Smf::new(Header {
                    format,
                    ntrks: 0,
                    division,
                    extra,
                });
                for chunk in chunks {
                    match chunk {
                        Chunk::Track(track) => smf.push_track(track).unwrap(),
                        Chunk::Unknown(chunk) => smf.push_unknown(chunk).unwrap(),
                    }
                }
                smf
            },
        )
    }

    proptest! {
        #[test]
        fn vlq_round_trip(value in 0u32..0x1000_0000) {
            let raw = encode_vlq(value);
            prop_assert_eq!(raw.len(), u28::new(value).varlen_len());
            prop_assert_eq!(decode_vlq(&raw).unwrap(), value);
        }

        #[test]
        fn file_round_trip(smf in arb_smf()) {
            let raw = smf.to_bytes().unwrap();
            let decoded = Smf::parse(&raw).unwrap();
            prop_assert_eq!(&decoded, &smf);
            prop_assert_eq!(&decoded.to_bytes().unwrap(), &raw);

            let mut decoder = FileDecoder::new();
            let mut streamed = Smf::default();
            let statuses = feed_file(&mut decoder, &mut streamed, &raw).unwrap();
            prop_assert_eq!(statuses.last(), Some(&Status::Success));
            prop_assert_eq!(&streamed, &smf);

            let options = EncodeOptions::new().running_status(false);
            let explicit = Smf::parse(&smf.to_bytes_with(options).unwrap()).unwrap();
            prop_assert_eq!(explicit.chunks.len(), smf.chunks.len());
            for (explicit, original) in explicit.chunks.iter().zip(smf.chunks.iter()) {
                match (explicit, original) {
                    (Chunk::Track(explicit), Chunk::Track(original)) => {
                        prop_assert_eq!(&explicit.events, &original.events);
                        prop_assert_eq!(explicit.len, original.encoded_len(options).unwrap());
                    }
                    (explicit, original) => prop_assert_eq!(explicit, original),
                }
            }
        }
    }
}
