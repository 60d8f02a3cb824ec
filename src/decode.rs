//! Byte-at-a-time decoders for every grammar element of an SMF file.
//!
//! Each decoder takes a single byte and a mutable reference to the record it populates.
//! The record is only ever appended to, so whatever was decoded before a failure stays in place.
//!
//! Composite decoders own their children and delegate to them, reprocessing the current byte
//! when they switch state instead of recursing.

use crate::{
    event::{param_count, TrackEvent},
    prelude::*,
    primitive::{trampoline, ChunkKind, Phase},
    smf::{Chunk, Header, Smf, Track, UnknownChunk},
};
use tracing::{debug, trace};

/// Cap on how much memory a declared length may preallocate.
const MAX_PREALLOC: u32 = 64 * 1024;

/// Decodes a variable-length quantity of up to 4 bytes.
#[derive(Clone, Debug)]
pub struct VlqDecoder {
    phase: Phase<()>,
    value: u32,
    count: u8,
}
impl Default for VlqDecoder {
    fn default() -> VlqDecoder {
        VlqDecoder::new()
    }
}
impl VlqDecoder {
    /// Create a decoder ready for the first byte.
    pub fn new() -> VlqDecoder {
        VlqDecoder {
            phase: Phase::Running(()),
            value: 0,
            count: 0,
        }
    }

    /// Clear the decoder so it can decode another quantity.
    pub fn reset(&mut self) {
        *self = VlqDecoder::new();
    }

    /// Feed the next byte of the quantity.
    pub fn feed(&mut self, byte: u8) -> Result<Status> {
        self.phase.running("varlen decoder already finished")?;
        self.count += 1;
        self.value = (self.value << 7) | (byte & 0x7F) as u32;
        let res = if byte & 0x80 == 0 {
            Ok(Status::Success)
        } else if self.count >= 4 {
            Err(err_vlq!("varlen does not end within 4 bytes").into())
        } else {
            Ok(Status::Pending)
        };
        self.phase.settle(res)
    }

    /// The value accumulated so far.
    ///
    /// Only meaningful once the decoder succeeded.
    #[inline]
    pub fn value(&self) -> u28 {
        u28::new(self.value)
    }

    /// Whether the decoder read a complete quantity.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.phase.is_done()
    }
}

/// Accumulates a fixed amount of raw bytes.
#[derive(Clone, Debug)]
struct FixedDecoder<const N: usize> {
    phase: Phase<()>,
    buf: [u8; N],
    count: usize,
}
impl<const N: usize> FixedDecoder<N> {
    fn new() -> Self {
        FixedDecoder {
            phase: Phase::Running(()),
            buf: [0; N],
            count: 0,
        }
    }

    fn feed(&mut self, byte: u8, what: &'static str) -> Result<Status> {
        self.phase.running(what)?;
        self.buf[self.count] = byte;
        self.count += 1;
        let res = Ok(if self.count == N {
            Status::Success
        } else {
            Status::Pending
        });
        self.phase.settle(res)
    }
}

macro_rules! fixed_decoder {
    {$(#[$attr:meta])* $name:ident : $n:literal, $what:expr} => {
        $(#[$attr])*
        #[derive(Clone, Debug)]
        pub struct $name {
            inner: FixedDecoder<$n>,
        }
        impl Default for $name {
            fn default() -> $name {
                $name::new()
            }
        }
        impl $name {
            /// Create a decoder ready for the first byte.
            pub fn new() -> $name {
                $name {
                    inner: FixedDecoder::new(),
                }
            }

            /// Clear the decoder so it can decode another field.
            pub fn reset(&mut self) {
                *self = $name::new();
            }

            /// Feed the next byte of the field.
            pub fn feed(&mut self, byte: u8) -> Result<Status> {
                self.inner.feed(byte, $what)
            }

            /// Whether the whole field was read.
            #[inline]
            pub fn is_done(&self) -> bool {
                self.inner.phase.is_done()
            }
        }
    };
}
fixed_decoder! {
    /// Decodes a big-endian 32-bit chunk length.
    ChunkLengthDecoder: 4, "chunk length decoder already finished"
}
fixed_decoder! {
    /// Decodes a big-endian 16-bit header parameter.
    ParamDecoder: 2, "header parameter decoder already finished"
}
fixed_decoder! {
    /// Decodes a 4-byte chunk tag.
    ChunkTagDecoder: 4, "chunk tag decoder already finished"
}
impl ChunkLengthDecoder {
    /// The decoded length.
    #[inline]
    pub fn value(&self) -> u32 {
        u32::from_be_bytes(self.inner.buf)
    }
}
impl ParamDecoder {
    /// The decoded parameter.
    #[inline]
    pub fn value(&self) -> u16 {
        u16::from_be_bytes(self.inner.buf)
    }
}
impl ChunkTagDecoder {
    /// The raw tag.
    #[inline]
    pub fn tag(&self) -> [u8; 4] {
        self.inner.buf
    }

    /// The tag classified against the known chunk kinds.
    #[inline]
    pub fn kind(&self) -> ChunkKind {
        ChunkKind::classify(self.inner.buf)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MessageState {
    Status,
    Params { remaining: usize },
}

/// Decodes a MIDI message: a status byte followed by as many parameters as the status implies.
///
/// Channel messages as well as system common and realtime messages are accepted.
/// Messages without parameters complete on their status byte.
#[derive(Clone, Debug)]
pub struct MessageDecoder {
    phase: Phase<MessageState>,
}
impl Default for MessageDecoder {
    fn default() -> MessageDecoder {
        MessageDecoder::new()
    }
}
impl MessageDecoder {
    /// Create a decoder expecting a status byte.
    pub fn new() -> MessageDecoder {
        MessageDecoder {
            phase: Phase::Running(MessageState::Status),
        }
    }

    /// Clear the decoder so it can decode another message.
    pub fn reset(&mut self) {
        *self = MessageDecoder::new();
    }

    /// Feed the next byte of the message, appending it to `event`.
    pub fn feed(&mut self, byte: u8, event: &mut TrackEvent) -> Result<Status> {
        let state = self.phase.running("message decoder already finished")?;
        let res = self.advance(state, byte, event);
        self.phase.settle(res)
    }

    fn advance(&mut self, state: MessageState, byte: u8, event: &mut TrackEvent) -> Result<Status> {
        match state {
            MessageState::Status => {
                let count = param_count(byte).ok_or(err_unexpected!("not a message status"))?;
                event.bytes.push(byte);
                if count == 0 {
                    return Ok(Status::Success);
                }
                self.phase = Phase::Running(MessageState::Params { remaining: count });
            }
            MessageState::Params { remaining } => {
                event.bytes.push(byte);
                if remaining == 1 {
                    return Ok(Status::Success);
                }
                self.phase = Phase::Running(MessageState::Params {
                    remaining: remaining - 1,
                });
            }
        }
        Ok(Status::Pending)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MetaState {
    Lead,
    Type,
    Length,
    Data { remaining: u32 },
}

/// Decodes a meta event: `FF type length data`.
///
/// Every byte, length included, is appended to the event payload.
#[derive(Clone, Debug)]
pub struct MetaDecoder {
    phase: Phase<MetaState>,
    len: VlqDecoder,
}
impl Default for MetaDecoder {
    fn default() -> MetaDecoder {
        MetaDecoder::new()
    }
}
impl MetaDecoder {
    /// Create a decoder expecting the `0xFF` lead byte.
    pub fn new() -> MetaDecoder {
        MetaDecoder {
            phase: Phase::Running(MetaState::Lead),
            len: VlqDecoder::new(),
        }
    }

    /// Clear the decoder so it can decode another meta event.
    pub fn reset(&mut self) {
        *self = MetaDecoder::new();
    }

    /// Feed the next byte of the meta event, appending it to `event`.
    pub fn feed(&mut self, byte: u8, event: &mut TrackEvent) -> Result<Status> {
        let state = self.phase.running("meta decoder already finished")?;
        let res = self.advance(state, byte, event);
        self.phase.settle(res)
    }

    fn advance(&mut self, state: MetaState, byte: u8, event: &mut TrackEvent) -> Result<Status> {
        let next = match state {
            MetaState::Lead => {
                ensure!(byte == 0xFF, err_unexpected!("meta event does not start with 0xFF"));
                event.bytes.push(byte);
                MetaState::Type
            }
            MetaState::Type => {
                event.bytes.push(byte);
                MetaState::Length
            }
            MetaState::Length => {
                event.bytes.push(byte);
                if self.len.feed(byte).context("invalid meta length")? == Status::Pending {
                    return Ok(Status::Pending);
                }
                let len = self.len.value().as_int();
                if len == 0 {
                    return Ok(Status::Success);
                }
                event.bytes.reserve(len.min(MAX_PREALLOC) as usize);
                MetaState::Data { remaining: len }
            }
            MetaState::Data { remaining } => {
                event.bytes.push(byte);
                if remaining == 1 {
                    return Ok(Status::Success);
                }
                MetaState::Data {
                    remaining: remaining - 1,
                }
            }
        };
        self.phase = Phase::Running(next);
        Ok(Status::Pending)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SysexState {
    Lead,
    Length,
    Data { remaining: u32 },
}

/// Decodes a SysEx or escape event: `F0 length data` or `F7 length data`.
///
/// The length is consumed but not stored; the event payload is the lead byte followed by the
/// data.
/// Data bytes must have their top bit clear, except for `0xF7`.
#[derive(Clone, Debug)]
pub struct SysexDecoder {
    phase: Phase<SysexState>,
    len: VlqDecoder,
}
impl Default for SysexDecoder {
    fn default() -> SysexDecoder {
        SysexDecoder::new()
    }
}
impl SysexDecoder {
    /// Create a decoder expecting the `0xF0` or `0xF7` lead byte.
    pub fn new() -> SysexDecoder {
        SysexDecoder {
            phase: Phase::Running(SysexState::Lead),
            len: VlqDecoder::new(),
        }
    }

    /// Clear the decoder so it can decode another SysEx event.
    pub fn reset(&mut self) {
        *self = SysexDecoder::new();
    }

    /// Feed the next byte of the SysEx event, appending the payload bytes to `event`.
    pub fn feed(&mut self, byte: u8, event: &mut TrackEvent) -> Result<Status> {
        let state = self.phase.running("sysex decoder already finished")?;
        let res = self.advance(state, byte, event);
        self.phase.settle(res)
    }

    fn advance(&mut self, state: SysexState, byte: u8, event: &mut TrackEvent) -> Result<Status> {
        let next = match state {
            SysexState::Lead => {
                ensure!(
                    byte == 0xF0 || byte == 0xF7,
                    err_unexpected!("sysex event does not start with 0xF0 or 0xF7")
                );
                event.bytes.push(byte);
                SysexState::Length
            }
            SysexState::Length => {
                if self.len.feed(byte).context("invalid sysex length")? == Status::Pending {
                    return Ok(Status::Pending);
                }
                let len = self.len.value().as_int();
                if len == 0 {
                    return Ok(Status::Success);
                }
                event.bytes.reserve(len.min(MAX_PREALLOC) as usize);
                SysexState::Data { remaining: len }
            }
            SysexState::Data { remaining } => {
                ensure!(
                    byte < 0x80 || byte == 0xF7,
                    err_unexpected!("status byte inside sysex data")
                );
                event.bytes.push(byte);
                if remaining == 1 {
                    return Ok(Status::Success);
                }
                SysexState::Data {
                    remaining: remaining - 1,
                }
            }
        };
        self.phase = Phase::Running(next);
        Ok(Status::Pending)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum StreamState {
    Delta,
    Classify,
    Message,
    Meta,
    Sysex,
}

/// Decodes an unbounded sequence of `delta event` pairs into a track.
///
/// Unlike the other decoders, success is not a terminal state here: `Status::Success` marks the
/// end of an event, and the decoder immediately expects the delta time of the next one.
/// The enclosing chunk decoder decides when the stream ends.
///
/// Running status is tracked across events.
/// A data byte in status position reuses the last message status, which is then written into the
/// decoded event so that every event payload carries an explicit status.
/// Meta and SysEx events do not cancel running status.
#[derive(Clone, Debug)]
pub struct EventStreamDecoder {
    state: StreamState,
    failed: bool,
    running_status: Option<u8>,
    delta: VlqDecoder,
    message: MessageDecoder,
    meta: MetaDecoder,
    sysex: SysexDecoder,
}
impl Default for EventStreamDecoder {
    fn default() -> EventStreamDecoder {
        EventStreamDecoder::new()
    }
}
impl EventStreamDecoder {
    /// Create a decoder expecting the delta time of the first event.
    pub fn new() -> EventStreamDecoder {
        EventStreamDecoder {
            state: StreamState::Delta,
            failed: false,
            running_status: None,
            delta: VlqDecoder::new(),
            message: MessageDecoder::new(),
            meta: MetaDecoder::new(),
            sysex: SysexDecoder::new(),
        }
    }

    /// Clear the decoder, including running status.
    pub fn reset(&mut self) {
        *self = EventStreamDecoder::new();
    }

    /// The status that a data byte in status position would reuse.
    #[inline]
    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    /// Whether the decoder is between events.
    #[inline]
    pub fn at_event_boundary(&self) -> bool {
        !self.failed && self.state == StreamState::Delta && self.delta.count == 0
    }

    /// Whether the decoder failed.
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Feed the next byte of the stream, appending events to `track`.
    pub fn feed(&mut self, byte: u8, track: &mut Track) -> Result<Status> {
        ensure!(!self.failed, err_terminal!("event stream decoder already failed"));
        let res = trampoline(|| self.step(byte, track));
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    fn step(&mut self, byte: u8, track: &mut Track) -> Result<Step<Status>> {
        let status = match self.state {
            StreamState::Delta => {
                if self.delta.feed(byte).context("invalid event delta time")? == Status::Success {
                    track.events.push(TrackEvent::new(self.delta.value()));
                    self.state = StreamState::Classify;
                }
                return Ok(Step::Ready(Status::Pending));
            }
            StreamState::Classify => {
                self.classify(byte, track)?;
                return Ok(Step::Again);
            }
            StreamState::Message => self
                .message
                .feed(byte, current_event(track)?)
                .context("invalid midi message")?,
            StreamState::Meta => self
                .meta
                .feed(byte, current_event(track)?)
                .context("invalid meta event")?,
            StreamState::Sysex => self
                .sysex
                .feed(byte, current_event(track)?)
                .context("invalid sysex event")?,
        };
        if status == Status::Success {
            let event = current_event(track)?;
            trace!(delta = event.delta.as_int(), len = event.bytes.len(), "decoded event");
            self.delta.reset();
            self.state = StreamState::Delta;
        }
        Ok(Step::Ready(status))
    }

    /// Pick the decoder for the event that starts with `byte`, without consuming it.
    fn classify(&mut self, byte: u8, track: &mut Track) -> Result<()> {
        self.state = match byte {
            0xFF => {
                self.meta.reset();
                StreamState::Meta
            }
            0xF0 | 0xF7 => {
                self.sysex.reset();
                StreamState::Sysex
            }
            0x80..=0xFE => {
                self.running_status = Some(byte);
                self.message.reset();
                StreamState::Message
            }
            _ => {
                let status = self
                    .running_status
                    .ok_or(err_unexpected!("data byte with no running status active"))?;
                self.message.reset();
                let expects_params = self
                    .message
                    .feed(status, current_event(track)?)
                    .context("invalid midi message")?
                    == Status::Pending;
                ensure!(
                    expects_params,
                    err_unexpected!("data byte after a status that takes no parameters")
                );
                StreamState::Message
            }
        };
        Ok(())
    }
}

fn current_event(track: &mut Track) -> Result<&mut TrackEvent> {
    Ok(track
        .events
        .last_mut()
        .ok_or(err_unexpected!("no event is being decoded"))?)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum HeaderState {
    Length,
    Format,
    Ntrks,
    Division,
    Extra { remaining: u32 },
}

/// Decodes the body of an `MThd` chunk, after its tag.
///
/// Header chunks longer than 6 bytes keep the extra bytes in `Header::extra`.
#[derive(Clone, Debug)]
pub struct HeaderDecoder {
    phase: Phase<HeaderState>,
    len: ChunkLengthDecoder,
    param: ParamDecoder,
}
impl Default for HeaderDecoder {
    fn default() -> HeaderDecoder {
        HeaderDecoder::new()
    }
}
impl HeaderDecoder {
    /// Create a decoder expecting the chunk length.
    pub fn new() -> HeaderDecoder {
        HeaderDecoder {
            phase: Phase::Running(HeaderState::Length),
            len: ChunkLengthDecoder::new(),
            param: ParamDecoder::new(),
        }
    }

    /// Clear the decoder so it can decode another header.
    pub fn reset(&mut self) {
        *self = HeaderDecoder::new();
    }

    /// Feed the next byte of the header chunk.
    pub fn feed(&mut self, byte: u8, header: &mut Header) -> Result<Status> {
        let state = self.phase.running("header decoder already finished")?;
        let res = self.advance(state, byte, header);
        self.phase.settle(res)
    }

    fn advance(&mut self, state: HeaderState, byte: u8, header: &mut Header) -> Result<Status> {
        let next = match state {
            HeaderState::Length => {
                if self.len.feed(byte)? == Status::Pending {
                    return Ok(Status::Pending);
                }
                let len = self.len.value();
                ensure!(len >= 6, err_length!("header chunk shorter than 6 bytes"));
                header.extra.clear();
                HeaderState::Format
            }
            HeaderState::Format => {
                if self.param.feed(byte)? == Status::Pending {
                    return Ok(Status::Pending);
                }
                header.format = self.param.value();
                self.param.reset();
                HeaderState::Ntrks
            }
            HeaderState::Ntrks => {
                if self.param.feed(byte)? == Status::Pending {
                    return Ok(Status::Pending);
                }
                header.ntrks = self.param.value();
                self.param.reset();
                HeaderState::Division
            }
            HeaderState::Division => {
                if self.param.feed(byte)? == Status::Pending {
                    return Ok(Status::Pending);
                }
                header.division = self.param.value();
                let remaining = self.len.value() - 6;
                if remaining == 0 {
                    return Ok(Status::Success);
                }
                header.extra.reserve(remaining.min(MAX_PREALLOC) as usize);
                HeaderState::Extra { remaining }
            }
            HeaderState::Extra { remaining } => {
                header.extra.push(byte);
                if remaining == 1 {
                    return Ok(Status::Success);
                }
                HeaderState::Extra {
                    remaining: remaining - 1,
                }
            }
        };
        self.phase = Phase::Running(next);
        Ok(Status::Pending)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TrackState {
    Length,
    Events { remaining: u32 },
}

/// Decodes the body of an `MTrk` chunk, after its tag.
///
/// The declared length must end exactly at an event boundary.
#[derive(Clone, Debug)]
pub struct TrackDecoder {
    phase: Phase<TrackState>,
    len: ChunkLengthDecoder,
    events: EventStreamDecoder,
}
impl Default for TrackDecoder {
    fn default() -> TrackDecoder {
        TrackDecoder::new()
    }
}
impl TrackDecoder {
    /// Create a decoder expecting the chunk length.
    pub fn new() -> TrackDecoder {
        TrackDecoder {
            phase: Phase::Running(TrackState::Length),
            len: ChunkLengthDecoder::new(),
            events: EventStreamDecoder::new(),
        }
    }

    /// Clear the decoder so it can decode another track, forgetting running status.
    pub fn reset(&mut self) {
        *self = TrackDecoder::new();
    }

    /// Feed the next byte of the track chunk.
    pub fn feed(&mut self, byte: u8, track: &mut Track) -> Result<Status> {
        let state = self.phase.running("track decoder already finished")?;
        let res = self.advance(state, byte, track);
        self.phase.settle(res)
    }

    fn advance(&mut self, state: TrackState, byte: u8, track: &mut Track) -> Result<Status> {
        match state {
            TrackState::Length => {
                if self.len.feed(byte)? == Status::Pending {
                    return Ok(Status::Pending);
                }
                track.len = self.len.value();
                if track.len == 0 {
                    return Ok(Status::Success);
                }
                self.phase = Phase::Running(TrackState::Events {
                    remaining: track.len,
                });
                Ok(Status::Pending)
            }
            TrackState::Events { remaining } => {
                let status = self.events.feed(byte, track)?;
                if remaining == 1 {
                    ensure!(
                        status == Status::Success,
                        err_length!("track chunk ends in the middle of an event")
                    );
                    return Ok(Status::Success);
                }
                self.phase = Phase::Running(TrackState::Events {
                    remaining: remaining - 1,
                });
                Ok(Status::Pending)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum UnknownState {
    Length,
    Data { remaining: u32 },
}

/// Decodes the body of a chunk with an unrecognized tag, keeping its bytes verbatim.
#[derive(Clone, Debug)]
pub struct UnknownDecoder {
    phase: Phase<UnknownState>,
    len: ChunkLengthDecoder,
}
impl Default for UnknownDecoder {
    fn default() -> UnknownDecoder {
        UnknownDecoder::new()
    }
}
impl UnknownDecoder {
    /// Create a decoder expecting the chunk length.
    pub fn new() -> UnknownDecoder {
        UnknownDecoder {
            phase: Phase::Running(UnknownState::Length),
            len: ChunkLengthDecoder::new(),
        }
    }

    /// Clear the decoder so it can decode another chunk.
    pub fn reset(&mut self) {
        *self = UnknownDecoder::new();
    }

    /// Feed the next byte of the chunk.
    pub fn feed(&mut self, byte: u8, chunk: &mut UnknownChunk) -> Result<Status> {
        let state = self.phase.running("unknown chunk decoder already finished")?;
        let res = self.advance(state, byte, chunk);
        self.phase.settle(res)
    }

    fn advance(&mut self, state: UnknownState, byte: u8, chunk: &mut UnknownChunk) -> Result<Status> {
        let next = match state {
            UnknownState::Length => {
                if self.len.feed(byte)? == Status::Pending {
                    return Ok(Status::Pending);
                }
                let len = self.len.value();
                if len == 0 {
                    return Ok(Status::Success);
                }
                chunk.data.reserve(len.min(MAX_PREALLOC) as usize);
                UnknownState::Data { remaining: len }
            }
            UnknownState::Data { remaining } => {
                chunk.data.push(byte);
                if remaining == 1 {
                    return Ok(Status::Success);
                }
                UnknownState::Data {
                    remaining: remaining - 1,
                }
            }
        };
        self.phase = Phase::Running(next);
        Ok(Status::Pending)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FileState {
    Tag,
    Header,
    Track,
    Unknown,
}

/// Decodes a whole SMF file, one byte at a time.
///
/// The first chunk must be a header.
/// After it, exactly as many chunks as the header declares are read, each of them either a track
/// or an unknown chunk.
/// The decoder succeeds on the last byte of the last chunk; feeding more bytes after that fails.
///
/// The target `Smf` is cleared when the first byte arrives.
/// Errors carry the offset of the offending byte.
#[derive(Clone, Debug)]
pub struct FileDecoder {
    phase: Phase<FileState>,
    tag: ChunkTagDecoder,
    header: HeaderDecoder,
    track: TrackDecoder,
    unknown: UnknownDecoder,
    seen_header: bool,
    remaining: u16,
    position: u64,
}
impl Default for FileDecoder {
    fn default() -> FileDecoder {
        FileDecoder::new()
    }
}
impl FileDecoder {
    /// Create a decoder expecting the first byte of a file.
    pub fn new() -> FileDecoder {
        FileDecoder {
            phase: Phase::Running(FileState::Tag),
            tag: ChunkTagDecoder::new(),
            header: HeaderDecoder::new(),
            track: TrackDecoder::new(),
            unknown: UnknownDecoder::new(),
            seen_header: false,
            remaining: 0,
            position: 0,
        }
    }

    /// Clear the decoder so it can decode another file.
    pub fn reset(&mut self) {
        *self = FileDecoder::new();
    }

    /// Amount of bytes consumed so far.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether a complete file was decoded.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.phase.is_done()
    }

    /// Whether decoding failed.
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.phase.is_failed()
    }

    /// Feed the next byte of the file.
    pub fn feed(&mut self, byte: u8, smf: &mut Smf) -> Result<Status> {
        let pos = self.position;
        let state = match self.phase {
            Phase::Running(state) => state,
            Phase::Done => bail!(
                Error::from(err_unexpected!("chunk beyond the declared track count")).at(pos)
            ),
            Phase::Failed => bail!(Error::from(err_terminal!("file decoder already failed")).at(pos)),
        };
        if pos == 0 {
            *smf = Smf::default();
        }
        self.position += 1;
        let res = self.advance(state, byte, smf).map_err(|err| {
            debug!(position = pos, error = %err, "smf decoding failed");
            err.at(pos)
        });
        self.phase.settle(res)
    }

    fn advance(&mut self, state: FileState, byte: u8, smf: &mut Smf) -> Result<Status> {
        match state {
            FileState::Tag => {
                if self.tag.feed(byte)? == Status::Success {
                    self.open_chunk(smf)?;
                }
                Ok(Status::Pending)
            }
            FileState::Header => {
                let status = self
                    .header
                    .feed(byte, &mut smf.header)
                    .context("invalid header chunk")?;
                if status == Status::Pending {
                    return Ok(Status::Pending);
                }
                debug!(
                    format = smf.header.format,
                    ntrks = smf.header.ntrks,
                    division = smf.header.division,
                    "decoded header chunk"
                );
                self.seen_header = true;
                self.remaining = smf.header.ntrks;
                Ok(self.next_chunk())
            }
            FileState::Track => {
                let track = match smf.chunks.last_mut() {
                    Some(Chunk::Track(track)) => track,
                    _ => bail!(err_unexpected!("no track chunk is being decoded")),
                };
                if self.track.feed(byte, track).context("invalid track chunk")? == Status::Pending
                {
                    return Ok(Status::Pending);
                }
                debug!(len = track.len, events = track.events.len(), "decoded track chunk");
                self.remaining -= 1;
                Ok(self.next_chunk())
            }
            FileState::Unknown => {
                let chunk = match smf.chunks.last_mut() {
                    Some(Chunk::Unknown(chunk)) => chunk,
                    _ => bail!(err_unexpected!("no unknown chunk is being decoded")),
                };
                if self.unknown.feed(byte, chunk).context("invalid unknown chunk")?
                    == Status::Pending
                {
                    return Ok(Status::Pending);
                }
                debug!(tag = ?chunk.tag, len = chunk.data.len(), "skipped unknown chunk");
                self.remaining -= 1;
                Ok(self.next_chunk())
            }
        }
    }

    /// Dispatch on a freshly read chunk tag.
    fn open_chunk(&mut self, smf: &mut Smf) -> Result<()> {
        let tag = self.tag.tag();
        let next = match (self.tag.kind(), self.seen_header) {
            (ChunkKind::Header, false) => {
                self.header.reset();
                FileState::Header
            }
            (ChunkKind::Header, true) => bail!(err_unexpected!("duplicate header chunk")),
            (_, false) => bail!(err_unexpected!("file does not start with a header chunk")),
            (ChunkKind::Track, true) => {
                smf.chunks.push(Chunk::Track(Track::default()));
                self.track.reset();
                FileState::Track
            }
            (ChunkKind::Unknown, true) => {
                smf.chunks.push(Chunk::Unknown(UnknownChunk::new(tag)));
                self.unknown.reset();
                FileState::Unknown
            }
        };
        trace!(tag = ?tag, "entering chunk");
        self.phase = Phase::Running(next);
        Ok(())
    }

    fn next_chunk(&mut self) -> Status {
        if self.remaining == 0 {
            Status::Success
        } else {
            self.tag.reset();
            self.phase = Phase::Running(FileState::Tag);
            Status::Pending
        }
    }
}
