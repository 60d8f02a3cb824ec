//! Byte-at-a-time encoders, mirroring the decoders.
//!
//! An encoder is bound to a borrowed record with `set_data`, which checks that the record can be
//! encoded, and then produces one byte per `encode_byte` call.
//! The byte that completes the encoder is returned together with `Status::Success`.

use crate::{
    event::TrackEvent,
    prelude::*,
    primitive::{trampoline, Phase, HEADER_TAG, TRACK_TAG},
    smf::{Chunk, Header, Smf, Track, UnknownChunk},
};
use tracing::{debug, trace};

/// Knobs for how data is laid out when encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EncodeOptions {
    /// Omit a message status byte when it equals the previous message status in the same track.
    ///
    /// Enabled by default.
    pub running_status: bool,
}
impl Default for EncodeOptions {
    fn default() -> EncodeOptions {
        EncodeOptions {
            running_status: true,
        }
    }
}
impl EncodeOptions {
    /// Default options, with running status compression enabled.
    #[inline]
    pub fn new() -> EncodeOptions {
        EncodeOptions::default()
    }

    /// Enable or disable running status compression.
    #[inline]
    pub fn running_status(mut self, enabled: bool) -> EncodeOptions {
        self.running_status = enabled;
        self
    }
}

/// Update `running_status` with the given event payload, returning whether its status byte can be
/// left out.
///
/// Meta and SysEx events cancel running status.
/// Messages without parameters are never compressed, since the status byte is all they have.
pub(crate) fn apply_running_status(
    payload: &[u8],
    running_status: &mut Option<u8>,
    options: EncodeOptions,
) -> bool {
    match payload.first() {
        None | Some(0xFF) | Some(0xF0) | Some(0xF7) => {
            *running_status = None;
            false
        }
        Some(&status) => {
            let skip =
                options.running_status && payload.len() > 1 && *running_status == Some(status);
            *running_status = Some(status);
            skip
        }
    }
}

/// Encodes a variable-length quantity in its minimal form.
#[derive(Clone, Debug)]
pub struct VlqEncoder {
    phase: Phase<()>,
    buf: [u8; 4],
    len: usize,
    idx: usize,
}
impl Default for VlqEncoder {
    fn default() -> VlqEncoder {
        VlqEncoder::new()
    }
}
impl VlqEncoder {
    /// Create an encoder with no value bound.
    pub fn new() -> VlqEncoder {
        VlqEncoder {
            phase: Phase::Running(()),
            buf: [0; 4],
            len: 0,
            idx: 0,
        }
    }

    /// Unbind the value and clear the encoder.
    pub fn reset(&mut self) {
        *self = VlqEncoder::new();
    }

    /// Bind a value to encode.
    ///
    /// Fails if the value does not fit in 28 bits.
    pub fn set_data(&mut self, value: u32) -> Result<()> {
        let value = u28::try_from(value).ok_or(err_data!("value does not fit in a varlen"))?;
        self.bind(value);
        Ok(())
    }

    pub(crate) fn bind(&mut self, value: u28) {
        let (buf, len) = value.to_varlen();
        *self = VlqEncoder {
            phase: Phase::Running(()),
            buf,
            len,
            idx: 0,
        };
    }

    /// Produce the next byte of the quantity.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.phase.running("varlen encoder already finished")?;
        let res = match self.buf[..self.len].get(self.idx) {
            Some(&byte) => {
                self.idx += 1;
                Ok((byte, Self::status(self.idx == self.len)))
            }
            None => Err(err_data!("no value bound to the varlen encoder").into()),
        };
        self.phase.settle_byte(res)
    }

    fn status(last: bool) -> Status {
        if last {
            Status::Success
        } else {
            Status::Pending
        }
    }
}

/// Produces a fixed, prebuilt chunk preamble followed by a borrowed body.
#[derive(Clone, Debug)]
struct ChunkBytes<'a, const N: usize> {
    head: [u8; N],
    body: &'a [u8],
    idx: usize,
}
impl<'a, const N: usize> ChunkBytes<'a, N> {
    fn new(head: [u8; N], body: &'a [u8]) -> Self {
        ChunkBytes { head, body, idx: 0 }
    }

    fn next(&mut self) -> Result<(u8, bool)> {
        let byte = if self.idx < N {
            self.head[self.idx]
        } else {
            *self
                .body
                .get(self.idx - N)
                .ok_or(err_data!("chunk already fully encoded"))?
        };
        self.idx += 1;
        Ok((byte, self.idx == N + self.body.len()))
    }
}

fn chunk_head(tag: [u8; 4], len: u32) -> [u8; 8] {
    let len = len.to_be_bytes();
    [tag[0], tag[1], tag[2], tag[3], len[0], len[1], len[2], len[3]]
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PayloadState {
    Delta,
    Payload,
}

/// Shared machinery of the message and meta encoders: a delta time followed by the payload
/// verbatim, possibly without its first byte.
#[derive(Clone, Debug)]
struct PayloadEncoder<'a> {
    phase: Phase<PayloadState>,
    event: Option<&'a TrackEvent>,
    delta: VlqEncoder,
    idx: usize,
}
impl<'a> PayloadEncoder<'a> {
    fn new() -> Self {
        PayloadEncoder {
            phase: Phase::Running(PayloadState::Delta),
            event: None,
            delta: VlqEncoder::new(),
            idx: 0,
        }
    }

    fn bind(&mut self, event: &'a TrackEvent) {
        *self = PayloadEncoder::new();
        self.delta.bind(event.delta);
        self.event = Some(event);
    }

    fn encode_byte(&mut self, what: &'static str) -> Result<(u8, Status)> {
        let state = self.phase.running(what)?;
        let res = self.advance(state);
        self.phase.settle_byte(res)
    }

    fn advance(&mut self, state: PayloadState) -> Result<(u8, Status)> {
        let event = self.event.ok_or(err_data!("no event bound to the encoder"))?;
        match state {
            PayloadState::Delta => {
                let (byte, status) = self.delta.encode_byte()?;
                if status == Status::Success {
                    self.phase = Phase::Running(PayloadState::Payload);
                }
                Ok((byte, Status::Pending))
            }
            PayloadState::Payload => {
                let byte = *event
                    .bytes
                    .get(self.idx)
                    .ok_or(err_data!("event already fully encoded"))?;
                self.idx += 1;
                Ok((byte, VlqEncoder::status(self.idx == event.bytes.len())))
            }
        }
    }
}

/// Encodes a MIDI message event: delta time, status and parameters.
///
/// The status byte can be left out to take advantage of running status; the `TrackEncoder`
/// decides when.
#[derive(Clone, Debug)]
pub struct MessageEncoder<'a> {
    inner: PayloadEncoder<'a>,
}
impl<'a> Default for MessageEncoder<'a> {
    fn default() -> MessageEncoder<'a> {
        MessageEncoder::new()
    }
}
impl<'a> MessageEncoder<'a> {
    /// Create an encoder with no event bound.
    pub fn new() -> MessageEncoder<'a> {
        MessageEncoder {
            inner: PayloadEncoder::new(),
        }
    }

    /// Unbind the event and clear the encoder.
    pub fn reset(&mut self) {
        *self = MessageEncoder::new();
    }

    /// Bind a MIDI message event.
    pub fn set_data(&mut self, event: &'a TrackEvent) -> Result<()> {
        ensure!(
            !event.is_meta() && !event.is_sysex(),
            err_data!("event is not a midi message")
        );
        event.check()?;
        self.inner.bind(event);
        Ok(())
    }

    /// Leave out the status byte of the bound message.
    ///
    /// Has no effect on messages without parameters.
    /// Must be called after `set_data` and before the first `encode_byte`.
    pub fn skip_status(&mut self) {
        if let Some(event) = self.inner.event {
            if event.bytes.len() > 1 && self.inner.idx == 0 {
                self.inner.idx = 1;
            }
        }
    }

    /// Produce the next byte of the event.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.inner.encode_byte("message encoder already finished")
    }
}

/// Encodes a meta event: delta time and the stored `FF type length data` payload.
#[derive(Clone, Debug)]
pub struct MetaEncoder<'a> {
    inner: PayloadEncoder<'a>,
}
impl<'a> Default for MetaEncoder<'a> {
    fn default() -> MetaEncoder<'a> {
        MetaEncoder::new()
    }
}
impl<'a> MetaEncoder<'a> {
    /// Create an encoder with no event bound.
    pub fn new() -> MetaEncoder<'a> {
        MetaEncoder {
            inner: PayloadEncoder::new(),
        }
    }

    /// Unbind the event and clear the encoder.
    pub fn reset(&mut self) {
        *self = MetaEncoder::new();
    }

    /// Bind a meta event.
    ///
    /// Fails if the embedded length disagrees with the stored data.
    pub fn set_data(&mut self, event: &'a TrackEvent) -> Result<()> {
        ensure!(event.is_meta(), err_data!("event is not a meta event"));
        event.meta_parts()?;
        self.inner.bind(event);
        Ok(())
    }

    /// Produce the next byte of the event.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.inner.encode_byte("meta encoder already finished")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SysexState {
    Delta,
    Lead,
    Length,
    Data,
}

/// Encodes a SysEx or escape event, reinserting the varlen length that the payload omits.
#[derive(Clone, Debug)]
pub struct SysexEncoder<'a> {
    phase: Phase<SysexState>,
    event: Option<&'a TrackEvent>,
    delta: VlqEncoder,
    len: VlqEncoder,
    idx: usize,
}
impl<'a> Default for SysexEncoder<'a> {
    fn default() -> SysexEncoder<'a> {
        SysexEncoder::new()
    }
}
impl<'a> SysexEncoder<'a> {
    /// Create an encoder with no event bound.
    pub fn new() -> SysexEncoder<'a> {
        SysexEncoder {
            phase: Phase::Running(SysexState::Delta),
            event: None,
            delta: VlqEncoder::new(),
            len: VlqEncoder::new(),
            idx: 0,
        }
    }

    /// Unbind the event and clear the encoder.
    pub fn reset(&mut self) {
        *self = SysexEncoder::new();
    }

    /// Bind a SysEx or escape event.
    pub fn set_data(&mut self, event: &'a TrackEvent) -> Result<()> {
        ensure!(event.is_sysex(), err_data!("event is not a sysex event"));
        event.check()?;
        *self = SysexEncoder::new();
        self.delta.bind(event.delta);
        self.len.bind(u28::new((event.bytes.len() - 1) as u32));
        self.event = Some(event);
        Ok(())
    }

    /// Produce the next byte of the event.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        let state = self.phase.running("sysex encoder already finished")?;
        let res = self.advance(state);
        self.phase.settle_byte(res)
    }

    fn advance(&mut self, state: SysexState) -> Result<(u8, Status)> {
        let event = self.event.ok_or(err_data!("no event bound to the encoder"))?;
        let data = &event.bytes[1..];
        let (byte, next) = match state {
            SysexState::Delta => {
                let (byte, status) = self.delta.encode_byte()?;
                let next = match status {
                    Status::Pending => SysexState::Delta,
                    Status::Success => SysexState::Lead,
                };
                (byte, next)
            }
            SysexState::Lead => (event.bytes[0], SysexState::Length),
            SysexState::Length => {
                let (byte, status) = self.len.encode_byte()?;
                match status {
                    Status::Pending => (byte, SysexState::Length),
                    Status::Success if data.is_empty() => return Ok((byte, Status::Success)),
                    Status::Success => (byte, SysexState::Data),
                }
            }
            SysexState::Data => {
                let byte = *data
                    .get(self.idx)
                    .ok_or(err_data!("event already fully encoded"))?;
                self.idx += 1;
                if self.idx == data.len() {
                    return Ok((byte, Status::Success));
                }
                (byte, SysexState::Data)
            }
        };
        self.phase = Phase::Running(next);
        Ok((byte, Status::Pending))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TrackState {
    Head,
    Dispatch,
    Message,
    Meta,
    Sysex,
}

/// Encodes an `MTrk` chunk: tag, length and every event in order.
///
/// The emitted length is always computed from the events under the active options; the stored
/// `Track::len` is not trusted.
#[derive(Clone, Debug)]
pub struct TrackEncoder<'a> {
    phase: Phase<TrackState>,
    options: EncodeOptions,
    track: Option<&'a Track>,
    head: [u8; 8],
    head_idx: usize,
    next_event: usize,
    running_status: Option<u8>,
    message: MessageEncoder<'a>,
    meta: MetaEncoder<'a>,
    sysex: SysexEncoder<'a>,
}
impl<'a> Default for TrackEncoder<'a> {
    fn default() -> TrackEncoder<'a> {
        TrackEncoder::new()
    }
}
impl<'a> TrackEncoder<'a> {
    /// Create an encoder with default options and no track bound.
    pub fn new() -> TrackEncoder<'a> {
        TrackEncoder::with_options(EncodeOptions::default())
    }

    /// Create an encoder with the given options and no track bound.
    pub fn with_options(options: EncodeOptions) -> TrackEncoder<'a> {
        TrackEncoder {
            phase: Phase::Running(TrackState::Head),
            options,
            track: None,
            head: [0; 8],
            head_idx: 0,
            next_event: 0,
            running_status: None,
            message: MessageEncoder::new(),
            meta: MetaEncoder::new(),
            sysex: SysexEncoder::new(),
        }
    }

    /// Unbind the track and clear the encoder, keeping the options.
    pub fn reset(&mut self) {
        *self = TrackEncoder::with_options(self.options);
    }

    /// Bind a track, checking every event.
    pub fn set_data(&mut self, track: &'a Track) -> Result<()> {
        let len = track.encoded_len(self.options)?;
        self.reset();
        self.head = chunk_head(TRACK_TAG, len);
        self.track = Some(track);
        Ok(())
    }

    /// Produce the next byte of the chunk.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.phase.running("track encoder already finished")?;
        let res = trampoline(|| self.step());
        self.phase.settle_byte(res)
    }

    fn step(&mut self) -> Result<Step<(u8, Status)>> {
        let track = self.track.ok_or(err_data!("no track bound to the encoder"))?;
        let state = self.phase.running("track encoder already finished")?;
        let (byte, status) = match state {
            TrackState::Head => {
                let byte = self.head[self.head_idx];
                self.head_idx += 1;
                if self.head_idx < self.head.len() {
                    return Ok(Step::Ready((byte, Status::Pending)));
                }
                (byte, Status::Success)
            }
            TrackState::Dispatch => {
                let event = track
                    .events
                    .get(self.next_event)
                    .ok_or(err_data!("no more events to encode"))?;
                self.next_event += 1;
                let skip =
                    apply_running_status(&event.bytes, &mut self.running_status, self.options);
                let next = if event.is_meta() {
                    self.meta.set_data(event)?;
                    TrackState::Meta
                } else if event.is_sysex() {
                    self.sysex.set_data(event)?;
                    TrackState::Sysex
                } else {
                    self.message.set_data(event)?;
                    if skip {
                        self.message.skip_status();
                    }
                    TrackState::Message
                };
                self.phase = Phase::Running(next);
                return Ok(Step::Again);
            }
            TrackState::Message => self.message.encode_byte()?,
            TrackState::Meta => self.meta.encode_byte()?,
            TrackState::Sysex => self.sysex.encode_byte()?,
        };
        if status == Status::Pending {
            return Ok(Step::Ready((byte, Status::Pending)));
        }
        //The head or an event just finished
        if self.next_event == track.events.len() {
            trace!(events = track.events.len(), "encoded track chunk");
            Ok(Step::Ready((byte, Status::Success)))
        } else {
            self.phase = Phase::Running(TrackState::Dispatch);
            Ok(Step::Ready((byte, Status::Pending)))
        }
    }
}

/// Encodes a chunk with an unrecognized tag, verbatim.
#[derive(Clone, Debug)]
pub struct UnknownEncoder<'a> {
    phase: Phase<()>,
    bytes: Option<ChunkBytes<'a, 8>>,
}
impl<'a> Default for UnknownEncoder<'a> {
    fn default() -> UnknownEncoder<'a> {
        UnknownEncoder::new()
    }
}
impl<'a> UnknownEncoder<'a> {
    /// Create an encoder with no chunk bound.
    pub fn new() -> UnknownEncoder<'a> {
        UnknownEncoder {
            phase: Phase::Running(()),
            bytes: None,
        }
    }

    /// Unbind the chunk and clear the encoder.
    pub fn reset(&mut self) {
        *self = UnknownEncoder::new();
    }

    /// Bind an unknown chunk.
    pub fn set_data(&mut self, chunk: &'a UnknownChunk) -> Result<()> {
        let len = u32::try_from(chunk.data.len())
            .map_err(|_| err_data!("unknown chunk longer than 4GB"))?;
        *self = UnknownEncoder {
            phase: Phase::Running(()),
            bytes: Some(ChunkBytes::new(chunk_head(chunk.tag, len), &chunk.data[..])),
        };
        Ok(())
    }

    /// Produce the next byte of the chunk.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.phase.running("unknown chunk encoder already finished")?;
        let res = match self.bytes.as_mut() {
            Some(bytes) => bytes
                .next()
                .map(|(byte, last)| (byte, VlqEncoder::status(last))),
            None => Err(err_data!("no chunk bound to the encoder").into()),
        };
        self.phase.settle_byte(res)
    }
}

/// Encodes an `MThd` chunk, including any extra header bytes.
#[derive(Clone, Debug)]
pub struct HeaderEncoder<'a> {
    phase: Phase<()>,
    bytes: Option<ChunkBytes<'a, 14>>,
}
impl<'a> Default for HeaderEncoder<'a> {
    fn default() -> HeaderEncoder<'a> {
        HeaderEncoder::new()
    }
}
impl<'a> HeaderEncoder<'a> {
    /// Create an encoder with no header bound.
    pub fn new() -> HeaderEncoder<'a> {
        HeaderEncoder {
            phase: Phase::Running(()),
            bytes: None,
        }
    }

    /// Unbind the header and clear the encoder.
    pub fn reset(&mut self) {
        *self = HeaderEncoder::new();
    }

    /// Bind a header.
    pub fn set_data(&mut self, header: &'a Header) -> Result<()> {
        let len = u32::try_from(header.extra.len())
            .ok()
            .and_then(|extra| extra.checked_add(6))
            .ok_or(err_data!("header chunk longer than 4GB"))?;
        let mut head = [0; 14];
        head[..8].copy_from_slice(&chunk_head(HEADER_TAG, len));
        head[8..10].copy_from_slice(&header.format.to_be_bytes());
        head[10..12].copy_from_slice(&header.ntrks.to_be_bytes());
        head[12..14].copy_from_slice(&header.division.to_be_bytes());
        *self = HeaderEncoder {
            phase: Phase::Running(()),
            bytes: Some(ChunkBytes::new(head, &header.extra[..])),
        };
        Ok(())
    }

    /// Produce the next byte of the chunk.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.phase.running("header encoder already finished")?;
        let res = match self.bytes.as_mut() {
            Some(bytes) => bytes
                .next()
                .map(|(byte, last)| (byte, VlqEncoder::status(last))),
            None => Err(err_data!("no header bound to the encoder").into()),
        };
        self.phase.settle_byte(res)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FileState {
    Header,
    Dispatch,
    Track,
    Unknown,
}

/// Encodes a whole SMF file: the header followed by every chunk in order.
#[derive(Clone, Debug)]
pub struct FileEncoder<'a> {
    phase: Phase<FileState>,
    smf: Option<&'a Smf>,
    next_chunk: usize,
    header: HeaderEncoder<'a>,
    track: TrackEncoder<'a>,
    unknown: UnknownEncoder<'a>,
}
impl<'a> Default for FileEncoder<'a> {
    fn default() -> FileEncoder<'a> {
        FileEncoder::new()
    }
}
impl<'a> FileEncoder<'a> {
    /// Create an encoder with default options and no file bound.
    pub fn new() -> FileEncoder<'a> {
        FileEncoder::with_options(EncodeOptions::default())
    }

    /// Create an encoder with the given options and no file bound.
    pub fn with_options(options: EncodeOptions) -> FileEncoder<'a> {
        FileEncoder {
            phase: Phase::Running(FileState::Header),
            smf: None,
            next_chunk: 0,
            header: HeaderEncoder::new(),
            track: TrackEncoder::with_options(options),
            unknown: UnknownEncoder::new(),
        }
    }

    /// The options this encoder was created with.
    #[inline]
    pub fn options(&self) -> EncodeOptions {
        self.track.options
    }

    /// Unbind the file and clear the encoder, keeping the options.
    pub fn reset(&mut self) {
        *self = FileEncoder::with_options(self.options());
    }

    /// Bind a file, checking every chunk up front.
    ///
    /// Fails if the amount of chunks differs from the header track count, or if any chunk cannot
    /// be encoded.
    pub fn set_data(&mut self, smf: &'a Smf) -> Result<()> {
        ensure!(
            smf.chunks.len() == smf.header.ntrks as usize,
            err_data!("chunk count does not match the header track count")
        );
        for chunk in smf.chunks.iter() {
            match chunk {
                Chunk::Track(track) => {
                    track.encoded_len(self.options()).context("invalid track chunk")?;
                }
                Chunk::Unknown(chunk) => ensure!(
                    u32::try_from(chunk.data.len()).is_ok(),
                    err_data!("unknown chunk longer than 4GB")
                ),
            }
        }
        self.reset();
        self.header.set_data(&smf.header)?;
        self.smf = Some(smf);
        debug!(chunks = smf.chunks.len(), "bound smf file to encoder");
        Ok(())
    }

    /// Produce the next byte of the file.
    pub fn encode_byte(&mut self) -> Result<(u8, Status)> {
        self.phase.running("file encoder already finished")?;
        let res = trampoline(|| self.step());
        self.phase.settle_byte(res)
    }

    fn step(&mut self) -> Result<Step<(u8, Status)>> {
        let smf = self.smf.ok_or(err_data!("no file bound to the encoder"))?;
        let state = self.phase.running("file encoder already finished")?;
        let (byte, status) = match state {
            FileState::Header => self.header.encode_byte()?,
            FileState::Dispatch => {
                let chunk = smf
                    .chunks
                    .get(self.next_chunk)
                    .ok_or(err_data!("chunk index beyond the declared track count"))?;
                self.next_chunk += 1;
                let next = match chunk {
                    Chunk::Track(track) => {
                        self.track.set_data(track)?;
                        FileState::Track
                    }
                    Chunk::Unknown(chunk) => {
                        self.unknown.set_data(chunk)?;
                        FileState::Unknown
                    }
                };
                self.phase = Phase::Running(next);
                return Ok(Step::Again);
            }
            FileState::Track => self.track.encode_byte().context("invalid track chunk")?,
            FileState::Unknown => self.unknown.encode_byte()?,
        };
        if status == Status::Pending {
            return Ok(Step::Ready((byte, Status::Pending)));
        }
        if self.next_chunk == smf.chunks.len() {
            Ok(Step::Ready((byte, Status::Success)))
        } else {
            self.phase = Phase::Running(FileState::Dispatch);
            Ok(Step::Ready((byte, Status::Pending)))
        }
    }
}
