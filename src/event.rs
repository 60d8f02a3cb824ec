//! Track events, stored as raw payloads, and typed views over them.

use crate::{
    decode::VlqDecoder,
    prelude::*,
    primitive::{u14, u24, u4, u7},
};

/// Represents a single SMF track event.
///
/// Consists of a delta time (in MIDI ticks relative to the previous event) and the raw event
/// payload, exactly as it would appear in the file with the status byte always made explicit.
///
/// The payload shape depends on its first byte:
///
/// - `0xFF`: a meta event, stored as `FF type length data`, with the varlen length included.
/// - `0xF0`/`0xF7`: a SysEx or escape event, stored as `F0 data` or `F7 data`.
///   The varlen length is *not* stored, it is implied by the payload length.
/// - Any other status: a MIDI message, stored as the status followed by its parameters.
///
/// Use [`kind`](#method.kind) to get a typed view of the payload.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct TrackEvent {
    /// How many MIDI ticks after the previous event should this event fire.
    pub delta: u28,
    /// The raw event payload, starting with its status byte.
    pub bytes: Vec<u8>,
}
impl TrackEvent {
    /// Create an event with an empty payload, to be filled in by a decoder.
    #[inline]
    pub fn new(delta: u28) -> TrackEvent {
        TrackEvent {
            delta,
            bytes: Vec::new(),
        }
    }

    /// Create an event from an already-encoded payload, checking that it is well formed.
    pub fn from_raw(delta: u28, bytes: Vec<u8>) -> Result<TrackEvent> {
        let ev = TrackEvent { delta, bytes };
        ev.check()?;
        Ok(ev)
    }

    /// Create a channel message event.
    pub fn midi(delta: u28, channel: u4, message: MidiMessage) -> TrackEvent {
        let mut bytes = Vec::with_capacity(3);
        bytes.push(message.status_nibble() << 4 | channel.as_int());
        let (data, len) = message.data_bytes();
        bytes.extend_from_slice(&data[..len]);
        TrackEvent { delta, bytes }
    }

    /// Create a meta event.
    ///
    /// Fails if the meta payload does not fit in a varlen.
    pub fn meta(delta: u28, meta: MetaMessage) -> Result<TrackEvent> {
        let mut bytes = Vec::new();
        meta.write(&mut bytes)?;
        Ok(TrackEvent { delta, bytes })
    }

    /// Create a SysEx event.
    ///
    /// `data` does not include the leading `0xF0`, but should usually end with `0xF7`.
    pub fn sysex(delta: u28, data: &[u8]) -> Result<TrackEvent> {
        Self::with_lead(delta, 0xF0, data)
    }

    /// Create an escape event, carrying arbitrary bytes.
    pub fn escape(delta: u28, data: &[u8]) -> Result<TrackEvent> {
        Self::with_lead(delta, 0xF7, data)
    }

    fn with_lead(delta: u28, lead: u8, data: &[u8]) -> Result<TrackEvent> {
        ensure!(
            u28::try_from(data.len() as u32).is_some() && data.len() <= u32::MAX as usize,
            err_data!("sysex payload too long")
        );
        let mut bytes = Vec::with_capacity(1 + data.len());
        bytes.push(lead);
        bytes.extend_from_slice(data);
        Ok(TrackEvent { delta, bytes })
    }

    /// The raw event payload.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// The status byte of this event, if the payload is not empty.
    #[inline]
    pub fn status(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Whether this is a meta event.
    #[inline]
    pub fn is_meta(&self) -> bool {
        self.status() == Some(0xFF)
    }

    /// Whether this is a SysEx or escape event.
    #[inline]
    pub fn is_sysex(&self) -> bool {
        matches!(self.status(), Some(0xF0) | Some(0xF7))
    }

    /// Interpret the raw payload.
    ///
    /// Fails if the payload is not a well-formed event.
    pub fn kind(&self) -> Result<EventKind<'_>> {
        let status = self.status().ok_or(err_data!("empty event payload"))?;
        Ok(match status {
            0x00..=0x7F => bail!(err_data!("event payload does not start with a status byte")),
            0xFF => {
                let (type_byte, data) = self.meta_parts()?;
                EventKind::Meta(MetaMessage::read(type_byte, data))
            }
            0xF0 => EventKind::SysEx(&self.bytes[1..]),
            0xF7 => EventKind::Escape(&self.bytes[1..]),
            0x80..=0xEF => {
                self.check_params(status)?;
                let data = [
                    u7::from(self.bytes.get(1).copied().unwrap_or(0)),
                    u7::from(self.bytes.get(2).copied().unwrap_or(0)),
                ];
                let (channel, message) = MidiMessage::read(status, data);
                EventKind::Midi { channel, message }
            }
            _ => {
                self.check_params(status)?;
                EventKind::System {
                    status,
                    data: &self.bytes[1..],
                }
            }
        })
    }

    /// Check that this event can be encoded as-is.
    pub(crate) fn check(&self) -> Result<()> {
        let status = self.status().ok_or(err_data!("empty event payload"))?;
        match status {
            0x00..=0x7F => bail!(err_data!("event payload does not start with a status byte")),
            0xFF => {
                self.meta_parts()?;
            }
            0xF0 | 0xF7 => ensure!(
                self.bytes.len() - 1 <= u28::max_value().as_int() as usize,
                err_data!("sysex payload too long")
            ),
            _ => self.check_params(status)?,
        }
        Ok(())
    }

    fn check_params(&self, status: u8) -> Result<()> {
        let count = param_count(status).ok_or(err_data!("invalid message status"))?;
        ensure!(
            self.bytes.len() == 1 + count,
            err_data!("message payload length does not match its status")
        );
        Ok(())
    }

    /// Split a meta payload into its type byte and data, checking the embedded length.
    pub(crate) fn meta_parts(&self) -> Result<(u8, &[u8])> {
        let (type_byte, rest) = match &self.bytes[..] {
            [0xFF, type_byte, rest @ ..] => (*type_byte, rest),
            _ => bail!(err_data!("truncated meta event")),
        };
        let mut len = VlqDecoder::new();
        let mut consumed = 0;
        loop {
            let byte = *rest
                .get(consumed)
                .ok_or(err_data!("truncated meta event length"))?;
            consumed += 1;
            if len.feed(byte)? == Status::Success {
                break;
            }
        }
        let data = &rest[consumed..];
        ensure!(
            data.len() == len.value().as_int() as usize,
            err_data!("meta event length does not match its data")
        );
        Ok((type_byte, data))
    }

    /// Amount of bytes this event takes up inside a track chunk, delta time included.
    ///
    /// `skip_status` indicates that the status byte is left out because of running status.
    pub(crate) fn encoded_len(&self, skip_status: bool) -> usize {
        let body = match self.status() {
            Some(0xF0) | Some(0xF7) => {
                let data_len = self.bytes.len() - 1;
                1 + u28::new(data_len as u32).varlen_len() + data_len
            }
            _ => self.bytes.len() - skip_status as usize,
        };
        self.delta.varlen_len() + body
    }
}

/// Amount of parameter bytes that follow a message status.
///
/// Returns `None` for bytes that do not start a message on their own: data bytes, `0xF0`, `0xF7`
/// and `0xFF`.
pub(crate) fn param_count(status: u8) -> Option<usize> {
    match status {
        0x80..=0xEF => Some(MidiMessage::msg_length(status)),
        0xF2 => Some(2),
        0xF3 => Some(1),
        0xF1 | 0xF4..=0xF6 | 0xF8..=0xFE => Some(0),
        _ => None,
    }
}

/// A typed view over the payload of a `TrackEvent`.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum EventKind<'a> {
    /// A message associated to a MIDI channel carrying musical data.
    Midi {
        /// The MIDI channel that this event is associated with.
        channel: u4,
        /// The MIDI message type and associated data.
        message: MidiMessage,
    },
    /// A system common or realtime message.
    ///
    /// These are not supposed to appear in standard MIDI files, but they are carried through
    /// anyway.
    System {
        /// The raw status byte, in the range `0xF1..=0xFE`.
        status: u8,
        /// Parameter bytes, if the message has any.
        data: &'a [u8],
    },
    /// A System Exclusive message, carrying arbitrary data.
    ///
    /// The data bytes included here do not include the implicit `0xF0` prefix.
    SysEx(&'a [u8]),
    /// An escape sequence, intended to send arbitrary data to the MIDI synthesizer.
    Escape(&'a [u8]),
    /// A meta-message, giving extra information for correct playback, like tempo, song name,
    /// lyrics, etc...
    Meta(MetaMessage<'a>),
}

/// Represents a MIDI message, usually associated to a MIDI channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MidiMessage {
    /// Stop playing a note.
    NoteOff {
        /// The MIDI key to stop playing.
        key: u7,
        /// The velocity with which to stop playing it.
        vel: u7,
    },
    /// Start playing a note.
    NoteOn {
        /// The key to start playing.
        key: u7,
        /// The velocity (strength) with which to press it.
        ///
        /// Note that by convention a `NoteOn` message with a velocity of 0 is equivalent to a
        /// `NoteOff`.
        vel: u7,
    },
    /// Modify the velocity of a note after it has been played.
    Aftertouch {
        /// The key for which to modify its velocity.
        key: u7,
        /// The new velocity for the key.
        vel: u7,
    },
    /// Modify the value of a MIDI controller.
    Controller {
        /// The controller to modify.
        controller: u7,
        /// The value to set it to.
        value: u7,
    },
    /// Change the program (also known as instrument) for a channel.
    ProgramChange {
        /// The new program (instrument) to use for the channel.
        program: u7,
    },
    /// Change the note velocity of a whole channel at once, without starting new notes.
    ChannelAftertouch {
        /// The new velocity for all notes currently playing in the channel.
        vel: u7,
    },
    /// Set the pitch bend value for the entire channel.
    PitchBend {
        /// The new pitch-bend value.
        bend: PitchBend,
    },
}
impl MidiMessage {
    /// Midi messages have a known length.
    pub(crate) fn msg_length(status: u8) -> usize {
        const LENGTH_BY_STATUS: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 2, 1, 1, 2, 0];
        LENGTH_BY_STATUS[(status >> 4) as usize] as usize
    }

    /// Receives status byte and midi args separately.
    ///
    /// The status must be a channel message status (`0x80..=0xEF`).
    fn read(status: u8, data: [u7; 2]) -> (u4, MidiMessage) {
        let channel = u4::from(status);
        let msg = match status >> 4 {
            0x8 => MidiMessage::NoteOff {
                key: data[0],
                vel: data[1],
            },
            0x9 => MidiMessage::NoteOn {
                key: data[0],
                vel: data[1],
            },
            0xA => MidiMessage::Aftertouch {
                key: data[0],
                vel: data[1],
            },
            0xB => MidiMessage::Controller {
                controller: data[0],
                value: data[1],
            },
            0xC => MidiMessage::ProgramChange { program: data[0] },
            0xD => MidiMessage::ChannelAftertouch { vel: data[0] },
            _ => {
                //Note the little-endian order, contrasting with the default big-endian order of
                //Standard Midi Files
                let lsb = data[0].as_int() as u16;
                let msb = data[1].as_int() as u16;
                MidiMessage::PitchBend {
                    bend: PitchBend(u14::from(msb << 7 | lsb)),
                }
            }
        };
        (channel, msg)
    }

    /// Get the raw status nibble for this MIDI message type.
    pub(crate) fn status_nibble(&self) -> u8 {
        match self {
            MidiMessage::NoteOff { .. } => 0x8,
            MidiMessage::NoteOn { .. } => 0x9,
            MidiMessage::Aftertouch { .. } => 0xA,
            MidiMessage::Controller { .. } => 0xB,
            MidiMessage::ProgramChange { .. } => 0xC,
            MidiMessage::ChannelAftertouch { .. } => 0xD,
            MidiMessage::PitchBend { .. } => 0xE,
        }
    }

    /// The parameter bytes of this message, not including the status.
    fn data_bytes(&self) -> ([u8; 2], usize) {
        match *self {
            MidiMessage::NoteOff { key, vel }
            | MidiMessage::NoteOn { key, vel }
            | MidiMessage::Aftertouch { key, vel } => ([key.as_int(), vel.as_int()], 2),
            MidiMessage::Controller { controller, value } => {
                ([controller.as_int(), value.as_int()], 2)
            }
            MidiMessage::ProgramChange { program } => ([program.as_int(), 0], 1),
            MidiMessage::ChannelAftertouch { vel } => ([vel.as_int(), 0], 1),
            MidiMessage::PitchBend { bend } => {
                let raw = bend.0.as_int();
                ([(raw & 0x7F) as u8, (raw >> 7) as u8], 2)
            }
        }
    }
}

/// The value of a pitch bend, represented as 14 bits.
///
/// A value of `0x0000` indicates full bend downwards.
/// A value of `0x2000` indicates no bend.
/// A value of `0x3FFF` indicates full bend upwards.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct PitchBend(pub u14);
impl PitchBend {
    /// The middle value of `0x2000`, indicating no bend.
    #[inline]
    pub const fn mid_raw_value() -> PitchBend {
        PitchBend(u14::new(0x2000))
    }

    /// Create a `PitchBend` value from an int in the range `[-0x2000, 0x1FFF]`.
    ///
    /// Integers outside this range will be clamped.
    #[inline]
    pub fn from_int(int: i16) -> PitchBend {
        PitchBend(u14::new((int.max(-0x2000).min(0x1FFF) + 0x2000) as u16))
    }

    /// Returns an int in the range `[-0x2000, 0x1FFF]`.
    #[inline]
    pub fn as_int(self) -> i16 {
        self.0.as_int() as i16 - 0x2000
    }

    /// Returns an `f32` in the range `[-1.0, 1.0)`.
    #[inline]
    pub fn as_f32(self) -> f32 {
        self.as_int() as f32 * (1.0 / 0x2000 as f32)
    }
}

/// A "meta message", as defined by the SMF spec.
/// These events carry metadata about the track, such as tempo, time signature, copyright, etc...
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MetaMessage<'a> {
    /// For `Format::Sequential` MIDI file types, `TrackNumber` can be empty, and defaults to
    /// the track index.
    TrackNumber(Option<u16>),
    /// Arbitrary text associated to an instant.
    Text(&'a [u8]),
    /// A copyright notice.
    Copyright(&'a [u8]),
    /// Information about the name of the track.
    TrackName(&'a [u8]),
    /// Information about the name of the current instrument.
    InstrumentName(&'a [u8]),
    /// Arbitrary lyric information associated to an instant.
    Lyric(&'a [u8]),
    /// Arbitrary marker text associated to an instant.
    Marker(&'a [u8]),
    /// Arbitrary cue point text associated to an instant.
    CuePoint(&'a [u8]),
    /// Number of the MIDI channel that this file was intended to be played with.
    MidiChannel(u4),
    /// Number of the MIDI port that this file was intended to be played with.
    MidiPort(u7),
    /// Obligatory at track end.
    EndOfTrack,
    /// Amount of microseconds per beat (quarter note).
    Tempo(u24),
    /// Hours, minutes, seconds, frames and fractional frames at which the track starts.
    SmpteOffset([u8; 5]),
    /// In order of the MIDI specification, numerator, denominator, MIDI clocks per click, 32nd
    /// notes per quarter
    TimeSignature(u8, u8, u8, u8),
    /// As in the MIDI specification, negative numbers indicate number of flats and positive
    /// numbers indicate number of sharps.
    /// `false` indicates a major scale, `true` indicates a minor scale.
    KeySignature(i8, bool),
    /// Arbitrary data intended for the sequencer.
    SequencerSpecific(&'a [u8]),
    /// An unknown or malformed meta-message.
    ///
    /// The first `u8` is the raw meta-message identifier byte.
    /// The slice is the actual payload of the meta-message.
    Unknown(u8, &'a [u8]),
}
impl<'a> MetaMessage<'a> {
    /// Interpret a meta type byte and its data.
    ///
    /// Meta events with a known type but a payload too short for it become `Unknown`.
    fn read(type_byte: u8, data: &'a [u8]) -> MetaMessage<'a> {
        match (type_byte, data) {
            (0x00, [hi, lo, ..]) => MetaMessage::TrackNumber(Some(u16::from_be_bytes([*hi, *lo]))),
            (0x00, _) => MetaMessage::TrackNumber(None),
            (0x01, _) => MetaMessage::Text(data),
            (0x02, _) => MetaMessage::Copyright(data),
            (0x03, _) => MetaMessage::TrackName(data),
            (0x04, _) => MetaMessage::InstrumentName(data),
            (0x05, _) => MetaMessage::Lyric(data),
            (0x06, _) => MetaMessage::Marker(data),
            (0x07, _) => MetaMessage::CuePoint(data),
            (0x20, [chan, ..]) => MetaMessage::MidiChannel(u4::from(*chan)),
            (0x21, [port, ..]) => MetaMessage::MidiPort(u7::from(*port)),
            (0x2F, _) => MetaMessage::EndOfTrack,
            (0x51, [a, b, c, ..]) => {
                MetaMessage::Tempo(u24::from(u32::from_be_bytes([0, *a, *b, *c])))
            }
            (0x54, [h, m, s, f, ff, ..]) => MetaMessage::SmpteOffset([*h, *m, *s, *f, *ff]),
            (0x58, [num, den, clocks, notes, ..]) => {
                MetaMessage::TimeSignature(*num, *den, *clocks, *notes)
            }
            (0x59, [sharps, minor, ..]) => MetaMessage::KeySignature(*sharps as i8, *minor != 0),
            (0x7F, _) => MetaMessage::SequencerSpecific(data),
            _ => MetaMessage::Unknown(type_byte, data),
        }
    }

    /// Write the full meta payload: `FF type length data`.
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut write_msg = |type_byte: u8, data: &[u8]| -> Result<()> {
            let len = u28::try_from(data.len() as u32)
                .filter(|_| data.len() <= u32::MAX as usize)
                .ok_or(err_data!("meta payload too long"))?;
            let (varlen, varlen_len) = len.to_varlen();
            out.reserve(2 + varlen_len + data.len());
            out.push(0xFF);
            out.push(type_byte);
            out.extend_from_slice(&varlen[..varlen_len]);
            out.extend_from_slice(data);
            Ok(())
        };
        match self {
            MetaMessage::TrackNumber(track_num) => match track_num {
                None => write_msg(0x00, &[]),
                Some(track_num) => write_msg(0x00, &track_num.to_be_bytes()[..]),
            },
            MetaMessage::Text(data) => write_msg(0x01, data),
            MetaMessage::Copyright(data) => write_msg(0x02, data),
            MetaMessage::TrackName(data) => write_msg(0x03, data),
            MetaMessage::InstrumentName(data) => write_msg(0x04, data),
            MetaMessage::Lyric(data) => write_msg(0x05, data),
            MetaMessage::Marker(data) => write_msg(0x06, data),
            MetaMessage::CuePoint(data) => write_msg(0x07, data),
            MetaMessage::MidiChannel(chan) => write_msg(0x20, &[chan.as_int()]),
            MetaMessage::MidiPort(port) => write_msg(0x21, &[port.as_int()]),
            MetaMessage::EndOfTrack => write_msg(0x2F, &[]),
            MetaMessage::Tempo(microsperbeat) => {
                write_msg(0x51, &microsperbeat.as_int().to_be_bytes()[1..])
            }
            MetaMessage::SmpteOffset(smpte) => write_msg(0x54, &smpte[..]),
            MetaMessage::TimeSignature(num, den, ticksperclick, thirtysecondsperquarter) => {
                write_msg(
                    0x58,
                    &[*num, *den, *ticksperclick, *thirtysecondsperquarter],
                )
            }
            MetaMessage::KeySignature(sharps, minor) => {
                write_msg(0x59, &[*sharps as u8, *minor as u8])
            }
            MetaMessage::SequencerSpecific(data) => write_msg(0x7F, data),
            MetaMessage::Unknown(type_byte, data) => write_msg(*type_byte, data),
        }
    }
}
