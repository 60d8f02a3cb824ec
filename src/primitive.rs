//! Simple building-block data shared by the decoders and encoders.
//! Restricted integers, variable-length quantities, chunk tags and the header field types.

use crate::prelude::*;

/// Outcome of a single successful call into a state machine.
///
/// Failure is reported through the `Err` side of a `Result`, so a machine call returns one of
/// three things: keep going, done, or failed.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Status {
    /// The machine needs more input (or will produce more output).
    Pending,
    /// The machine completed its grammar element with this byte.
    ///
    /// Any further call fails until the machine is reset.
    Success,
}

/// Result of a single transition of a state machine that may need to look at the same byte
/// again after switching state.
///
/// Machines drive their transition function in a loop until it returns `Ready`, which keeps the
/// reprocessing explicit and the stack depth bounded.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Step<T> {
    /// The transition is complete.
    Ready(T),
    /// State changed without consuming (or producing) the byte; run the transition again.
    Again,
}

/// Drive a transition function until it stops asking to run again.
pub(crate) fn trampoline<T>(mut step: impl FnMut() -> Result<Step<T>>) -> Result<T> {
    loop {
        match step()? {
            Step::Ready(out) => return Ok(out),
            Step::Again => {}
        }
    }
}

/// Lifecycle of a state machine, wrapping its machine-specific state.
///
/// `Done` and `Failed` are traps: only a reset leaves them.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Phase<S> {
    Running(S),
    Done,
    Failed,
}
impl<S: Copy> Phase<S> {
    /// Get the current state, or fail if the machine already finished.
    #[inline]
    pub(crate) fn running(&self, what: &'static str) -> Result<S> {
        match *self {
            Phase::Running(state) => Ok(state),
            Phase::Done | Phase::Failed => Err(err_terminal!(what).into()),
        }
    }

    /// Record the outcome of a call, trapping on success or failure.
    #[inline]
    pub(crate) fn settle(&mut self, res: Result<Status>) -> Result<Status> {
        self.settle_with(res, |status| *status)
    }

    /// Same as `settle`, for encoders that also produce a byte.
    #[inline]
    pub(crate) fn settle_byte(&mut self, res: Result<(u8, Status)>) -> Result<(u8, Status)> {
        self.settle_with(res, |(_, status)| *status)
    }

    fn settle_with<T>(&mut self, res: Result<T>, status: impl Fn(&T) -> Status) -> Result<T> {
        match &res {
            Ok(out) if status(out) == Status::Success => *self = Phase::Done,
            Ok(_) => {}
            Err(_) => *self = Phase::Failed,
        }
        res
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        matches!(self, Phase::Done)
    }

    #[inline]
    pub(crate) fn is_failed(&self) -> bool {
        matches!(self, Phase::Failed)
    }
}

/// Slightly restricted integers.
macro_rules! restricted_int {
    {$(#[$attr:meta])* $name:ident : $inner:tt => $bits:expr} => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
        #[repr(transparent)]
        #[allow(non_camel_case_types)]
        pub struct $name($inner);
        impl From<$inner> for $name {
            /// Lossy conversion, loses top bits.
            #[inline]
            fn from(raw: $inner) -> $name {
                $name::from_int_lossy(raw)
            }
        }
        impl From<$name> for $inner {
            #[inline]
            fn from(restricted: $name) -> $inner {restricted.0}
        }
        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
        impl $name {
            const MASK: $inner = (1 << $bits) - 1;

            /// The maximum value that this restricted integer can hold.
            #[inline]
            pub const fn max_value() -> $name {
                $name (Self::MASK)
            }

            /// Creates a restricted int from its non-restricted counterpart by masking off the
            /// extra bits.
            #[inline]
            pub const fn new(raw: $inner) -> $name {
                $name (raw & Self::MASK)
            }

            /// Creates a restricted int from its non-restricted counterpart by masking off the
            /// extra bits.
            #[inline]
            pub const fn from_int_lossy(raw: $inner) -> $name {
                $name (raw & Self::MASK)
            }

            /// Returns `Some` if the raw integer is within range of the restricted integer, and
            /// `None` otherwise.
            #[inline]
            pub fn try_from(raw: $inner) -> Option<$name> {
                if raw <= Self::MASK {
                    Some($name(raw))
                }else{
                    None
                }
            }

            /// Get the inner integer out of the wrapper.
            /// The inner integer is guaranteed to be in range of the restricted wrapper.
            #[inline]
            pub fn as_int(self) -> $inner {
                Into::into(self)
            }
        }
        impl PartialEq<$inner> for $name {
            fn eq(&self, rhs: &$inner) -> bool {
                self.as_int() == *rhs
            }
        }
        impl PartialEq<$name> for $inner {
            fn eq(&self, rhs: &$name) -> bool {
                *self == rhs.as_int()
            }
        }
    };
}
restricted_int! {
    /// A 28-bit integer type.
    ///
    /// Referred to in the MIDI spec as "variable length quantity".
    /// Wraps the `u32` type and ensures that the top 4 bits are always zero.
    u28: u32 => 28
}
restricted_int! {
    /// A 24-bit integer type.
    ///
    /// Wraps the `u32` type and ensures that the top 8 bits are always zero.
    u24: u32 => 24
}
restricted_int! {
    /// A 15-bit integer type.
    ///
    /// Wraps the `u16` type and ensures that the top bit is always zero.
    u15: u16 => 15
}
restricted_int! {
    /// A 14-bit integer type.
    ///
    /// Wraps the `u16` type and ensures that the top two bits are always zero.
    u14: u16 => 14
}
restricted_int! {
    /// A 7-bit integer type.
    ///
    /// Wraps the `u8` type and ensures that the top bit is always zero.
    u7: u8 => 7
}
restricted_int! {
    /// A 4-bit integer type.
    ///
    /// Wraps the `u8` type and ensures that the top 4 bits are always zero.
    u4: u8 => 4
}

impl u28 {
    /// Split this integer into its minimal variable-length representation.
    ///
    /// Returns a buffer and the amount of leading bytes in use.
    pub(crate) fn to_varlen(self) -> ([u8; 4], usize) {
        let int = self.as_int();
        let mut buf = [0; 4];
        let mut len = 0;
        let mut skipping = true;
        for i in (0..4).rev() {
            let byte = ((int >> (i * 7)) & 0x7F) as u8;
            if skipping && byte == 0 && i != 0 {
                //Skip these leading zeros
            } else {
                skipping = false;
                buf[len] = if i == 0 {
                    //Last byte
                    byte
                } else {
                    //Leading byte
                    byte | 0x80
                };
                len += 1;
            }
        }
        (buf, len)
    }

    /// Amount of bytes in the minimal variable-length representation of this integer.
    pub(crate) fn varlen_len(self) -> usize {
        match self.as_int() {
            0..=0x7F => 1,
            0x80..=0x3FFF => 2,
            0x4000..=0x1F_FFFF => 3,
            _ => 4,
        }
    }
}

/// The 4-byte tag that opens a header chunk, `MThd`.
pub const HEADER_TAG: [u8; 4] = *b"MThd";
/// The 4-byte tag that opens a track chunk, `MTrk`.
pub const TRACK_TAG: [u8; 4] = *b"MTrk";

/// The classification of a chunk by its 4-byte tag.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ChunkKind {
    /// An `MThd` chunk.
    Header,
    /// An `MTrk` chunk.
    Track,
    /// Any other tag. These chunks are carried through without interpretation.
    Unknown,
}
impl ChunkKind {
    /// Classify a tag against the two known chunk tags.
    #[inline]
    pub fn classify(tag: [u8; 4]) -> ChunkKind {
        match tag {
            HEADER_TAG => ChunkKind::Header,
            TRACK_TAG => ChunkKind::Track,
            _ => ChunkKind::Unknown,
        }
    }
}

/// The order in which tracks should be laid out when playing back this SMF file.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Format {
    /// This file should have a single track only.
    SingleTrack,
    /// This file has several tracks that should be played simultaneously.
    ///
    /// Usually the first track controls tempo and other song metadata.
    Parallel,
    /// This file has several tracks, each one a separate song.
    ///
    /// The tracks should be played sequentially, as completely separate MIDI tracks packaged
    /// within a single SMF file.
    Sequential,
}
impl Format {
    /// Interpret the raw format field of a header chunk.
    pub fn from_raw(raw: u16) -> Result<Format> {
        Ok(match raw {
            0 => Format::SingleTrack,
            1 => Format::Parallel,
            2 => Format::Sequential,
            _ => bail!(err_unexpected!("invalid smf format")),
        })
    }

    /// The raw header field for this format.
    pub fn as_raw(self) -> u16 {
        match self {
            Format::SingleTrack => 0,
            Format::Parallel => 1,
            Format::Sequential => 2,
        }
    }
}

/// The timing for an SMF file.
/// This can be in ticks/beat or ticks/second.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Timing {
    /// Specifies ticks/beat as a 15-bit integer.
    ///
    /// The length of a beat is not standard, so in order to fully describe the length of a MIDI
    /// tick the [`MetaMessage::Tempo`](enum.MetaMessage.html#variant.Tempo) event should be
    /// present.
    Metrical(u15),
    /// Specifies ticks/second by dividing a second into frames and then into subframes.
    /// Therefore the length of of a tick is `1/fps/subframe`.
    Timecode(Fps, u8),
}
impl Timing {
    /// Interpret the raw division field of a header chunk.
    pub fn from_raw(raw: u16) -> Result<Timing> {
        if raw & 0x8000 != 0 {
            //Timecode
            let fps = ((raw >> 8) as u8 as i8).wrapping_neg();
            let subframe = raw as u8;
            Ok(Timing::Timecode(
                Fps::from_int(fps as u8).ok_or(err_unexpected!("invalid smpte fps"))?,
                subframe,
            ))
        } else {
            //Metrical
            Ok(Timing::Metrical(u15::from(raw)))
        }
    }

    /// The raw header field for this timing.
    pub fn as_raw(self) -> u16 {
        match self {
            Timing::Metrical(ticksperbeat) => ticksperbeat.as_int(),
            Timing::Timecode(framespersec, ticksperframe) => {
                u16::from_be_bytes([(-(framespersec.as_int() as i8)) as u8, ticksperframe])
            }
        }
    }
}

/// One of the four FPS values available for SMPTE times, as defined by the MIDI standard.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Fps {
    /// 24 frames per second.
    Fps24,
    /// 25 frames per second.
    Fps25,
    /// Actually `29.97 = 30 / 1.001` frames per second.
    ///
    /// Quite an exotic value because of interesting historical reasons.
    Fps29,
    /// 30 frames per second.
    Fps30,
}
impl Fps {
    /// Converts an integer representing the semantic fps to an `Fps` value (ie. `24` -> `Fps24`).
    #[inline]
    pub fn from_int(raw: u8) -> Option<Fps> {
        Some(match raw {
            24 => Fps::Fps24,
            25 => Fps::Fps25,
            29 => Fps::Fps29,
            30 => Fps::Fps30,
            _ => return None,
        })
    }

    /// Get the integral approximate fps out.
    #[inline]
    pub fn as_int(self) -> u8 {
        match self {
            Fps::Fps24 => 24,
            Fps::Fps25 => 25,
            Fps::Fps29 => 29,
            Fps::Fps30 => 30,
        }
    }

    /// Get the actual `f32` fps out.
    #[inline]
    pub fn as_f32(self) -> f32 {
        match self {
            Fps::Fps24 => 24.0,
            Fps::Fps25 => 25.0,
            Fps::Fps29 => 30.0 / 1.001,
            Fps::Fps30 => 30.0,
        }
    }
}
impl From<Fps> for u8 {
    fn from(x: Fps) -> Self {
        x.as_int()
    }
}
