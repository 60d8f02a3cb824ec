//! # Overview
//!
//! `smfstream` is a Standard Midi File (SMF) decoder and encoder that works one byte at a time.
//! The whole file never needs to be in memory: bytes are pushed into a decoder as they arrive
//! and pulled out of an encoder as the sink is ready for them.
//!
//! Decoding is done by feeding bytes into a [`FileDecoder`](struct.FileDecoder.html), which
//! populates an [`Smf`](struct.Smf.html):
//!
//! ```rust
//! use smfstream::{FileDecoder, Smf, Status};
//!
//! # let bytes: &[u8] = &[
//! #     b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 0, 0, 1, 0, 96,
//! #     b'M', b'T', b'r', b'k', 0, 0, 0, 4, 0x00, 0xFF, 0x2F, 0x00,
//! # ];
//! let mut decoder = FileDecoder::new();
//! let mut smf = Smf::default();
//! for &byte in bytes {
//!     if decoder.feed(byte, &mut smf).unwrap() == Status::Success {
//!         break;
//!     }
//! }
//! println!("file has {} tracks", smf.tracks().count());
//! ```
//!
//! Encoding is the mirror image: bind the file to a [`FileEncoder`](struct.FileEncoder.html) and
//! pull bytes out of it until it reports success:
//!
//! ```rust
//! # use smfstream::{FileDecoder, Smf, Status};
//! use smfstream::FileEncoder;
//! # let bytes: &[u8] = &[
//! #     b'M', b'T', b'h', b'd', 0, 0, 0, 6, 0, 0, 0, 1, 0, 96,
//! #     b'M', b'T', b'r', b'k', 0, 0, 0, 4, 0x00, 0xFF, 0x2F, 0x00,
//! # ];
//! # let smf = Smf::parse(bytes).unwrap();
//! let mut encoder = FileEncoder::new();
//! encoder.set_data(&smf).unwrap();
//! let mut out = Vec::new();
//! loop {
//!     let (byte, status) = encoder.encode_byte().unwrap();
//!     out.push(byte);
//!     if status == Status::Success {
//!         break;
//!     }
//! }
//! assert_eq!(out, bytes);
//! ```
//!
//! For the common case of having the whole file in a slice, [`Smf::parse`] and [`Smf::write`]
//! drive the state machines for you.
//!
//! # Round trips
//!
//! Decoded data keeps every byte needed to reproduce the original file: unknown chunks, extended
//! header content, non-standard header formats and raw event payloads are all preserved.
//! Re-encoding a well-formed file with running status compression enabled (the default) yields
//! exactly the original bytes.
//!
//! # State machine contract
//!
//! Every decoder and encoder in this crate is a small state machine.
//! A call either makes progress (`Status::Pending`), completes the machine (`Status::Success`) or
//! fails with an [`Error`].
//! Success and failure are both trap states: any further byte fails with
//! [`ErrorKind::Terminal`] until the machine is reset with its `reset` method.
//!
//! # About features
//!
//! - The `std` feature (enabled by default)
//!
//!   Implements `std::error::Error` for [`Error`], enables writing into `std::io::Write` sinks and
//!   the `Smf::load`/`Smf::save` helpers.
//!   Disabling this feature with `default-features = false` makes the crate `no_std + alloc`.
//!
//! - The `parallel` feature (enabled by default)
//!
//!   Makes [`parse_many`] decode independent files on several threads through `rayon`.
//!
//! [`Smf::parse`]: struct.Smf.html#method.parse
//! [`Smf::write`]: struct.Smf.html#method.write
//! [`Error`]: struct.Error.html
//! [`ErrorKind::Terminal`]: enum.ErrorKind.html#variant.Terminal
//! [`parse_many`]: fn.parse_many.html

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

/// All of the errors this crate produces.
#[macro_use]
mod error;

mod prelude {
    pub(crate) use crate::{
        error::{Error, ErrorKind, Result, ResultExt},
        io::{IoResult, Write},
        primitive::{u28, Status, Step},
    };
    pub(crate) use alloc::vec::Vec;
    pub(crate) use core::{convert::TryFrom, fmt, result::Result as StdResult};
    #[cfg(feature = "std")]
    pub(crate) use std::{fs::File, io, path::Path};
}

mod decode;
mod encode;
mod event;
pub mod io;
mod primitive;
mod smf;

pub use crate::{
    decode::{
        ChunkLengthDecoder, ChunkTagDecoder, EventStreamDecoder, FileDecoder, HeaderDecoder,
        MessageDecoder, MetaDecoder, ParamDecoder, SysexDecoder, TrackDecoder, UnknownDecoder,
        VlqDecoder,
    },
    encode::{
        EncodeOptions, FileEncoder, HeaderEncoder, MessageEncoder, MetaEncoder, SysexEncoder,
        TrackEncoder, UnknownEncoder, VlqEncoder,
    },
    error::{Error, ErrorKind, Result},
    event::{EventKind, MetaMessage, MidiMessage, PitchBend, TrackEvent},
    primitive::{ChunkKind, Format, Fps, Status, Timing, HEADER_TAG, TRACK_TAG},
    smf::{parse_many, Chunk, Header, Smf, Track, UnknownChunk},
};

/// Exotically-sized integers used by the MIDI standard.
pub mod num {
    pub use crate::primitive::{u14, u15, u24, u28, u4, u7};
}

#[cfg(test)]
mod test;
