//! Provides sinks that encoded SMF bytes can be written into.
//!
//! The encoders in this crate produce one byte at a time, so any byte sink works.
//! This module provides a small `Write` trait so that the convenience writers in
//! [`Smf`](../struct.Smf.html) can target growable buffers, fixed-size buffers and (with the `std`
//! feature) any `std::io::Write` implementor through [`IoWrap`](struct.IoWrap.html).

use crate::prelude::*;

/// The result of writing into a `Write` sink.
pub type IoResult<W> = StdResult<(), <W as Write>::Error>;

/// A destination for encoded SMF bytes.
pub trait Write {
    /// The error type of this sink.
    type Error;
    /// Write all of the bytes in `buf`, or fail.
    fn write_all(&mut self, buf: &[u8]) -> IoResult<Self>;
    /// Build an error reporting that the data being encoded is invalid.
    fn invalid_input(msg: &'static str) -> Self::Error;
}

impl Write for Vec<u8> {
    type Error = &'static str;
    fn write_all(&mut self, buf: &[u8]) -> IoResult<Self> {
        self.extend_from_slice(buf);
        Ok(())
    }
    fn invalid_input(msg: &'static str) -> &'static str {
        msg
    }
}

/// A fixed-size buffer that is filled from the start.
pub struct Cursor<'a> {
    buf: &'a mut [u8],
    cur: usize,
}
impl<'a> Cursor<'a> {
    /// Create a cursor that writes at the start of `slice`.
    pub fn new(slice: &'a mut [u8]) -> Cursor<'a> {
        Cursor { buf: slice, cur: 0 }
    }
    /// Get back the buffer along with the amount of bytes written.
    pub fn into_parts(self) -> (&'a mut [u8], usize) {
        (self.buf, self.cur)
    }
    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.cur]
    }
    /// Amount of bytes written so far.
    pub fn cursor(&self) -> usize {
        self.cur
    }
}
impl<'a> Write for Cursor<'a> {
    type Error = CursorError;
    fn write_all(&mut self, buf: &[u8]) -> IoResult<Self> {
        //Cannot overflow because `cur <= buf.len()` is always true.
        let up_to = self.cur + buf.len();
        if up_to > self.buf.len() {
            let space = self.buf.len() - self.cur;
            self.buf[self.cur..].copy_from_slice(&buf[..space]);
            self.cur = self.buf.len();
            Err(CursorError::OutOfSpace)
        } else {
            self.buf[self.cur..up_to].copy_from_slice(buf);
            self.cur = up_to;
            Ok(())
        }
    }
    fn invalid_input(msg: &'static str) -> CursorError {
        CursorError::InvalidInput(msg)
    }
}

/// The errors that a `Cursor` can produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CursorError {
    /// The buffer filled up before the file was completely written.
    OutOfSpace,
    /// The data being encoded is invalid.
    InvalidInput(&'static str),
}

/// Adapts a `std::io::Write` implementor into a `Write` sink.
pub struct IoWrap<T>(pub T);
#[cfg(feature = "std")]
impl<T: io::Write> Write for IoWrap<T> {
    type Error = io::Error;
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.0, buf)
    }
    fn invalid_input(msg: &'static str) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, msg)
    }
}
