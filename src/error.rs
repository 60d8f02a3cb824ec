use crate::prelude::*;

/// Represents an error while decoding or encoding an SMF byte stream.
///
/// This type wraps an `ErrorKind` describing the root cause, the absolute byte position at which
/// the error was detected (when known) and a chain of context messages.
/// State machines add their own context to the errors of their children, so the chain reads
/// from the innermost grammar element (a single field or event) out to the outermost one
/// (the file).
///
/// If the `std` feature is enabled, this type implements `std::error::Error`.
/// Otherwise, only `Display` and `Debug` are implemented.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    position: Option<u64>,
    context: Vec<&'static str>,
}
impl Error {
    /// Create a new error with the given `ErrorKind`.
    #[inline]
    pub fn new(kind: ErrorKind) -> Error {
        Error {
            kind,
            position: None,
            context: Vec::new(),
        }
    }

    /// More information about the error itself.
    ///
    /// This is always the innermost, most specific reason for the failure, regardless of how
    /// many state machines the error bubbled through.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Absolute offset of the offending byte, counted from the first byte fed to the
    /// `FileDecoder`.
    ///
    /// Only errors that went through a `FileDecoder` carry a position.
    #[inline]
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    /// What the state machines were doing when the error occurred, innermost first.
    #[inline]
    pub fn context(&self) -> &[&'static str] {
        &self.context[..]
    }

    pub(crate) fn chain_ctx(mut self, ctx: &'static str) -> Error {
        self.context.push(ctx);
        self
    }

    pub(crate) fn at(mut self, position: u64) -> Error {
        self.position = Some(position);
        self
    }
}
impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind)
    }
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for ctx in self.context.iter().rev() {
            write!(f, "{}: ", ctx)?;
        }
        fmt::Display::fmt(&self.kind, f)?;
        if let Some(pos) = self.position {
            write!(f, " (at byte {})", pos)?;
        }
        Ok(())
    }
}
impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(pos) = self.position {
            write!(f, " (at byte {})", pos)?;
        }
        for ctx in self.context.iter() {
            writeln!(f)?;
            write!(f, "  while: {}", ctx)?;
        }
        Ok(())
    }
}
#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// The type of error that occurred.
///
/// All errors are terminal for the state machine that raised them: once a machine fails it keeps
/// failing until it is reset.
/// Specific error info is provided as a non-normative string literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// A variable-length quantity ran for more than 4 bytes without terminating.
    #[error("malformed varlen: {0}")]
    MalformedVlq(&'static str),

    /// A chunk or event did not end exactly where its declared length said it would.
    #[error("length mismatch: {0}")]
    LengthMismatch(&'static str),

    /// A byte that does not fit any grammar alternative at the current state.
    #[error("unexpected byte: {0}")]
    Unexpected(&'static str),

    /// A byte was fed to (or requested from) a state machine that already succeeded or failed.
    ///
    /// Machines must be explicitly reset before being reused.
    #[error("machine already finished: {0}")]
    Terminal(&'static str),

    /// The data bound to an encoder violates an invariant of the data model.
    ///
    /// This usually indicates a bug in how the data was constructed rather than bad input.
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}
impl ErrorKind {
    /// Get the informative message on what exact part of the format was not respected.
    #[inline]
    pub fn message(&self) -> &'static str {
        match *self {
            ErrorKind::MalformedVlq(msg) => msg,
            ErrorKind::LengthMismatch(msg) => msg,
            ErrorKind::Unexpected(msg) => msg,
            ErrorKind::Terminal(msg) => msg,
            ErrorKind::InvalidData(msg) => msg,
        }
    }

    /// Whether this is a malformed varlen error.
    #[inline]
    pub fn is_malformed_vlq(&self) -> bool {
        matches!(self, ErrorKind::MalformedVlq(_))
    }

    /// Whether this is a length mismatch error.
    #[inline]
    pub fn is_length_mismatch(&self) -> bool {
        matches!(self, ErrorKind::LengthMismatch(_))
    }

    /// Whether this is an unexpected byte error.
    #[inline]
    pub fn is_unexpected(&self) -> bool {
        matches!(self, ErrorKind::Unexpected(_))
    }

    /// Whether this error comes from reusing a finished state machine.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorKind::Terminal(_))
    }

    /// Whether this error comes from encoding inconsistent data.
    #[inline]
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, ErrorKind::InvalidData(_))
    }
}

macro_rules! err_vlq {
    ($msg:expr) => {
        ErrorKind::MalformedVlq($msg)
    };
}
macro_rules! err_length {
    ($msg:expr) => {
        ErrorKind::LengthMismatch($msg)
    };
}
macro_rules! err_unexpected {
    ($msg:expr) => {
        ErrorKind::Unexpected($msg)
    };
}
macro_rules! err_terminal {
    ($msg:expr) => {
        ErrorKind::Terminal($msg)
    };
}
macro_rules! err_data {
    ($msg:expr) => {
        ErrorKind::InvalidData($msg)
    };
}

pub(crate) trait ResultExt<T> {
    fn context(self, ctx: &'static str) -> StdResult<T, Error>;
}
impl<T> ResultExt<T> for StdResult<T, Error> {
    #[inline]
    fn context(self, ctx: &'static str) -> StdResult<T, Error> {
        self.map_err(|err| err.chain_ctx(ctx))
    }
}
impl<T> ResultExt<T> for StdResult<T, ErrorKind> {
    #[inline]
    fn context(self, ctx: &'static str) -> StdResult<T, Error> {
        self.map_err(|kind| Error::from(kind).chain_ctx(ctx))
    }
}

/// The result type used by the decoders and encoders.
pub type Result<T> = StdResult<T, Error>;
