//! The in-memory form of an SMF file, and convenience drivers for the state machines.

use crate::{
    decode::FileDecoder,
    encode::{apply_running_status, EncodeOptions, FileEncoder},
    event::TrackEvent,
    prelude::*,
    primitive::{Format, Timing},
};

/// A decoded Standard Midi File.
///
/// Chunks are kept in file order, with tracks and unknown chunks interleaved as they appeared.
/// A well-formed `Smf` has exactly `header.ntrks` chunks.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct Smf {
    /// The header chunk.
    pub header: Header,
    /// Every chunk after the header.
    pub chunks: Vec<Chunk>,
}
impl Smf {
    /// Create a file with the given header and no chunks.
    ///
    /// The header track count is cleared, and kept up to date by the `push_*` methods.
    pub fn new(mut header: Header) -> Smf {
        header.ntrks = 0;
        Smf {
            header,
            chunks: Vec::new(),
        }
    }

    /// Append a track chunk, bumping the header track count.
    pub fn push_track(&mut self, track: Track) -> Result<()> {
        self.push_chunk(Chunk::Track(track))
    }

    /// Append an unknown chunk, bumping the header track count.
    pub fn push_unknown(&mut self, chunk: UnknownChunk) -> Result<()> {
        self.push_chunk(Chunk::Unknown(chunk))
    }

    fn push_chunk(&mut self, chunk: Chunk) -> Result<()> {
        self.header.ntrks = self
            .header
            .ntrks
            .checked_add(1)
            .ok_or(err_data!("more than 65535 chunks"))?;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Iterate over the track chunks, skipping unknown chunks.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.chunks.iter().filter_map(|chunk| match chunk {
            Chunk::Track(track) => Some(track),
            Chunk::Unknown(_) => None,
        })
    }

    /// Iterate over the unknown chunks, skipping tracks.
    pub fn unknown_chunks(&self) -> impl Iterator<Item = &UnknownChunk> {
        self.chunks.iter().filter_map(|chunk| match chunk {
            Chunk::Track(_) => None,
            Chunk::Unknown(chunk) => Some(chunk),
        })
    }

    /// Decode a complete file held in memory.
    ///
    /// Fails with a length mismatch if the input ends before the last declared chunk, and with
    /// an unexpected byte error if there are bytes after it.
    pub fn parse(raw: &[u8]) -> Result<Smf> {
        let mut decoder = FileDecoder::new();
        let mut smf = Smf::default();
        for &byte in raw {
            decoder.feed(byte, &mut smf)?;
        }
        check_complete(&decoder)?;
        Ok(smf)
    }

    /// Encode the file into the given writer, with default options.
    pub fn write<W: Write>(&self, out: &mut W) -> IoResult<W> {
        self.write_with(EncodeOptions::default(), out)
    }

    /// Encode the file into the given writer.
    ///
    /// Data that cannot be encoded is reported through `Write::invalid_input`.
    pub fn write_with<W: Write>(&self, options: EncodeOptions, out: &mut W) -> IoResult<W> {
        let invalid = |err: Error| W::invalid_input(err.kind().message());
        let mut encoder = FileEncoder::with_options(options);
        encoder.set_data(self).map_err(invalid)?;
        let mut buf = [0; 1024];
        let mut len = 0;
        loop {
            let (byte, status) = encoder.encode_byte().map_err(invalid)?;
            buf[len] = byte;
            len += 1;
            if status == Status::Success {
                return out.write_all(&buf[..len]);
            }
            if len == buf.len() {
                out.write_all(&buf)?;
                len = 0;
            }
        }
    }

    /// Encode the file into a fresh buffer, with default options.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with(EncodeOptions::default())
    }

    /// Encode the file into a fresh buffer.
    pub fn to_bytes_with(&self, options: EncodeOptions) -> Result<Vec<u8>> {
        let mut encoder = FileEncoder::with_options(options);
        encoder.set_data(self)?;
        let mut out = Vec::new();
        loop {
            let (byte, status) = encoder.encode_byte()?;
            out.push(byte);
            if status == Status::Success {
                return Ok(out);
            }
        }
    }

    /// Encode and write the file to the given path, with default options.
    #[cfg(feature = "std")]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fn save_impl(smf: &Smf, path: &Path) -> io::Result<()> {
            smf.write(&mut crate::io::IoWrap(File::create(path)?))
        }
        save_impl(self, path.as_ref())
    }

    /// Read and decode the file at the given path.
    ///
    /// The file is streamed through the decoder, so it is never held in memory as a whole.
    /// Decoding errors are reported as `io::ErrorKind::InvalidData`.
    #[cfg(feature = "std")]
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Smf> {
        fn load_impl(path: &Path) -> io::Result<Smf> {
            let invalid = |err: Error| io::Error::new(io::ErrorKind::InvalidData, err);
            let reader = io::BufReader::new(File::open(path)?);
            let mut decoder = FileDecoder::new();
            let mut smf = Smf::default();
            for byte in io::Read::bytes(reader) {
                decoder.feed(byte?, &mut smf).map_err(invalid)?;
            }
            check_complete(&decoder).map_err(invalid)?;
            Ok(smf)
        }
        load_impl(path.as_ref())
    }
}

/// Fail if the input ran out before the decoder saw the last declared chunk.
fn check_complete(decoder: &FileDecoder) -> Result<()> {
    ensure!(
        decoder.is_done(),
        Error::from(err_length!("input ends before the last declared chunk"))
            .at(decoder.position())
    );
    Ok(())
}

/// Decode several independent files.
///
/// With the `parallel` feature the files are decoded on the `rayon` thread pool.
/// Results are in the same order as the inputs.
pub fn parse_many(files: &[&[u8]]) -> Vec<Result<Smf>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        files.par_iter().map(|raw| Smf::parse(raw)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        files.iter().map(|raw| Smf::parse(raw)).collect()
    }
}

/// The raw content of an `MThd` chunk.
///
/// Fields are kept raw so that non-standard values survive a round trip; use
/// [`format`](#method.format) and [`timing`](#method.timing) to interpret them.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct Header {
    /// The raw file format, usually 0, 1 or 2.
    pub format: u16,
    /// The amount of chunks following the header.
    pub ntrks: u16,
    /// The raw division field, describing timing.
    pub division: u16,
    /// Header bytes past the standard 6, kept verbatim.
    pub extra: Vec<u8>,
}
impl Header {
    /// Create a header from typed values, with no chunks.
    pub fn new(format: Format, timing: Timing) -> Header {
        Header {
            format: format.as_raw(),
            ntrks: 0,
            division: timing.as_raw(),
            extra: Vec::new(),
        }
    }

    /// The declared length of this header chunk.
    #[inline]
    pub fn chunk_len(&self) -> usize {
        6 + self.extra.len()
    }

    /// Interpret the format field.
    pub fn format(&self) -> Result<Format> {
        Format::from_raw(self.format)
    }

    /// Interpret the division field.
    pub fn timing(&self) -> Result<Timing> {
        Timing::from_raw(self.division)
    }
}

/// A chunk after the header.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum Chunk {
    /// An `MTrk` chunk.
    Track(Track),
    /// A chunk with any other tag.
    Unknown(UnknownChunk),
}
impl Chunk {
    /// The 4-byte tag of this chunk.
    pub fn tag(&self) -> [u8; 4] {
        match self {
            Chunk::Track(_) => crate::primitive::TRACK_TAG,
            Chunk::Unknown(chunk) => chunk.tag,
        }
    }
}

/// An `MTrk` chunk.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct Track {
    /// The length declared in the file when decoded.
    ///
    /// The encoder does not use this field; it always emits the length computed from the events.
    /// See [`refresh_len`](#method.refresh_len).
    pub len: u32,
    /// The events in this track, in order.
    pub events: Vec<TrackEvent>,
}
impl Track {
    /// Create an empty track.
    pub fn new() -> Track {
        Track::default()
    }

    /// Create a track from a list of events, with its length computed under the default options.
    pub fn from_events(events: Vec<TrackEvent>) -> Result<Track> {
        let mut track = Track { len: 0, events };
        track.refresh_len()?;
        Ok(track)
    }

    /// Amount of bytes the events take up when encoded with the given options.
    ///
    /// Fails if any event cannot be encoded, or if the result does not fit in a chunk.
    pub fn encoded_len(&self, options: EncodeOptions) -> Result<u32> {
        let mut running_status = None;
        let mut len: u64 = 0;
        for event in self.events.iter() {
            event.check()?;
            let skip = apply_running_status(&event.bytes, &mut running_status, options);
            len += event.encoded_len(skip) as u64;
        }
        u32::try_from(len).map_err(|_| err_data!("track chunk longer than 4GB").into())
    }

    /// Recompute `len` from the events, using the default options.
    pub fn refresh_len(&mut self) -> Result<()> {
        self.len = self.encoded_len(EncodeOptions::default())?;
        Ok(())
    }
}

/// A chunk with an unrecognized tag, kept verbatim.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct UnknownChunk {
    /// The 4-byte chunk tag.
    pub tag: [u8; 4],
    /// The chunk body.
    pub data: Vec<u8>,
}
impl UnknownChunk {
    /// Create an empty chunk with the given tag.
    pub fn new(tag: [u8; 4]) -> UnknownChunk {
        UnknownChunk {
            tag,
            data: Vec::new(),
        }
    }
}
