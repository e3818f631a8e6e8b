//! Length-Prefixed Frame Encoding
//!
//! Message boundaries over a pipe.
//!
//! ```text
//! +----------------+------------------+
//! | length (4 LE)  | rkyv payload     |
//! +----------------+------------------+
//! ```

use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{self, BufReader, Read, Write};
use thiserror::Error;

/// Largest accepted frame (1 MB). Worker messages are tiny; only a captured
/// backtrace gets anywhere near this.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    /// Underlying pipe failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message could not be archived
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload failed validation
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Length prefix exceeds [`MAX_FRAME_SIZE`]
    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Announced payload length
        size: usize,
        /// Largest accepted payload
        max: usize,
    },

    /// Malformed frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Writer closed the pipe
    #[error("End of stream")]
    EndOfStream,
}

/// Serialize `message` and write it as one frame, then flush.
pub fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let payload =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    // One write per frame so a reader never sees a prefix without its body
    // unless the writer died mid-frame.
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    writer.write_all(&frame)?;
    writer.flush()?;

    Ok(())
}

/// Read and validate one frame.
///
/// A clean EOF before the length prefix is `EndOfStream`; EOF inside a frame
/// is an I/O error (the peer died mid-write).
pub fn read_frame<R, T>(reader: &mut R) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::EndOfStream),
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = rkyv::AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    reader.read_exact(&mut buf)?;

    let archived = rkyv::check_archived_root::<T>(&buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    archived
        .deserialize(&mut Infallible)
        .map_err(|_| FrameError::Deserialization("infallible deserializer failed".to_string()))
}

/// Sending half, owned by the worker process
pub struct FrameWriter<W: Write> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a byte sink
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send one message
    pub fn send<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.inner, message)
    }

    /// Consume and return the sink
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Receiving half, owned by the orchestrator
pub struct FrameReader<R: Read> {
    inner: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wrap a byte source
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Receive one message
    pub fn recv<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.inner)
    }

    /// Receive until the peer closes its end. Returns every message read and
    /// the error that ended the stream, if it was anything but a clean EOF.
    pub fn drain<T>(&mut self) -> (Vec<T>, Option<FrameError>)
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        let mut messages = Vec::new();
        loop {
            match self.recv::<T>() {
                Ok(message) => messages.push(message),
                Err(FrameError::EndOfStream) => return (messages, None),
                Err(e) => return (messages, Some(e)),
            }
        }
    }
}
