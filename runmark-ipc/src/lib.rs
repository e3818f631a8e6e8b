#![warn(missing_docs)]
//! Runmark IPC Protocol
//!
//! One-way channel from a re-executed workload process back to the
//! orchestrator. The worker announces itself, runs the workload and reports
//! either completion or the panic that ended it. Frames are rkyv archives
//! behind a 4-byte little-endian length prefix.

mod framing;
mod messages;

pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{FailureKind, WorkerHello, WorkerMessage};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable naming the registered workload a worker must run
pub const WORKLOAD_ENV: &str = "RUNMARK_WORKLOAD";

/// Environment variable carrying the inherited message fd
pub const IPC_FD_ENV: &str = "RUNMARK_IPC_FD";

/// Descriptor number the orchestrator maps the message pipe onto
pub const WORKER_MESSAGE_FD: i32 = 3;
