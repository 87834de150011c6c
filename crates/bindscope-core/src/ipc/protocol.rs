//! IPC protocol messages for bindscope worker processes.
//!
//! Uses length-prefixed rkyv messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + rkyv-encoded message.
//!
//! The worker answers every session with a handshake ([`WorkerResponse::Ready`]
//! or [`WorkerResponse::LaunchError`]) before it reads any command, then
//! writes exactly one [`WorkerResponse::Result`] per [`WorkerCommand::Run`],
//! in the order the commands arrived.

use std::io::{ErrorKind, Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::BindingCodeLocation;
use crate::problem::CodeProblem;

/// Largest frame either side accepts (100MB).
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Snippet resolving every binding of one module context.
pub const MODULE_CONTEXT_SNIPPET: &str = "bindscope.snippets.ModuleContextSnippet";
/// Snippet checking that a single module can be instantiated.
pub const MODULE_SNIPPET: &str = "bindscope.snippets.ModuleSnippet";
/// Diagnostic snippet returning its arguments.
pub const ECHO_SNIPPET: &str = "bindscope.diagnostics.Echo";
/// Diagnostic snippet sleeping for `args[0]` milliseconds before echoing the rest.
pub const SLEEP_SNIPPET: &str = "bindscope.diagnostics.Sleep";
/// Diagnostic snippet terminating the worker with exit code `args[0]`.
pub const EXIT_SNIPPET: &str = "bindscope.diagnostics.Exit";
/// Diagnostic snippet that panics with `args[0]`.
pub const PANIC_SNIPPET: &str = "bindscope.diagnostics.Panic";

/// Command sent from parent to worker process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Execute one snippet.
    Run {
        /// Fully-qualified snippet name.
        snippet: String,
        /// Positional arguments.
        arguments: Vec<String>,
    },

    /// Shutdown the worker process gracefully.
    Shutdown,
}

/// Response sent from worker to parent process.
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// Worker started and its classpath is usable.
    Ready,

    /// Worker could not set itself up (e.g. a classpath entry is missing).
    LaunchError {
        /// Error message.
        message: String,
    },

    /// Outcome of one `Run` command.
    Result(SnippetOutcome),
}

/// What a snippet produced.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum SnippetOutcome {
    Success(SnippetPayload),
    Failure(Vec<CodeProblem>),
}

/// Structured result object of a snippet.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum SnippetPayload {
    ModuleContext(ContextSnippetResult),
    Module(ModuleSnippetResult),
    /// Free-form lines, used by the diagnostics snippets.
    Text(Vec<String>),
}

/// Bindings reported for one module context.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ContextSnippetResult {
    /// Context name, echoed back for correlation checks.
    pub name: String,
    pub bindings: Vec<BindingCodeLocation>,
    /// Context-level problems (module instantiation). Non-empty means the
    /// context could not be resolved.
    pub problems: Vec<CodeProblem>,
}

/// Validation result for a single module.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ModuleSnippetResult {
    pub name: String,
    pub problems: Vec<CodeProblem>,
}

impl ModuleSnippetResult {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// One raw frame read from a stream.
#[derive(Debug)]
pub enum Frame {
    /// A complete message body.
    Message(Vec<u8>),
    /// The stream ended cleanly on a frame boundary.
    Eof,
    /// The stream ended inside a frame.
    Truncated { expected: usize, received: usize },
}

/// Write a message to a writer using length-prefixed rkyv encoding.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> Result<()> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode IPC message: {}", e)))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read until `buf` is full or the stream ends. Returns the number of bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one raw frame, distinguishing a clean end of stream from truncation.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame> {
    let mut len_bytes = [0u8; 4];
    let got = read_fully(reader, &mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    if got == 0 {
        return Ok(Frame::Eof);
    }
    if got < len_bytes.len() {
        return Ok(Frame::Truncated {
            expected: len_bytes.len(),
            received: got,
        });
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = vec![0u8; len];
    let got = read_fully(reader, &mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;
    if got < len {
        return Ok(Frame::Truncated {
            expected: len,
            received: got,
        });
    }

    Ok(Frame::Message(bytes))
}

/// Decode a frame body.
///
/// Frames are validated before use: a worker that dies mid-write can leave
/// arbitrary bytes on stdout, and those must decode to an error.
pub fn decode_message<T>(bytes: &[u8]) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    // rkyv needs an aligned buffer; frame bodies come from a Vec<u8>.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    rkyv::from_bytes::<T, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Deserialization(format!("Failed to decode IPC message: {}", e)))
}

/// Read a message from a reader using length-prefixed rkyv encoding.
///
/// A clean end of stream and a truncated frame are both errors here; use
/// [`read_frame`] to tell them apart.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    match read_frame(reader)? {
        Frame::Message(bytes) => decode_message(&bytes),
        Frame::Eof => Err(Error::Ipc("IPC stream closed".to_string())),
        Frame::Truncated { expected, received } => Err(Error::Ipc(format!(
            "IPC stream truncated: expected {} bytes, received {}",
            expected, received
        ))),
    }
}
