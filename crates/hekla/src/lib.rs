//! hekla: core engine for the Hekla binary analysis workbench.
//!
//! Provides the byte-level substrate the pattern language runtime is built
//! on: random-access data sources, the typed pattern tree overlayed on those
//! bytes, and the worker pool that drives long-running evaluation jobs.

pub mod endian;
pub mod pattern;
pub mod source;
pub mod task;

pub use endian::Endian;
pub use pattern::{
    BitfieldField, DecodedValue, Pattern, PatternArena, PatternId, PatternKind, Visibility,
};
pub use source::{DataSource, FileSource, MemorySource};
pub use task::{InterruptFlag, Task, TaskError, TaskHandle, TaskManager};

/// Errors produced by the core engine layer.
#[derive(Debug)]
pub enum Error {
    /// A read or write touched bytes past the end of the data source.
    OutOfBounds { offset: u64, len: u64, size: u64 },
    /// A write was attempted on a read-only data source.
    ReadOnly,
    /// Underlying I/O failure of a file-backed source.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::OutOfBounds { offset, len, size } => write!(
                f,
                "out of bounds: {len} bytes at offset {offset:#x} exceed source size {size:#x}"
            ),
            Error::ReadOnly => f.write_str("data source is read-only"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
