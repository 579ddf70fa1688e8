//! Command failure classification.
//!
//! Buffers and wrappers speak [`std::io::Error`]. A command that failed
//! carries an [`Error`] inside the `io::Error`, and misuse of a wrapper
//! carries a [`UsageError`]. Use [`find`] to recover either one from any
//! error chain, including aggregated pipeline failures.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::copy::{CopyError, EdgeFailure};

/// Boxed cause stored inside an [`Error`].
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// A command execution failure.
///
/// A failure with a cause and a zero `code` means the command never
/// started (see [`not_found`]). A non-zero `code` means it ran and exited
/// unsuccessfully; the cause may then be absent.
///
/// Commands attached to the terminal through [`crate::exec`] have an empty
/// `log`, since their diagnostics go straight to the terminal.
#[derive(Debug, Default)]
pub struct Error {
    /// Captured diagnostic output. This usually corresponds to stderr.
    pub log: Vec<u8>,

    /// The underlying error.
    pub source: Option<Cause>,

    /// The exit code. A value of 0 does not indicate success.
    pub code: i32,
}

impl Error {
    /// A failure with only an exit code.
    pub fn exit(code: i32) -> Self {
        Error {
            code,
            ..Default::default()
        }
    }

    /// A failure with an underlying cause and a zero exit code.
    pub fn new(source: impl Into<Cause>) -> Self {
        Error {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// The not-found failure returned for an unknown command name.
    pub fn command_not_found(name: &str) -> Self {
        Error::new(format!("command not found: {}", name))
    }

    /// Set the exit code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    /// Set the captured diagnostics.
    pub fn with_log(mut self, log: impl Into<Vec<u8>>) -> Self {
        self.log = log.into();
        self
    }

    /// Whether this failure means the command never started.
    pub fn is_not_found(&self) -> bool {
        self.source.is_some() && self.code == 0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}", source)?,
            None => write!(f, "exit status {}", self.code)?,
        }
        if !self.log.is_empty() {
            let log = String::from_utf8_lossy(&self.log);
            let log = log.strip_suffix('\n').unwrap_or(&log);
            write!(f, "\n\t{}", log.replace('\n', "\n\t"))?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = if err.is_not_found() {
            io::ErrorKind::NotFound
        } else {
            io::ErrorKind::Other
        };
        io::Error::new(kind, err)
    }
}

/// Misuse of a lifecycle wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UsageError {
    /// Read or write after the wrapper was closed.
    #[error("command: use of closed buffer")]
    Closed,

    /// Write to a command that does not accept input.
    #[error("command: write to read-only buffer")]
    ReadOnly,
}

impl From<UsageError> for io::Error {
    fn from(err: UsageError) -> Self {
        let kind = match err {
            UsageError::Closed => io::ErrorKind::Other,
            UsageError::ReadOnly => io::ErrorKind::Unsupported,
        };
        io::Error::new(kind, err)
    }
}

/// Find the first error of type `E` in `err`'s chain.
///
/// The search descends into `io::Error` payloads, into every edge of a
/// [`CopyError`], and through `source()` links.
pub fn find<'a, E>(err: &'a (dyn StdError + 'static)) -> Option<&'a E>
where
    E: StdError + 'static,
{
    if let Some(found) = err.downcast_ref::<E>() {
        return Some(found);
    }
    if let Some(io_err) = err.downcast_ref::<io::Error>() {
        // io::Error::source skips the payload itself.
        return io_err.get_ref().and_then(|inner| find::<E>(inner));
    }
    if let Some(copy_err) = err.downcast_ref::<CopyError>() {
        return copy_err.failures().find_map(|f| find::<E>(f));
    }
    if let Some(failure) = err.downcast_ref::<EdgeFailure>() {
        return failure.errors().find_map(|e| find::<E>(e));
    }
    err.source().and_then(find::<E>)
}

/// Whether `err` represents a command that failed to start, typically
/// because the command was not found.
///
/// `false` when no [`Error`] exists in the chain.
pub fn not_found(err: &(dyn StdError + 'static)) -> bool {
    find::<Error>(err).is_some_and(Error::is_not_found)
}

/// Whether `err` is a read or write against a closed wrapper.
pub fn is_closed(err: &(dyn StdError + 'static)) -> bool {
    find::<UsageError>(err) == Some(&UsageError::Closed)
}

/// Whether `err` is a write against a command that accepts no input.
pub fn is_read_only(err: &(dyn StdError + 'static)) -> bool {
    find::<UsageError>(err) == Some(&UsageError::ReadOnly)
}

/// Attach captured diagnostics to the classified error inside `err`.
///
/// Errors that do not carry an [`Error`] payload are returned unchanged.
pub(crate) fn attach_log(err: io::Error, log: Vec<u8>) -> io::Error {
    if log.is_empty() || !matches!(err.get_ref(), Some(inner) if inner.is::<Error>()) {
        return err;
    }
    let kind = err.kind();
    match err.into_inner().map(|inner| inner.downcast::<Error>()) {
        Some(Ok(mut classified)) => {
            classified.log = log;
            io::Error::new(kind, *classified)
        }
        Some(Err(other)) => io::Error::new(kind, other),
        None => io::Error::from(kind),
    }
}
