//! Module dedicated to command errors.

use std::io;

use thiserror::Error;

/// The global `Result` alias of the library.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot spawn command {1}")]
    SpawnCommandError(#[source] io::Error, String),
    #[error("cannot get standard input of command {0}")]
    GetStdinError(String),
    #[error("cannot pipe input into command {1}")]
    WriteStdinError(#[source] io::Error, String),
    #[error("cannot wait for command {1} to exit")]
    WaitForExitError(#[source] io::Error, String),
    #[error("command {0} was terminated by a signal")]
    TerminatedBySignalError(String),
    #[error("command {0} exited with status {1}: {2}")]
    NonZeroExitStatusError(String, i32, String),
}
