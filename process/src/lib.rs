//! Cross-platform, blocking library to feed shell commands.
//!
//! A [`Command`] is a shell command line, run through `sh -c` or
//! `cmd /C`. It receives its whole input on the standard input
//! channel, which is then closed, and succeeds only when the command
//! exits with a zero status. This is how a message is handed over to
//! a local `sendmail` binary.

mod command;
mod error;

#[doc(inline)]
pub use crate::{
    command::Command,
    error::{Error, Result},
};
