//! Module dedicated to the fallback relay.
//!
//! When the SMTP path is disabled or fails, the message is handed
//! once to the host local mail submission, `sendmail` by default.

use process::Command;
use thiserror::Error;
use tracing::info;

use crate::{
    message::{self, header_value},
    AnyResult, Envelope, SmtpConfig,
};

/// The default local mail submission command.
///
/// Recipients are read from the message headers (`-t`), a lone dot
/// line does not end the input (`-i`).
pub const SENDMAIL_DEFAULT_COMMAND: &str = "sendmail -t -i";

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot run sendmail command")]
    RunSendmailCommandError(#[source] process::Error),
}

/// The message handed to the fallback relay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Submission<'a> {
    pub to: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    /// The reduced header block, see [`message::fallback_headers`].
    pub headers: String,
}

impl<'a> Submission<'a> {
    pub fn new(config: &SmtpConfig, envelope: &'a Envelope) -> Self {
        Self {
            to: &envelope.to,
            subject: &envelope.subject,
            body: &envelope.body,
            headers: message::fallback_headers(config, envelope),
        }
    }

    /// Renders the full message, recipient and subject first.
    pub fn to_message(&self) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\n{}\r\n\r\n{}",
            header_value(self.to),
            header_value(self.subject),
            self.headers,
            self.body,
        )
    }
}

/// The fallback relay.
pub trait FallbackRelay {
    /// Submits the message, once.
    fn submit(&self, submission: &Submission<'_>) -> AnyResult<()>;
}

/// The sendmail-backed fallback relay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sendmail {
    cmd: Command,
}

impl Sendmail {
    pub fn new(cmd: impl Into<Command>) -> Self {
        Self { cmd: cmd.into() }
    }

    pub fn cmd(&self) -> &Command {
        &self.cmd
    }
}

impl Default for Sendmail {
    fn default() -> Self {
        Self::new(SENDMAIL_DEFAULT_COMMAND)
    }
}

impl FallbackRelay for Sendmail {
    fn submit(&self, submission: &Submission<'_>) -> AnyResult<()> {
        info!(cmd = %self.cmd, "submitting message to local mail submission");

        self.cmd
            .run_with(submission.to_message())
            .map_err(Error::RunSendmailCommandError)?;

        Ok(())
    }
}
