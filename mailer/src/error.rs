use std::{error, io, result};

use thiserror::Error;

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global any boxed `Error` alias of the library.
///
/// Used at the seams where the error type is chosen by the caller:
/// settings providers and fallback relays.
pub type AnyBoxedError = Box<dyn error::Error + Send + Sync + 'static>;

/// The global any `Result` alias of the library.
pub type AnyResult<T> = result::Result<T, AnyBoxedError>;

/// The global `Error` enum of the library.
///
/// Every failure of the SMTP dialogue ends up here. Apart from
/// configuration errors, none of them reaches the caller of
/// [`Mailer`](crate::Mailer): they are turned into a fallback
/// attempt and only survive as transcript or log detail.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid smtp configuration: {0}")]
    ConfigurationError(String),
    #[error("cannot get smtp configuration")]
    GetConfigurationError(#[source] AnyBoxedError),

    #[error("cannot resolve smtp server address {1}:{2}")]
    ResolveAddressError(#[source] io::Error, String, u16),
    #[error("cannot connect to smtp server {1}:{2}")]
    ConnectError(#[source] io::Error, String, u16),
    #[error("cannot configure smtp socket timeouts")]
    SetTimeoutError(#[source] io::Error),
    #[error("cannot write smtp command")]
    WriteCommandError(#[source] io::Error),
    #[error("cannot read smtp reply")]
    ReadReplyError(#[source] io::Error),

    #[error("expected smtp reply code {expected}, got {actual}: {raw}")]
    ProtocolError {
        expected: String,
        actual: String,
        raw: String,
    },

    #[error("cannot negotiate tls with {1}")]
    TlsNegotiationError(#[source] io::Error, String),
    #[error("cannot upgrade to tls: server sent {0} bytes ahead of the handshake")]
    TlsBufferedDataError(usize),

    #[error("cannot authenticate as {1}")]
    AuthenticationError(#[source] Box<Error>, String),
}

/// The error taxonomy of a send.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The configuration cannot be used. Raised before any socket is
    /// opened, never followed by a fallback.
    Configuration,
    /// The socket cannot be opened, read from or written to.
    Connection,
    /// The server replied with an unexpected code.
    Protocol,
    /// The TLS session cannot be established.
    TlsNegotiation,
    /// The server rejected the credentials.
    Authentication,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationError(_) | Self::GetConfigurationError(_) => {
                ErrorKind::Configuration
            }
            Self::ResolveAddressError(..)
            | Self::ConnectError(..)
            | Self::SetTimeoutError(_)
            | Self::WriteCommandError(_)
            | Self::ReadReplyError(_) => ErrorKind::Connection,
            Self::ProtocolError { .. } => ErrorKind::Protocol,
            Self::TlsNegotiationError(..) | Self::TlsBufferedDataError(_) => {
                ErrorKind::TlsNegotiation
            }
            Self::AuthenticationError(..) => ErrorKind::Authentication,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

/// Renders an error followed by its whole chain of sources.
pub fn report(err: &(dyn error::Error + 'static)) -> String {
    let mut report = err.to_string();
    let mut source = err.source();

    while let Some(err) = source {
        report.push_str(": ");
        report.push_str(&err.to_string());
        source = err.source();
    }

    report
}
