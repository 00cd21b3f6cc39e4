//! Rust library to send the emails of the license server.
//!
//! The main purpose of this library is to deliver one message at a
//! time through an SMTP server, speaking the SMTP dialogue directly
//! over a blocking socket, and to fall back to the host local mail
//! submission when the server cannot be used.
//!
//! This goal is achieved by exposing a [`Mailer`] struct, built from
//! a [`SettingsProvider`] which hands over a fresh [`SmtpConfig`] at
//! every send. The mailer supports:
//!
//! - plain, `STARTTLS` and implicit TLS connections, see
//! [`Security`]
//! - `AUTH LOGIN` authentication
//! - a single fallback attempt through `sendmail`, see
//! [`FallbackRelay`]
//! - a step-by-step transcript of the dialogue, for the operator
//! "test connection" action, see [`Mailer::send_with_transcript`]
//!
//! See examples in the /tests folder.

pub mod auth;
pub mod command;
pub mod config;
pub mod dialogue;
pub mod envelope;
pub mod error;
pub mod mailer;
pub mod message;
pub mod sendmail;
pub mod stream;
pub mod tls;
pub mod transcript;

#[doc(inline)]
pub use crate::{
    config::{Security, SettingsProvider, SmtpConfig},
    envelope::Envelope,
    error::{AnyBoxedError, AnyResult, Error, ErrorKind, Result},
    mailer::{Mailer, SendReport, SendResult},
    sendmail::{FallbackRelay, Sendmail, Submission},
    tls::{Rustls, TlsHandshake},
    transcript::{Direction, Observer, Outcome, Step, Transcript},
};
