//! Module dedicated to message composition.
//!
//! The composer produces a single-part message, either plain text or
//! HTML, sent as is after `DATA`.
//!
//! Body lines starting with a dot are not escaped: a body containing
//! a lone `.` line ends the `DATA` section early on the server side.
//! Bodies generated by the license system never contain such lines.

use chrono::{DateTime, FixedOffset, Local};
use uuid::Uuid;

use crate::{Envelope, SmtpConfig};

/// The `DATA` terminator, CRLF excluded.
const TERMINATOR: &str = ".";

/// Replaces line breaks in header values, so that a value cannot
/// inject extra headers.
pub fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// The message composed for the SMTP path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message<'a> {
    config: &'a SmtpConfig,
    envelope: &'a Envelope,
    date: DateTime<FixedOffset>,
    message_id: String,
}

impl<'a> Message<'a> {
    /// Composes a message dated now, with a fresh `Message-ID` on the
    /// given domain.
    pub fn new(config: &'a SmtpConfig, envelope: &'a Envelope, domain: &str) -> Self {
        let id = Uuid::new_v4().simple();

        Self {
            config,
            envelope,
            date: Local::now().fixed_offset(),
            message_id: format!("<{id}@{domain}>"),
        }
    }

    pub fn with_date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = date;
        self
    }

    pub fn with_message_id(mut self, message_id: impl ToString) -> Self {
        self.message_id = message_id.to_string();
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Returns the header block, CRLF-separated, without trailing
    /// CRLF.
    pub fn headers(&self) -> String {
        let config = self.config;
        let envelope = self.envelope;

        [
            format!("From: {}", header_value(&config.from_header())),
            format!("To: {}", header_value(&envelope.to)),
            format!("Subject: {}", header_value(&envelope.subject)),
            format!("Date: {}", self.date.to_rfc2822()),
            format!("Message-ID: {}", self.message_id),
            format!("X-Mailer: {}", header_value(&config.mailer_name)),
            String::from("MIME-Version: 1.0"),
            format!("Content-Type: {}", envelope.content_type()),
            String::from("Content-Transfer-Encoding: 8bit"),
        ]
        .join("\r\n")
    }

    /// Returns the `DATA` payload: headers, blank line, body and the
    /// terminating dot.
    ///
    /// The final CRLF is left to the command writer.
    pub fn payload(&self) -> String {
        format!(
            "{}\r\n\r\n{}\r\n{TERMINATOR}",
            self.headers(),
            self.envelope.body
        )
    }
}

/// Returns the reduced header block handed to the fallback relay.
///
/// Recipient and subject are left out: the relay sets them itself.
pub fn fallback_headers(config: &SmtpConfig, envelope: &Envelope) -> String {
    [
        format!("From: {}", header_value(&config.from_header())),
        format!("Reply-To: {}", header_value(&config.from_email)),
        format!("X-Mailer: {}", header_value(&config.mailer_name)),
        String::from("MIME-Version: 1.0"),
        format!("Content-Type: {}", envelope.content_type()),
    ]
    .join("\r\n")
}
