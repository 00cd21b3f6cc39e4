//! Module dedicated to the message envelope.

use chrono::Local;

use crate::SmtpConfig;

/// The message to deliver.
///
/// The sender comes from the [`SmtpConfig`], the envelope only holds
/// what changes from one message to another.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Envelope {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub is_html: bool,
}

impl Envelope {
    pub fn new(to: impl ToString, subject: impl ToString, body: impl ToString) -> Self {
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            is_html: false,
        }
    }

    pub fn with_html(mut self, is_html: bool) -> Self {
        self.is_html = is_html;
        self
    }

    /// Builds the message sent by the operator "test connection"
    /// action: a summary of the configuration in use, password
    /// excluded, and the time of the test.
    pub fn connection_test(config: &SmtpConfig, to: impl ToString) -> Self {
        let subject = format!("SMTP Test - {}", config.mailer_name);

        let body = format!(
            "This is a test email to check that the SMTP configuration works.\n\
             \n\
             Configuration:\n\
             - SMTP Host: {host}\n\
             - SMTP Port: {port}\n\
             - SMTP Security: {security}\n\
             - SMTP Username: {username}\n\
             - From: {from}\n\
             - Timestamp: {date}\n",
            host = config.host,
            port = config.port,
            security = config.security,
            username = config.username,
            from = config.from_header(),
            date = Local::now().format("%Y-%m-%d %H:%M:%S"),
        );

        Self::new(to, subject, body)
    }

    pub fn content_type(&self) -> &'static str {
        if self.is_html {
            "text/html; charset=UTF-8"
        } else {
            "text/plain; charset=UTF-8"
        }
    }
}
