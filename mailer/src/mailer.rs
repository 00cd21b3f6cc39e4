//! Module dedicated to the mailer.
//!
//! The [`Mailer`] is the only entry point of the engine. It reads a
//! fresh configuration, runs the SMTP dialogue on a connection of its
//! own, then falls back once to the [`FallbackRelay`] when the
//! dialogue cannot complete.

use tracing::{debug, info, instrument, warn};

use crate::{
    auth,
    dialogue::{Dialogue, State},
    error::report,
    message::{header_value, Message},
    sendmail::{FallbackRelay, Sendmail, Submission},
    stream::Connection,
    tls::{self, Rustls, TlsHandshake},
    transcript::{LogEntry, Observer, Silent, Step, Transcript},
    Envelope, Error, Result, Security, SettingsProvider, SmtpConfig,
};

/// The result of one send.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize),
    serde(into = "SendReport")
)]
pub struct SendResult {
    pub success: bool,
    /// The error that made the SMTP path fail, or the fallback error
    /// if the fallback failed too.
    pub error: Option<String>,
    /// The recorded steps, diagnostic path only.
    pub transcript: Option<Vec<Step>>,
}

impl SendResult {
    fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            transcript: None,
        }
    }

    /// Returns the JSON view of the result.
    pub fn report(&self) -> SendReport {
        SendReport::from(self.clone())
    }
}

/// The JSON view of a [`SendResult`], as consumed by the admin UI.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct SendReport {
    pub success: bool,
    #[cfg_attr(
        feature = "derive",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub error: Option<String>,
    pub log: Vec<LogEntry>,
}

impl From<SendResult> for SendReport {
    fn from(result: SendResult) -> Self {
        Self {
            success: result.success,
            error: result.error,
            log: result
                .transcript
                .unwrap_or_default()
                .iter()
                .map(LogEntry::from)
                .collect(),
        }
    }
}

/// The mailer.
///
/// Holds no per-send state: every send reads its own configuration
/// and owns its own connection, so one mailer can be shared between
/// threads.
#[derive(Clone, Debug)]
pub struct Mailer<P, R = Sendmail, H = Rustls> {
    settings: P,
    fallback: R,
    tls: H,
}

impl<P: SettingsProvider> Mailer<P> {
    pub fn new(settings: P) -> Self {
        Self {
            settings,
            fallback: Sendmail::default(),
            tls: Rustls::default(),
        }
    }
}

impl<P, R, H> Mailer<P, R, H> {
    /// Replaces the fallback relay.
    pub fn with_fallback<F>(self, fallback: F) -> Mailer<P, F, H> {
        Mailer {
            settings: self.settings,
            fallback,
            tls: self.tls,
        }
    }

    /// Replaces the TLS handshake.
    pub fn with_tls<T>(self, tls: T) -> Mailer<P, R, T> {
        Mailer {
            settings: self.settings,
            fallback: self.fallback,
            tls,
        }
    }
}

impl<P, R, H> Mailer<P, R, H>
where
    P: SettingsProvider,
    R: FallbackRelay,
    H: TlsHandshake,
{
    /// Sends the given message.
    ///
    /// Returns `true` if either the SMTP path or the fallback relay
    /// accepted the message.
    pub fn send(&self, envelope: &Envelope) -> bool {
        self.deliver(envelope, &mut Silent).success
    }

    /// Sends the given message, recording every step.
    ///
    /// Used by the operator "test connection" action.
    pub fn send_with_transcript(&self, envelope: &Envelope) -> SendResult {
        let mut transcript = Transcript::default();
        let mut result = self.deliver(envelope, &mut transcript);
        result.transcript = Some(transcript.into_steps());
        result
    }

    #[instrument(skip_all, fields(to = envelope.to))]
    fn deliver(&self, envelope: &Envelope, observer: &mut dyn Observer) -> SendResult {
        observer.clear();
        observer.info("Starting SMTP connection test...");
        observer.info(&format!("Target: {}", envelope.to));
        observer.info(&format!("Subject: {}", envelope.subject));

        let config = match self.settings.smtp_config() {
            Ok(config) => config,
            Err(err) => return fail_fast(Error::GetConfigurationError(err), observer),
        };

        if !config.enabled {
            info!("smtp disabled, using local mail submission");
            observer.warning("SMTP is disabled, falling back to local mail submission");
            return self.fall_back(&config, envelope, observer, None);
        }

        if let Err(err) = config.validate() {
            return fail_fast(err, observer);
        }

        match self.run(&config, envelope, observer) {
            Ok(()) => {
                info!("message sent using smtp");
                SendResult::success()
            }
            Err(err) => {
                let err = report(&err);
                warn!("cannot send message using smtp: {err}");
                observer.error(&format!("Error: {err}"));
                observer.warning("Falling back to local mail submission...");
                self.fall_back(&config, envelope, observer, Some(err))
            }
        }
    }

    fn run(
        &self,
        config: &SmtpConfig,
        envelope: &Envelope,
        observer: &mut dyn Observer,
    ) -> Result<()> {
        observer.info(&format!(
            "Connecting to SMTP server: {}:{}",
            config.host, config.port
        ));

        if config.security == Security::Ssl {
            observer.info("Using SSL connection");
        }

        let conn = Connection::open(config, &self.tls)?;
        observer.success("Connected to SMTP server");

        let mut dialogue = Dialogue::new(conn, observer);
        let result = self.converse(&mut dialogue, config, envelope);

        if result.is_err() {
            debug!(state = %dialogue.state(), "smtp dialogue interrupted");
            dialogue.set_state(State::Failed);
        }

        dialogue.close();
        result
    }

    fn converse(
        &self,
        dialogue: &mut Dialogue<'_>,
        config: &SmtpConfig,
        envelope: &Envelope,
    ) -> Result<()> {
        let hello = config.hello_name();

        dialogue.greeting()?;
        dialogue.command("EHLO handshake", &format!("EHLO {hello}"), "250")?;
        dialogue.set_state(State::Greeted);

        tls::negotiate(dialogue, config.security, &self.tls, &hello)?;

        if config.has_credentials() {
            auth::authenticate(dialogue, &config.username, &config.password)?;
        }

        dialogue.set_state(State::Sending);
        dialogue.info(&format!("Sending email from: {}", config.from_email));
        dialogue.command(
            "MAIL FROM command",
            &format!("MAIL FROM:<{}>", header_value(&config.from_email)),
            "250",
        )?;
        dialogue.command(
            "RCPT TO command",
            &format!("RCPT TO:<{}>", header_value(&envelope.to)),
            "250",
        )?;
        dialogue.command("DATA command", "DATA", "354")?;

        let message = Message::new(config, envelope, &hello);
        dialogue.info("Sending message content...");
        dialogue.command("Message content", &message.payload(), "250")?;
        dialogue.success("Message sent successfully");

        dialogue.command("QUIT command", "QUIT", "221")?;
        dialogue.set_state(State::Completed);
        dialogue.success("Connection closed cleanly");

        Ok(())
    }

    /// Hands the message to the fallback relay, once.
    ///
    /// The relay result is the result of the send. The SMTP error, if
    /// any, is kept when the relay succeeds.
    fn fall_back(
        &self,
        config: &SmtpConfig,
        envelope: &Envelope,
        observer: &mut dyn Observer,
        smtp_err: Option<String>,
    ) -> SendResult {
        let submission = Submission::new(config, envelope);

        match self.fallback.submit(&submission) {
            Ok(()) => {
                info!("message sent using local mail submission");
                observer.success("Local mail submission successful");
                SendResult {
                    success: true,
                    error: smtp_err,
                    transcript: None,
                }
            }
            Err(err) => {
                let err = format!("cannot submit message locally: {}", report(err.as_ref()));
                warn!("{err}");
                observer.error(&err);
                SendResult::failure(err)
            }
        }
    }
}

fn fail_fast(err: Error, observer: &mut dyn Observer) -> SendResult {
    let err = report(&err);
    warn!("invalid smtp configuration: {err}");
    observer.error(&format!("Error: {err}"));
    SendResult::failure(err)
}
