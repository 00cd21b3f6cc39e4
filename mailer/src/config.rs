//! Module dedicated to the SMTP configuration.
//!
//! The configuration is owned by an external settings collaborator
//! and handed to the mailer through a [`SettingsProvider`], read
//! fresh at the start of every send.

use std::{fmt, time::Duration};

use tracing::debug;

use crate::{AnyResult, Error, Result};

/// The default connect timeout, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// The default read and write timeout, in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// The default product identifier sent in the `X-Mailer` header.
pub const DEFAULT_MAILER_NAME: &str = "InnoDIGI License System";

/// The SMTP connection security mode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Security {
    /// Plain connection, never encrypted.
    #[default]
    None,
    /// Explicit TLS: plain connection upgraded with `STARTTLS` after
    /// the first `EHLO`.
    #[cfg_attr(feature = "derive", serde(alias = "starttls"))]
    Tls,
    /// Implicit TLS: the socket is wrapped in TLS at connect time.
    Ssl,
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Tls => write!(f, "tls"),
            Self::Ssl => write!(f, "ssl"),
        }
    }
}

/// The SMTP configuration.
#[derive(Clone, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SmtpConfig {
    /// Sends through the SMTP server when `true`, through the local
    /// mail submission command otherwise.
    pub enabled: bool,

    /// The SMTP server host name.
    pub host: String,

    /// The SMTP server port.
    pub port: u16,

    /// The connection security mode.
    pub security: Security,

    /// The SMTP login. Authentication is attempted only when both
    /// the username and the password are non-empty.
    pub username: String,

    /// The SMTP password.
    pub password: String,

    /// The envelope sender, also used in the `From` header.
    pub from_email: String,

    /// The display name of the `From` header.
    pub from_name: String,

    /// The name announced in `EHLO` and used as `Message-ID` domain.
    ///
    /// Defaults to the local host name.
    pub hello_name: Option<String>,

    /// The connect timeout, in seconds. Zero means the default.
    pub connect_timeout_secs: u64,

    /// The timeout applied to every socket read and write, in
    /// seconds. Zero means the default.
    pub read_timeout_secs: u64,

    /// The product identifier sent in the `X-Mailer` header.
    pub mailer_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            port: 587,
            security: Security::default(),
            username: String::new(),
            password: String::new(),
            from_email: String::new(),
            from_name: String::new(),
            hello_name: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            mailer_name: DEFAULT_MAILER_NAME.to_owned(),
        }
    }
}

impl SmtpConfig {
    const REDACTED: &'static str = "••••••••";

    /// Parses the JSON settings document.
    #[cfg(feature = "derive")]
    pub fn from_json(json: impl AsRef<str>) -> Result<Self> {
        serde_json::from_str(json.as_ref()).map_err(|err| Error::GetConfigurationError(err.into()))
    }

    /// Returns `true` if the AUTH LOGIN exchange should happen.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Returns the connect timeout, the default one if unset.
    pub fn connect_timeout(&self) -> Duration {
        match self.connect_timeout_secs {
            0 => Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Returns the read and write timeout, the default one if unset.
    pub fn read_timeout(&self) -> Duration {
        match self.read_timeout_secs {
            0 => Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Returns the name announced in `EHLO`.
    ///
    /// Falls back to the local host name, then to `localhost`.
    pub fn hello_name(&self) -> String {
        if let Some(name) = self.hello_name.as_ref().filter(|name| !name.trim().is_empty()) {
            return name.trim().to_owned();
        }

        let name = gethostname::gethostname().to_string_lossy().to_string();

        if name.is_empty() {
            String::from("localhost")
        } else {
            name
        }
    }

    /// Returns the `From` header value.
    pub fn from_header(&self) -> String {
        if self.from_name.is_empty() {
            format!("<{}>", self.from_email)
        } else {
            format!("{} <{}>", self.from_name, self.from_email)
        }
    }

    /// Returns a copy of the configuration safe to display: the
    /// password is masked when set.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();

        if !config.password.is_empty() {
            config.password = Self::REDACTED.to_owned();
        }

        config
    }

    /// Checks that the socket path can be attempted at all.
    ///
    /// Only relevant when the configuration is enabled: a disabled
    /// configuration goes straight to the fallback relay. Anything
    /// else the server may reject, like a zero port or an empty
    /// sender, is left to the dialogue and its fallback.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.host.trim().is_empty() {
            return Err(Error::ConfigurationError(String::from("host is empty")));
        }

        debug!(host = self.host, port = self.port, security = %self.security, "smtp configuration valid");
        Ok(())
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.redacted();

        f.debug_struct("SmtpConfig")
            .field("enabled", &config.enabled)
            .field("host", &config.host)
            .field("port", &config.port)
            .field("security", &config.security)
            .field("username", &config.username)
            .field("password", &config.password)
            .field("from_email", &config.from_email)
            .field("from_name", &config.from_name)
            .field("hello_name", &config.hello_name)
            .field("connect_timeout_secs", &config.connect_timeout_secs)
            .field("read_timeout_secs", &config.read_timeout_secs)
            .field("mailer_name", &config.mailer_name)
            .finish()
    }
}

/// The settings collaborator.
///
/// Supplies the SMTP configuration at the start of every send. The
/// mailer never caches what it returns.
pub trait SettingsProvider {
    fn smtp_config(&self) -> AnyResult<SmtpConfig>;
}

impl SettingsProvider for SmtpConfig {
    fn smtp_config(&self) -> AnyResult<SmtpConfig> {
        Ok(self.clone())
    }
}

impl<F> SettingsProvider for F
where
    F: Fn() -> AnyResult<SmtpConfig>,
{
    fn smtp_config(&self) -> AnyResult<SmtpConfig> {
        self()
    }
}
