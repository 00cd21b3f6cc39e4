//! Module dedicated to TLS.
//!
//! The handshake itself sits behind the [`TlsHandshake`] trait, the
//! default [`Rustls`] implementation verifies the server certificate
//! against the platform trust store.

use std::{
    io::{self, ErrorKind},
    net::TcpStream,
    sync::Arc,
};

use rustls::{pki_types::ServerName, ClientConfig, ClientConnection, StreamOwned};
use rustls_platform_verifier::ConfigVerifierExt;
use tracing::{debug, instrument};

use crate::{
    dialogue::{Dialogue, State},
    stream::StdStreamExt,
    Result, Security,
};

/// The TLS client handshake.
///
/// Consumes the plain socket and returns the encrypted stream, once
/// the handshake is complete.
pub trait TlsHandshake {
    fn handshake(&self, host: &str, tcp: TcpStream) -> io::Result<Box<dyn StdStreamExt>>;
}

/// The rustls-backed TLS handshake.
#[derive(Clone, Debug, Default)]
pub struct Rustls {
    config: Option<Arc<ClientConfig>>,
}

impl Rustls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given client configuration instead of the platform
    /// verifier.
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            config: Some(config),
        }
    }
}

impl TlsHandshake for Rustls {
    #[instrument(skip(self, tcp))]
    fn handshake(&self, host: &str, tcp: TcpStream) -> io::Result<Box<dyn StdStreamExt>> {
        let config = match &self.config {
            Some(config) => config.clone(),
            None => Arc::new(ClientConfig::with_platform_verifier()),
        };

        let name = ServerName::try_from(host.to_owned())
            .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err))?;

        let conn = ClientConnection::new(config, name)
            .map_err(|err| io::Error::new(ErrorKind::Other, err))?;

        let mut stream = StreamOwned::new(conn, tcp);

        while stream.conn.is_handshaking() {
            stream.conn.complete_io(&mut stream.sock)?;
        }

        debug!("tls handshake complete");
        Ok(Box::new(stream))
    }
}

/// Negotiates TLS after the first `EHLO`, if the security mode asks
/// for it.
///
/// Only [`Security::Tls`] does something here: [`Security::Ssl`]
/// wraps the socket at connect time and [`Security::None`] never
/// encrypts.
pub fn negotiate(
    dialogue: &mut Dialogue<'_>,
    security: Security,
    tls: &impl TlsHandshake,
    hello: &str,
) -> Result<()> {
    match security {
        Security::Tls => start_tls(dialogue, tls, hello),
        Security::Ssl | Security::None => Ok(()),
    }
}

fn start_tls(dialogue: &mut Dialogue<'_>, tls: &impl TlsHandshake, hello: &str) -> Result<()> {
    dialogue.set_state(State::TlsNegotiating);
    dialogue.info("Starting TLS encryption...");
    dialogue.command("STARTTLS command", "STARTTLS", "220")?;
    dialogue.upgrade(tls)?;
    dialogue.success("TLS encryption established");

    // capabilities announced in clear are discarded
    dialogue.command("EHLO after TLS", &format!("EHLO {hello}"), "250")?;
    dialogue.set_state(State::Greeted);

    Ok(())
}
