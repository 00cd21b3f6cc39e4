//! Module dedicated to the SMTP transport.
//!
//! A [`Connection`] owns one socket for the lifetime of one send. It
//! is opened either plain or TLS-wrapped, and can be upgraded to TLS
//! in place, on the same socket, after a `STARTTLS` exchange.

use std::{
    io::{self, BufRead, BufReader, ErrorKind, Read, Write},
    mem,
    net::{Shutdown, TcpStream, ToSocketAddrs},
};

use tracing::{debug, instrument, trace, warn};

use crate::{tls::TlsHandshake, Error, Result, Security, SmtpConfig};

/// The maximum length of a reply line kept by the reader, CRLF
/// included.
pub const MAX_REPLY_LINE_LEN: usize = 512;

/// Renames socket timeouts.
///
/// Depending on the platform, an elapsed read or write timeout
/// surfaces as `WouldBlock` or `TimedOut`, with an OS message that
/// does not mention time at all.
fn timed_out(err: io::Error, during: &str) -> io::Error {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            io::Error::new(ErrorKind::TimedOut, format!("timed out {during}"))
        }
        _ => err,
    }
}

/// A blocking byte stream.
pub trait StdStreamExt: Read + Write + Send {}
impl<T: Read + Write + Send> StdStreamExt for T {}

/// The SMTP socket, plain or encrypted.
#[derive(Default)]
pub enum SmtpStream {
    #[default]
    #[doc(hidden)]
    None,
    Plain(TcpStream),
    Tls(Box<dyn StdStreamExt>),
}

impl SmtpStream {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl Read for SmtpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
            Self::None => Err(io::Error::new(
                ErrorKind::NotConnected,
                "cannot read from closed smtp stream",
            )),
        }
    }
}

impl Write for SmtpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
            Self::None => Err(io::Error::new(
                ErrorKind::NotConnected,
                "cannot write into closed smtp stream",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
            Self::None => Ok(()),
        }
    }
}

/// The connection of one send.
pub struct Connection {
    host: String,
    reader: BufReader<SmtpStream>,
}

impl Connection {
    /// Opens a connection to the configured server.
    ///
    /// The socket is wrapped in TLS straight away when the security
    /// mode is [`Security::Ssl`].
    #[instrument(skip_all, fields(host = config.host, port = config.port))]
    pub fn open(config: &SmtpConfig, tls: &impl TlsHandshake) -> Result<Self> {
        let host = config.host.trim().to_owned();
        let port = config.port;

        let addrs = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|err| Error::ResolveAddressError(err, host.clone(), port))?;

        let mut last_err = None;
        let mut tcp = None;

        for addr in addrs {
            debug!(%addr, "connecting using tcp");
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(err) => {
                    warn!(%addr, "cannot connect using tcp: {err}");
                    last_err = Some(err);
                }
            }
        }

        let tcp = tcp.ok_or_else(|| {
            let err = last_err.unwrap_or_else(|| {
                io::Error::new(ErrorKind::NotFound, "no address resolved for host")
            });
            Error::ConnectError(err, host.clone(), port)
        })?;

        tcp.set_read_timeout(Some(config.read_timeout()))
            .map_err(Error::SetTimeoutError)?;
        tcp.set_write_timeout(Some(config.read_timeout()))
            .map_err(Error::SetTimeoutError)?;

        let stream = if config.security == Security::Ssl {
            debug!("wrapping socket in tls");
            let stream = tls
                .handshake(&host, tcp)
                .map_err(|err| Error::TlsNegotiationError(err, host.clone()))?;
            SmtpStream::Tls(stream)
        } else {
            SmtpStream::Plain(tcp)
        };

        Ok(Self::new(host, stream))
    }

    pub fn new(host: impl ToString, stream: SmtpStream) -> Self {
        Self {
            host: host.to_string(),
            reader: BufReader::with_capacity(4096, stream),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_encrypted(&self) -> bool {
        self.reader.get_ref().is_encrypted()
    }

    /// Writes the given line followed by CRLF, then flushes.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.reader.get_mut();

        stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\r\n"))
            .and_then(|()| stream.flush())
            .map_err(|err| Error::WriteCommandError(timed_out(err, "sending command")))?;

        trace!(bytes = line.len() + 2, "write");
        Ok(())
    }

    /// Reads one reply line, CRLF included.
    ///
    /// Lines longer than [`MAX_REPLY_LINE_LEN`] are truncated, the
    /// rest of the line is discarded. A stream ending before any
    /// byte is read is a connection error, not an empty reply.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::with_capacity(128);

        let n = (&mut self.reader)
            .take(MAX_REPLY_LINE_LEN as u64)
            .read_until(b'\n', &mut line)
            .map_err(|err| Error::ReadReplyError(timed_out(err, "waiting for server reply")))?;

        if n == 0 {
            let err = io::Error::new(ErrorKind::UnexpectedEof, "connection closed by server");
            return Err(Error::ReadReplyError(err));
        }

        if !line.ends_with(b"\n") && line.len() == MAX_REPLY_LINE_LEN {
            warn!("reply line too long, discarding the rest of it");
            self.discard_line()?;
        }

        let line = String::from_utf8_lossy(&line).to_string();
        trace!(data = line, "read");
        Ok(line)
    }

    fn discard_line(&mut self) -> Result<()> {
        let mut scratch = Vec::with_capacity(MAX_REPLY_LINE_LEN);

        loop {
            scratch.clear();

            let n = (&mut self.reader)
                .take(MAX_REPLY_LINE_LEN as u64)
                .read_until(b'\n', &mut scratch)
                .map_err(|err| Error::ReadReplyError(timed_out(err, "waiting for server reply")))?;

            if n == 0 || scratch.ends_with(b"\n") {
                return Ok(());
            }
        }
    }

    /// Upgrades the plain socket to TLS, in place.
    ///
    /// Fails if the server already sent bytes the client did not ask
    /// for: they were received in clear and must not be mixed with
    /// the encrypted session.
    #[instrument(skip_all, fields(host = self.host))]
    pub fn upgrade(&mut self, tls: &impl TlsHandshake) -> Result<()> {
        let buffered = self.reader.buffer().len();
        if buffered > 0 {
            return Err(Error::TlsBufferedDataError(buffered));
        }

        let reader = mem::replace(&mut self.reader, BufReader::new(SmtpStream::None));

        let tcp = match reader.into_inner() {
            SmtpStream::Plain(tcp) => tcp,
            stream => {
                // already encrypted, nothing to upgrade
                self.reader = BufReader::new(stream);
                return Ok(());
            }
        };

        let stream = tls
            .handshake(&self.host, tcp)
            .map_err(|err| Error::TlsNegotiationError(err, self.host.clone()))?;

        debug!("connection upgraded to tls");
        self.reader = BufReader::with_capacity(4096, SmtpStream::Tls(stream));
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Errors are logged and swallowed: the connection is dropped
    /// either way.
    pub fn close(self) {
        match self.reader.into_inner() {
            SmtpStream::Plain(tcp) => {
                if let Err(err) = tcp.shutdown(Shutdown::Both) {
                    debug!("cannot shut down tcp stream: {err}");
                }
            }
            SmtpStream::Tls(mut stream) => {
                if let Err(err) = stream.flush() {
                    debug!("cannot flush tls stream: {err}");
                }
            }
            SmtpStream::None => (),
        }

        debug!("smtp connection closed");
    }
}
