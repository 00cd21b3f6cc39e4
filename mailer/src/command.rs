//! Module dedicated to the SMTP command sequencer.
//!
//! One exchange is one command line written to the server followed
//! by one, possibly multi-line, reply whose code is checked against
//! the expected one.

use std::io;

use tracing::{debug, trace};

use crate::{stream::Connection, Error, Result};

/// The maximum number of lines accepted in one reply.
pub const MAX_REPLY_LINES: usize = 256;

/// A server reply.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reply {
    code: String,
    lines: Vec<String>,
}

impl Reply {
    /// Returns `true` if the given line ends the reply.
    ///
    /// A line is final unless its fourth character is a dash. Lines
    /// made of a bare code (`250\r\n`) are final too.
    pub fn is_final_line(line: &str) -> bool {
        line.as_bytes().get(3) != Some(&b'-')
    }

    /// Parses a complete reply text.
    ///
    /// Lines are consumed up to the first final one, whatever
    /// follows is ignored. Returns `None` if no final line is found.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = Vec::new();

        for line in text.split_inclusive('\n') {
            lines.push(line.to_owned());

            if Self::is_final_line(line) {
                return Some(Self::from_lines(lines));
            }
        }

        None
    }

    fn from_lines(lines: Vec<String>) -> Self {
        let code = lines
            .last()
            .map(|line| line.trim_end().chars().take(3).collect())
            .unwrap_or_default();

        Self { code, lines }
    }

    /// Returns the 3-digit code of the final line.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns the raw reply text, CRLF included.
    pub fn raw(&self) -> String {
        self.lines.concat()
    }

    /// Returns the human-readable part of the reply: the text of
    /// every line without its code, joined by spaces.
    pub fn message(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.get(4..).unwrap_or_default().trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Checks the reply code against the expected one.
    pub fn expect(&self, expected: &str) -> Result<()> {
        if self.code == expected {
            Ok(())
        } else {
            Err(Error::ProtocolError {
                expected: expected.to_owned(),
                actual: self.code.clone(),
                raw: self.raw().trim_end().to_owned(),
            })
        }
    }
}

/// Reads one reply from the connection.
///
/// Lines are accumulated until a final one is read.
pub fn read_reply(conn: &mut Connection) -> Result<Reply> {
    let mut lines = Vec::new();

    loop {
        let line = conn.read_line()?;
        let last = Reply::is_final_line(&line);
        lines.push(line);

        if last {
            break;
        }

        if lines.len() >= MAX_REPLY_LINES {
            let err = io::Error::new(io::ErrorKind::InvalidData, "too many reply lines");
            return Err(Error::ReadReplyError(err));
        }
    }

    let reply = Reply::from_lines(lines);
    trace!(code = reply.code(), lines = reply.lines().len(), "reply read");
    Ok(reply)
}

/// Sends one command and checks the reply code.
///
/// An empty command is not written: it is used to consume the server
/// greeting, which comes unprompted.
pub fn send_command(conn: &mut Connection, command: &str, expected: &str) -> Result<Reply> {
    if !command.is_empty() {
        conn.write_line(command)?;
    }

    let reply = read_reply(conn)?;
    debug!(expected, code = reply.code(), "smtp reply received");
    reply.expect(expected)?;

    Ok(reply)
}
