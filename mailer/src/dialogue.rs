//! Module dedicated to the observed SMTP dialogue.
//!
//! A [`Dialogue`] wraps the connection of one send, reports every
//! exchange to the observer and tracks the [`State`] the send has
//! reached.

use std::fmt;

use tracing::{debug, trace};

use crate::{
    command::{self, Reply},
    stream::Connection,
    tls::TlsHandshake,
    transcript::{Direction, Observer, Outcome},
    Result,
};

/// The state of one send.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum State {
    #[default]
    Idle,
    Connected,
    Greeted,
    TlsNegotiating,
    Authenticated,
    Sending,
    Completed,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connected => write!(f, "connected"),
            Self::Greeted => write!(f, "greeted"),
            Self::TlsNegotiating => write!(f, "tls negotiating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Sending => write!(f, "sending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

pub struct Dialogue<'a> {
    conn: Connection,
    observer: &'a mut dyn Observer,
    state: State,
}

impl<'a> Dialogue<'a> {
    pub fn new(conn: Connection, observer: &'a mut dyn Observer) -> Self {
        Self {
            conn,
            observer,
            state: State::Connected,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_state(&mut self, state: State) {
        debug!(from = %self.state, to = %state, "smtp state changed");
        self.state = state;
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Reads the greeting the server sends on connect.
    pub fn greeting(&mut self) -> Result<Reply> {
        self.exchange("Server greeting", "", "220", false)
    }

    /// Sends one command, described in the transcript by
    /// `description`.
    pub fn command(&mut self, description: &str, command: &str, expected: &str) -> Result<Reply> {
        self.exchange(description, command, expected, false)
    }

    /// Sends one command carrying a secret.
    ///
    /// Only the description reaches the transcript and the logs.
    pub fn secret(&mut self, description: &str, command: &str, expected: &str) -> Result<Reply> {
        self.exchange(description, command, expected, true)
    }

    fn exchange(
        &mut self,
        description: &str,
        command: &str,
        expected: &str,
        secret: bool,
    ) -> Result<Reply> {
        if !command.is_empty() {
            debug!(command = description, "send smtp command");
            if !secret {
                trace!(data = command, "command");
            }
            self.observer
                .observe(Some(Direction::Send), None, description, Outcome::Info);
        }

        let reply = match command::send_command(&mut self.conn, command, expected) {
            Ok(reply) => reply,
            Err(err) => {
                if let crate::Error::ProtocolError { actual, raw, .. } = &err {
                    let text = raw.get(4..).unwrap_or_default();
                    self.observer.observe(
                        Some(Direction::Receive),
                        Some(actual.as_str()),
                        text,
                        Outcome::Error,
                    );
                }
                return Err(err);
            }
        };

        self.observer.observe(
            Some(Direction::Receive),
            Some(reply.code()),
            &reply.message(),
            Outcome::Success,
        );

        Ok(reply)
    }

    /// Upgrades the connection to TLS.
    pub fn upgrade(&mut self, tls: &impl TlsHandshake) -> Result<()> {
        self.conn.upgrade(tls)
    }

    pub fn info(&mut self, text: &str) {
        self.observer.info(text)
    }

    pub fn success(&mut self, text: &str) {
        self.observer.success(text)
    }

    /// Closes the connection and returns the state reached.
    pub fn close(self) -> State {
        self.conn.close();
        self.state
    }
}
