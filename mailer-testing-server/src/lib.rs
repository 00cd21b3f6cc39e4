//! Scripted SMTP server for testing purpose.
//!
//! The server does not understand SMTP: it answers every command line
//! with the next reply of its script, whatever the command is, and
//! records what the client sent. `STARTTLS` is answered like any
//! other command and the session goes on in clear, so clients under
//! test should use a pass-through TLS handshake.

use std::{
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, trace};

/// The replies of one connection, greeting first.
///
/// A bare 3-digit code expands to `<code> stub`. Any other reply is
/// sent as is, CRLF appended if missing, which allows multi-line
/// replies like `250-first\r\n250 last`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Script {
    replies: Vec<String>,
    silent: bool,
}

impl Script {
    pub fn new(replies: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            replies: replies.into_iter().map(|r| expand(&r.to_string())).collect(),
            silent: false,
        }
    }

    /// Accepts the connection but never answers, not even with a
    /// greeting. The connection is held until the client hangs up.
    pub fn silent() -> Self {
        Self {
            replies: Vec::new(),
            silent: true,
        }
    }
}

fn expand(reply: &str) -> String {
    if reply.len() == 3 && reply.bytes().all(|b| b.is_ascii_digit()) {
        format!("{reply} stub\r\n")
    } else if reply.ends_with("\r\n") {
        reply.to_owned()
    } else {
        format!("{reply}\r\n")
    }
}

/// What one client sent during one connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Session {
    /// The command lines, CRLF excluded, in order.
    pub commands: Vec<String>,
    /// The message sent after `DATA`, terminating dot excluded.
    pub data: Option<String>,
}

impl Session {
    /// Returns how many commands start with the given prefix,
    /// ignoring case.
    pub fn count(&self, prefix: &str) -> usize {
        let prefix = prefix.to_ascii_uppercase();

        self.commands
            .iter()
            .filter(|cmd| cmd.to_ascii_uppercase().starts_with(&prefix))
            .count()
    }

    /// Returns the position of the first command starting with the
    /// given prefix, ignoring case.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        let prefix = prefix.to_ascii_uppercase();

        self.commands
            .iter()
            .position(|cmd| cmd.to_ascii_uppercase().starts_with(&prefix))
    }
}

/// A running stub server.
///
/// Accepts one connection per script, in order, then stops
/// listening.
pub struct StubServer {
    port: u16,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Vec<Session>>,
}

impl StubServer {
    pub fn spawn(scripts: impl IntoIterator<Item = Script>) -> Self {
        let listener =
            TcpListener::bind(("127.0.0.1", 0)).expect("should bind stub smtp server");
        listener
            .set_nonblocking(true)
            .expect("should set stub smtp server non-blocking");

        let port = listener
            .local_addr()
            .expect("should get stub smtp server address")
            .port();

        let stop = Arc::new(AtomicBool::new(false));
        let scripts: Vec<Script> = scripts.into_iter().collect();

        let handle = {
            let stop = stop.clone();
            thread::spawn(move || serve(listener, scripts, stop))
        };

        debug!(port, "stub smtp server listening");

        Self { port, stop, handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops the server and returns the recorded sessions, one per
    /// accepted connection.
    pub fn join(self) -> Vec<Session> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.join().expect("stub smtp server should not panic")
    }
}

fn serve(listener: TcpListener, scripts: Vec<Script>, stop: Arc<AtomicBool>) -> Vec<Session> {
    let mut sessions = Vec::new();

    for script in scripts {
        let stream = loop {
            match listener.accept() {
                Ok((stream, _)) => break stream,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if stop.load(Ordering::SeqCst) {
                        return sessions;
                    }
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => panic!("stub smtp server cannot accept connection: {err}"),
            }
        };

        sessions.push(converse(stream, script));
    }

    sessions
}

fn converse(stream: TcpStream, script: Script) -> Session {
    stream
        .set_nonblocking(false)
        .expect("should set stub smtp connection blocking");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("should set stub smtp connection timeout");

    let mut writer = stream.try_clone().expect("should clone stub smtp connection");
    let mut reader = BufReader::new(stream);
    let mut session = Session::default();

    if script.silent {
        let mut ignored = Vec::new();
        let _ = reader.read_to_end(&mut ignored);
        debug!("silent stub smtp session ended");
        return session;
    }

    let mut replies = script.replies.into_iter();

    let write = |writer: &mut TcpStream, reply: &str| {
        trace!(reply, "stub smtp server reply");
        writer.write_all(reply.as_bytes()).is_ok() && writer.flush().is_ok()
    };

    match replies.next() {
        Some(greeting) if write(&mut writer, &greeting) => (),
        _ => return session,
    }

    loop {
        let Some(line) = read_line(&mut reader) else {
            break;
        };

        let cmd = line.trim_end_matches(['\r', '\n']).to_owned();
        session.commands.push(cmd.clone());

        let Some(reply) = replies.next() else {
            break;
        };

        if !write(&mut writer, &reply) {
            break;
        }

        if cmd.eq_ignore_ascii_case("DATA") && reply.starts_with("354") {
            let Some(data) = read_data(&mut reader) else {
                break;
            };
            session.data = Some(data);

            match replies.next() {
                Some(reply) if write(&mut writer, &reply) => continue,
                _ => break,
            }
        }

        if cmd.eq_ignore_ascii_case("QUIT") {
            break;
        }
    }

    debug!(commands = session.commands.len(), "stub smtp session ended");
    session
}

fn read_line(reader: &mut impl BufRead) -> Option<String> {
    let mut line = String::new();

    match reader.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

fn read_data(reader: &mut impl BufRead) -> Option<String> {
    let mut data = String::new();

    loop {
        let line = read_line(reader)?;

        if line == ".\r\n" || line == ".\n" {
            return Some(data);
        }

        data.push_str(&line);
    }
}

/// Spawns a stub server for the duration of the given task.
///
/// Returns the recorded sessions.
pub fn with_smtp_testing_server(
    scripts: impl IntoIterator<Item = Script>,
    task: impl FnOnce(u16),
) -> Vec<Session> {
    let server = StubServer::spawn(scripts);
    task(server.port());
    server.join()
}
