use std::{
    cell::{Cell, RefCell},
    io::{self, ErrorKind},
    net::TcpStream,
    time::{Duration, Instant},
};

use mailer::{
    stream::{StdStreamExt, MAX_REPLY_LINE_LEN},
    AnyResult, Direction, Envelope, FallbackRelay, Mailer, Outcome,
    SendResult, Security, SmtpConfig, Submission, TlsHandshake,
};
use mailer_testing_server::{with_smtp_testing_server, Script};

/// TLS handshake keeping the stream in clear, so that the stub server
/// can go on reading commands after `STARTTLS`.
#[derive(Default)]
struct PassThrough {
    handshakes: Cell<usize>,
}

impl TlsHandshake for &PassThrough {
    fn handshake(&self, _host: &str, tcp: TcpStream) -> io::Result<Box<dyn StdStreamExt>> {
        self.handshakes.set(self.handshakes.get() + 1);
        Ok(Box::new(tcp))
    }
}

/// TLS handshake rejecting the server certificate.
struct FailingTls;

impl TlsHandshake for FailingTls {
    fn handshake(&self, _host: &str, _tcp: TcpStream) -> io::Result<Box<dyn StdStreamExt>> {
        Err(io::Error::new(ErrorKind::InvalidData, "bad certificate"))
    }
}

#[derive(Default)]
struct Recorder {
    messages: RefCell<Vec<String>>,
    fail: bool,
}

impl FallbackRelay for &Recorder {
    fn submit(&self, submission: &Submission<'_>) -> AnyResult<()> {
        self.messages.borrow_mut().push(submission.to_message());

        if self.fail {
            Err("sendmail: command not found".into())
        } else {
            Ok(())
        }
    }
}

fn config(port: u16, security: Security) -> SmtpConfig {
    SmtpConfig {
        enabled: true,
        host: "127.0.0.1".into(),
        port,
        security,
        from_email: "licenses@example.com".into(),
        from_name: "Licenses".into(),
        hello_name: Some("licenses.example.com".into()),
        connect_timeout_secs: 5,
        read_timeout_secs: 5,
        ..Default::default()
    }
}

fn with_credentials(mut config: SmtpConfig) -> SmtpConfig {
    config.username = "mailer".into();
    config.password = "secret".into();
    config
}

fn envelope() -> Envelope {
    Envelope::new("user@example.com", "Your license", "Key: ABC")
}

fn messages(result: &SendResult) -> Vec<String> {
    result
        .transcript
        .as_ref()
        .expect("transcript should be recorded")
        .iter()
        .map(|step| step.message())
        .collect()
}

fn position(messages: &[String], needle: &str) -> usize {
    messages
        .iter()
        .position(|m| m.contains(needle))
        .unwrap_or_else(|| panic!("transcript should contain {needle:?}: {messages:#?}"))
}

#[test_log::test]
fn starttls_with_auth() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new([
        "220", "250", "220", "250", "334", "334", "235", "250", "250", "354", "250", "221",
    ]);

    let sessions = with_smtp_testing_server([script], |port| {
        let config = with_credentials(config(port, Security::Tls));
        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(result.error, None);
    assert_eq!(tls.handshakes.get(), 1);
    assert!(relay.messages.borrow().is_empty());

    assert_eq!(sessions.len(), 1);
    assert_eq!(
        sessions[0].commands,
        vec![
            "EHLO licenses.example.com",
            "STARTTLS",
            "EHLO licenses.example.com",
            "AUTH LOGIN",
            "bWFpbGVy",
            "c2VjcmV0",
            "MAIL FROM:<licenses@example.com>",
            "RCPT TO:<user@example.com>",
            "DATA",
            "QUIT",
        ]
    );

    let data = sessions[0].data.as_ref().expect("message should be sent");
    assert!(data.starts_with("From: Licenses <licenses@example.com>\r\nTo: user@example.com\r\n"));
    assert!(data.contains("\r\nSubject: Your license\r\n"));
    assert!(data.contains("@licenses.example.com>\r\n"));
    assert!(data.ends_with("\r\n\r\nKey: ABC\r\n"));

    let messages = messages(&result);
    let tls_started = position(&messages, "Starting TLS encryption...");
    let tls_established = position(&messages, "TLS encryption established");
    let auth = position(&messages, "Authenticating with username: mailer");
    let sent = position(&messages, "Message sent successfully");
    assert!(tls_started < tls_established);
    assert!(tls_established < auth);
    assert!(auth < sent);
    assert_eq!(messages.last().unwrap(), "Connection closed cleanly");

    for secret in ["bWFpbGVy", "c2VjcmV0", "secret"] {
        assert!(messages.iter().all(|m| !m.contains(secret)));
    }
}

#[test_log::test]
fn rejected_recipient_falls_back() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "250", "550 no such user"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert!(result.error.as_ref().unwrap().contains("550 no such user"));
    assert_eq!(relay.messages.borrow().len(), 1);
    assert!(relay.messages.borrow()[0].starts_with("To: user@example.com\r\nSubject: Your license\r\n"));

    assert_eq!(
        sessions[0].commands,
        vec![
            "EHLO licenses.example.com",
            "MAIL FROM:<licenses@example.com>",
            "RCPT TO:<user@example.com>",
        ]
    );
    assert_eq!(sessions[0].data, None);

    let steps = result.transcript.as_ref().unwrap();
    let rejected = steps
        .iter()
        .position(|s| s.direction == Some(Direction::Receive) && s.code.as_deref() == Some("550"))
        .expect("transcript should contain the rejection");
    assert_eq!(steps[rejected].outcome, Outcome::Error);

    let messages = messages(&result);
    let error = position(&messages, "Error: expected smtp reply code 250, got 550");
    let fallback = position(&messages, "Falling back to local mail submission...");
    assert!(rejected < error);
    assert!(error < fallback);
    assert_eq!(steps[fallback].outcome, Outcome::Warning);
    assert_eq!(steps.last().unwrap().outcome, Outcome::Success);
}

#[test_log::test]
fn fallback_failure_is_reported() {
    let tls = PassThrough::default();
    let relay = Recorder {
        fail: true,
        ..Default::default()
    };
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "250", "550 no such user"]);

    with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("cannot submit message locally: sendmail: command not found")
    );
    assert_eq!(relay.messages.borrow().len(), 1);
    assert_eq!(
        result.transcript.unwrap().last().unwrap().outcome,
        Outcome::Error
    );
}

#[test_log::test]
fn disabled_goes_straight_to_fallback() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let sessions = with_smtp_testing_server(Vec::new(), |port| {
        let mut config = config(port, Security::Tls);
        config.enabled = false;

        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(result.error, None);
    assert!(sessions.is_empty());
    assert_eq!(tls.handshakes.get(), 0);
    assert_eq!(relay.messages.borrow().len(), 1);

    let steps = result.transcript.as_ref().unwrap();
    let messages = messages(&result);
    let disabled = position(
        &messages,
        "SMTP is disabled, falling back to local mail submission",
    );
    assert_eq!(steps[disabled].outcome, Outcome::Warning);
    assert!(messages.iter().all(|m| !m.starts_with('→')));
}

#[test_log::test]
fn ssl_never_sends_starttls() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "250", "250", "354", "250", "221"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::Ssl))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(tls.handshakes.get(), 1);
    assert_eq!(sessions[0].count("STARTTLS"), 0);
    assert_eq!(sessions[0].count("AUTH"), 0);

    let messages = messages(&result);
    let ssl = position(&messages, "Using SSL connection");
    let connected = position(&messages, "Connected to SMTP server");
    assert!(ssl < connected);
}

#[test_log::test]
fn none_never_encrypts() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut sent = false;

    let script = Script::new(["220", "250", "250", "250", "354", "250", "221"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mut config = with_credentials(config(port, Security::None));
        config.password.clear();

        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        sent = mailer.send(&envelope());
    });

    assert!(sent);
    assert_eq!(tls.handshakes.get(), 0);
    assert_eq!(sessions[0].count("STARTTLS"), 0);
    assert_eq!(sessions[0].count("AUTH"), 0);
    assert!(relay.messages.borrow().is_empty());
}

#[test_log::test]
fn starttls_happens_once_before_auth_and_mail() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut sent = false;

    let script = Script::new([
        "220", "250", "220", "250", "334", "334", "235", "250", "250", "354", "250", "221",
    ]);

    let sessions = with_smtp_testing_server([script], |port| {
        let config = with_credentials(config(port, Security::Tls));
        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        sent = mailer.send(&envelope());
    });

    assert!(sent);

    let session = &sessions[0];
    assert_eq!(session.count("STARTTLS"), 1);
    assert_eq!(session.count("AUTH LOGIN"), 1);
    assert!(session.position("STARTTLS") < session.position("AUTH"));
    assert!(session.position("STARTTLS") < session.position("MAIL FROM"));
}

#[test_log::test]
fn rejected_credentials() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "334", "334", "535 bad credentials"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let config = with_credentials(config(port, Security::None));
        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert!(result
        .error
        .as_ref()
        .unwrap()
        .starts_with("cannot authenticate as mailer: expected smtp reply code 235, got 535"));
    assert_eq!(sessions[0].count("MAIL FROM"), 0);
    assert_eq!(relay.messages.borrow().len(), 1);
}

#[test_log::test]
fn two_sequential_sends() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut sent = Vec::new();

    let script = Script::new(["220", "250", "250", "250", "354", "250", "221"]);

    let sessions = with_smtp_testing_server([script.clone(), script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        sent.push(mailer.send(&envelope()));
        sent.push(mailer.send(&envelope()));
    });

    assert_eq!(sent, vec![true, true]);
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].commands, sessions[1].commands);
    assert!(relay.messages.borrow().is_empty());
}

#[test_log::test]
fn multi_line_ehlo_reply() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new([
        "220 smtp.example.com ESMTP",
        "250-smtp.example.com\r\n250-PIPELINING\r\n250 AUTH LOGIN PLAIN",
        "250",
        "250",
        "354",
        "250",
        "221",
    ]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(sessions[0].count("MAIL FROM"), 1);

    let messages = messages(&result);
    position(&messages, "← 220 smtp.example.com ESMTP");
    position(&messages, "← 250 smtp.example.com PIPELINING AUTH LOGIN PLAIN");
}

#[test_log::test]
fn rejected_greeting() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["554 go away"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert!(result
        .error
        .unwrap()
        .contains("expected smtp reply code 220, got 554"));
    assert!(sessions[0].commands.is_empty());
    assert_eq!(relay.messages.borrow().len(), 1);
}

#[test_log::test]
fn server_closing_early() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    // no reply to MAIL FROM: the server hangs up
    let script = Script::new(["220", "250"]);

    with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert!(result
        .error
        .unwrap()
        .starts_with("cannot read smtp reply: connection closed by server"));
    assert_eq!(relay.messages.borrow().len(), 1);
}

#[test_log::test]
fn json_report() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "250", "250", "354", "250", "221"]);

    with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], true);
    assert!(json.get("error").is_none());
    assert!(json.get("transcript").is_none());

    let log = json["log"].as_array().unwrap();
    assert_eq!(log.len(), result.transcript.as_ref().unwrap().len());
    assert_eq!(log[0]["type"], "info");
    assert_eq!(log[0]["message"], "Starting SMTP connection test...");
    assert_eq!(log[1]["message"], "Target: user@example.com");
    assert_eq!(log.last().unwrap()["type"], "success");
    assert!(log
        .iter()
        .any(|entry| entry["message"] == "→ EHLO handshake"));
}

#[test_log::test]
fn silent_server_times_out() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();
    let mut elapsed = Duration::ZERO;

    let sessions = with_smtp_testing_server([Script::silent()], |port| {
        let mut config = config(port, Security::None);
        config.read_timeout_secs = 1;

        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        let start = Instant::now();
        result = mailer.send_with_transcript(&envelope());
        elapsed = start.elapsed();
    });

    assert!(result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("cannot read smtp reply: timed out waiting for server reply")
    );
    assert!(elapsed < Duration::from_secs(5), "send took {elapsed:?}");
    assert!(sessions[0].commands.is_empty());
    assert_eq!(relay.messages.borrow().len(), 1);
}

#[test_log::test]
fn starttls_refused() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "454 TLS not available"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let config = with_credentials(config(port, Security::Tls));
        let mailer = Mailer::new(config).with_fallback(&relay).with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert!(result
        .error
        .unwrap()
        .contains("expected smtp reply code 220, got 454"));
    assert_eq!(tls.handshakes.get(), 0);
    assert_eq!(
        sessions[0].commands,
        vec!["EHLO licenses.example.com", "STARTTLS"]
    );
    assert_eq!(relay.messages.borrow().len(), 1);
}

#[test_log::test]
fn tls_handshake_failure() {
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let script = Script::new(["220", "250", "220"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let config = with_credentials(config(port, Security::Tls));
        let mailer = Mailer::new(config)
            .with_fallback(&relay)
            .with_tls(FailingTls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("cannot negotiate tls with 127.0.0.1: bad certificate")
    );
    assert_eq!(sessions[0].count("AUTH"), 0);
    assert_eq!(sessions[0].count("MAIL FROM"), 0);
    assert_eq!(relay.messages.borrow().len(), 1);

    let messages = messages(&result);
    assert!(messages.iter().all(|m| m != "TLS encryption established"));
}

#[test_log::test]
fn data_ahead_of_tls_handshake() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    // the server piggybacks a reply on the STARTTLS one
    let script = Script::new(["220", "250", "220 go ahead\r\n250 injected"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::Tls))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert!(result
        .error
        .unwrap()
        .ends_with("server sent 14 bytes ahead of the handshake"));
    assert_eq!(tls.handshakes.get(), 0);
    assert_eq!(sessions[0].count("MAIL FROM"), 0);
    assert_eq!(relay.messages.borrow().len(), 1);
}

#[test_log::test]
fn overlong_reply_line_is_truncated() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let ehlo = format!("250 {}", "x".repeat(700));
    let script = Script::new(["220", ehlo.as_str(), "250", "250", "354", "250", "221"]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(result.error, None);
    assert_eq!(sessions[0].count("MAIL FROM"), 1);
    assert!(relay.messages.borrow().is_empty());

    let steps = result.transcript.as_ref().unwrap();
    let ehlo_reply = steps
        .iter()
        .filter(|s| s.direction == Some(Direction::Receive))
        .nth(1)
        .expect("transcript should contain the EHLO reply");
    assert_eq!(ehlo_reply.code.as_deref(), Some("250"));
    assert_eq!(ehlo_reply.text, "x".repeat(MAX_REPLY_LINE_LEN - 4));
}

#[test_log::test]
fn endless_multi_line_reply() {
    let tls = PassThrough::default();
    let relay = Recorder::default();
    let mut result = SendResult::default();

    let ehlo = format!("{}250 done", "250-x\r\n".repeat(300));
    let script = Script::new(["220", ehlo.as_str()]);

    let sessions = with_smtp_testing_server([script], |port| {
        let mailer = Mailer::new(config(port, Security::None))
            .with_fallback(&relay)
            .with_tls(&tls);
        result = mailer.send_with_transcript(&envelope());
    });

    assert!(result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("cannot read smtp reply: too many reply lines")
    );
    assert_eq!(sessions[0].count("MAIL FROM"), 0);
    assert_eq!(relay.messages.borrow().len(), 1);
}
