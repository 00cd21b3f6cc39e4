use std::env;

use mailer::{Envelope, Mailer, Security, SmtpConfig};

fn main() {
    env_logger::builder().is_test(true).init();

    let host = env::var("HOST").expect("HOST should be defined");
    let port: u16 = env::var("PORT")
        .unwrap_or_else(|_| String::from("587"))
        .parse()
        .expect("PORT should be an unsigned integer");
    let security = match env::var("SECURITY").as_deref() {
        Ok("ssl") => Security::Ssl,
        Ok("none") => Security::None,
        _ => Security::Tls,
    };
    let to = env::var("TO").expect("TO should be defined");

    let config = SmtpConfig {
        enabled: true,
        host,
        port,
        security,
        username: env::var("USERNAME").unwrap_or_default(),
        password: env::var("PASSWORD").unwrap_or_default(),
        from_email: env::var("FROM").expect("FROM should be defined"),
        from_name: env::var("FROM_NAME").unwrap_or_default(),
        ..Default::default()
    };

    println!("sending test message using {config:?}…");
    let envelope = Envelope::connection_test(&config, to);
    let result = Mailer::new(config).send_with_transcript(&envelope);

    for step in result.transcript.as_deref().unwrap_or_default() {
        println!("[{}] {}", step.timestamp.format("%H:%M:%S"), step.message());
    }

    match result.error {
        Some(err) if result.success => println!("sent using fallback: {err}"),
        Some(err) => println!("cannot send message: {err}"),
        None => println!("message sent"),
    }
}
