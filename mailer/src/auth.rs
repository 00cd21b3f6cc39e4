//! Module dedicated to SMTP authentication.

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::info;

use crate::{
    dialogue::{Dialogue, State},
    Error, ErrorKind, Result,
};

/// Authenticates using `AUTH LOGIN`.
///
/// A reply code mismatch during the exchange is reported as an
/// [`Error::AuthenticationError`], transport errors are kept as is.
pub fn authenticate(dialogue: &mut Dialogue<'_>, username: &str, password: &str) -> Result<()> {
    dialogue.info(&format!("Authenticating with username: {username}"));

    login(dialogue, username, password).map_err(|err| match err.kind() {
        ErrorKind::Protocol => Error::AuthenticationError(Box::new(err), username.to_owned()),
        _ => err,
    })?;

    info!(username, "smtp authentication succeeded");
    dialogue.success("Authentication successful");
    dialogue.set_state(State::Authenticated);

    Ok(())
}

fn login(dialogue: &mut Dialogue<'_>, username: &str, password: &str) -> Result<()> {
    dialogue.command("AUTH LOGIN command", "AUTH LOGIN", "334")?;
    dialogue.secret("Username (base64)", &STANDARD.encode(username), "334")?;
    dialogue.secret("Password (base64)", &STANDARD.encode(password), "235")?;
    Ok(())
}
