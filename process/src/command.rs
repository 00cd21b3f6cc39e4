use std::{
    fmt,
    io::{ErrorKind, Write},
    process::{Command as StdCommand, Stdio},
};

use tracing::{debug, info};

use crate::{Error, Result};

/// A shell command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command(String);

impl Command {
    pub fn new(cmd: impl ToString) -> Self {
        Self(cmd.to_string())
    }

    /// Runs the command, piping the given input into it.
    ///
    /// Standard output is discarded. On a non-zero exit status, the
    /// error carries what the command wrote on its standard error
    /// channel.
    pub fn run_with(&self, input: impl AsRef<[u8]>) -> Result<()> {
        info!(cmd = %self, "run shell command");

        let mut child = shell()
            .arg(&self.0)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::SpawnCommandError(err, self.to_string()))?;

        // stdin is dropped at the end of the block, so the command
        // sees the end of its input
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::GetStdinError(self.to_string()))?;

            match stdin.write_all(input.as_ref()) {
                Ok(()) => (),
                // the exit status tells more than the broken pipe
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    debug!("shell command closed its input early");
                }
                Err(err) => return Err(Error::WriteStdinError(err, self.to_string())),
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|err| Error::WaitForExitError(err, self.to_string()))?;

        let Some(status) = output.status.code() else {
            return Err(Error::TerminatedBySignalError(self.to_string()));
        };

        if status != 0 {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            debug!(status, stderr = %stderr, "shell command failed");
            return Err(Error::NonZeroExitStatusError(self.to_string(), status, stderr));
        }

        debug!("shell command succeeded");
        Ok(())
    }
}

impl From<&str> for Command {
    fn from(cmd: &str) -> Self {
        Self::new(cmd)
    }
}

impl From<String> for Command {
    fn from(cmd: String) -> Self {
        Self(cmd)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn shell() -> StdCommand {
    #[cfg(windows)]
    let windows = !std::env::var("MSYSTEM")
        .map(|env| env.starts_with("MINGW"))
        .unwrap_or_default();
    #[cfg(not(windows))]
    let windows = false;

    let (program, flag) = if windows { ("cmd", "/C") } else { ("sh", "-c") };

    let mut cmd = StdCommand::new(program);
    cmd.arg(flag);
    cmd
}
