//! Module dedicated to the diagnostic transcript.
//!
//! The mailer reports every step of a send to an [`Observer`]. The
//! plain path uses the [`Silent`] observer, the diagnostic path a
//! recording [`Transcript`].

use chrono::{DateTime, Local};
use tracing::trace;

/// The direction of a protocol step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Direction {
    /// Client to server.
    Send,
    /// Server to client.
    Receive,
}

/// The classification of a step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Outcome {
    Info,
    Success,
    Warning,
    Error,
}

/// One recorded step of a send.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Step {
    /// The position of the step in the transcript, starting at 1.
    pub ordinal: usize,
    pub timestamp: DateTime<Local>,
    /// The direction of the step, `None` for milestones.
    pub direction: Option<Direction>,
    /// The 3-digit reply code of received steps.
    pub code: Option<String>,
    pub text: String,
    pub outcome: Outcome,
}

impl Step {
    /// Renders the step as one log line.
    pub fn message(&self) -> String {
        match (self.direction, &self.code) {
            (Some(Direction::Send), _) => format!("→ {}", self.text),
            (Some(Direction::Receive), Some(code)) if self.text.is_empty() => format!("← {code}"),
            (Some(Direction::Receive), Some(code)) => format!("← {code} {}", self.text),
            (Some(Direction::Receive), None) => format!("← {}", self.text),
            (None, _) => self.text.clone(),
        }
    }
}

/// The observer of a send.
pub trait Observer {
    /// Forgets every step observed so far.
    fn clear(&mut self) {}

    fn observe(
        &mut self,
        direction: Option<Direction>,
        code: Option<&str>,
        text: &str,
        outcome: Outcome,
    );

    fn info(&mut self, text: &str) {
        self.observe(None, None, text, Outcome::Info)
    }

    fn success(&mut self, text: &str) {
        self.observe(None, None, text, Outcome::Success)
    }

    fn warning(&mut self, text: &str) {
        self.observe(None, None, text, Outcome::Warning)
    }

    fn error(&mut self, text: &str) {
        self.observe(None, None, text, Outcome::Error)
    }
}

/// The observer of the plain path: every step is dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct Silent;

impl Observer for Silent {
    fn observe(&mut self, _: Option<Direction>, _: Option<&str>, _: &str, _: Outcome) {}
}

/// The recording observer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Transcript {
    steps: Vec<Step>,
}

impl Transcript {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

impl Observer for Transcript {
    fn clear(&mut self) {
        self.steps.clear();
    }

    fn observe(
        &mut self,
        direction: Option<Direction>,
        code: Option<&str>,
        text: &str,
        outcome: Outcome,
    ) {
        let step = Step {
            ordinal: self.steps.len() + 1,
            timestamp: Local::now(),
            direction,
            code: code.map(ToOwned::to_owned),
            text: text.to_owned(),
            outcome,
        };

        trace!(ordinal = step.ordinal, ?outcome, "{}", step.message());
        self.steps.push(step);
    }
}

/// The log entry of the JSON view of a send result.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "derive", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEntry {
    /// The local time of the step, as `HH:MM:SS`.
    pub timestamp: String,
    #[cfg_attr(feature = "derive", serde(rename = "type"))]
    pub kind: Outcome,
    pub message: String,
}

impl From<&Step> for LogEntry {
    fn from(step: &Step) -> Self {
        Self {
            timestamp: step.timestamp.format("%H:%M:%S").to_string(),
            kind: step.outcome,
            message: step.message(),
        }
    }
}
