//! Conversation transcript sink.
//!
//! Append-only UTF-8 log, one `[<agent-name>]: <text>` line per reply,
//! flushed per line. The handle is opened once at run start and closed
//! exactly once when the owning run drops it, on every exit path.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

pub struct Transcript {
    file: Option<File>,
}

impl Transcript {
    /// Open the log file for appending, or a disabled sink when no path is
    /// configured. An unopenable path disables logging with a warning
    /// rather than failing the run.
    pub fn open(path: Option<&Path>) -> Self {
        let file = match path {
            Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    debug!(path = %path.display(), "transcript log opened");
                    Some(file)
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "transcript disabled: cannot open log file"
                    );
                    None
                }
            },
            None => None,
        };
        Self { file }
    }

    /// Whether lines are actually being written.
    pub fn is_active(&self) -> bool {
        self.file.is_some()
    }

    /// Append one reply line. Write failures are reported and swallowed;
    /// a lost log line never interrupts the conversation.
    pub fn append(&mut self, agent: &str, text: &str) {
        if let Some(file) = self.file.as_mut() {
            if let Err(err) = writeln!(file, "[{agent}]: {text}").and_then(|_| file.flush()) {
                warn!(error = %err, "transcript write failed");
            }
        }
    }
}
