//! State channel for the bidirectional protocol variant.
//!
//! The sandbox side holds a [`ChannelWriter`] and updates named fields
//! (`output`, `error`, `progress`) in any order, then fires the `complete`
//! trigger. The host side holds a [`ChannelReader`] and can only observe
//! one thing besides progress: the snapshot taken at completion. There is
//! no way to read `output` or `error` mid-stream.
//!
//! Dropping the writer before completion abandons the channel.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::reply::ReplyFields;

pub const OUTPUT: &str = "output";
pub const ERROR: &str = "error";
pub const PROGRESS: &str = "progress";
pub const COMPLETE: &str = "complete";

/// Field values as they stood when `complete` fired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub output: Option<String>,
    pub error: Option<String>,
    pub progress: Option<u8>,
}

impl From<ChannelSnapshot> for ReplyFields {
    fn from(snapshot: ChannelSnapshot) -> Self {
        Self {
            output: snapshot.output,
            error: snapshot.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Completed(ChannelSnapshot),
    /// The writer went away without firing `complete`.
    Abandoned,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelFieldError {
    #[error("unknown state field '{0}' (expected output, error or progress)")]
    UnknownState(String),
    #[error("unknown trigger '{0}' (expected complete)")]
    UnknownTrigger(String),
    #[error("state field '{field}' expects {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Completed,
}

/// Create a connected writer/reader pair.
pub fn state_channel() -> (ChannelWriter, ChannelReader) {
    let (progress_tx, progress_rx) = watch::channel(None);
    let (done_tx, done_rx) = oneshot::channel();
    (
        ChannelWriter {
            fields: ChannelSnapshot::default(),
            phase: Phase::Streaming,
            progress: progress_tx,
            done: Some(done_tx),
        },
        ChannelReader {
            progress: progress_rx,
            done: done_rx,
        },
    )
}

/// Sandbox-side end of the channel.
#[derive(Debug)]
pub struct ChannelWriter {
    fields: ChannelSnapshot,
    phase: Phase,
    progress: watch::Sender<Option<u8>>,
    done: Option<oneshot::Sender<ChannelSnapshot>>,
}

impl ChannelWriter {
    pub fn set_output(&mut self, output: Option<String>) {
        if self.accepts_updates(OUTPUT) {
            self.fields.output = output;
        }
    }

    pub fn set_error(&mut self, error: Option<String>) {
        if self.accepts_updates(ERROR) {
            self.fields.error = error;
        }
    }

    /// Advisory. Values above 100 are clamped; readers may see only the latest.
    pub fn set_progress(&mut self, percent: u8) {
        if self.accepts_updates(PROGRESS) {
            let percent = percent.min(100);
            self.fields.progress = Some(percent);
            self.progress.send_replace(Some(percent));
        }
    }

    /// Fire the completion trigger. Only the first call has any effect.
    pub fn complete(&mut self) -> bool {
        if self.phase == Phase::Completed {
            tracing::debug!("completion trigger fired twice; ignoring");
            return false;
        }
        self.phase = Phase::Completed;
        if let Some(done) = self.done.take() {
            // The reader may already be gone; nothing left to deliver to.
            let _ = done.send(self.fields.clone());
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Set a state field by name, as the sandbox addresses them.
    pub fn set_state_value(&mut self, name: &str, value: &Value) -> Result<(), ChannelFieldError> {
        match name {
            OUTPUT => {
                let output = text_or_null(value, OUTPUT)?;
                self.set_output(output);
            }
            ERROR => {
                let error = text_or_null(value, ERROR)?;
                self.set_error(error);
            }
            PROGRESS => match value {
                Value::Null => {}
                Value::Number(n) => {
                    let percent = n.as_f64().unwrap_or(0.0).round().clamp(0.0, 100.0);
                    self.set_progress(percent as u8);
                }
                _ => {
                    return Err(ChannelFieldError::WrongType {
                        field: PROGRESS,
                        expected: "a number or null",
                    })
                }
            },
            other => return Err(ChannelFieldError::UnknownState(other.to_string())),
        }
        Ok(())
    }

    /// Fire a trigger by name. The trigger's value carries no meaning.
    pub fn set_trigger_value(&mut self, name: &str, _value: &Value) -> Result<(), ChannelFieldError> {
        match name {
            COMPLETE => {
                self.complete();
                Ok(())
            }
            other => Err(ChannelFieldError::UnknownTrigger(other.to_string())),
        }
    }

    fn accepts_updates(&self, field: &str) -> bool {
        if self.phase == Phase::Completed {
            tracing::debug!(field, "state update after completion; ignoring");
            return false;
        }
        true
    }
}

fn text_or_null(value: &Value, field: &'static str) -> Result<Option<String>, ChannelFieldError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        _ => Err(ChannelFieldError::WrongType {
            field,
            expected: "a string or null",
        }),
    }
}

/// Host-side end of the channel.
#[derive(Debug)]
pub struct ChannelReader {
    progress: watch::Receiver<Option<u8>>,
    done: oneshot::Receiver<ChannelSnapshot>,
}

impl ChannelReader {
    /// A receiver for progress updates. Updates coalesce.
    pub fn progress(&self) -> watch::Receiver<Option<u8>> {
        self.progress.clone()
    }

    /// Wait until the writer completes or goes away.
    pub async fn settle(mut self) -> Settlement {
        self.settled().await
    }

    /// Like [`ChannelReader::settle`] but borrowing, so it can be raced in
    /// `select!` and retried. Must not be polled again once it resolved.
    pub async fn settled(&mut self) -> Settlement {
        match (&mut self.done).await {
            Ok(snapshot) => Settlement::Completed(snapshot),
            Err(_) => Settlement::Abandoned,
        }
    }

    /// The settlement, if the writer already completed or went away.
    pub fn try_settle(&mut self) -> Option<Settlement> {
        match self.done.try_recv() {
            Ok(snapshot) => Some(Settlement::Completed(snapshot)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Settlement::Abandoned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_taken_at_completion() {
        let (mut writer, reader) = state_channel();
        writer.set_error(Some("transient".into()));
        writer.set_output(Some("aGk=".into()));
        writer.set_error(None);
        writer.set_progress(100);
        assert!(writer.complete());

        // Later updates never reach the reader.
        writer.set_output(Some("Ynll".into()));
        writer.set_error(Some("late".into()));

        let settlement = reader.settle().await;
        assert_eq!(
            settlement,
            Settlement::Completed(ChannelSnapshot {
                output: Some("aGk=".into()),
                error: None,
                progress: Some(100),
            })
        );
    }

    #[tokio::test]
    async fn test_drop_without_completion_abandons() {
        let (mut writer, reader) = state_channel();
        writer.set_output(Some("aGk=".into()));
        drop(writer);
        assert_eq!(reader.settle().await, Settlement::Abandoned);
    }

    #[tokio::test]
    async fn test_settle_waits_for_other_task() {
        let (mut writer, reader) = state_channel();
        let task = tokio::spawn(async move {
            tokio::task::yield_now().await;
            writer.set_output(Some("aGk=".into()));
            writer.complete();
        });
        let settlement = reader.settle().await;
        task.await.unwrap();
        assert!(matches!(settlement, Settlement::Completed(s) if s.output.as_deref() == Some("aGk=")));
    }

    #[test]
    fn test_try_settle() {
        let (mut writer, mut reader) = state_channel();
        assert_eq!(reader.try_settle(), None);
        writer.set_output(Some("aGk=".into()));
        writer.complete();
        assert!(matches!(reader.try_settle(), Some(Settlement::Completed(s)) if s.output.as_deref() == Some("aGk=")));

        let (writer, mut reader) = state_channel();
        drop(writer);
        assert_eq!(reader.try_settle(), Some(Settlement::Abandoned));
    }

    #[test]
    fn test_complete_fires_once() {
        let (mut writer, _reader) = state_channel();
        assert!(writer.complete());
        assert!(!writer.complete());
        assert!(writer.is_completed());
    }

    #[test]
    fn test_progress_coalesces_to_latest() {
        let (mut writer, reader) = state_channel();
        let mut progress = reader.progress();
        writer.set_progress(10);
        writer.set_progress(55);
        writer.set_progress(250);
        assert!(progress.has_changed().unwrap());
        assert_eq!(*progress.borrow_and_update(), Some(100));
        assert!(!progress.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_named_fields() {
        let (mut writer, reader) = state_channel();
        writer.set_state_value("output", &json!("aGk=")).unwrap();
        writer.set_state_value("error", &json!(null)).unwrap();
        writer.set_state_value("progress", &json!(42.6)).unwrap();
        writer.set_trigger_value("complete", &json!(true)).unwrap();

        let Settlement::Completed(snapshot) = reader.settle().await else {
            panic!("expected completion");
        };
        assert_eq!(snapshot.output.as_deref(), Some("aGk="));
        assert_eq!(snapshot.progress, Some(43));
    }

    #[test]
    fn test_named_field_errors() {
        let (mut writer, _reader) = state_channel();
        assert_eq!(
            writer.set_state_value("status", &json!("x")),
            Err(ChannelFieldError::UnknownState("status".into()))
        );
        assert!(matches!(
            writer.set_state_value("output", &json!(12)),
            Err(ChannelFieldError::WrongType { field: "output", .. })
        ));
        assert!(matches!(
            writer.set_trigger_value("done", &json!(true)),
            Err(ChannelFieldError::UnknownTrigger(_))
        ));
    }
}
