//! Append-only log channel consumed by the active front end
//!
//! Every status line the engine produces flows through a [`LogSink`]: the
//! monitor, the executor and the facade all hold clones and append
//! concurrently. Lines are timestamped at emit time, so the channel order is
//! completion order. When no front end is listening the lines are dropped;
//! they are still mirrored to `tracing` at debug level for diagnostics.

use chrono::Local;

/// Cloneable producer half of the log channel.
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: async_channel::Sender<String>,
}

/// Create a connected sink/receiver pair.
///
/// The receiver is handed to the front end; dropping it silently disables
/// delivery without affecting the engine.
pub fn channel() -> (LogSink, async_channel::Receiver<String>) {
    let (tx, rx) = async_channel::unbounded();
    (LogSink { tx }, rx)
}

impl LogSink {
    /// Append one timestamp-tagged message. Never blocks, never fails.
    pub fn emit(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!("{message}");

        let stamped = format!("[{}] {message}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        // Unbounded channel: this only errs when the receiver is gone.
        let _ = self.tx.try_send(stamped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_delivers_timestamped_line() {
        let (sink, rx) = channel();
        sink.emit("device detected");

        let line = rx.try_recv().unwrap();
        assert!(line.ends_with("device detected"));
        assert!(line.starts_with('['));
    }

    #[test]
    fn emit_without_receiver_is_silent() {
        let (sink, rx) = channel();
        drop(rx);
        sink.emit("nobody listening");
    }

    #[test]
    fn clones_share_one_channel() {
        let (sink, rx) = channel();
        let other = sink.clone();
        sink.emit("first");
        other.emit("second");

        assert!(rx.try_recv().unwrap().ends_with("first"));
        assert!(rx.try_recv().unwrap().ends_with("second"));
    }
}
