//! Launch log sinks.
//!
//! Operators diagnose failed launches from the launch log, so every state
//! transition of the connector and bootstrapper is written here as a plain
//! line, independently of any `tracing` subscriber.

use std::io::Write;
use std::sync::Mutex;

/// Append-only line writer for progress and diagnostic messages.
pub trait LaunchLog: Send + Sync {
    /// Appends one line.
    fn line(&self, message: &str);
}

/// Writes each line to an [`std::io::Write`] target.
///
/// Write failures are ignored: losing a log line must never fail a launch.
#[derive(Debug)]
pub struct WriterLog<W> {
    target: Mutex<W>,
}

impl<W: Write + Send> WriterLog<W> {
    /// Wraps `target`.
    #[must_use]
    pub const fn new(target: W) -> Self {
        Self {
            target: Mutex::new(target),
        }
    }

    /// Returns the wrapped writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.target
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> LaunchLog for WriterLog<W> {
    fn line(&self, message: &str) {
        if let Ok(mut target) = self.target.lock() {
            writeln!(target, "{message}").ok();
        }
    }
}

/// Forwards each line to `tracing` under the `winlaunch::launch` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLog;

impl LaunchLog for TracingLog {
    fn line(&self, message: &str) {
        tracing::info!(target: "winlaunch::launch", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn writer_log_appends_lines() {
        let log = WriterLog::new(Vec::new());
        log.line("first");
        log.line("second");

        let rendered = String::from_utf8(log.into_inner()).expect("utf8");
        assert_eq!(rendered, "first\nsecond\n");
    }

    #[derive(Clone, Default)]
    struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("capture lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tracing_log_emits_info_event_under_launch_target() {
        let captured = CapturedOutput::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let log: Arc<dyn LaunchLog> = Arc::new(TracingLog);
            log.line("Connected with WinRM.");
        });

        let rendered = String::from_utf8(captured.0.lock().expect("capture lock").clone())
            .expect("utf8");
        assert!(rendered.contains("INFO"), "rendered: {rendered}");
        assert!(
            rendered.contains("winlaunch::launch: Connected with WinRM."),
            "rendered: {rendered}"
        );
    }
}
