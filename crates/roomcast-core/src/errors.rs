//! The shared error channel.
//!
//! Every long-running component holds an [`ErrorReporter`] and sends one
//! [`ErrorReport`] when it hits an error it cannot recover from. The
//! supervisor owns the single [`ReportReceiver`] and is the only place where
//! a report turns into a process-wide shutdown.

use std::fmt;

use tokio::sync::mpsc;
use tracing::warn;

/// Boxed error carried inside a report.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A fatal error raised by one component.
#[derive(Debug)]
pub struct ErrorReport {
    /// Component that produced the report, e.g. `"broker-consumer"`.
    pub component: String,
    /// Short title of the failing step, e.g. `"Error Consume"`.
    pub title: String,
    /// The underlying error.
    pub error: BoxError,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {} | {}", self.component, self.title, self.error)
    }
}

/// Create the error channel: one reporter to clone into components, one
/// receiver for the supervisor.
pub fn error_channel() -> (ErrorReporter, ReportReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ErrorReporter { tx }, ReportReceiver { rx })
}

/// Sending half of the error channel. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ErrorReporter {
    /// Send a report. Never blocks.
    ///
    /// If the supervisor is already gone the report is logged instead.
    pub fn report(
        &self,
        component: impl Into<String>,
        title: impl Into<String>,
        error: impl Into<BoxError>,
    ) {
        let report = ErrorReport {
            component: component.into(),
            title: title.into(),
            error: error.into(),
        };
        if let Err(mpsc::error::SendError(report)) = self.tx.send(report) {
            warn!(%report, "error channel closed, report dropped");
        }
    }

    /// Whether the supervisor side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the error channel, owned by the supervisor.
#[derive(Debug)]
pub struct ReportReceiver {
    rx: mpsc::UnboundedReceiver<ErrorReport>,
}

impl ReportReceiver {
    /// Wait for the next report. `None` once every reporter is dropped.
    pub async fn recv(&mut self) -> Option<ErrorReport> {
        self.rx.recv().await
    }

    /// Take every report that is already queued without waiting.
    pub fn drain(&mut self) -> Vec<ErrorReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.rx.try_recv() {
            reports.push(report);
        }
        reports
    }
}
