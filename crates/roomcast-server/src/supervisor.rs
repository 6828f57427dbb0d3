//! Task supervision, error aggregation and coordinated shutdown.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use roomcast_core::{ErrorReport, ErrorReporter, ReportReceiver, error_channel};
use roomcast_settings::SupervisorSettings;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// What started the shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl-C or another external signal.
    ExternalSignal,
    /// A component sent a report on the error channel, or a task panicked.
    ComponentFailure,
    /// Every supervised task finished on its own.
    AllTasksExited,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExternalSignal => "external signal",
            Self::ComponentFailure => "component failure",
            Self::AllTasksExited => "all tasks exited",
        };
        f.write_str(name)
    }
}

/// Outcome of [`Supervisor::run`].
#[derive(Debug)]
pub struct ShutdownSummary {
    /// What started the shutdown.
    pub trigger: ShutdownTrigger,
    /// Every report collected, in arrival order.
    pub reports: Vec<ErrorReport>,
    /// Whether tasks had to be aborted after the shutdown timeout.
    pub timed_out: bool,
}

/// Owns every long-running task and the receiving end of the error channel.
///
/// Tasks get a child of one root [`CancellationToken`]. The first report on
/// the error channel (after a grace window that collects follow-up reports)
/// or the external signal cancels the root; `run` then waits for each task's
/// cleanup, aborting whatever is left after the shutdown timeout.
///
/// Client sessions are spawned by the HTTP server rather than here. They are
/// tracked through [`session_tracker`](Self::session_tracker) and waited for
/// within the same timeout.
pub struct Supervisor {
    token: CancellationToken,
    reporter: ErrorReporter,
    reports: ReportReceiver,
    tasks: JoinSet<()>,
    names: HashMap<Id, String>,
    sessions: TaskTracker,
    error_grace: Duration,
    shutdown_timeout: Duration,
}

impl Supervisor {
    /// Create a supervisor with its own error channel.
    pub fn new(error_grace: Duration, shutdown_timeout: Duration) -> Self {
        let (reporter, reports) = error_channel();
        Self {
            token: CancellationToken::new(),
            reporter,
            reports,
            tasks: JoinSet::new(),
            names: HashMap::new(),
            sessions: TaskTracker::new(),
            error_grace,
            shutdown_timeout,
        }
    }

    /// Create a supervisor from settings.
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.error_grace_ms),
            Duration::from_millis(settings.shutdown_timeout_ms),
        )
    }

    /// Root token. Cancelling it starts the shutdown sequence.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A reporter for the shared error channel.
    pub fn reporter(&self) -> ErrorReporter {
        self.reporter.clone()
    }

    /// Tracker for tasks spawned outside the supervisor that shutdown must
    /// still wait for.
    pub fn session_tracker(&self) -> TaskTracker {
        self.sessions.clone()
    }

    /// Number of tasks still tracked.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Spawn a supervised task. It receives a child token of the root.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = self.tasks.spawn(task(self.token.child_token()));
        debug!(task = %name, "task spawned");
        let _ = self.names.insert(handle.id(), name);
    }

    /// Supervise until `signal` resolves, a component fails, or every task
    /// exits; then shut down and return what happened.
    pub async fn run<S>(self, signal: S) -> ShutdownSummary
    where
        S: Future<Output = ()>,
    {
        let Self {
            token,
            reporter,
            mut reports,
            mut tasks,
            mut names,
            sessions,
            error_grace,
            shutdown_timeout,
        } = self;
        // Only tasks keep the channel open from here on
        drop(reporter);
        tokio::pin!(signal);

        let mut collected = Vec::new();
        let mut reports_open = true;
        let trigger = loop {
            if tasks.is_empty() {
                break ShutdownTrigger::AllTasksExited;
            }
            tokio::select! {
                biased;
                () = &mut signal => {
                    info!("shutdown signal received");
                    break ShutdownTrigger::ExternalSignal;
                }
                () = token.cancelled() => {
                    info!("root token cancelled");
                    break ShutdownTrigger::ExternalSignal;
                }
                report = reports.recv(), if reports_open => match report {
                    Some(report) => {
                        error!(component = %report.component, title = %report.title, error = %report.error, "component failed");
                        collected.push(report);
                        break ShutdownTrigger::ComponentFailure;
                    }
                    None => reports_open = false,
                },
                Some(joined) = tasks.join_next_with_id() => {
                    if let Some(report) = task_finished(&mut names, joined) {
                        collected.push(report);
                        break ShutdownTrigger::ComponentFailure;
                    }
                }
            }
        };

        if trigger == ShutdownTrigger::ComponentFailure {
            debug!(grace = ?error_grace, "waiting for follow-up reports");
            tokio::time::sleep(error_grace).await;
            collected.extend(drain_logged(&mut reports));
        }

        info!(
            %trigger,
            tasks = tasks.len(),
            sessions = sessions.len(),
            timeout = ?shutdown_timeout,
            "shutting down"
        );
        token.cancel();
        let _ = sessions.close();

        let drain = async {
            while let Some(joined) = tasks.join_next_with_id().await {
                if let Some(report) = task_finished(&mut names, joined) {
                    collected.push(report);
                }
            }
            sessions.wait().await;
        };
        let timed_out = tokio::time::timeout(shutdown_timeout, drain).await.is_err();
        if timed_out {
            for name in names.values() {
                warn!(task = %name, "task did not stop in time, aborting");
            }
            if !sessions.is_empty() {
                warn!(sessions = sessions.len(), "sessions still closing at shutdown timeout");
            }
            tasks.shutdown().await;
        }

        collected.extend(drain_logged(&mut reports));
        info!(%trigger, reports = collected.len(), timed_out, "shutdown complete");
        ShutdownSummary {
            trigger,
            reports: collected,
            timed_out,
        }
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("tasks", &self.tasks.len())
            .field("sessions", &self.sessions.len())
            .field("error_grace", &self.error_grace)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Log a finished task. A panic becomes a report.
fn task_finished(
    names: &mut HashMap<Id, String>,
    joined: Result<(Id, ()), tokio::task::JoinError>,
) -> Option<ErrorReport> {
    match joined {
        Ok((id, ())) => {
            let name = names.remove(&id).unwrap_or_default();
            info!(task = %name, "task finished");
            None
        }
        Err(err) => {
            let name = names.remove(&err.id()).unwrap_or_default();
            if err.is_cancelled() {
                debug!(task = %name, "task cancelled");
                return None;
            }
            error!(task = %name, error = %err, "task panicked");
            Some(ErrorReport {
                component: name,
                title: "Task Panicked".to_owned(),
                error: Box::new(err),
            })
        }
    }
}

fn drain_logged(reports: &mut ReportReceiver) -> Vec<ErrorReport> {
    let late = reports.drain();
    for report in &late {
        error!(component = %report.component, title = %report.title, error = %report.error, "additional failure");
    }
    late
}
