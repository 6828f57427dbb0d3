//! The broker consumer task.
//!
//! Connects with bounded retry, then moves deliveries from the broker to the
//! distribution queue. A delivery is acked only once it sits on the queue;
//! bodies that fail to decode are rejected without requeue.

use std::time::Duration;

use roomcast_core::{DistributionMessage, ErrorReporter};
use roomcast_settings::RetrySettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::decoder::MessageDecoder;
use crate::errors::BrokerError;
use crate::session::{BrokerConnector, BrokerSession, Topology};

const COMPONENT: &str = "broker-consumer";

/// How long a stopping consumer lets an in-flight connect finish so the
/// session can be closed instead of dropped.
const CONNECT_ABANDON_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed-delay bounded retry for connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up. At least 1.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff: Duration::from_millis(settings.backoff_ms),
        }
    }
}

enum Connect {
    Ready(Box<dyn BrokerSession>),
    Exhausted(BrokerError),
    Cancelled,
}

enum SessionEnd {
    Lost(BrokerError),
    QueueClosed,
    Cancelled,
}

/// Moves broker deliveries onto the distribution queue.
pub struct BrokerConsumer<C, D> {
    connector: C,
    decoder: D,
    topology: Topology,
    retry: RetryPolicy,
    queue: mpsc::Sender<DistributionMessage>,
    reporter: ErrorReporter,
}

impl<C: BrokerConnector, D: MessageDecoder> BrokerConsumer<C, D> {
    /// Create a consumer. Nothing happens until [`run`](Self::run).
    pub fn new(
        connector: C,
        decoder: D,
        topology: Topology,
        retry: RetryPolicy,
        queue: mpsc::Sender<DistributionMessage>,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            connector,
            decoder,
            topology,
            retry,
            queue,
            reporter,
        }
    }

    /// Consume until cancelled or until a failure ends the component.
    ///
    /// Fatal outcomes are sent on the error channel: `"Error Consume"` when
    /// the retry budget runs out, `"Running Consume"` when the distribution
    /// queue is gone.
    #[instrument(skip_all, fields(queue = %self.topology.queue))]
    pub async fn run(self, token: CancellationToken) {
        loop {
            let session = match self.connect_with_retry(&token).await {
                Connect::Ready(session) => session,
                Connect::Cancelled => {
                    debug!("consumer cancelled before connecting");
                    return;
                }
                Connect::Exhausted(err) => {
                    error!(error = %err, "broker unreachable, giving up");
                    self.reporter.report(COMPONENT, "Error Consume", err);
                    return;
                }
            };

            match self.consume(session, &token).await {
                SessionEnd::Cancelled => {
                    info!("broker consumer stopped");
                    return;
                }
                SessionEnd::QueueClosed => {
                    error!("distribution queue closed, stopping consumer");
                    self.reporter
                        .report(COMPONENT, "Running Consume", BrokerError::QueueClosed);
                    return;
                }
                SessionEnd::Lost(err) => {
                    warn!(error = %err, "broker session lost, reconnecting");
                }
            }
        }
    }

    async fn connect_with_retry(&self, token: &CancellationToken) -> Connect {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let connect = self.connector.connect(&self.topology);
            tokio::pin!(connect);
            let result = tokio::select! {
                biased;
                () = token.cancelled() => {
                    match tokio::time::timeout(CONNECT_ABANDON_TIMEOUT, &mut connect).await {
                        Ok(Ok(mut session)) => {
                            debug!("closing session opened during shutdown");
                            session.close().await;
                        }
                        Ok(Err(_)) => {}
                        Err(_) => warn!("abandoning broker connect still in progress"),
                    }
                    return Connect::Cancelled;
                }
                result = &mut connect => result,
            };

            match result {
                Ok(session) => {
                    debug!(attempt, "broker session open");
                    return Connect::Ready(session);
                }
                Err(err) if attempt >= self.retry.max_attempts => {
                    return Connect::Exhausted(BrokerError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        backoff_ms = u64::try_from(self.retry.backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "broker connection failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Connect::Cancelled,
                        () = tokio::time::sleep(self.retry.backoff) => {}
                    }
                }
            }
        }
    }

    async fn consume(
        &self,
        mut session: Box<dyn BrokerSession>,
        token: &CancellationToken,
    ) -> SessionEnd {
        let end = loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => break SessionEnd::Cancelled,
                next = session.next_delivery() => next,
            };
            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => break SessionEnd::Lost(err),
                None => break SessionEnd::Lost(BrokerError::Stream("delivery stream ended".into())),
            };
            let tag = delivery.delivery_tag;
            metrics::counter!("broker_messages_total").increment(1);

            let message = match self.decoder.decode(&delivery.body) {
                Ok(message) => message,
                Err(err) => {
                    warn!(delivery_tag = tag, error = %err, "undecodable broker message, rejecting");
                    metrics::counter!("broker_messages_rejected_total").increment(1);
                    if let Err(err) = session.reject(tag, false).await {
                        break SessionEnd::Lost(err);
                    }
                    continue;
                }
            };
            debug!(delivery_tag = tag, action = %message.action, "broker message decoded");

            // Unacked deliveries go back to the queue when the channel closes.
            let pushed = tokio::select! {
                biased;
                () = token.cancelled() => break SessionEnd::Cancelled,
                pushed = self.queue.send(message) => pushed,
            };
            if pushed.is_err() {
                if let Err(err) = session.reject(tag, true).await {
                    warn!(delivery_tag = tag, error = %err, "requeue after queue close failed");
                }
                break SessionEnd::QueueClosed;
            }
            if let Err(err) = session.ack(tag).await {
                break SessionEnd::Lost(err);
            }
        };

        session.close().await;
        end
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use roomcast_core::error_channel;
    use tokio::time::Instant;

    use super::*;
    use crate::decoder::JsonDecoder;
    use crate::errors::Result;
    use crate::session::Delivery;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Ack(u64),
        Reject(u64, bool),
        Closed,
    }

    enum Step {
        Deliver(u64, &'static str),
        Fail,
        End,
    }

    enum Plan {
        Refuse,
        Open(Vec<Step>),
        Slow(Duration, Vec<Step>),
        Hang,
    }

    #[derive(Clone)]
    struct ScriptedConnector {
        plans: Arc<Mutex<VecDeque<Plan>>>,
        attempts: Arc<AtomicU32>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl ScriptedConnector {
        fn new(plans: Vec<Plan>) -> Self {
            Self {
                plans: Arc::new(Mutex::new(plans.into())),
                attempts: Arc::new(AtomicU32::new(0)),
                events: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrokerConnector for ScriptedConnector {
        async fn connect(&self, _topology: &Topology) -> Result<Box<dyn BrokerSession>> {
            let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
            let plan = self.plans.lock().unwrap().pop_front();
            let steps = match plan {
                Some(Plan::Open(steps)) => steps,
                Some(Plan::Slow(delay, steps)) => {
                    tokio::time::sleep(delay).await;
                    steps
                }
                Some(Plan::Hang) => futures::future::pending().await,
                Some(Plan::Refuse) | None => return Err(BrokerError::Connect("connection refused".into())),
            };
            Ok(Box::new(ScriptedSession {
                steps: steps.into(),
                events: Arc::clone(&self.events),
            }))
        }
    }

    struct ScriptedSession {
        steps: VecDeque<Step>,
        events: Arc<Mutex<Vec<Event>>>,
    }

    #[async_trait]
    impl BrokerSession for ScriptedSession {
        async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
            match self.steps.pop_front() {
                Some(Step::Deliver(tag, body)) => Some(Ok(Delivery {
                    delivery_tag: tag,
                    body: body.as_bytes().to_vec(),
                })),
                Some(Step::Fail) => Some(Err(BrokerError::Stream("channel closed by broker".into()))),
                Some(Step::End) => None,
                None => futures::future::pending().await,
            }
        }

        async fn ack(&mut self, delivery_tag: u64) -> Result<()> {
            self.events.lock().unwrap().push(Event::Ack(delivery_tag));
            Ok(())
        }

        async fn reject(&mut self, delivery_tag: u64, requeue: bool) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Reject(delivery_tag, requeue));
            Ok(())
        }

        async fn close(&mut self) {
            self.events.lock().unwrap().push(Event::Closed);
        }
    }

    const UPDATE: &str = r#"{"action":"test update","data":"hello"}"#;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(5_000),
        }
    }

    fn consumer(
        connector: ScriptedConnector,
        capacity: usize,
    ) -> (
        BrokerConsumer<ScriptedConnector, JsonDecoder>,
        mpsc::Receiver<DistributionMessage>,
        roomcast_core::ReportReceiver,
    ) {
        let (tx, rx) = mpsc::channel(capacity);
        let (reporter, reports) = error_channel();
        let topology = Topology::from_settings(&roomcast_settings::BrokerSettings::default());
        let consumer = BrokerConsumer::new(connector, JsonDecoder, topology, policy(), tx, reporter);
        (consumer, rx, reports)
    }

    #[test]
    fn policy_from_settings() {
        let p = RetryPolicy::from(&RetrySettings::default());
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff, Duration::from_secs(5));
    }

    #[test]
    fn policy_never_zero_attempts() {
        let settings = RetrySettings {
            max_attempts: 0,
            backoff_ms: 10,
        };
        assert_eq!(RetryPolicy::from(&settings).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_after_retry_ceiling() {
        let connector = ScriptedConnector::new(vec![]);
        let (consumer, _rx, mut reports) = consumer(connector.clone(), 8);

        let start = Instant::now();
        consumer.run(CancellationToken::new()).await;

        assert_eq!(connector.attempts(), 3);
        // two backoffs between three attempts
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(start.elapsed() < Duration::from_secs(11));
        let report = reports.recv().await.unwrap();
        assert_eq!(report.component, "broker-consumer");
        assert_eq!(report.title, "Error Consume");
        assert!(report.error.to_string().contains("3 connection attempts"));
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn session_opened_while_stopping_is_closed() {
        let connector = ScriptedConnector::new(vec![Plan::Slow(Duration::from_millis(500), vec![])]);
        let (consumer, _rx, mut reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(connector.attempts(), 1);
        assert_eq!(connector.events(), vec![Event::Closed]);
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_connect_is_abandoned_on_cancel() {
        let connector = ScriptedConnector::new(vec![Plan::Hang]);
        let (consumer, _rx, mut reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let start = Instant::now();
        token.cancel();
        handle.await.unwrap();

        assert!(start.elapsed() >= CONNECT_ABANDON_TIMEOUT);
        assert!(start.elapsed() < CONNECT_ABANDON_TIMEOUT + Duration::from_millis(10));
        assert!(connector.events().is_empty());
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn acks_after_enqueue() {
        let connector = ScriptedConnector::new(vec![
            Plan::Refuse,
            Plan::Open(vec![Step::Deliver(1, UPDATE), Step::Deliver(2, UPDATE)]),
        ]);
        let (consumer, mut rx, mut reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.action, "test update");
        assert_eq!(first.data, serde_json::json!("hello"));
        let _second = rx.recv().await.unwrap();

        token.cancel();
        handle.await.unwrap();

        assert_eq!(connector.attempts(), 2);
        assert_eq!(
            connector.events(),
            vec![Event::Ack(1), Event::Ack(2), Event::Closed]
        );
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_message_rejected_without_requeue() {
        let connector = ScriptedConnector::new(vec![Plan::Open(vec![
            Step::Deliver(1, "not json"),
            Step::Deliver(2, UPDATE),
        ])]);
        let (consumer, mut rx, _reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.action, "test update");
        token.cancel();
        handle.await.unwrap();

        assert_eq!(
            connector.events(),
            vec![Event::Reject(1, false), Event::Ack(2), Event::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lost_stream_reconnects_with_fresh_budget() {
        let connector = ScriptedConnector::new(vec![
            Plan::Open(vec![Step::Fail]),
            Plan::Refuse,
            Plan::Refuse,
            Plan::Open(vec![Step::Deliver(7, UPDATE)]),
        ]);
        let (consumer, mut rx, mut reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.action, "test update");
        token.cancel();
        handle.await.unwrap();

        assert_eq!(connector.attempts(), 4);
        assert_eq!(
            connector.events(),
            vec![Event::Closed, Event::Ack(7), Event::Closed]
        );
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ended_stream_reconnects() {
        let connector = ScriptedConnector::new(vec![
            Plan::Open(vec![Step::End]),
            Plan::Open(vec![Step::Deliver(3, UPDATE)]),
        ]);
        let (consumer, mut rx, _reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        let _msg = rx.recv().await.unwrap();
        token.cancel();
        handle.await.unwrap();
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_queue_requeues_and_reports() {
        let connector = ScriptedConnector::new(vec![Plan::Open(vec![Step::Deliver(5, UPDATE)])]);
        let (consumer, rx, mut reports) = consumer(connector.clone(), 8);
        drop(rx);

        consumer.run(CancellationToken::new()).await;

        assert_eq!(connector.events(), vec![Event::Reject(5, true), Event::Closed]);
        let report = reports.recv().await.unwrap();
        assert_eq!(report.title, "Running Consume");
        assert_eq!(report.error.to_string(), "distribution queue closed");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_closes_session() {
        let connector = ScriptedConnector::new(vec![Plan::Open(vec![])]);
        let (consumer, _rx, mut reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(connector.events(), vec![Event::Closed]);
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let connector = ScriptedConnector::new(vec![]);
        let (consumer, _rx, mut reports) = consumer(connector.clone(), 8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(connector.attempts(), 1);
        assert!(reports.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_waits_without_acking() {
        let connector = ScriptedConnector::new(vec![Plan::Open(vec![
            Step::Deliver(1, UPDATE),
            Step::Deliver(2, UPDATE),
        ])]);
        let (consumer, mut rx, _reports) = consumer(connector.clone(), 1);
        let token = CancellationToken::new();
        let handle = tokio::spawn(consumer.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        // capacity 1: second delivery is blocked on the push
        assert_eq!(connector.events(), vec![Event::Ack(1)]);

        let _ = rx.recv().await.unwrap();
        let _ = rx.recv().await.unwrap();
        token.cancel();
        handle.await.unwrap();
        assert_eq!(
            connector.events(),
            vec![Event::Ack(1), Event::Ack(2), Event::Closed]
        );
    }
}
