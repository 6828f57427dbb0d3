//! Wiring: builds every component from settings and hands the long-running
//! tasks to the [`Supervisor`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusHandle;
use roomcast_broker::{BrokerConnector, BrokerConsumer, MessageDecoder, RetryPolicy, Topology};
use roomcast_core::ErrorReporter;
use roomcast_settings::GatewaySettings;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth::AuthConfig;
use crate::dispatcher::{FanoutDispatcher, FanoutTransform};
use crate::metrics::detached_handle;
use crate::registry::RoomRegistry;
use crate::rooms::{PublicUpdateTransform, RoomCommandHandler};
use crate::server::{AppState, build_router, serve};
use crate::supervisor::{ShutdownSummary, Supervisor};
use crate::sweep::run_sweep;
use crate::websocket::handler::MessageHandler;
use crate::websocket::session::{SessionContext, SessionLimits};

/// An unstarted gateway.
///
/// Defaults to the public room service ([`RoomCommandHandler`] and
/// [`PublicUpdateTransform`] routing to the first configured room) with no
/// handshake hooks.
pub struct Gateway<C, D> {
    settings: GatewaySettings,
    connector: C,
    decoder: D,
    handler: Arc<dyn MessageHandler>,
    transform: Arc<dyn FanoutTransform>,
    auth: AuthConfig,
    metrics: Option<PrometheusHandle>,
}

impl<C: BrokerConnector, D: MessageDecoder> Gateway<C, D> {
    /// Create a gateway. Settings are assumed validated.
    pub fn new(settings: GatewaySettings, connector: C, decoder: D) -> Self {
        let default_room = settings.rooms.first().cloned().unwrap_or_default();
        let auth = AuthConfig::new().with_forwarding(settings.server.forwarding_enabled);
        Self {
            settings,
            connector,
            decoder,
            handler: Arc::new(RoomCommandHandler),
            transform: Arc::new(PublicUpdateTransform::new(default_room)),
            auth,
            metrics: None,
        }
    }

    /// Replace the client message handler.
    #[must_use]
    pub fn with_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Replace the fanout transform.
    #[must_use]
    pub fn with_transform(mut self, transform: impl FanoutTransform) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Replace the handshake checks. Forwarding mode comes from `auth`.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Serve `/metrics` from an installed recorder.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Bind the listener and spawn every task. Nothing is accepted until
    /// the returned gateway is [run](RunningGateway::run).
    pub async fn start(self) -> std::io::Result<RunningGateway> {
        let Self {
            settings,
            connector,
            decoder,
            handler,
            transform,
            auth,
            metrics,
        } = self;

        let listener = TcpListener::bind(settings.server.bind_addr()).await?;
        let local_addr = listener.local_addr()?;

        let mut supervisor = Supervisor::from_settings(&settings.supervisor);
        let token = supervisor.token();
        let reporter = supervisor.reporter();
        let registry = Arc::new(RoomRegistry::new(settings.rooms.iter().cloned()));
        let (queue_tx, queue_rx) = mpsc::channel(settings.broker.distribution_queue_capacity.max(1));

        let state = AppState {
            auth: Arc::new(auth),
            session: SessionContext {
                registry: Arc::clone(&registry),
                handler,
                reporter: reporter.clone(),
                token: token.clone(),
                tracker: supervisor.session_tracker(),
                limits: SessionLimits::from(&settings.server),
            },
            start_time: Instant::now(),
            metrics: metrics.unwrap_or_else(detached_handle),
            max_message_size: settings.server.max_message_size,
        };
        let router = build_router(state);
        let listener_reporter = reporter.clone();
        supervisor.spawn("listener", move |token| async move {
            if let Err(err) = serve(listener, router, token).await {
                error!(error = %err, "listener failed");
                listener_reporter.report("listener", "Serving", err);
            }
        });

        let sweep_registry = Arc::clone(&registry);
        let sweep_interval = Duration::from_millis(settings.supervisor.sweep_interval_ms);
        supervisor.spawn("liveness-sweep", move |token| {
            run_sweep(sweep_registry, sweep_interval, token)
        });

        let consumer = BrokerConsumer::new(
            connector,
            decoder,
            Topology::from_settings(&settings.broker),
            RetryPolicy::from(&settings.broker.retry),
            queue_tx,
            reporter.clone(),
        );
        supervisor.spawn("broker-consumer", move |token| consumer.run(token));

        let dispatcher = FanoutDispatcher::new(Arc::clone(&registry), transform, queue_rx, reporter);
        supervisor.spawn("fanout-dispatcher", move |token| dispatcher.run(token));

        info!(
            addr = %local_addr,
            rooms = ?registry.rooms(),
            broker = %settings.broker.display_addr(),
            exchange = %settings.broker.exchange,
            queue = %settings.broker.queue,
            "gateway started"
        );

        Ok(RunningGateway {
            supervisor,
            local_addr,
            registry,
        })
    }
}

/// A gateway whose tasks are spawned.
pub struct RunningGateway {
    supervisor: Supervisor,
    local_addr: SocketAddr,
    registry: Arc<RoomRegistry>,
}

impl RunningGateway {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.supervisor.token()
    }

    /// A reporter for the shared error channel.
    pub fn reporter(&self) -> ErrorReporter {
        self.supervisor.reporter()
    }

    /// Run until `signal` resolves or a component fails, then shut down.
    pub async fn run<S>(self, signal: S) -> ShutdownSummary
    where
        S: Future<Output = ()>,
    {
        self.supervisor.run(signal).await
    }
}
