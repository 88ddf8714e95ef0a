//! Process lifecycle
//!
//! Builds every shared component once, binds both listeners, then runs until
//! a termination signal. Shutdown order:
//!
//! 1. print stats (when enabled), so the numbers reflect the live sessions
//! 2. fire the shutdown token: the HTTP server's graceful-shutdown hook closes
//!    the chat room, the RTMP listener stops accepting and every connection
//!    task leaves its `select!`
//! 3. wait for the servers, bounded by `shutdown_timeout`

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::chat::{ChatConfig, ChatError, ChatRoom};
use crate::cli::Args;
use crate::http::{HttpConfig, HttpServer};
use crate::ingest::{IngestConfig, IngestServer};
use crate::relay::{RelayConfig, StreamRegistry};
use crate::settings::{Settings, SettingsError};
use crate::shutdown::{self, ShutdownTrigger};
use crate::stats::StreamStats;

/// Failures that stop the process
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("unable to load settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("unable to create chat room: {0}")]
    ChatInit(#[from] ChatError),

    #[error("unable to start {what} server on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0} server stopped before shutdown was requested")]
    ServerExited(&'static str),
}

impl StartupError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Settings(_) | StartupError::ChatInit(_) => 1,
            StartupError::Bind { .. } | StartupError::ServerExited(_) => 2,
        }
    }
}

/// A fully started gateway, listeners bound but not yet serving
pub struct App {
    settings: Settings,
    stats: Arc<StreamStats>,
    registry: Arc<StreamRegistry>,
    chat: Arc<ChatRoom>,
    http: HttpServer,
    http_listener: TcpListener,
    ingest: IngestServer<StreamRegistry>,
    ingest_listener: TcpListener,
    trigger: ShutdownTrigger,
    shutdown_timeout: Duration,
}

impl App {
    /// Load settings, apply command-line overrides and bind both listeners
    pub async fn build(args: Args) -> Result<Self, StartupError> {
        let mut settings = Settings::load(&args.settings_path)?;
        crate::logging::init(&settings.log_level);

        if settings.ensure_admin_password() {
            settings.save()?;
            tracing::info!(path = %settings.path().display(), "Generated admin password");
        }
        if let Some(key) = args.stream_key {
            settings.set_temp_key(key);
        }

        let http_config = HttpConfig::from_settings(&settings, args.listen.as_deref())?;
        let ingest_config = IngestConfig::with_addr(settings.ingest_addr()?);

        tracing::info!(stream_key = %settings.effective_stream_key(), "Stream key");
        tracing::info!(admin_password = %settings.admin_password, "Admin password");

        Self::with_configs(settings, http_config, ingest_config, RelayConfig::default()).await
    }

    /// Build from explicit configs, bypassing address resolution from the
    /// settings
    pub async fn with_configs(
        settings: Settings,
        http_config: HttpConfig,
        ingest_config: IngestConfig,
        relay_config: RelayConfig,
    ) -> Result<Self, StartupError> {
        let stats = Arc::new(StreamStats::new());
        let registry = Arc::new(StreamRegistry::new(
            settings.effective_stream_key(),
            relay_config,
            Arc::clone(&stats),
        ));
        let chat = Arc::new(ChatRoom::new(
            ChatConfig::default(),
            &settings,
            Arc::clone(&stats),
        )?);

        let (trigger, token) = shutdown::channel();

        let http_addr = http_config.bind_addr;
        let http = HttpServer::new(http_config, Arc::clone(&chat), Arc::clone(&registry), token);
        let http_listener = http.bind().await.map_err(|e| StartupError::Bind {
            what: "HTTP",
            addr: http_addr,
            source: Box::new(e),
        })?;

        let ingest_addr = ingest_config.bind_addr;
        let ingest = IngestServer::new(ingest_config, Arc::clone(&registry), Arc::clone(&stats));
        let ingest_listener = ingest.bind().await.map_err(|e| StartupError::Bind {
            what: "RTMP",
            addr: ingest_addr,
            source: Box::new(e),
        })?;

        Ok(Self {
            settings,
            stats,
            registry,
            chat,
            http,
            http_listener,
            ingest,
            ingest_listener,
            trigger,
            shutdown_timeout: Duration::from_secs(5),
        })
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn http_addr(&self) -> std::io::Result<SocketAddr> {
        self.http_listener.local_addr()
    }

    pub fn ingest_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingest_listener.local_addr()
    }

    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn chat(&self) -> &Arc<ChatRoom> {
        &self.chat
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn run(self) -> Result<(), StartupError> {
        self.run_until(wait_for_signal()).await
    }

    /// Serve until `signal` resolves, then shut down gracefully
    ///
    /// A server stopping on its own also shuts the rest down, and is reported
    /// as [`StartupError::ServerExited`].
    pub async fn run_until<F>(self, signal: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()>,
    {
        let App {
            settings,
            stats,
            http,
            http_listener,
            ingest,
            ingest_listener,
            trigger,
            shutdown_timeout,
            ..
        } = self;

        let mut http_task: JoinHandle<std::io::Result<()>> =
            tokio::spawn(http.serve(http_listener));

        let ingest_token = trigger.subscribe();
        let mut ingest_task = tokio::spawn(async move {
            if let Err(e) = ingest.serve(ingest_listener, ingest_token).await {
                tracing::error!(error = %e, "RTMP server failed");
            }
        });

        let stop = wait_for_stop(signal, &mut http_task, &mut ingest_task).await;

        if settings.stream_stats {
            stats.print();
        }

        trigger.trigger();

        let drained = tokio::time::timeout(shutdown_timeout, async {
            if !http_task.is_finished() {
                log_http_exit((&mut http_task).await);
            }
            if !ingest_task.is_finished() {
                let _ = (&mut ingest_task).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::info!("Shutdown complete"),
            Err(_) => tracing::error!(
                timeout_ms = shutdown_timeout.as_millis() as u64,
                "Servers did not shut down in time"
            ),
        }

        match stop {
            Stop::Signal => Ok(()),
            Stop::ServerExited(what) => Err(StartupError::ServerExited(what)),
        }
    }
}

/// Why serving ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Signal,
    ServerExited(&'static str),
}

/// Wait for the shutdown signal or for either server task to end on its own
///
/// A finished task is not polled again afterwards; callers check
/// `is_finished` before awaiting it.
async fn wait_for_stop<F>(
    signal: F,
    http_task: &mut JoinHandle<std::io::Result<()>>,
    ingest_task: &mut JoinHandle<()>,
) -> Stop
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = signal => {
            tracing::info!("Closing server");
            Stop::Signal
        }
        result = http_task => {
            log_http_exit(result);
            tracing::error!("HTTP server exited before shutdown was requested");
            Stop::ServerExited("HTTP")
        }
        _ = ingest_task => {
            tracing::error!("RTMP server exited before shutdown was requested");
            Stop::ServerExited("RTMP")
        }
    }
}

fn log_http_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => tracing::debug!("HTTP server stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Error shutting down HTTP server"),
        Err(e) => tracing::error!(error = %e, "HTTP server task failed"),
    }
}

/// Resolve on SIGINT, or SIGTERM where supported
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unable to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
