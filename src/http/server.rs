//! HTTP and websocket server
//!
//! One axum router serves the chat websocket, the pages and the static
//! assets. Graceful shutdown waits on the process shutdown token and then
//! shuts the chat room down, which releases every websocket.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use super::{pages, ws};
use crate::chat::ChatRoom;
use crate::relay::StreamRegistry;
use crate::settings::{Settings, SettingsError};
use crate::shutdown::Shutdown;

/// HTTP listener options
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_addr: SocketAddr,
    pub page_title: String,
    pub static_dir: PathBuf,
    pub emotes_dir: PathBuf,
    /// A websocket must send its join frame within this time
    pub join_timeout: Duration,
    /// Deadline for one websocket write
    pub write_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8089)),
            page_title: "Live".into(),
            static_dir: PathBuf::from("static"),
            emotes_dir: PathBuf::from("static/emotes"),
            join_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpConfig {
    /// Settings with an optional listen address override from the command line
    pub fn from_settings(settings: &Settings, listen: Option<&str>) -> Result<Self, SettingsError> {
        let bind_addr = match listen {
            Some(addr) => crate::settings::parse_addr(addr)?,
            None => settings.listen_addr()?,
        };
        Ok(Self {
            bind_addr,
            page_title: settings.page_title.clone(),
            static_dir: settings.static_dir.clone(),
            emotes_dir: settings.emotes_dir.clone(),
            ..Default::default()
        })
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<HttpConfig>,
    pub chat: Arc<ChatRoom>,
    pub registry: Arc<StreamRegistry>,
    pub shutdown: Shutdown,
}

pub struct HttpServer {
    state: HttpState,
}

impl HttpServer {
    pub fn new(
        config: HttpConfig,
        chat: Arc<ChatRoom>,
        registry: Arc<StreamRegistry>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            state: HttpState {
                config: Arc::new(config),
                chat,
                registry,
                shutdown,
            },
        }
    }

    pub fn router(&self) -> Router {
        let config = &self.state.config;

        Router::new()
            .route("/", get(pages::landing))
            .route("/ws", get(ws::ws_handler))
            .route("/chat", get(pages::chat))
            .route("/video", get(pages::video))
            .route("/help", get(pages::help))
            .route_service("/favicon.ico", ServeFile::new(config.static_dir.join("favicon.ico")))
            .nest_service("/static", ServeDir::new(&config.static_dir))
            .nest_service("/emotes", ServeDir::new(&config.emotes_dir))
            .fallback(pages::not_found)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
        Ok(listener)
    }

    /// Serve until the shutdown token fires, then close the chat room
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let router = self.router();
        let mut shutdown = self.state.shutdown.clone();
        let chat = Arc::clone(&self.state.chat);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            chat.shutdown().await;
        })
        .await?;

        tracing::debug!("HTTP server closed");
        Ok(())
    }
}
