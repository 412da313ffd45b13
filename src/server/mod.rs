pub mod connection;
pub mod handlers;
pub mod hub;
pub mod registry;
pub mod relay;
pub mod ws;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::ai::{AiProvider, ChatCompletionsClient};
use crate::auth::{JwtValidator, TokenValidator};
use crate::config::Config;
use crate::store::{FileStore, MessageStore};
use hub::Hub;
use relay::{AiIdentity, StreamRelay, TurnGate};

/// Everything a request handler needs.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub relay: StreamRelay,
    pub turns: TurnGate,
    pub store: Arc<dyn MessageStore>,
    pub validator: Arc<dyn TokenValidator>,
    pub ai: Arc<dyn AiProvider>,
    pub ping_interval: Option<Duration>,
}

/// The external services the hub leans on.
pub struct Collaborators {
    pub store: Arc<dyn MessageStore>,
    pub validator: Arc<dyn TokenValidator>,
    pub ai: Arc<dyn AiProvider>,
}

pub struct Server {
    state: AppState,
    hub_task: JoinHandle<()>,
}

impl Server {
    /// Builds a server with the file store, JWT validator and HTTP AI client.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let collaborators = Collaborators {
            store: Arc::new(FileStore::new(&config.data_dir)?),
            validator: Arc::new(JwtValidator::new(&config.jwt_secret)),
            ai: Arc::new(ChatCompletionsClient::new(
                &config.ai_api_url,
                &config.ai_api_key,
            )?),
        };
        Self::with_collaborators(config, collaborators)
    }

    /// Spawns the hub; must be called inside a tokio runtime.
    pub fn with_collaborators(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let (hub, hub_task) = Hub::spawn(config.hub());
        let relay = StreamRelay::new(hub.clone(), config.relay(), AiIdentity::default())?;
        let state = AppState {
            hub,
            relay,
            turns: TurnGate::new(),
            store: collaborators.store,
            validator: collaborators.validator,
            ai: collaborators.ai,
            ping_interval: config.ping_interval,
        };
        Ok(Self { state, hub_task })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Serves until `shutdown` resolves, then shuts the hub down so every
    /// attached connection is closed.
    pub async fn listen_and_serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        let hub = self.state.hub.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutting down");
                hub.shutdown().await;
            })
            .await?;
        self.hub_task.await.ok();
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/rooms/{id}/chat/ws", get(ws::ws_handler))
        .route(
            "/api/v1/rooms/{id}/messages",
            post(handlers::create_message).get(handlers::list_messages),
        )
        .route("/api/v1/rooms/{id}/ai", post(handlers::ai_prompt))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
