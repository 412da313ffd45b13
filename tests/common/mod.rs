//! Shared fixtures for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use roomcast::ai::{AiProvider, AiReply, AiRequest, Usage};
use roomcast::auth::JwtValidator;
use roomcast::config::Config;
use roomcast::error::{AiError, StoreError};
use roomcast::protocol::{Envelope, StoredMessage};
use roomcast::server::{Collaborators, Server};
use roomcast::store::{FileStore, MessageStore};

pub const SECRET: &str = "test-secret";

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Answers every prompt with fixed text, or fails when `None`.
pub struct CannedAi(pub Option<String>);

#[async_trait]
impl AiProvider for CannedAi {
    async fn complete(&self, _request: &AiRequest) -> Result<AiReply, AiError> {
        match &self.0 {
            Some(text) => Ok(AiReply {
                text: text.clone(),
                model: "canned".to_string(),
                usage: Usage::default(),
            }),
            None => Err(AiError::Upstream {
                status: 500,
                body: "provider exploded".to_string(),
            }),
        }
    }
}

/// Answers with the prompt itself after `delay`.
pub struct EchoAi {
    pub delay: Duration,
}

#[async_trait]
impl AiProvider for EchoAi {
    async fn complete(&self, request: &AiRequest) -> Result<AiReply, AiError> {
        tokio::time::sleep(self.delay).await;
        Ok(AiReply {
            text: request.prompt.clone(),
            model: "echo".to_string(),
            usage: Usage::default(),
        })
    }
}

/// A store whose disk is always full.
pub struct BrokenStore;

#[async_trait]
impl MessageStore for BrokenStore {
    async fn create(
        &self,
        _room: &str,
        _user: &str,
        _text: &str,
    ) -> Result<StoredMessage, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn list(
        &self,
        _room: &str,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }
}

pub struct TestApp {
    pub server: Server,
    pub router: Router,
    jwt: JwtValidator,
    _dir: TempDir,
}

pub fn test_app(ai_answer: Option<&str>) -> TestApp {
    test_app_with_ai(CannedAi(ai_answer.map(str::to_string)))
}

pub fn test_app_with_ai(ai: impl AiProvider + 'static) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    build(dir, store, Arc::new(ai))
}

pub fn test_app_with_broken_store(ai_answer: Option<&str>) -> TestApp {
    let ai = Arc::new(CannedAi(ai_answer.map(str::to_string)));
    build(tempfile::tempdir().unwrap(), Arc::new(BrokenStore), ai)
}

fn build(dir: TempDir, store: Arc<dyn MessageStore>, ai: Arc<dyn AiProvider>) -> TestApp {
    let config = Config {
        jwt_secret: SECRET.to_string(),
        chunk_size: 5,
        chunk_delay: Duration::ZERO,
        ping_interval: None,
        ..Config::default()
    };
    let collaborators = Collaborators {
        store,
        validator: Arc::new(JwtValidator::new(SECRET)),
        ai,
    };
    let server = Server::with_collaborators(&config, collaborators).unwrap();
    let router = server.router();
    TestApp {
        server,
        router,
        jwt: JwtValidator::new(SECRET),
        _dir: dir,
    }
}

impl TestApp {
    pub fn token(&self, user: &str) -> String {
        self.jwt.issue(user, Duration::from_secs(600)).unwrap()
    }

    /// Serves the router on an ephemeral port.
    pub async fn listen(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

pub async fn join(addr: SocketAddr, room: &str, token: &str) -> Ws {
    let url = format!("ws://{addr}/api/v1/rooms/{room}/chat/ws?token={token}");
    let (ws, _) = connect_async(url.as_str()).await.unwrap();
    ws
}

pub async fn next_envelope(ws: &mut Ws) -> Envelope {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Asserts nothing arrives for a short while.
pub async fn assert_quiet(ws: &mut Ws) {
    let got = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "unexpected frame: {got:?}");
}
