//! Scripted ARM endpoint for driving the HTTP clients over a real socket
//!
//! The server answers every request with the next queued [`Reply`] and
//! records what it received. Once the script runs dry it answers 418, which
//! the client surfaces as a non-retryable ARM error.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use tokio::net::TcpListener;

use crate::arm::ArmClient;
use crate::credential::{AccessToken, CachedCredential, MockTokenSource};

/// Bearer token the scripted client presents
pub const TOKEN: &str = "scripted-token";

/// A request as the server saw it
#[derive(Clone, Debug)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: String,
    pub body: Value,
}

/// A canned response
pub struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Value,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    /// Add a header; `name` must be lowercase
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    received: Vec<Received>,
}

type SharedScript = Arc<Mutex<Script>>;

pub struct ScriptedArm {
    pub base: String,
    script: SharedScript,
}

impl ScriptedArm {
    /// Serve the replies built by `script`, which is handed the server's
    /// base URL so replies can point back at it
    pub async fn start(script: impl FnOnce(&str) -> Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let script = Arc::new(Mutex::new(Script {
            replies: script(&base).into(),
            received: Vec::new(),
        }));

        let app = Router::new()
            .fallback(answer)
            .with_state(script.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base, script }
    }

    pub fn received(&self) -> Vec<Received> {
        self.script.lock().unwrap().received.clone()
    }

    /// `(method, path)` of every request, in arrival order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.received()
            .into_iter()
            .map(|r| (r.method, r.path))
            .collect()
    }

    /// A client pointed at this server that polls every few milliseconds
    pub fn client(&self) -> Arc<ArmClient> {
        let mut source = MockTokenSource::new();
        source.expect_fetch_token().returning(|_| {
            Ok(AccessToken {
                token: TOKEN.to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        });
        let credential = Arc::new(CachedCredential::new(Arc::new(source), "scripted"));
        let client = ArmClient::new(&self.base, credential)
            .unwrap()
            .with_poll_interval(Duration::from_millis(5));
        Arc::new(client)
    }
}

async fn answer(
    State(script): State<SharedScript>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut script = script.lock().unwrap();
    script.received.push(Received {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let Some(reply) = script.replies.pop_front() else {
        return StatusCode::IM_A_TEAPOT.into_response();
    };
    let status = StatusCode::from_u16(reply.status).unwrap();
    let mut response = (status, Json(reply.body)).into_response();
    for (name, value) in reply.headers {
        response.headers_mut().insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(&value).unwrap(),
        );
    }
    response
}
