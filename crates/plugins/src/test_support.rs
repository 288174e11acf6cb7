//! In-process webhook receiver for delivery tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Instant,
};

use {
    axum::{
        Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
        routing::post,
    },
    serde_json::Value,
};

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub raw: Vec<u8>,
    pub at: Instant,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> &str {
        self.headers.get(name).map_or("", String::as_str)
    }
}

#[derive(Default)]
struct Recorder {
    received: Vec<ReceivedRequest>,
    /// Statuses to answer with, in order; 200 once exhausted.
    script: VecDeque<u16>,
    successes: usize,
}

pub struct TestReceiver {
    pub url: String,
    state: Arc<Mutex<Recorder>>,
}

impl TestReceiver {
    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn successes(&self) -> usize {
        self.state.lock().unwrap().successes
    }
}

async fn record(
    State(state): State<Arc<Mutex<Recorder>>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let mut recorder = state.lock().unwrap();
    recorder.received.push(ReceivedRequest {
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        raw: body.to_vec(),
        at: Instant::now(),
    });
    match recorder.script.pop_front() {
        Some(code) => (
            StatusCode::from_u16(code).unwrap(),
            "scripted failure",
        ),
        None => {
            recorder.successes += 1;
            (StatusCode::OK, "ok")
        },
    }
}

/// Start a receiver on an ephemeral port. Each request is answered with the
/// next status in `script`, then 200.
pub async fn spawn_receiver(script: Vec<u16>) -> TestReceiver {
    let state = Arc::new(Mutex::new(Recorder {
        script: script.into(),
        ..Recorder::default()
    }));
    let app = Router::new()
        .route("/hook", post(record))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestReceiver {
        url: format!("http://{addr}/hook"),
        state,
    }
}
