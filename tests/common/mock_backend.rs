use actix_web::dev::ServerHandle;
use actix_web::{App, HttpResponse, HttpServer, web};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock answers `GET /health`.
#[derive(Clone, Debug)]
pub enum HealthMode {
    /// 200 on every call.
    Healthy,
    /// 503 for the first `n` calls, 200 afterwards.
    HealthyAfter(usize),
    /// 503 forever.
    Unhealthy,
    /// 200 only once the given file exists.
    WhenFileExists(PathBuf),
    /// Sleeps before answering 200.
    Slow(Duration),
}

/// How the mock answers `POST /completion`.
#[derive(Clone, Debug)]
pub enum CompletionMode {
    /// Sends each line followed by `\n` as its own body frame.
    Lines(Vec<String>),
    /// Sends the lines, then aborts the connection mid-body.
    LinesThenAbort(Vec<String>),
    /// Replies with the given status and an empty body.
    Status(u16),
    /// Sends one content event every `interval` until the client goes away.
    Endless(Duration),
}

#[derive(Clone, Debug)]
pub struct MockBackendConfig {
    pub health: HealthMode,
    pub completion: CompletionMode,
}

impl MockBackendConfig {
    pub fn healthy_with_lines(lines: &[&str]) -> Self {
        MockBackendConfig {
            health: HealthMode::Healthy,
            completion: CompletionMode::Lines(lines.iter().map(|l| l.to_string()).collect()),
        }
    }

    pub fn with_health(health: HealthMode) -> Self {
        MockBackendConfig {
            health,
            completion: CompletionMode::Lines(vec![]),
        }
    }
}

struct MockState {
    config: MockBackendConfig,
    health_hits: Arc<AtomicUsize>,
    completion_requests: Arc<Mutex<Vec<Value>>>,
    frames_sent: Arc<AtomicUsize>,
}

/// A scripted stand-in for llama-server.
pub struct MockBackend {
    pub url: String,
    health_hits: Arc<AtomicUsize>,
    completion_requests: Arc<Mutex<Vec<Value>>>,
    frames_sent: Arc<AtomicUsize>,
    handle: ServerHandle,
}

impl MockBackend {
    pub async fn start(config: MockBackendConfig) -> Self {
        let health_hits = Arc::new(AtomicUsize::new(0));
        let completion_requests = Arc::new(Mutex::new(Vec::new()));
        let frames_sent = Arc::new(AtomicUsize::new(0));
        let state = web::Data::new(MockState {
            config,
            health_hits: health_hits.clone(),
            completion_requests: completion_requests.clone(),
            frames_sent: frames_sent.clone(),
        });

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .route("/health", web::get().to(health_handler))
                .route("/completion", web::post().to(completion_handler))
        })
        .workers(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        MockBackend {
            url: format!("http://127.0.0.1:{}", port),
            health_hits,
            completion_requests,
            frames_sent,
            handle,
        }
    }

    pub fn health_hits(&self) -> usize {
        self.health_hits.load(Ordering::SeqCst)
    }

    /// Body frames produced by `CompletionMode::Endless` so far.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::SeqCst)
    }

    pub fn completion_requests(&self) -> Vec<Value> {
        self.completion_requests.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

async fn health_handler(state: web::Data<MockState>) -> HttpResponse {
    let seen = state.health_hits.fetch_add(1, Ordering::SeqCst);
    let healthy = match &state.config.health {
        HealthMode::Healthy => true,
        HealthMode::HealthyAfter(n) => seen >= *n,
        HealthMode::Unhealthy => false,
        HealthMode::WhenFileExists(path) => path.exists(),
        HealthMode::Slow(delay) => {
            tokio::time::sleep(*delay).await;
            true
        }
    };
    if healthy {
        HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
    } else {
        HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({"error": {"message": "Loading model"}}))
    }
}

async fn completion_handler(state: web::Data<MockState>, body: web::Json<Value>) -> HttpResponse {
    state
        .completion_requests
        .lock()
        .unwrap()
        .push(body.into_inner());

    let frames = |lines: &[String]| -> Vec<Result<Bytes, actix_web::Error>> {
        lines
            .iter()
            .map(|line| Ok(Bytes::from(format!("{}\n", line))))
            .collect()
    };

    match &state.config.completion {
        CompletionMode::Lines(lines) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .streaming(stream::iter(frames(lines))),
        CompletionMode::LinesThenAbort(lines) => {
            // Pause before failing so the earlier frames are flushed to the client.
            let abort = stream::once(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(actix_web::error::ErrorInternalServerError("backend crashed"))
            });
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .streaming(stream::iter(frames(lines)).chain(abort))
        }
        CompletionMode::Endless(interval) => {
            let interval = *interval;
            let frames_sent = state.frames_sent.clone();
            let ticks = stream::unfold(frames_sent, move |frames_sent| async move {
                tokio::time::sleep(interval).await;
                frames_sent.fetch_add(1, Ordering::SeqCst);
                let frame = Bytes::from_static(b"data: {\"content\":\"tick\"}\n");
                Some((Ok::<_, actix_web::Error>(frame), frames_sent))
            });
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .streaming(ticks)
        }
        CompletionMode::Status(code) => {
            HttpResponse::build(actix_web::http::StatusCode::from_u16(*code).unwrap()).finish()
        }
    }
}
