use crate::io_struct::{ChatRequest, RpQuery};
use crate::proxy_state::{Backend, BackendMode, ProxyConfig, ProxyState};
use crate::stream::{CLI_ERROR_MARKER, ChunkStream, SERVER_ERROR_MARKER, into_text_body};
use actix_web::{HttpResponse, HttpServer, get, post, web};
use log::{info, warn};

fn preview(message: &str) -> String {
    message.chars().take(50).collect()
}

fn text_stream(chunks: ChunkStream, error_marker: &'static str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .streaming(into_text_body(chunks, error_marker))
}

/// Server mode probes (and if needed starts) the backend; cli mode only
/// reports its configuration.
#[get("/health")]
pub async fn health(app_state: web::Data<ProxyState>) -> HttpResponse {
    match &app_state.backend {
        Backend::Server(server) => HttpResponse::Ok().json(server.health().await),
        Backend::Cli(cli) => HttpResponse::Ok().json(cli.health()),
    }
}

#[get("/rp")]
pub async fn rp(query: web::Query<RpQuery>, app_state: web::Data<ProxyState>) -> HttpResponse {
    let Some(server) = app_state.server() else {
        return HttpResponse::NotFound().finish();
    };
    let RpQuery {
        user_input,
        max_tokens,
    } = query.into_inner();
    info!("Request: {}...", preview(&user_input));
    let prompt = app_state.template.format(&user_input);
    let chunks = server.generate(prompt, max_tokens).await;
    text_stream(chunks, SERVER_ERROR_MARKER)
}

#[post("/chat/stream")]
pub async fn chat_stream(
    req: web::Json<ChatRequest>,
    app_state: web::Data<ProxyState>,
) -> HttpResponse {
    let Some(cli) = app_state.cli() else {
        return HttpResponse::NotFound().finish();
    };
    let req = req.into_inner();
    let max_tokens = req.max_tokens.unwrap_or(cli.default_max_tokens);
    info!("Request: {}... (max_tokens={})", preview(&req.message), max_tokens);
    let prompt = app_state.template.format(&req.message);
    text_stream(cli.stream(&prompt, max_tokens), CLI_ERROR_MARKER)
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, mode: BackendMode) {
    cfg.service(health);
    match mode {
        BackendMode::Server => cfg.service(rp),
        BackendMode::Cli => cfg.service(chat_stream),
    };
}

async fn serve(config: &ProxyConfig, proxy_state: ProxyState) -> std::io::Result<()> {
    let mode = proxy_state.mode();
    let app_state = web::Data::new(proxy_state);

    info!(
        "Starting server at {}:{} ({:?} mode)",
        config.host, config.port, mode
    );

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(|cfg| configure_routes(cfg, mode))
    })
    .bind((config.host.clone(), config.port))?
    .run()
    .await
}

/// Runs until the HTTP server stops, then tears down the supervised backend.
pub async fn startup(config: ProxyConfig, proxy_state: ProxyState) -> std::io::Result<()> {
    if let Some(server) = proxy_state.server() {
        if server.supervisor.ensure_ready().await {
            info!("llama-server is ready");
        } else {
            warn!("llama-server is not ready, requests will retry the startup");
        }
    }

    let result = serve(&config, proxy_state.clone()).await;
    proxy_state.shutdown().await;
    result
}
