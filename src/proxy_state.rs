use crate::cli_stream::CliBackend;
use crate::completion_stream::stream_completion;
use crate::io_struct::{BackendStatus, CompletionRequest, ServerHealth};
use crate::prompt::{ChatTemplate, IM_END};
use crate::stream::ChunkStream;
use crate::supervisor::{BackendLaunch, BackendSupervisor, SupervisorConfig};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendMode {
    /// Supervised llama-server reached over HTTP.
    Server,
    /// One llama-cli child process per request.
    Cli,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub mode: BackendMode,
    pub model_path: String,
    pub system_prompt: String,
    pub llama_server: PathBuf,
    pub backend_port: u16,
    pub backend_log: Option<PathBuf>,
    pub startup_polls: u32,
    pub poll_interval: Duration,
    pub health_timeout: Duration,
    pub llama_cli: PathBuf,
    pub default_max_tokens: i32,
}

impl ProxyConfig {
    pub fn backend_url(&self) -> String {
        format!("http://localhost:{}", self.backend_port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerBackend {
    pub supervisor: BackendSupervisor,
    pub client: reqwest::Client,
    pub completion_url: String,
}

impl ServerBackend {
    pub fn new(backend_url: &str, supervisor: BackendSupervisor, client: reqwest::Client) -> Self {
        ServerBackend {
            supervisor,
            client,
            completion_url: format!("{}/completion", backend_url.trim_end_matches('/')),
        }
    }

    pub async fn health(&self) -> ServerHealth {
        ServerHealth {
            status: "ok",
            llama: BackendStatus::from(self.supervisor.ensure_ready().await),
        }
    }

    /// Generation is attempted even when the backend never became ready; the
    /// failure then surfaces in-band.
    pub async fn generate(&self, prompt: String, n_predict: Option<i32>) -> ChunkStream {
        if !self.supervisor.ensure_ready().await {
            warn!("llama-server is not ready, forwarding request anyway");
        }
        let request = CompletionRequest::streaming(prompt, vec![IM_END.to_string()], n_predict);
        stream_completion(self.client.clone(), self.completion_url.clone(), request)
    }
}

#[derive(Debug, Clone)]
pub enum Backend {
    Server(ServerBackend),
    Cli(CliBackend),
}

#[derive(Debug, Clone)]
pub struct ProxyState {
    pub backend: Backend,
    pub template: ChatTemplate,
}

impl ProxyState {
    pub fn new(config: &ProxyConfig) -> anyhow::Result<Self> {
        let backend = match config.mode {
            BackendMode::Server => {
                // Generation streams have no deadline; health probes set their own.
                let client = reqwest::Client::builder().build()?;
                let launch = BackendLaunch::llama_server(
                    config.llama_server.clone(),
                    &config.model_path,
                    config.backend_port,
                    config.backend_log.clone(),
                );
                let backend_url = config.backend_url();
                let supervisor_config = SupervisorConfig {
                    health_timeout: config.health_timeout,
                    poll_interval: config.poll_interval,
                    max_polls: config.startup_polls,
                    ..SupervisorConfig::new(&backend_url, launch)
                };
                let supervisor = BackendSupervisor::new(supervisor_config, client.clone());
                Backend::Server(ServerBackend::new(&backend_url, supervisor, client))
            }
            BackendMode::Cli => Backend::Cli(CliBackend {
                program: config.llama_cli.clone(),
                model_path: config.model_path.clone(),
                default_max_tokens: config.default_max_tokens,
            }),
        };
        Ok(ProxyState {
            backend,
            template: ChatTemplate::new(config.system_prompt.clone()),
        })
    }

    pub fn mode(&self) -> BackendMode {
        match self.backend {
            Backend::Server(_) => BackendMode::Server,
            Backend::Cli(_) => BackendMode::Cli,
        }
    }

    pub fn server(&self) -> Option<&ServerBackend> {
        match &self.backend {
            Backend::Server(server) => Some(server),
            Backend::Cli(_) => None,
        }
    }

    pub fn cli(&self) -> Option<&CliBackend> {
        match &self.backend {
            Backend::Cli(cli) => Some(cli),
            Backend::Server(_) => None,
        }
    }

    /// Stops the supervised backend process, if this relay started one.
    pub async fn shutdown(&self) {
        if let Backend::Server(server) = &self.backend {
            info!("Shutting down supervised backend");
            server.supervisor.shutdown().await;
        }
    }
}
