use clap::Parser;
use llama_relay_rs::logging::init_logging;
use llama_relay_rs::prompt::{DEFAULT_CLI_SYSTEM_PROMPT, DEFAULT_SERVER_SYSTEM_PROMPT};
use llama_relay_rs::{BackendMode, ProxyConfig, Relay};
use log::LevelFilter;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SERVER_MODEL: &str = "/opt/models/model.gguf";
const DEFAULT_CLI_MODEL: &str = "/opt/models/qwen-burmese.Q4_K_M.gguf";

#[derive(Parser, Debug)]
#[command(name = "llama-relay", about = "Streaming chat relay in front of llama.cpp")]
struct CliArgs {
    /// Which llama.cpp backend to relay to
    #[arg(long, value_enum, default_value_t = BackendMode::Server)]
    mode: BackendMode,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Model weights; defaults depend on --mode
    #[arg(long)]
    model_path: Option<String>,

    /// System turn of the chat template; defaults depend on --mode
    #[arg(long)]
    system_prompt: Option<String>,

    #[arg(long, default_value = "/opt/llama.cpp/build/bin/llama-server")]
    llama_server: PathBuf,

    #[arg(long, default_value_t = 8080)]
    backend_port: u16,

    /// Where the supervised llama-server writes its output
    #[arg(long, default_value = "/root/llama.log")]
    backend_log: PathBuf,

    /// Health checks to wait for llama-server after starting it
    #[arg(long, default_value_t = 120)]
    startup_polls: u32,

    #[arg(long, default_value_t = 1)]
    poll_interval_secs: u64,

    #[arg(long, default_value_t = 5)]
    health_timeout_secs: u64,

    #[arg(long, default_value = "/opt/llama.cpp/build/bin/llama-cli")]
    llama_cli: PathBuf,

    /// Token limit for /chat/stream requests that set none; -1 generates until a stop condition
    #[arg(long, default_value_t = 256, allow_negative_numbers = true)]
    default_max_tokens: i32,

    /// Relay logs are appended here
    #[arg(long, default_value = "/root/api.log")]
    log_file: PathBuf,

    /// Log to stderr instead of --log-file
    #[arg(long)]
    log_to_stderr: bool,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

impl CliArgs {
    fn log_target(&self) -> Option<&Path> {
        (!self.log_to_stderr).then_some(self.log_file.as_path())
    }

    fn into_config(self) -> ProxyConfig {
        let (default_model, default_prompt) = match self.mode {
            BackendMode::Server => (DEFAULT_SERVER_MODEL, DEFAULT_SERVER_SYSTEM_PROMPT),
            BackendMode::Cli => (DEFAULT_CLI_MODEL, DEFAULT_CLI_SYSTEM_PROMPT),
        };
        ProxyConfig {
            host: self.host,
            port: self.port,
            mode: self.mode,
            model_path: self.model_path.unwrap_or_else(|| default_model.to_string()),
            system_prompt: self
                .system_prompt
                .unwrap_or_else(|| default_prompt.to_string()),
            llama_server: self.llama_server,
            backend_port: self.backend_port,
            backend_log: Some(self.backend_log),
            startup_polls: self.startup_polls,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            llama_cli: self.llama_cli,
            default_max_tokens: self.default_max_tokens,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.log_target())?;
    Relay::new(args.into_config()).start()
}
