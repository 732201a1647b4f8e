pub mod cli_stream;
pub mod completion_stream;
pub mod error;
pub mod io_struct;
pub mod logging;
pub mod prompt;
pub mod proxy_state;
pub mod server;
pub mod stream;
pub mod supervisor;

use anyhow::Context;
pub use proxy_state::{BackendMode, ProxyConfig, ProxyState};
use server::startup;

pub struct Relay {
    config: ProxyConfig,
}

impl Relay {
    pub fn new(config: ProxyConfig) -> Self {
        Relay { config }
    }

    /// Blocks until the HTTP server shuts down (Ctrl+C or SIGTERM).
    pub fn start(&self) -> anyhow::Result<()> {
        let proxy_state =
            ProxyState::new(&self.config).context("Failed to build relay state")?;

        actix_web::rt::System::new()
            .block_on(startup(self.config.clone(), proxy_state))
            .with_context(|| {
                format!(
                    "Relay server on {}:{} failed",
                    self.config.host, self.config.port
                )
            })
    }
}
