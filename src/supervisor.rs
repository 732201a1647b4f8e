//! Keeps a single llama-server process alive behind the relay.
//!
//! Liveness is never cached: every call probes the backend's `/health`
//! endpoint. Starting the backend is single-flight: a burst of first requests
//! launches at most one process and every caller awaits that one attempt.

use crate::error::{HealthError, SpawnError};
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};

/// How to launch the backend process.
#[derive(Debug, Clone)]
pub struct BackendLaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// stdout and stderr of the backend are appended here; discarded if unset.
    pub log_file: Option<PathBuf>,
}

impl BackendLaunch {
    pub fn llama_server(
        binary: impl Into<PathBuf>,
        model_path: &str,
        port: u16,
        log_file: Option<PathBuf>,
    ) -> Self {
        let port = port.to_string();
        let args = [
            "-m",
            model_path,
            "--port",
            port.as_str(),
            "--host",
            "127.0.0.1",
            "--n-predict",
            "512",
            "--ctx-size",
            "2048",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        BackendLaunch {
            program: binary.into(),
            args,
            log_file,
        }
    }

    fn spawn_error(&self, source: std::io::Error) -> SpawnError {
        SpawnError {
            program: self.program.display().to_string(),
            source,
        }
    }

    fn output_stdio(&self) -> Result<(Stdio, Stdio), SpawnError> {
        match &self.log_file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| self.spawn_error(e))?;
                let err_file = file.try_clone().map_err(|e| self.spawn_error(e))?;
                Ok((Stdio::from(file), Stdio::from(err_file)))
            }
            None => Ok((Stdio::null(), Stdio::null())),
        }
    }

    pub fn spawn(&self) -> Result<Child, SpawnError> {
        let (stdout, stderr) = self.output_stdio()?;
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub health_url: String,
    pub launch: BackendLaunch,
    pub health_timeout: Duration,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl SupervisorConfig {
    pub fn new(backend_url: &str, launch: BackendLaunch) -> Self {
        SupervisorConfig {
            health_url: format!("{}/health", backend_url.trim_end_matches('/')),
            launch,
            health_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            max_polls: 120,
        }
    }
}

type StartAttempt = Shared<BoxFuture<'static, bool>>;

struct SupervisorInner {
    config: SupervisorConfig,
    client: reqwest::Client,
    // Cleared by the attempt itself once it resolves.
    attempt: Mutex<Option<StartAttempt>>,
    child: Mutex<Option<Child>>,
}

#[derive(Clone)]
pub struct BackendSupervisor {
    inner: Arc<SupervisorInner>,
}

impl fmt::Debug for BackendSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSupervisor")
            .field("config", &self.inner.config)
            .field("pid", &self.tracked_pid())
            .finish_non_exhaustive()
    }
}

impl BackendSupervisor {
    pub fn new(config: SupervisorConfig, client: reqwest::Client) -> Self {
        BackendSupervisor {
            inner: Arc::new(SupervisorInner {
                config,
                client,
                attempt: Mutex::new(None),
                child: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub async fn check_health(&self) -> Result<(), HealthError> {
        let res = self
            .inner
            .client
            .get(&self.inner.config.health_url)
            .timeout(self.inner.config.health_timeout)
            .send()
            .await?;
        if res.status().is_success() {
            Ok(())
        } else {
            Err(HealthError::BadStatus(res.status()))
        }
    }

    /// Returns once the backend answers its health check, starting it first if
    /// nothing is running. `false` means the poll budget ran out. Callers that
    /// arrive while a start attempt is in flight get that attempt's result.
    pub async fn ensure_ready(&self) -> bool {
        if self.check_health().await.is_ok() {
            return true;
        }
        self.start_attempt().await
    }

    fn start_attempt(&self) -> StartAttempt {
        let mut slot = self.lock_attempt();
        if let Some(attempt) = slot.as_ref() {
            debug!("Joining llama-server start attempt in flight");
            return attempt.clone();
        }
        let supervisor = self.clone();
        let attempt = async move { supervisor.start_and_wait().await }
            .boxed()
            .shared();
        *slot = Some(attempt.clone());
        attempt
    }

    async fn start_and_wait(&self) -> bool {
        // A previous attempt may have brought the backend up just before this one.
        let ready = if self.check_health().await.is_ok() {
            true
        } else {
            self.start_if_stopped();
            self.wait_until_healthy().await
        };
        self.lock_attempt().take();
        ready
    }

    fn start_if_stopped(&self) {
        if self.child_running() {
            info!("llama-server process is running but not healthy yet, waiting");
            return;
        }
        info!("Starting llama-server...");
        match self.inner.config.launch.spawn() {
            Ok(child) => {
                info!("llama-server launched with pid {:?}", child.id());
                self.set_child(Some(child));
            }
            // An externally managed backend may still come up, so keep polling.
            Err(e) => error!("{}", e),
        }
    }

    /// Sleeps then probes, exactly `max_polls` times.
    pub async fn wait_until_healthy(&self) -> bool {
        let config = &self.inner.config;
        for attempt in 1..=config.max_polls {
            tokio::time::sleep(config.poll_interval).await;
            match self.check_health().await {
                Ok(()) => {
                    info!("llama-server is up!");
                    return true;
                }
                Err(e) => debug!(
                    "llama-server not ready ({}/{}): {}",
                    attempt, config.max_polls, e
                ),
            }
        }
        warn!(
            "llama-server did not become healthy after {} checks",
            config.max_polls
        );
        false
    }

    /// Pid of the backend process this supervisor launched, if it is still tracked.
    pub fn tracked_pid(&self) -> Option<u32> {
        self.lock_child().as_ref().and_then(|child| child.id())
    }

    /// Kills and reaps the tracked backend process.
    pub async fn shutdown(&self) {
        self.lock_attempt().take();
        let child = self.lock_child().take();
        if let Some(mut child) = child {
            info!("Stopping llama-server (pid {:?})", child.id());
            if let Err(e) = child.kill().await {
                warn!("Failed to stop llama-server: {}", e);
            }
        }
    }

    fn lock_attempt(&self) -> std::sync::MutexGuard<'_, Option<StartAttempt>> {
        self.inner
            .attempt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.inner
            .child
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_child(&self, child: Option<Child>) {
        *self.lock_child() = child;
    }

    fn child_running(&self) -> bool {
        let mut guard = self.lock_child();
        let Some(child) = guard.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!("llama-server exited with {}", status);
                *guard = None;
                false
            }
            Err(e) => {
                warn!("Failed to poll llama-server process: {}", e);
                *guard = None;
                false
            }
        }
    }
}
