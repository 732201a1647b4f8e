// Shared by several integration test binaries; not every binary uses every helper.
#![allow(dead_code)]

pub mod mock_backend;

use llama_relay_rs::supervisor::{BackendLaunch, BackendSupervisor, SupervisorConfig};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Writes an executable `/bin/sh` script standing in for a llama.cpp binary.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A launch that runs a shell snippet instead of llama-server.
pub fn shell_launch(script: &str) -> BackendLaunch {
    BackendLaunch {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        log_file: None,
    }
}

pub fn missing_launch() -> BackendLaunch {
    BackendLaunch {
        program: PathBuf::from("/nonexistent/llama-server"),
        args: vec![],
        log_file: None,
    }
}

/// Supervisor against `backend_url` with a fast poll loop.
pub fn fast_supervisor(backend_url: &str, launch: BackendLaunch, max_polls: u32) -> BackendSupervisor {
    let config = SupervisorConfig {
        health_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(20),
        max_polls,
        ..SupervisorConfig::new(backend_url, launch)
    };
    BackendSupervisor::new(config, reqwest::Client::new())
}

/// Port nothing is listening on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}
