//! Streams generated text straight off a `llama-cli` child's stdout.

use crate::error::{SpawnError, StreamError, StreamResult};
use crate::io_struct::CliHealth;
use crate::stream::{ChunkStream, StreamGuard};
use futures::future;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

pub const DEFAULT_MAX_TOKENS: i32 = 256;

#[derive(Debug, Clone)]
pub struct CliBackend {
    pub program: PathBuf,
    pub model_path: String,
    pub default_max_tokens: i32,
}

impl CliBackend {
    pub fn new(program: impl Into<PathBuf>, model_path: impl Into<String>) -> Self {
        CliBackend {
            program: program.into(),
            model_path: model_path.into(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn args(&self, prompt: &str, max_tokens: i32) -> Vec<String> {
        vec![
            "-m".to_string(),
            self.model_path.clone(),
            "-p".to_string(),
            prompt.to_string(),
            "-n".to_string(),
            max_tokens.to_string(),
            "--no-display-prompt".to_string(),
            "-r".to_string(),
            "1".to_string(),
            "--ignore-eos".to_string(),
        ]
    }

    fn spawn(&self, prompt: &str, max_tokens: i32) -> Result<(Child, ChildStdout), SpawnError> {
        let spawn_error = |source| SpawnError {
            program: self.program.display().to_string(),
            source,
        };
        let mut child = Command::new(&self.program)
            .args(self.args(prompt, max_tokens))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdout was not captured")))?;
        Ok((child, stdout))
    }

    /// Reports configuration only; the binary is not invoked.
    pub fn health(&self) -> CliHealth {
        CliHealth {
            status: "ok",
            model: self.model_path.clone(),
            default_max_tokens: self.default_max_tokens,
        }
    }

    /// One item per character of generated text. The child is spawned on first
    /// poll and killed if the stream is dropped early.
    pub fn stream(&self, prompt: &str, max_tokens: i32) -> ChunkStream {
        let backend = self.clone();
        let prompt = prompt.to_string();
        stream::once(async move { backend.spawn(&prompt, max_tokens) })
            .flat_map(|spawned| match spawned {
                Ok((child, stdout)) => char_stream(child, stdout),
                Err(e) => stream::once(future::ready(Err(StreamError::from(e)))).boxed(),
            })
            .boxed()
    }
}

/// Incremental UTF-8 decoding that holds back an incomplete trailing sequence.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    partial: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.partial.extend_from_slice(bytes);
        let mut out = String::new();
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.partial[start..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    start = self.partial.len();
                    break;
                }
                Err(e) => {
                    let valid_end = start + e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.partial[start..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid_end + len;
                        }
                        None => {
                            start = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.partial.drain(..start);
        out
    }

    /// Flushes a sequence the stream ended in the middle of.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.partial);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

struct CharReader {
    child: Child,
    stdout: ChildStdout,
    decoder: Utf8Decoder,
    pending: VecDeque<char>,
    eof: bool,
    guard: StreamGuard,
}

impl CharReader {
    async fn next_chunk(&mut self) -> Option<StreamResult<String>> {
        let mut buf = [0u8; 256];
        loop {
            if let Some(c) = self.pending.pop_front() {
                return Some(Ok(c.to_string()));
            }
            if self.eof {
                self.reap().await;
                self.guard.finish();
                return None;
            }
            match self.stdout.read(&mut buf).await {
                Ok(0) => {
                    self.eof = true;
                    self.pending.extend(self.decoder.finish().chars());
                }
                Ok(n) => self.pending.extend(self.decoder.push(&buf[..n]).chars()),
                Err(e) => {
                    self.guard.finish();
                    if let Err(kill_err) = self.child.start_kill() {
                        warn!("Failed to kill llama-cli after read error: {}", kill_err);
                    }
                    return Some(Err(StreamError::Read(e)));
                }
            }
        }
    }

    async fn reap(&mut self) {
        match self.child.wait().await {
            Ok(status) if status.success() => info!("llama-cli finished"),
            Ok(status) => warn!("llama-cli exited with {}", status),
            Err(e) => warn!("Failed to wait for llama-cli: {}", e),
        }
    }
}

fn char_stream(child: Child, stdout: ChildStdout) -> ChunkStream {
    let reader = CharReader {
        child,
        stdout,
        decoder: Utf8Decoder::default(),
        pending: VecDeque::new(),
        eof: false,
        guard: StreamGuard::new("llama-cli"),
    };
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match reader.next_chunk().await {
            Some(Ok(text)) => Some((Ok(text), Some(reader))),
            // Dropping the reader here releases the killed child.
            Some(Err(e)) => Some((Err(e), None)),
            None => None,
        }
    })
    .boxed()
}
