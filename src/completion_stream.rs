//! Streams generated text out of llama-server's `/completion` endpoint.

use crate::error::{MalformedChunk, StreamError, StreamResult};
use crate::io_struct::{CompletionChunk, CompletionRequest};
use crate::stream::{ChunkStream, StreamGuard};
use bytes::Bytes;
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use log::debug;
use std::collections::VecDeque;

const DATA_PREFIX: &str = "data: ";

/// `Ok(None)` for lines that carry no text: non-data lines and events with a
/// missing or empty `content`.
pub fn parse_event_line(line: &str) -> Result<Option<String>, MalformedChunk> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(None);
    };
    let chunk: CompletionChunk = serde_json::from_str(payload)?;
    Ok(chunk.content.filter(|content| !content.is_empty()))
}

/// Splits a byte stream into lines, keeping any partial line for the next push.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    // Bytes of `buf` already known to contain no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start + self.scanned..]
            .iter()
            .position(|&b| b == b'\n')
        {
            let end = start + self.scanned + offset;
            lines.push(Self::decode(&self.buf[start..end]));
            start = end + 1;
            self.scanned = 0;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        self.scanned = 0;
        Some(Self::decode(&raw))
    }

    fn decode(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

struct EventReader {
    body: BoxStream<'static, StreamResult<Bytes>>,
    lines: LineBuffer,
    pending: VecDeque<String>,
    done: bool,
    guard: StreamGuard,
}

impl EventReader {
    fn absorb(&mut self, line: String) {
        match parse_event_line(&line) {
            Ok(Some(content)) => self.pending.push_back(content),
            Ok(None) => {}
            Err(e) => debug!("Skipping backend line {:?}: {}", line, e),
        }
    }

    async fn next_chunk(&mut self) -> Option<StreamResult<String>> {
        loop {
            if let Some(content) = self.pending.pop_front() {
                return Some(Ok(content));
            }
            if self.done {
                self.guard.finish();
                return None;
            }
            match self.body.next().await {
                Some(Ok(bytes)) => {
                    for line in self.lines.push(&bytes) {
                        self.absorb(line);
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    self.guard.finish();
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    if let Some(line) = self.lines.finish() {
                        self.absorb(line);
                    }
                }
            }
        }
    }
}

/// Extracts `content` fields from an event-stream body.
pub fn content_stream<S, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<StreamError>,
{
    let reader = EventReader {
        body: body.map(|r| r.map_err(Into::into)).boxed(),
        lines: LineBuffer::default(),
        pending: VecDeque::new(),
        done: false,
        guard: StreamGuard::new("completion"),
    };
    stream::unfold(reader, |mut reader| async move {
        reader.next_chunk().await.map(|item| (item, reader))
    })
    .boxed()
}

/// Nothing is sent until the returned stream is first polled.
pub fn stream_completion(
    client: reqwest::Client,
    url: String,
    request: CompletionRequest,
) -> ChunkStream {
    let connect = async move {
        let res = client.post(&url).json(&request).send().await?;
        if !res.status().is_success() {
            return Err(StreamError::BackendStatus(res.status()));
        }
        Ok::<_, StreamError>(res.bytes_stream())
    };
    stream::once(connect)
        .flat_map(|connected| match connected {
            Ok(body) => content_stream(body),
            Err(e) => stream::once(future::ready(Err(e))).boxed(),
        })
        .boxed()
}
