use crate::error::StreamResult;
use bytes::Bytes;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use log::{error, info};
use std::convert::Infallible;

/// Generated text in arrival order. Yields at most one `Err`, always last.
pub type ChunkStream = BoxStream<'static, StreamResult<String>>;

pub const SERVER_ERROR_MARKER: &str = "[Error]";
pub const CLI_ERROR_MARKER: &str = "[Error streaming reply]";

/// Turns a chunk stream into a response body. The first error becomes a
/// single `"<marker> <error>"` text chunk and ends the body.
pub fn into_text_body(
    chunks: ChunkStream,
    error_marker: &'static str,
) -> impl Stream<Item = Result<Bytes, Infallible>> + 'static {
    chunks.scan(false, move |failed, item| {
        if *failed {
            return future::ready(None);
        }
        let bytes = match item {
            Ok(text) => Bytes::from(text),
            Err(e) => {
                error!("Proxy error: {}", e);
                *failed = true;
                Bytes::from(format!("{} {}", error_marker, e))
            }
        };
        future::ready(Some(Ok(bytes)))
    })
}

/// Logs when a generation stream is dropped before it ran to completion,
/// which is how a client disconnect shows up on our side.
#[derive(Debug)]
pub struct StreamGuard {
    source: &'static str,
    finished: bool,
}

impl StreamGuard {
    pub fn new(source: &'static str) -> Self {
        StreamGuard {
            source,
            finished: false,
        }
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!("Client went away, stopping {} stream", self.source);
        }
    }
}
