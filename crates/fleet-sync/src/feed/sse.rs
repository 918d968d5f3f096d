use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::http::{build_http_client, HttpSettings, EVENTS_PATH};

use super::{FeedConnection, FeedConnector};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Opens `GET /api/events` as a Server-Sent Events stream.
pub struct SseConnector {
    client: Client,
    url: String,
}

impl SseConnector {
    pub fn new(settings: &HttpSettings) -> SyncResult<Self> {
        let client = build_http_client(settings)?;
        Self::with_client(client, settings)
    }

    pub fn with_client(client: Client, settings: &HttpSettings) -> SyncResult<Self> {
        Ok(Self {
            client,
            url: settings.url(EVENTS_PATH)?,
        })
    }
}

#[async_trait]
impl FeedConnector for SseConnector {
    async fn connect(&self) -> SyncResult<Box<dyn FeedConnection>> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::status(status.as_u16(), "GET /api/events"));
        }
        debug!(url = %self.url, "event stream opened");
        Ok(Box::new(SseConnection {
            stream: Some(Box::pin(response.bytes_stream())),
            decoder: SseDecoder::default(),
        }))
    }
}

pub struct SseConnection {
    stream: Option<ByteStream>,
    decoder: SseDecoder,
}

#[async_trait]
impl FeedConnection for SseConnection {
    async fn next_message(&mut self) -> Option<SyncResult<String>> {
        loop {
            if let Some(data) = self.decoder.next_event() {
                return Some(Ok(data));
            }
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(err)) => return Some(Err(SyncError::from(err))),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        // Dropping the body releases the underlying connection.
        self.stream = None;
    }
}

/// Incremental `text/event-stream` parser. Only `data` fields of events named
/// `message` (the default) are surfaced.
///
/// Bytes are buffered until a full line is available, so multibyte characters
/// split across chunks decode intact. An event containing a line that is not
/// valid UTF-8 is discarded whole.
#[derive(Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
    event: Option<String>,
    corrupt: bool,
    ready: VecDeque<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        while let Some(newline_pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw = self.buffer.split_to(newline_pos + 1);
            let raw = raw.strip_suffix(b"\n").unwrap_or(&raw[..]);
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            match std::str::from_utf8(raw) {
                Ok(line) => self.handle_line(line),
                Err(err) => {
                    warn!(
                        event = "feed.line_dropped",
                        line_len = raw.len(),
                        error = %err,
                        "sse line is not valid utf-8"
                    );
                    self.corrupt = true;
                }
            }
        }
    }

    pub fn next_event(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    fn handle_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data);
        if std::mem::take(&mut self.corrupt) {
            warn!(event = "feed.message_dropped", "discarding sse event with invalid utf-8");
            return;
        }
        if data.is_empty() {
            return;
        }
        let data = data.join("\n");
        match event.as_deref() {
            None | Some("") | Some("message") => self.ready.push_back(data),
            Some(other) => debug!(event = other, "ignoring named sse event"),
        }
    }
}
