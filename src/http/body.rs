//! Request body streaming and decoding.
//!
//! The transport pushes body notifications through a [`BodySender`]; the
//! application drains the paired [`BodyReceiver`] with [`decode_body`],
//! which owns the accumulation buffer until the stream has ended and then
//! moves the decoded result into [`Request::body`].

use crate::error::{ServerError, ServerResult};
use crate::http::Request;
use serde_json::Value;
use std::io;
use tokio::sync::mpsc;

/// A decoded request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// Not decoded, either because the method carries no body or because
    /// decoding has not run yet.
    #[default]
    Absent,
    /// The payload parsed as JSON.
    Json(Value),
    /// The payload did not parse as JSON; holds its (lossy UTF-8) text.
    Text(String),
}

impl Body {
    pub fn is_absent(&self) -> bool {
        matches!(self, Body::Absent)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }

    /// Decodes a complete payload: JSON when it parses, raw text otherwise.
    pub fn decode(bytes: &[u8]) -> Body {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Body::Json(value),
            Err(_) => Body::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

#[derive(Debug)]
enum BodyEvent {
    Data(Vec<u8>),
    End,
    Error(io::Error),
}

/// Transport side of a request body stream.
///
/// `end` and `error` consume the sender, so a stream terminates at most once.
/// Dropping a sender without calling either is reported to the reader as an
/// aborted stream.
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::UnboundedSender<BodyEvent>,
}

impl BodySender {
    /// Delivers one chunk. Returns `false` once the reader has gone away.
    pub fn data(&self, chunk: impl Into<Vec<u8>>) -> bool {
        self.tx.send(BodyEvent::Data(chunk.into())).is_ok()
    }

    pub fn end(self) {
        let _ = self.tx.send(BodyEvent::End);
    }

    pub fn error(self, err: io::Error) {
        let _ = self.tx.send(BodyEvent::Error(err));
    }
}

/// Application side of a request body stream.
#[derive(Debug)]
pub struct BodyReceiver {
    rx: mpsc::UnboundedReceiver<BodyEvent>,
}

impl BodyReceiver {
    /// A stream that has already ended without data.
    pub fn empty() -> Self {
        let (tx, rx) = body_channel();
        tx.end();
        rx
    }

    /// A stream that delivers `bytes` as one chunk and ends.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let (tx, rx) = body_channel();
        tx.data(bytes);
        tx.end();
        rx
    }

    /// Drains the stream, concatenating chunks in arrival order.
    ///
    /// Resolves only after the end notification. A transport error, or a
    /// sender dropped before ending, discards whatever was buffered.
    pub async fn collect(mut self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        loop {
            match self.rx.recv().await {
                Some(BodyEvent::Data(chunk)) => buffer.extend_from_slice(&chunk),
                Some(BodyEvent::End) => return Ok(buffer),
                Some(BodyEvent::Error(err)) => return Err(err),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "body stream closed before end",
                    ))
                }
            }
        }
    }
}

pub fn body_channel() -> (BodySender, BodyReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BodySender { tx }, BodyReceiver { rx })
}

/// Waits for the whole body of `req`, decodes it and stores it on the
/// request, then hands the request back.
///
/// Malformed JSON is not an error: the body falls back to text. A stream
/// failure yields [`ServerError::BodyAborted`] and no request, so nothing
/// downstream ever sees a partial body.
pub async fn decode_body(mut req: Request, source: BodyReceiver) -> ServerResult<Request> {
    let bytes = source.collect().await.map_err(|err| {
        tracing::warn!(method = %req.method, path = %req.path, error = %err, "request body stream failed");
        ServerError::BodyAborted(err.to_string())
    })?;
    tracing::debug!(method = %req.method, path = %req.path, bytes = bytes.len(), "request body received");
    req.body = Body::decode(&bytes);
    Ok(req)
}
