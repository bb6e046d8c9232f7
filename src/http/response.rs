use crate::error::ServerError;
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// An outgoing response.
///
/// A response is completed by returning it from the pipeline; the transport
/// then writes it exactly once with [`Response::write_to`], which consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn body<T: AsRef<str>>(&mut self, body: T) -> &mut Self {
        self.body = body.as_ref().to_string();
        self
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers.insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, ServerError> {
        let json_string = serde_json::to_string(value)
            .map_err(|e| ServerError::Internal(format!("JSON serialization error: {}", e)))?;
        self.header("Content-Type", "application/json");
        self.body(json_string);
        Ok(self)
    }

    pub fn ok<T: Serialize>(data: &T) -> Result<Response, ServerError> {
        let mut response = Response::new(200);
        response.json(data)?;
        Ok(response)
    }

    pub fn created<T: Serialize>(data: &T) -> Result<Response, ServerError> {
        let mut response = Response::new(201);
        response.json(data)?;
        Ok(response)
    }

    pub fn no_content() -> Response {
        Response::new(204)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response
            .header("Content-Type", "text/plain")
            .body(content);
        response
    }

    /// The standard not-found response.
    pub fn not_found() -> Response {
        Response::error(ServerError::NotFound)
    }

    pub fn error(err: ServerError) -> Response {
        let status = err.status_code();
        let mut response = Response::new(status);
        response
            .header("Content-Type", "application/json")
            .body(
                serde_json::json!({
                    "error": {
                        "message": err.to_string(),
                        "status": status
                    }
                })
                .to_string(),
            );
        response
    }

    /// Writes the response as HTTP/1.1 and flushes the sink.
    pub async fn write_to<W>(self, sink: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status));
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head += &format!("{}: {}\r\n", name, value);
        }
        head += &format!("Content-Length: {}\r\n\r\n", self.body.len());

        sink.write_all(head.as_bytes()).await?;
        sink.write_all(self.body.as_bytes()).await?;
        sink.flush().await
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "",
    }
}

#[macro_export]
macro_rules! ok_json {
    ($($json:tt)+) => {
        $crate::http::Response::ok(&$crate::json!($($json)+))
    };
}

#[macro_export]
macro_rules! created_json {
    ($($json:tt)+) => {
        $crate::http::Response::created(&$crate::json!($($json)+))
    };
}
