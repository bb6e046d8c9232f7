use crate::error::ServerError;
use crate::http::body::{Body, BodyReceiver};
use crate::http::query;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
    HEAD,
    OPTIONS,
    CONNECT,
    TRACE,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::PATCH => "PATCH",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }

    /// Methods whose request body is decoded before the pipeline runs.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::PATCH)
    }
}

impl FromStr for Method {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            "CONNECT" => Ok(Method::CONNECT),
            "TRACE" => Ok(Method::TRACE),
            other => Err(ServerError::BadRequest(format!("unsupported method `{}`", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the transport hands to the application for one request.
///
/// `target` is the raw request target, query string included. Header names
/// are expected in lowercase.
#[derive(Debug)]
pub struct IncomingRequest {
    pub method: Method,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: BodyReceiver,
}

impl IncomingRequest {
    pub fn new(method: Method, target: impl Into<String>, body: BodyReceiver) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HashMap::new(),
            body,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub path_vars: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Body,
    pub data: HashMap<String, Value>,
}

impl Request {
    /// Builds the per-request representation from a raw target, splitting
    /// off and parsing the query string. The body starts out absent.
    pub fn new(method: Method, target: &str, headers: HashMap<String, String>) -> Self {
        let path = target.split('?').next().unwrap_or_default().to_string();
        Self {
            method,
            path,
            query: query::parse_query(target),
            path_vars: HashMap::new(),
            headers,
            body: Body::Absent,
            data: HashMap::new(),
        }
    }

    pub fn path_var(&self, name: &str) -> Option<&str> {
        self.path_vars.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set_data<T>(&mut self, key: &str, value: T)
    where
        T: serde::Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), value);
        }
    }

    pub fn get_typed_data<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.data
            .get(key)
            .and_then(|value| serde_json::from_value(value.to_owned()).ok())
    }
}
