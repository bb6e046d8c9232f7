//! # Waypost
//!
//! The request-handling core of a small Express-style HTTP framework.
//!
//! ## Features
//!
//! - Routing by method and path with named `:capture` segments
//! - Query string parsing
//! - Ordered middleware that can continue or halt the pipeline
//! - Streamed request bodies decoded as JSON, with a text fallback
//!
//! Every request goes through the same stages: the body is decoded (for
//! `POST`, `PUT` and `PATCH`), the middleware run in registration order,
//! and the router calls the first matching handler or answers 404.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waypost::app::Application;
//! use waypost::config::ServerConfig;
//! use waypost::ok_json;
//!
//! let mut app = Application::new();
//!
//! app.get("/", |_req| async {
//!     ok_json!({
//!         "message": "Hello, World!"
//!     })
//! });
//!
//! app.listen(&ServerConfig::default()).unwrap();
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub extern crate serde_json;

pub use app::Application;
pub use error::{ServerError, ServerResult};
pub use http::{Body, Request, Response};
pub use serde_json::{json, Value};
