pub mod body;
pub mod query;
pub(crate) mod request;
pub(crate) mod response;

pub use body::{body_channel, decode_body, Body, BodyReceiver, BodySender};
pub use query::parse_query;
pub use request::{IncomingRequest, Method, Request};
pub use response::Response;
