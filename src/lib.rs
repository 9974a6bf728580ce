#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]

pub mod address;
pub mod body;
pub mod cache;
pub mod call;
pub mod client;
pub mod dispatcher;
pub mod dns;
pub mod error;
pub mod exchange;
pub mod h2;
pub mod headers;
pub mod http1;
pub mod interceptor;
pub mod pool;
pub mod request;
pub mod response;
pub mod transport;

pub use body::{BytesBody, RequestBody, ResponseBody};
pub use call::RealCall;
pub use client::{Client, ClientBuilder};
pub use error::CallError;
pub use headers::Headers;
pub use request::{Method, Request};
pub use response::{ProtocolLabel, Response, Status};
pub use url::Url;
