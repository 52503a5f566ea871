// proxy module - the signed-request pipeline and its HTTP surface.

pub mod cache;
pub mod circuit;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod rate_limit;
pub mod response;
pub mod server;
pub mod signing;
pub mod upstream;
pub mod validate;

pub use config::ProxyConfig;
pub use error::ProxyError;
pub use pipeline::ProxyPipeline;
pub use response::{ErrorKind, ProxyResponse};
pub use server::AxumServer;
pub use signing::SignatureEngine;
pub use validate::{MethodRegistry, ProxyRequest};
