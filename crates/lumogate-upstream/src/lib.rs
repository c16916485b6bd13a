pub mod client;
pub mod error;
pub mod sse;

pub use client::{
    AuthTokenSource, ChatOptions, InjectInstructionsInto, PlainTurn, ReqwestTransport, UpstreamClient,
    UpstreamTransport,
};
pub use error::UpstreamError;
pub use sse::UpstreamEvent;
