pub mod chat;
pub mod config;
pub mod detection;
pub mod pipeline;
pub mod rendering;
pub mod robot;
pub mod runtime;
pub mod session;
pub mod tracking;
pub mod video;

// Re-export the top-level error type so callers only need `shoebot_core::Error`
pub use anyhow::Error;
pub use anyhow::Result;
