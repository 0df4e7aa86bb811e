//! pulse-core — metric model and configuration shared by the Pulse
//! agent and server.

pub mod config;
pub mod net;
pub mod types;

pub use config::{AgentConfig, AgentOverrides, ServerConfig, ServerOverrides};
pub use net::Subnet;
pub use types::*;
