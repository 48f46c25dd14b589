//! Real-world collaborators for the self-healing containerization loop,
//! plus the session wiring behind the `dockerize` binary.
//!
//! The deterministic loop lives in the `healing` crate. This crate
//! implements its traits against docker, an OpenAI-compatible model
//! endpoint, the filesystem and the terminal.

pub mod analyzer;
pub mod command;
pub mod compose;
pub mod config;
pub mod gateway;
pub mod inspector;
pub mod oracle;
pub mod probe;
pub mod prompt;
pub mod prompts;
pub mod secrets;
pub mod session;
pub mod telemetry;
pub mod validator;

pub use config::{AgentConfig, ConfigOverrides};
pub use session::{render_status, ResumeOptions, RunOptions, Session};
