//! dubweb - browser front-end for an external video dubbing engine
//!
//! Validates a dubbing request, runs the engine as a child process with a
//! heartbeat while it works, classifies the outcome and serves the form,
//! job status and finished files over HTTP.

pub mod accelerator;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod languages;
pub mod media_info;
pub mod outputs;
pub mod server;
pub mod system_info;
