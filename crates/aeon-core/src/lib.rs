//! Core building blocks of the Aeon kernel: shared LLM types, the message
//! bus, configuration, security policy, and the heartbeat service.

pub mod bus;
pub mod config;
pub mod heartbeat;
pub mod security;
pub mod types;
pub mod utils;
