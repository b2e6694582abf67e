//! Iris is a line-mode client for a multi-conversation assistant backend.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the conversation store, the reveal queue, streaming
//!   sessions and the [`core::coordinator::SessionCoordinator`] that ties
//!   them together.
//! - [`gateway`] defines the [`gateway::RemoteGateway`] seam and its HTTP
//!   implementation.
//! - [`api`] defines the JSON payloads exchanged with the backend.
//! - [`commands`] parses slash commands for the chat loop.
//! - [`cli`] parses arguments and runs the chat loop or a one-shot prompt.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod commands;
pub mod core;
pub mod gateway;
pub mod utils;
