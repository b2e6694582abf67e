pub mod config;
pub mod constants;
pub mod conversation;
pub mod coordinator;
pub mod events;
pub mod message;
pub mod reveal;
pub mod session;
pub mod store;
