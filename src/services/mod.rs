pub mod artifacts;
pub mod classifier;
pub mod command_builder;
pub mod job;
pub mod launcher;
pub mod logger;
pub mod poller;
pub mod tool_executor;
pub mod transport;
pub mod validation;
