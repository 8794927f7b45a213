pub mod config;
pub mod listener;
pub mod prompt_loader;
pub mod responder;
pub mod synthesizer;
