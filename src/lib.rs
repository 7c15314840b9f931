pub mod cli;
pub mod config;
pub mod cycle;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod render;
pub mod report;
pub mod sources;
pub mod summarize;
