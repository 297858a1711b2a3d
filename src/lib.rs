pub mod agent;
pub mod config;
pub mod executor;
pub mod funnel;
pub mod llm;
pub mod market;
pub mod memory;
pub mod perception;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod synthesizer;
pub mod webdriver;
