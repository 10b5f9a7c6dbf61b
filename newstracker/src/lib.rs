// Library interface for newstracker modules
// This allows tests and the binary to import modules

pub mod dedup;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
