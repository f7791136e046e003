//! The summarization job queue: worker pool, state machine, and reaper.

pub mod engine;

pub use engine::SummarizeJobEngine;
