pub mod config;
pub mod logging;

// Resilience primitives shared by all workers
pub mod breaker;
pub mod retry;
pub mod throttle;

// Per-task work
pub mod archive;
pub mod checksum;
pub mod fetch;
pub mod invoker;
pub mod storage;
pub mod task;
pub mod url_model;

// Orchestration
pub mod clock;
pub mod pipeline;
pub mod poll;
pub mod progress;

// Collaborators
pub mod catalog;
