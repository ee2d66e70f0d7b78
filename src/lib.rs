//! draftline: a durable step-execution engine for AI article-drafting runs.
//!
//! Runs are driven step by step through [`engine::StepExecutor`], which
//! memoizes every step's output so a crashed or redelivered run resumes
//! where it stopped. The drafting workflows live in [`pipeline`]; the HTTP
//! intake in [`server`].

pub mod ai;
pub mod config;
pub mod engine;
pub mod errors;
pub mod notify;
pub mod pipeline;
pub mod runtime;
pub mod server;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod testing;
