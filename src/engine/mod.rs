//! Durable step-execution engine.
//!
//! | Module        | Role                                                   |
//! |---------------|--------------------------------------------------------|
//! | `step`        | memoized, retried execution of one named step          |
//! | `fanout`      | per-source parallel steps, reassembled by source number |
//! | `checkpoint`  | transactional status advance + usage fold              |
//! | `failure`     | terminal hook once retries are exhausted               |
//! | `context`     | append-only bag of step outputs                        |
//! | `step_config` | model tier / step to model ids and sampling params     |
//! | `usage`       | usage records and the pricing table                    |

pub mod checkpoint;
pub mod context;
pub mod failure;
pub mod fanout;
pub mod step;
pub mod step_config;
pub mod usage;

pub use checkpoint::Checkpointer;
pub use context::Context;
pub use failure::FailureHandler;
pub use fanout::{FanIn, FanOutCoordinator, SourceKeyed};
pub use step::{RetryPolicy, StepExecutor, StepOutput, StepResult};
pub use step_config::{StepConfig, StepKind};
pub use usage::UsageRecord;
