pub mod agent_loop;
pub mod context_assembler;
pub mod executor;
pub mod rate_limiter;
pub mod stuck_detector;
pub mod tools;

pub use agent_loop::{AgentLoop, RunRequest};
pub use executor::{ExecutionOutcome, Normalization, ToolExecutor};
pub use rate_limiter::{RateLimiter, UsageAccountant};
pub use stuck_detector::{StuckDetector, StuckVerdict};
