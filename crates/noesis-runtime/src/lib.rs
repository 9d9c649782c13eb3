pub mod llm_client;
pub mod runtime;
pub mod shutdown;

pub use llm_client::OpenAiCompatibleProvider;
pub use runtime::{ConcurrencyLimitExceeded, Runtime};
pub use shutdown::ShutdownCoordinator;
