pub mod driver;
pub mod fakery;
pub mod repetition;
pub mod workspace_scan;

pub use driver::{ConsciousnessDriver, MAX_INVESTIGATION_CYCLES};
pub use repetition::{default_tokenizer, Tokenizer};
