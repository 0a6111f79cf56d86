pub mod cache;
pub mod logs;
pub mod memory;
pub mod persist;
pub mod repository;
pub mod rules;

pub use cache::RuleCache;
pub use logs::LogRecorder;
pub use memory::{MemoryLogRepository, MemoryRuleRepository};
pub use repository::{LogRepository, RuleRepository};
pub use rules::RuleStore;
