pub mod config;
pub mod error;
pub mod log_record;
pub mod matcher;
pub mod page;
pub mod rule;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use log_record::{LogFilter, LogMetadata, LogRecord, LogStats};
pub use page::{Page, PageRequest};
pub use rule::{HttpMethod, Rule, RuleDraft, RulePatch};
