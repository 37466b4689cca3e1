mod common;
mod scheduled_executions;

pub use scheduled_executions::SqliteScheduledExecutionRepo;
