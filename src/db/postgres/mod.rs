mod scheduled_executions;

pub use scheduled_executions::PostgresScheduledExecutionRepo;
