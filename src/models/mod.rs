mod scheduled_execution;

pub use scheduled_execution::*;
