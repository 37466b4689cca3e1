//! Metastore maintenance service.
//!
//! Runs periodic maintenance over scheduled query execution records:
//! running executions that stop reporting progress are marked timed out,
//! and terminal executions older than the retention period are purged.

pub mod config;
pub mod db;
pub mod maintenance;
pub mod models;
pub mod observability;

#[cfg(test)]
mod tests;
