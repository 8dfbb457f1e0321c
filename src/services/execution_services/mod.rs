pub mod container_executor;
pub mod executor_service;
pub mod process_runner;
