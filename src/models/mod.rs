pub mod config_models;
pub mod error_models;
pub mod execution_models;
pub mod heartbeat_models;
pub mod session_models;
pub mod sweeper_models;
