pub mod coding_time_service;
pub mod heartbeat_service;
pub mod heartbeat_store;
pub mod redis_heartbeat_store;
pub mod session_sweeper;
