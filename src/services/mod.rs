pub mod cleanup_service;

pub mod helper_services;

pub mod all_session_services;
pub mod storage_services;

pub mod execution_services;
