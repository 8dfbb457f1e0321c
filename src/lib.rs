//! Sandboxed code execution for the online lab, plus reaping of abandoned IDE sessions.

pub mod docker;
pub mod language_executor;
pub mod lifecycle;
pub mod models;
pub mod proto;
pub mod services;
pub mod utils;
