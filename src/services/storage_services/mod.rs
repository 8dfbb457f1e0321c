pub mod coding_time_store;
pub mod sqlite_store;
