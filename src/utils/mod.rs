pub mod helper_utils;
