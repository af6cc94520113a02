pub mod config;
pub mod platform;
pub mod protocol;
pub mod rules;
pub mod status;
pub mod timespec;
