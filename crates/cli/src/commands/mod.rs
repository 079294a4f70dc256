pub mod ask;
pub mod config;
pub mod sessions;
