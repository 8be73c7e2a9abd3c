pub mod build;
pub mod config;
pub mod debug;
pub mod pull;
pub mod rewrite;
