// gateway/mod.rs
pub mod registry;
pub mod server;
