// communication/mod.rs
pub mod messages;
pub mod relay;
pub mod transport;
