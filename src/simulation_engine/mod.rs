// simulation_engine/mod.rs
pub mod geo;
pub mod route_provider;
pub mod simulation;
pub mod vehicles;
