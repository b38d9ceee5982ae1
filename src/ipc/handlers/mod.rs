pub mod core;
pub mod feeder;
pub mod graph;
