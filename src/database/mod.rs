pub mod connection;
pub mod progress;
pub mod quiz;
