pub mod cache;
pub mod config;
pub mod engine;
pub mod geoip;
pub mod handler;
pub mod hosts;
pub mod poison;
pub mod upstream;
