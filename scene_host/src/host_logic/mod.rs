pub mod bridge;
pub mod config;
pub mod logger;
pub mod model;
pub mod projection;
pub mod renderer;
