pub mod cli;
pub mod config;
pub mod library;
pub mod model;
pub mod provider;
pub mod recording;
pub mod review;
pub mod risk;
pub mod scheduler;
pub mod store;
pub mod util;
