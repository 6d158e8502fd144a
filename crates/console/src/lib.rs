pub mod client;
pub mod config;
pub mod decode;
pub mod logs;
pub mod reconcile;
pub mod runner;
pub mod stats;
pub mod stocks;
pub mod users;
