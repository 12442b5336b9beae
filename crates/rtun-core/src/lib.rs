pub mod config;
pub mod error;
pub mod firewall;
pub mod models;
pub mod store;
pub mod subdomain;

pub use error::{CoreError, Result};
