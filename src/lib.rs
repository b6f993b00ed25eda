pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod policy;
pub mod resolver;
pub mod response;
pub mod server;
pub mod store;
pub mod strategies;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{create_app, AppState, Server};
