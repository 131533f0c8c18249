pub mod database;
pub mod environment;

pub use database::{DbOptions, PutOptions};
pub use environment::EnvConfig;
