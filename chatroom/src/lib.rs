pub mod api;
pub mod assembler;
pub mod chat;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod messages;
pub mod model;
pub mod rooms;

pub use error::{ChatError, Result};
