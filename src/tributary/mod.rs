pub mod common;
pub mod config;
pub mod backend;
pub mod cluster;
pub mod users;

pub use self::common::{Error, ErrorKind, Result};
