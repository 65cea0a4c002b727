pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;
pub mod token;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{RoomId, UserId};
pub use token::{JoinToken, TokenStore};
