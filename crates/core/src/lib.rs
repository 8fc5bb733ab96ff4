pub mod config;
pub mod error;
pub mod options;
pub mod tile;

pub use config::Config;
pub use error::*;
pub use options::*;
pub use tile::*;
