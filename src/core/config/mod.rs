pub mod data;
pub mod io;

pub use data::{Config, TokenStoreKind};
pub use io::ConfigError;
