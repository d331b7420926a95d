mod error;
mod loader;
mod settings;


pub use error::ConfigError;
pub use loader::load_settings;
pub use settings::{
    ConnectionSettings, MAX_BUFFER_SIZE, MAX_CONNECTIONS_LIMIT, MAX_OPEN_REQUESTS_LIMIT,
    PoolSettings,
};
