pub mod config;
pub mod error;
pub mod logging;

pub use config::{load_dotenv, EnvOverrides};
pub use error::ConfigError;
pub use logging::init_tracing;
