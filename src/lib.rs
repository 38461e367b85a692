pub mod config;
pub mod error;
pub mod external;
pub mod models;
pub mod search;
pub mod settings;
pub mod sync;

use env_logger::Env;
use std::sync::Once;

pub use config::IndexerConfig;
pub use error::IndexError;
pub use models::MailRecord;

static LOGGER: Once = Once::new();

/// Install the `env_logger` backend once; `RUST_LOG` overrides the `info` default.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,sqlx=warn,reqwest=warn"),
        )
        .format_timestamp(None)
        .init();
    });
}
