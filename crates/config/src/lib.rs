//! Configuration schema and discovery.
//!
//! Config files may be TOML, YAML or JSON and may reference environment
//! variables as `${NAME}`.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config, to_toml},
    schema::{
        DEFAULT_MAX_FRAME_LEN, DEFAULT_SEND_QUEUE_LEN, DEFAULT_WRITE_TIMEOUT_MS, LoggingConfig,
        ServerConfig, TetherConfig,
    },
};
