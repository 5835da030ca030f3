//! Provider registry configuration.
//!
//! Handles parsing, validation, and `${env:NAME}` interpolation of the
//! `<config_dir>/fleet/mcp.json` file that lists the tool providers to launch.

mod interpolation;
mod io;
mod model;
mod validation;

pub use interpolation::{InterpolationError, interpolate_config};
pub use io::{default_config_path, load_config_from_path};
pub use model::{ConfigError, McpConfig, McpServer};
pub use validation::{ValidationError, validate_config, validate_launch_spec, validate_provider_name};
