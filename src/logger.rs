use std::env;

use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use crate::prelude::*;

/// Initialize the terminal logger, reading the level filter from the
/// `TREESIM_LOG` environment variable (defaults to `info`).
pub fn init_logger() -> Result<()> {
    let log_level = env::var("TREESIM_LOG")
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    let config = ConfigBuilder::new()
        .set_time_level(log::LevelFilter::Debug)
        .build();

    TermLogger::init(
        log_level,
        config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;
    Ok(())
}
