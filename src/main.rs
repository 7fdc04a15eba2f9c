use std::path::PathBuf;

use anyhow::Error;

use crate::program::Program;

mod program;

/// Usage: `x_media_collector [CONFIG_DIR]`. The config directory defaults
/// to the working directory.
#[tokio::main]
async fn main() -> Result<(), Error> {
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let program = Program::new(config_dir);
    program.run().await
}
