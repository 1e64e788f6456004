// novade-compute: run one compute dispatch and print the resulting image.
//
// Usage: novade-compute [CONFIG.toml] [SHADER.spv]
//
// Without CONFIG.toml the file named by NOVADE_COMPUTE_CONFIG is used, if set.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use novade_compute::config::ConfigLoader;
use novade_compute::{logging, session};

fn main() -> Result<()> {
    let mut args = std::env::args_os().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let shader_override = args.next().map(PathBuf::from);

    let mut config = match ConfigLoader::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_minimal_logging();
            error!("Configuration loading failed: {}", e);
            return Err(e).context("Failed to load configuration");
        }
    };
    if let Some(path) = shader_override {
        config.shader.path = Some(path);
    }
    if let Err(e) = logging::init_logging(&config.logging) {
        logging::init_minimal_logging();
        warn!("Falling back to minimal logging: {}", e);
    }
    info!("Starting novade-compute with a {}x{} image", config.image.width, config.image.height);

    let program = session::load_program(&config).context("Failed to load shader program")?;
    let output = match session::run(&config, &program) {
        Ok(output) => output,
        Err(e) => {
            error!("Compute run failed: {}", e);
            return Err(e).context("Compute run failed");
        }
    };

    println!(
        "{} ({}x{}, row pitch {} bytes)",
        output.device_name,
        output.extent.width(),
        output.extent.height(),
        output.row_pitch
    );
    for row in 0..output.extent.height() {
        let line: Vec<String> = output.row(row).iter().map(|v| format!("{v:.3}")).collect();
        println!("{}", line.join(" "));
    }
    Ok(())
}
