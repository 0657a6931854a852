//! Print or write the configuration.

use std::path::PathBuf;

use mochi_common::config::{config_file_path, AppConfig};

pub fn run(
    loaded: AppConfig,
    path: Option<PathBuf>,
    defaults: bool,
    write: bool,
) -> anyhow::Result<()> {
    let config = if defaults {
        AppConfig::default()
    } else {
        loaded
    };

    if write {
        let path = path.unwrap_or_else(config_file_path);
        config.save_to(&path)?;
        println!("Wrote {}", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(&config)?);
    }

    Ok(())
}
