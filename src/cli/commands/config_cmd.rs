//! Configuration management commands.

use console::style;

use crate::config::Config;

/// Print the effective configuration after file and environment merging.
pub fn cmd_config_show(config: &Config, format: &str) -> anyhow::Result<()> {
    let source_path = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());

    let rendered = match format {
        "json" => serde_json::to_string_pretty(config)?,
        "toml" => toml::to_string_pretty(config)?,
        other => anyhow::bail!("Unknown format '{}' (expected toml or json)", other),
    };

    eprintln!("{} Source: {}", style("→").dim(), source_path);
    eprintln!(
        "{} Data directory: {}",
        style("→").dim(),
        config.data_dir_path().display()
    );
    match config.blocklist_path() {
        Some(path) => eprintln!("{} Block store: {}", style("→").dim(), path.display()),
        None => eprintln!("{} Block store: in memory", style("→").dim()),
    }
    eprintln!("{} Hash: {}", style("→").dim(), &config.hash()[..16]);
    println!("{}", rendered);

    Ok(())
}
