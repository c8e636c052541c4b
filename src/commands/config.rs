use anyhow::Result;
use colored::Colorize;
use log_aggregator::config::{self, Config};
use std::path::Path;

/// Execute the config show command
///
/// Displays the effective configuration with the Redis password masked
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let cfg = config::load_config(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    Ok(())
}

/// Sanitize secrets in configuration for safe display
fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();
    sanitized.redis.password = mask_secret(&sanitized.redis.password);
    sanitized
}

/// Mask a secret for safe display
///
/// Empty secrets stay empty so an unset password is visible as such
fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "********".to_string()
    }
}
