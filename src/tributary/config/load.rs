use std::env;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, info_span};

use crate::tributary::{Error, Result};
use crate::tributary::config::config;

/// Environment variable naming the config file, used when no path is passed on the command line.
pub const CONFIG_ENV_VAR: &str = "TRIBUTARY_CONFIG";

/// Load configuration settings from config_name.
///
/// An explicit path is taken from the first command line argument, then from
/// TRIBUTARY_CONFIG. Otherwise config_name is looked for in the working directory
/// and then in /etc/tributary/.
///
/// ${VAR} is replaced with the value of VAR and is an error if VAR is unset.
/// ${VAR:default} falls back to default, ${VAR:?message} fails with message.
///
/// The settings live for the rest of the process.
pub fn load_config(config_name: &str) -> Result<&'static config::Settings> {
    let _span = info_span!("loading config file").entered();
    let explicit = env::args().nth(1).or_else(|| env::var(CONFIG_ENV_VAR).ok());
    let config_path = locate(config_name, explicit)?;
    info!(config_path = %config_path.display(), "found config file");
    let raw_yaml = std::fs::read_to_string(&config_path)?;
    let settings = parse_config(&raw_yaml, config_path)?;
    Ok(&*Box::leak(Box::new(settings)))
}

/// Parse and validate settings from yaml text, substituting environment variables.
pub fn parse_config(raw_yaml: &str, config_path: PathBuf) -> Result<config::Settings> {
    let yaml_text = expand_env(raw_yaml)?;
    let mut settings: config::Settings = serde_yaml::from_str(&yaml_text)?;
    settings.load(config_path)?;
    Ok(settings)
}

fn locate(config_name: &str, explicit: Option<String>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(PathBuf::from(path));
    }
    let candidates = [Path::new(".").join(config_name), Path::new("/etc/tributary").join(config_name)];
    for path in candidates.iter() {
        debug!(path = %path.display(), "looking for config file");
        if path.is_file() {
            return Ok(path.clone());
        }
    }
    Err(Error::new(format!("config file {} not found, pass a path or set {}", config_name, CONFIG_ENV_VAR)))
}

fn expand_env(text: &str) -> Result<String> {
    let var = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::(\?)?([^}]*))?\}").map_err(Error::new)?;
    let mut out = String::with_capacity(text.len());
    let mut missing = Vec::new();
    let mut last = 0;
    for caps in var.captures_iter(text) {
        let (whole, name) = match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(name)) => (whole, name.as_str()),
            _ => continue,
        };
        out.push_str(&text[last..whole.start()]);
        last = whole.end();
        if let Ok(value) = env::var(name) {
            out.push_str(&value);
            continue;
        }
        let fallback = caps.get(3).map(|m| m.as_str());
        match (caps.get(2).is_some(), fallback) {
            (false, Some(default)) => out.push_str(default),
            (true, Some(message)) if !message.is_empty() => missing.push(message.to_string()),
            _ => missing.push(format!("environment variable {} is required but not defined", name)),
        }
    }
    out.push_str(&text[last..]);

    if missing.is_empty() {
        Ok(out)
    } else {
        Err(Error::new(missing.join("\n")))
    }
}
