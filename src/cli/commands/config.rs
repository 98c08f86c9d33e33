//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_FILE};
use crate::error::{PlinthError, PlinthResult};
use crate::ui::{self, Notice, UiContext};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Keys accepted by `config set`
const VALID_KEYS: [&str; 12] = [
    "general.log_format",
    "general.journal",
    "base.image",
    "base.rootfs",
    "install.command",
    "install.timeout_secs",
    "build.command",
    "build.timeout_secs",
    "source.workdir",
    "source.ignore",
    "cache.enabled",
    "cache.gc_days",
];

/// Keys stored as arrays; values are comma-separated
const LIST_KEYS: [&str; 3] = ["install.command", "build.command", "source.ignore"];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, config_path: Option<PathBuf>) -> PlinthResult<()> {
    let manager = match config_path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };

    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(&manager),
        Some(ConfigAction::Init { force }) => init_config(&manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            let path = if local {
                std::env::current_dir()
                    .map_err(|e| PlinthError::io("getting current directory", e))?
                    .join(LOCAL_CONFIG_FILE)
            } else {
                manager.path().to_path_buf()
            };
            set_value(&path, &key, &value).await?
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> PlinthResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> PlinthResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::notice(
            &ctx,
            Notice::Warning,
            &format!("Config already exists at {}", path.display()),
            Some("use --force to overwrite"),
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    let location = path.display().to_string();
    ui::notice(&ctx, Notice::Success, "Configuration initialized", Some(&location));

    Ok(())
}

/// Set one key in the file at `path`, keeping every other key as written
async fn set_value(path: &Path, key: &str, value: &str) -> PlinthResult<()> {
    let ctx = UiContext::detect();
    validate_config_key(key)?;

    let mut doc: toml::Value = if path.exists() {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PlinthError::io(format!("reading {}", path.display()), e))?;
        content
            .parse()
            .map_err(|e: toml::de::Error| PlinthError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut doc, key, value)?;

    // The result must still be a valid configuration
    let check: Result<Config, _> = doc.clone().try_into();
    check.map_err(|e: toml::de::Error| PlinthError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PlinthError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    let content = toml::to_string_pretty(&doc)?;
    fs::write(path, content)
        .await
        .map_err(|e| PlinthError::io(format!("writing {}", path.display()), e))?;

    ui::notice(
        &ctx,
        Notice::Success,
        &format!("Set {} = {} in {}", key, value, path.display()),
        None,
    );
    Ok(())
}

fn validate_config_key(key: &str) -> PlinthResult<()> {
    if VALID_KEYS.contains(&key) {
        Ok(())
    } else {
        Err(PlinthError::User(format!(
            "Unknown config key: {}. Valid keys: {}",
            key,
            VALID_KEYS.join(", ")
        )))
    }
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> PlinthResult<()> {
    let (sections, leaf) = match key.rsplit_once('.') {
        Some((sections, leaf)) => (sections.split('.').collect::<Vec<_>>(), leaf),
        None => (vec![], key),
    };

    let mut current = doc;
    for part in sections {
        current = current
            .as_table_mut()
            .ok_or_else(|| PlinthError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| PlinthError::User(format!("Expected table for key: {}", key)))?;

    let toml_value = if LIST_KEYS.contains(&key) {
        toml::Value::Array(
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_string()))
                .collect(),
        )
    } else if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    };

    table.insert(leaf.to_string(), toml_value);
    Ok(())
}
