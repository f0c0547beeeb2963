use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use npm_audit_parser::{AuditCommand, AuditOptions, IgnoreSet, ReportFormat};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "audit-gate.json";

/// Contents of the JSON config file. Every key is optional.
#[derive(Default, Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserConfig {
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub registry: Option<String>,
    /// Audit program followed by its arguments, e.g. `["npm", "audit"]`.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line. They win over the config file.
#[derive(Default, Debug, Clone)]
pub struct Overrides {
    pub ignore: Option<String>,
    pub registry: Option<Url>,
    pub json: bool,
    pub timeout_secs: Option<u64>,
}

/// Everything one audit run needs.
#[derive(Debug, Clone)]
pub struct Config {
    pub ignore: IgnoreSet,
    pub options: AuditOptions,
}

/// Read the config file. An explicit path must exist; the default one is optional.
pub fn load_user_config(path: Option<&Path>) -> anyhow::Result<UserConfig> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    if !required && !path.exists() {
        debug!("no config file at {}", path.display());
        return Ok(UserConfig::default());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: UserConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    debug!("config {:?}", config);
    Ok(config)
}

/// Merge the config file with command line overrides.
pub fn resolve(user: UserConfig, overrides: Overrides) -> anyhow::Result<Config> {
    let mut ignore = IgnoreSet::parse(overrides.ignore.as_deref());
    ignore.extend(&user.ignore);

    let registry = match (overrides.registry, user.registry) {
        (Some(url), _) => Some(url.to_string()),
        (None, Some(raw)) => {
            let url = Url::parse(&raw)
                .with_context(|| format!("invalid registry url in config: {raw}"))?;
            Some(url.to_string())
        }
        (None, None) => None,
    };

    let command = match user.command {
        Some(argv) => match AuditCommand::from_argv(argv) {
            Some(command) => command,
            None => bail!("config `command` must name a program"),
        },
        None => AuditCommand::default(),
    };

    let format = if overrides.json {
        ReportFormat::Json
    } else {
        user.format
    };

    let timeout = overrides
        .timeout_secs
        .or(user.timeout_secs)
        .map(Duration::from_secs);

    Ok(Config {
        ignore,
        options: AuditOptions {
            command,
            registry,
            format,
            timeout,
        },
    })
}
