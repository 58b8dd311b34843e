use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureOptions;
use crate::error::{Error, Result};
use crate::fetch::{default_user_agent, DEFAULT_MAX_REDIRECTS};
use crate::har::DEFAULT_PAGE_ID;
use crate::size::parse_size_bytes;
use crate::transport::TransportConfig;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: Option<CaptureConfig>,
    #[serde(default)]
    pub fetch: Option<FetchConfig>,
    #[serde(default)]
    pub transport: Option<TransportSection>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CaptureConfig {
    pub page_ref: Option<String>,
    pub bodies: Option<bool>,
    pub max_body_size: Option<String>,
    pub text_only: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FetchConfig {
    pub max_redirects: Option<usize>,
    pub compress: Option<bool>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TransportSection {
    pub connect_timeout_secs: Option<u64>,
    pub max_idle_per_host: Option<usize>,
    pub ca_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedConfig {
    pub capture: ResolvedCaptureConfig,
    pub fetch: ResolvedFetchConfig,
    pub transport: ResolvedTransportConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedCaptureConfig {
    pub page_ref: String,
    pub bodies: bool,
    pub max_body_size: String,
    pub text_only: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedFetchConfig {
    pub max_redirects: usize,
    pub compress: bool,
    pub user_agent: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResolvedTransportConfig {
    /// Zero disables the timeout.
    pub connect_timeout_secs: u64,
    pub max_idle_per_host: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            capture: ResolvedCaptureConfig::default(),
            fetch: ResolvedFetchConfig::default(),
            transport: ResolvedTransportConfig::default(),
        }
    }
}

impl Default for ResolvedCaptureConfig {
    fn default() -> Self {
        Self {
            page_ref: DEFAULT_PAGE_ID.to_string(),
            bodies: true,
            max_body_size: "unlimited".to_string(),
            text_only: false,
        }
    }
}

impl Default for ResolvedFetchConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            compress: cfg!(feature = "compression"),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ResolvedTransportConfig {
    fn default() -> Self {
        let defaults = TransportConfig::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.map_or(0, |t| t.as_secs()),
            max_idle_per_host: defaults.max_idle_per_host,
            ca_file: None,
        }
    }
}

impl ResolvedConfig {
    pub fn from_config(config: &Config) -> Self {
        let mut resolved = Self::default();
        if let Some(cfg) = &config.capture {
            resolved.capture.apply(cfg);
        }
        if let Some(cfg) = &config.fetch {
            resolved.fetch.apply(cfg);
        }
        if let Some(cfg) = &config.transport {
            resolved.transport.apply(cfg);
        }
        resolved
    }
}

impl ResolvedCaptureConfig {
    fn apply(&mut self, cfg: &CaptureConfig) {
        if let Some(value) = cfg.page_ref.clone() {
            self.page_ref = value;
        }
        if let Some(value) = cfg.bodies {
            self.bodies = value;
        }
        if let Some(value) = cfg.max_body_size.clone() {
            self.max_body_size = value;
        }
        if let Some(value) = cfg.text_only {
            self.text_only = value;
        }
    }

    pub fn capture_options(&self) -> Result<CaptureOptions> {
        Ok(CaptureOptions {
            bodies: self.bodies,
            max_body_size: parse_size_bytes(&self.max_body_size)?,
            text_only: self.text_only,
        })
    }
}

impl ResolvedFetchConfig {
    fn apply(&mut self, cfg: &FetchConfig) {
        if let Some(value) = cfg.max_redirects {
            self.max_redirects = value;
        }
        if let Some(value) = cfg.compress {
            self.compress = value;
        }
        if let Some(value) = cfg.user_agent.clone() {
            self.user_agent = value;
        }
    }
}

impl ResolvedTransportConfig {
    fn apply(&mut self, cfg: &TransportSection) {
        if let Some(value) = cfg.connect_timeout_secs {
            self.connect_timeout_secs = value;
        }
        if let Some(value) = cfg.max_idle_per_host {
            self.max_idle_per_host = value;
        }
        if let Some(value) = cfg.ca_file.clone() {
            self.ca_file = Some(value);
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: (self.connect_timeout_secs > 0)
                .then(|| Duration::from_secs(self.connect_timeout_secs)),
            max_idle_per_host: self.max_idle_per_host,
            ca_file: self.ca_file.clone(),
        }
    }
}

pub fn load_config() -> Result<Config> {
    let mut config = Config::default();
    let paths = config_search_paths()?;
    for path in paths {
        if !path.exists() {
            continue;
        }
        let contents = fs::read_to_string(&path)?;
        let parsed = parse_config(&contents, &path)?;
        tracing::debug!(path = %path.display(), "loaded config");
        merge_config(&mut config, parsed);
    }
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    toml::from_str(contents).map_err(|err| {
        Error::InvalidArgs(format!(
            "Failed to parse config {}: {}",
            path.display(),
            err
        ))
    })
}

fn merge_config(base: &mut Config, other: Config) {
    merge_section(&mut base.capture, other.capture, CaptureConfig::merge);
    merge_section(&mut base.fetch, other.fetch, FetchConfig::merge);
    merge_section(&mut base.transport, other.transport, TransportSection::merge);
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
    if let Some(other_section) = other {
        match base {
            Some(existing) => merge(existing, other_section),
            None => *base = Some(other_section),
        }
    }
}

impl CaptureConfig {
    fn merge(&mut self, other: CaptureConfig) {
        merge_opt(&mut self.page_ref, other.page_ref);
        merge_opt(&mut self.bodies, other.bodies);
        merge_opt(&mut self.max_body_size, other.max_body_size);
        merge_opt(&mut self.text_only, other.text_only);
    }
}

impl FetchConfig {
    fn merge(&mut self, other: FetchConfig) {
        merge_opt(&mut self.max_redirects, other.max_redirects);
        merge_opt(&mut self.compress, other.compress);
        merge_opt(&mut self.user_agent, other.user_agent);
    }
}

impl TransportSection {
    fn merge(&mut self, other: TransportSection) {
        merge_opt(&mut self.connect_timeout_secs, other.connect_timeout_secs);
        merge_opt(&mut self.max_idle_per_host, other.max_idle_per_host);
        merge_opt(&mut self.ca_file, other.ca_file);
    }
}

fn merge_opt<T>(base: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *base = other;
    }
}

fn config_search_paths() -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    if let Some(home) = home_dir() {
        if let Some(config_home) = config_home_dir(&home) {
            paths.push(config_home.join("fetch-har").join("fetch-har.toml"));
        }
        if let Some(appdata) = env::var_os("APPDATA") {
            paths.push(PathBuf::from(appdata).join("fetch-har").join("fetch-har.toml"));
        }
        paths.push(home.join(".fetch-harrc"));
    }

    if let Ok(cwd) = env::current_dir() {
        let mut dirs = Vec::new();
        let mut current: Option<&Path> = Some(cwd.as_path());
        while let Some(dir) = current {
            dirs.push(dir.to_path_buf());
            current = dir.parent();
        }
        dirs.reverse();
        for dir in dirs {
            paths.push(dir.join(".fetch-harrc"));
            paths.push(dir.join("fetch-har.toml"));
        }
    }

    Ok(paths)
}

fn config_home_dir(home: &Path) -> Option<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    Some(home.join(".config"))
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}

pub fn render_config(config: &ResolvedConfig) -> Result<String> {
    toml::to_string_pretty(config)
        .map_err(|err| Error::InvalidArgs(format!("Failed to render config: {}", err)))
}
