#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chatsync_protocol::DEFAULT_MAX_FRAME_SIZE;
use chatsync_util::endpoint::{Scheme, ServerEndpoint};
use serde::Deserialize;
use tracing::{info, warn};

/// Default number of messages requested in the initial snapshot.
pub const DEFAULT_INITIAL_LINES: u32 = 20;

/// Default older-page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default capacity of the client event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default config path: `~/.chatsync/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chatsync").join("config.toml"))
}

/// Load the client config from TOML and env overrides.
pub fn load_client_config() -> anyhow::Result<ClientConfig> {
	let path = default_config_path()?;
	load_client_config_from_path(&path)
}

/// Same as `load_client_config` but with an explicit config path.
pub fn load_client_config_from_path(path: &Path) -> anyhow::Result<ClientConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ClientConfig::from_file(file_cfg).with_context(|| format!("invalid config in {}", path.display()))?;

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Client engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
	/// Server endpoint; the socket URL and REST base are derived from it.
	pub endpoint: ServerEndpoint,

	/// Messages requested in the initial room snapshot.
	pub initial_lines: u32,

	/// Messages requested per older page.
	pub page_size: u32,

	/// Capacity of the `ClientEvent` broadcast channel.
	pub event_channel_capacity: usize,

	/// Keep at most this many messages per room (oldest trimmed on live append).
	pub max_messages_per_room: Option<usize>,

	/// Fail an unanswered older-page request after this long.
	pub older_page_timeout: Option<Duration>,

	/// Maximum inbound/outbound body size.
	pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			endpoint: ServerEndpoint {
				scheme: Scheme::Http,
				host: "localhost".to_string(),
				port: 8080,
			},
			initial_lines: DEFAULT_INITIAL_LINES,
			page_size: DEFAULT_PAGE_SIZE,
			event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
			max_messages_per_room: None,
			older_page_timeout: None,
			max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	endpoint: Option<String>,

	#[serde(default)]
	session: FileSessionSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSessionSettings {
	initial_lines: Option<u32>,
	page_size: Option<u32>,
	event_channel_capacity: Option<usize>,
	max_messages_per_room: Option<usize>,
	older_page_timeout_ms: Option<u64>,
	max_frame_bytes: Option<usize>,
}

fn positive_or<T: PartialEq + Default + Copy + std::fmt::Display>(value: Option<T>, default: T, name: &str) -> T {
	match value {
		Some(v) if v == T::default() => {
			warn!(setting = name, default = %default, "client config: zero is not allowed; using default");
			default
		}
		Some(v) => v,
		None => default,
	}
}

impl ClientConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = Self::default();

		let endpoint = match file.endpoint.filter(|s| !s.trim().is_empty()) {
			Some(s) => ServerEndpoint::parse(&s).map_err(|e| anyhow!(e)).context("parse endpoint")?,
			None => defaults.endpoint,
		};

		let s = file.session;
		Ok(Self {
			endpoint,
			initial_lines: positive_or(s.initial_lines, defaults.initial_lines, "initial_lines"),
			page_size: positive_or(s.page_size, defaults.page_size, "page_size"),
			event_channel_capacity: positive_or(
				s.event_channel_capacity,
				defaults.event_channel_capacity,
				"event_channel_capacity",
			),
			max_messages_per_room: s.max_messages_per_room.filter(|v| *v > 0),
			older_page_timeout: s.older_page_timeout_ms.filter(|v| *v > 0).map(Duration::from_millis),
			max_frame_bytes: positive_or(s.max_frame_bytes, defaults.max_frame_bytes, "max_frame_bytes"),
		})
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

/// Apply `CHATSYNC_*` overrides looked up through `lookup`.
pub fn apply_env_overrides(cfg: &mut ClientConfig, lookup: impl Fn(&str) -> Option<String>) {
	if let Some(v) = lookup("CHATSYNC_ENDPOINT") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			match ServerEndpoint::parse(&v) {
				Ok(endpoint) => {
					cfg.endpoint = endpoint;
					info!(endpoint = %cfg.endpoint.base_url(), "client config: endpoint overridden by env");
				}
				Err(e) => warn!(error = %e, "client config: ignoring invalid CHATSYNC_ENDPOINT"),
			}
		}
	}

	if let Some(v) = lookup("CHATSYNC_PAGE_SIZE")
		&& let Ok(page_size) = v.trim().parse::<u32>()
		&& page_size > 0
	{
		cfg.page_size = page_size;
		info!(page_size, "client config: page_size overridden by env");
	}

	if let Some(v) = lookup("CHATSYNC_INITIAL_LINES")
		&& let Ok(initial_lines) = v.trim().parse::<u32>()
		&& initial_lines > 0
	{
		cfg.initial_lines = initial_lines;
		info!(initial_lines, "client config: initial_lines overridden by env");
	}
}
