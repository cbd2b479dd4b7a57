//! String-keyed access to the session configuration.
//!
//! Map-valued keys use a `key=value` pair list: pairs are joined with `;`,
//! and for `stream_options` whole maps are joined with `|`. The encoding is
//! produced by [`ConfigFacade::get`] and accepted by [`ConfigFacade::set`];
//! keys or values that contain a separator do not survive a round trip.

use std::fmt::Display;
use std::str::FromStr;

use super::{Config, OptionMap};

/// Separator between `key=value` items.
pub const ITEM_SEPARATOR: char = ';';

/// Separator between a key and its value.
pub const KEY_VALUE_SEPARATOR: char = '=';

/// Separator between per-stream option maps.
pub const MAP_SEPARATOR: char = '|';

/// Errors returned by [`ConfigFacade`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Typed get/set over [`Config`] fields using string keys and values.
///
/// Values set here apply to the next session start only; a running worker
/// keeps the snapshot it was started with.
#[derive(Debug, Clone, Default)]
pub struct ConfigFacade {
    config: Config,
}

impl ConfigFacade {
    /// Every key accepted by [`get`](Self::get) and [`set`](Self::set).
    pub const KEYS: [&'static str; 16] = [
        "src",
        "video_index",
        "frame_format",
        "width",
        "height",
        "scale_filter",
        "options",
        "stream_options",
        "low_delay",
        "decode_threads",
        "reconnect_delay",
        "iteration_sleep",
        "max_queue_size",
        "exit_timeout_seconds",
        "stall_threshold",
        "verbose",
    ];

    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Copy of the current values, used as a session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.config.clone()
    }

    /// Read a value in its string encoding.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownKey` for keys outside [`Self::KEYS`].
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let c = &self.config;
        let value = match key {
            "src" => c.src.clone(),
            "video_index" => c.video_index.to_string(),
            "frame_format" => c.frame_format.to_string(),
            "width" => c.width.to_string(),
            "height" => c.height.to_string(),
            "scale_filter" => c.scale_filter.to_string(),
            "options" => map_to_str(&c.options),
            "stream_options" => maps_to_str(&c.stream_options),
            "low_delay" => c.low_delay.to_string(),
            "decode_threads" => c.decode_threads.to_string(),
            "reconnect_delay" => c.reconnect_delay.to_string(),
            "iteration_sleep" => c.iteration_sleep.to_string(),
            "max_queue_size" => c.max_queue_size.to_string(),
            "exit_timeout_seconds" => c.exit_timeout_seconds.to_string(),
            "stall_threshold" => c.stall_threshold.to_string(),
            "verbose" => c.verbose.to_string(),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(value)
    }

    /// Parse and store a value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownKey` for unknown keys and
    /// `ConfigError::InvalidValue` when the value does not parse. A failed
    /// set leaves the configuration unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let c = &mut self.config;
        match key {
            "src" => c.src = value.trim().to_string(),
            "video_index" => c.video_index = parse(key, value)?,
            "frame_format" => c.frame_format = parse(key, value)?,
            "width" => c.width = parse(key, value)?,
            "height" => c.height = parse(key, value)?,
            "scale_filter" => c.scale_filter = parse(key, value)?,
            "options" => c.options = str_to_map(value),
            "stream_options" => c.stream_options = str_to_maps(value),
            "low_delay" => c.low_delay = parse_bool(key, value)?,
            "decode_threads" => c.decode_threads = parse(key, value)?,
            "reconnect_delay" => c.reconnect_delay = parse_seconds(key, value)?,
            "iteration_sleep" => c.iteration_sleep = parse_seconds(key, value)?,
            "max_queue_size" => c.max_queue_size = parse(key, value)?,
            "exit_timeout_seconds" => c.exit_timeout_seconds = parse_seconds(key, value)?,
            "stall_threshold" => c.stall_threshold = parse(key, value)?,
            "verbose" => c.verbose = parse_bool(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        tracing::debug!(key, value, "Config value set");
        Ok(())
    }
}

impl From<Config> for ConfigFacade {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

fn invalid(key: &str, value: &str, reason: impl Display) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|e| invalid(key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_seconds(key: &str, value: &str) -> Result<f64, ConfigError> {
    let secs: f64 = parse(key, value)?;
    if secs.is_finite() && secs >= 0.0 {
        Ok(secs)
    } else {
        Err(invalid(key, value, "expected a non-negative number of seconds"))
    }
}

/// Split one `key=value` item on the first `=`, trimming both halves.
#[must_use]
pub fn split_option(text: &str) -> Option<(&str, &str)> {
    text.split_once(KEY_VALUE_SEPARATOR)
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Decode a `k1=v1;k2=v2` list. Blank items and items without `=` are skipped.
#[must_use]
pub fn str_to_map(text: &str) -> OptionMap {
    text.split(ITEM_SEPARATOR)
        .filter(|item| !item.trim().is_empty())
        .filter_map(split_option)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Encode a map as `k1=v1;k2=v2`. An empty map encodes as an empty string.
#[must_use]
pub fn map_to_str(map: &OptionMap) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}{KEY_VALUE_SEPARATOR}{v}"))
        .collect::<Vec<_>>()
        .join(&ITEM_SEPARATOR.to_string())
}

/// Decode `a=1;b=2|c=3` into one map per stream, keeping empty maps so that
/// stream positions are preserved.
#[must_use]
pub fn str_to_maps(text: &str) -> Vec<OptionMap> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(MAP_SEPARATOR).map(str_to_map).collect()
}

#[must_use]
pub fn maps_to_str(maps: &[OptionMap]) -> String {
    maps.iter()
        .map(map_to_str)
        .collect::<Vec<_>>()
        .join(&MAP_SEPARATOR.to_string())
}
