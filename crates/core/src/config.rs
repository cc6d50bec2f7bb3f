//! Runtime configuration.
//!
//! Defaults are suitable for an interactive viewer; each field can be
//! overridden through a `TRACER_*` environment variable.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Application and renderer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
    /// Enable the Khronos validation layer.
    pub validation: bool,
    /// Frames-in-flight override. `None` derives the count from the surface.
    pub frames_in_flight: Option<usize>,
    /// Directory holding the compiled SPIR-V shaders.
    pub shader_dir: PathBuf,
    /// Frame timer rate in frames per second (0 = unthrottled).
    pub frame_rate: u32,
    /// Descriptor capacity of each bindless resource class.
    pub descriptor_capacity: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: String::from("tracer"),
            validation: cfg!(debug_assertions),
            frames_in_flight: None,
            shader_dir: PathBuf::from("shaders"),
            frame_rate: 60,
            descriptor_capacity: 128,
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(width) = parse(&lookup, "TRACER_WIDTH")? {
            config.width = width;
        }
        if let Some(height) = parse(&lookup, "TRACER_HEIGHT")? {
            config.height = height;
        }
        if let Some(title) = lookup("TRACER_TITLE") {
            config.title = title;
        }
        if let Some(validation) = lookup("TRACER_VALIDATION") {
            config.validation = parse_bool("TRACER_VALIDATION", &validation)?;
        }
        if let Some(frames) = parse::<usize>(&lookup, "TRACER_FRAMES_IN_FLIGHT")? {
            if frames == 0 {
                return Err(Error::Config(
                    "TRACER_FRAMES_IN_FLIGHT must be at least 1".to_string(),
                ));
            }
            config.frames_in_flight = Some(frames);
        }
        if let Some(dir) = lookup("TRACER_SHADER_DIR") {
            config.shader_dir = PathBuf::from(dir);
        }
        if let Some(rate) = parse(&lookup, "TRACER_FRAME_RATE")? {
            config.frame_rate = rate;
        }
        if let Some(capacity) = parse::<u32>(&lookup, "TRACER_DESCRIPTOR_CAPACITY")? {
            if capacity == 0 {
                return Err(Error::Config(
                    "TRACER_DESCRIPTOR_CAPACITY must be at least 1".to_string(),
                ));
            }
            config.descriptor_capacity = capacity;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}={raw:?}: expected a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.descriptor_capacity, 128);
        assert!(config.frames_in_flight.is_none());
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = Config::from_lookup(lookup(&[
            ("TRACER_WIDTH", "640"),
            ("TRACER_HEIGHT", " 480 "),
            ("TRACER_VALIDATION", "off"),
            ("TRACER_FRAMES_IN_FLIGHT", "3"),
            ("TRACER_SHADER_DIR", "/opt/shaders"),
        ]))
        .unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 480);
        assert!(!config.validation);
        assert_eq!(config.frames_in_flight, Some(3));
        assert_eq!(config.shader_dir, PathBuf::from("/opt/shaders"));
    }

    #[test]
    fn test_malformed_values_are_config_errors() {
        let err = Config::from_lookup(lookup(&[("TRACER_WIDTH", "wide")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_lookup(lookup(&[("TRACER_VALIDATION", "maybe")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = Config::from_lookup(lookup(&[("TRACER_FRAMES_IN_FLIGHT", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
