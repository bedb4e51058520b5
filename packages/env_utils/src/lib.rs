#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Runtime environment variable helpers.
//!
//! Every lookup goes through a [`VarSource`] so configuration loaders can be
//! exercised against an in-memory map instead of the process environment.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

/// A source of environment-like variables.
pub trait VarSource {
    /// Returns the value of `name`, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl VarSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl VarSource for BTreeMap<&str, &str> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| (*v).to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseEnvError {
    #[error("Invalid value for {name}: '{value}' ({message})")]
    InvalidValue {
        name: String,
        value: String,
        message: String,
    },
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, ParseEnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ParseEnvError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Returns the value of `name` from `source`, falling back to `default`.
/// Empty values count as unset.
#[must_use]
pub fn default_env_from(source: &impl VarSource, name: &str, default: &str) -> String {
    source
        .var(name)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Returns the value of `name` from the process environment, falling back to `default`.
#[must_use]
pub fn default_env(name: &str, default: &str) -> String {
    default_env_from(&ProcessEnv, name, default)
}

/// Parses `name` from `source` if it is set. Empty values count as unset.
///
/// # Errors
///
/// * If the variable is set but cannot be parsed as `T`
pub fn option_env_parse_from<T>(
    source: &impl VarSource,
    name: &str,
) -> Result<Option<T>, ParseEnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match source.var(name) {
        Some(value) if !value.trim().is_empty() => parse_var(name, &value).map(Some),
        _ => Ok(None),
    }
}

/// Parses `name` from `source`, falling back to `default` when unset.
///
/// # Errors
///
/// * If the variable is set but cannot be parsed as `T`
pub fn default_env_parse_from<T>(
    source: &impl VarSource,
    name: &str,
    default: T,
) -> Result<T, ParseEnvError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(option_env_parse_from(source, name)?.unwrap_or(default))
}
