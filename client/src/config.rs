use crate::error::{Error, Result};
use crate::profile::ProfileBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the profile file in the user's home directory
pub const CONFIG_FILE_NAME: &str = ".webtask";

/// One entry in a profile file.  The file is a JSON object mapping profile names to
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub container: String,
    pub token: String,
}

impl ProfileConfig {
    /// A builder for a profile with these settings
    pub fn builder(&self) -> ProfileBuilder {
        let builder = ProfileBuilder::new(self.container.clone(), self.token.clone());
        match self.url {
            Some(ref url) => builder.url(url.clone()),
            None => builder,
        }
    }
}

/// The location of the user's profile file: `.webtask` in `%USERPROFILE%` or `$HOME`.
pub fn default_config_path() -> Option<PathBuf> {
    env::var_os("USERPROFILE")
        .or_else(|| env::var_os("HOME"))
        .map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
}

/// Read all profiles from a profile file.
pub fn load_profiles<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, ProfileConfig>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Unable to read profile file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&contents).map_err(|e| {
        Error::Config(format!(
            "Invalid profile file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Read an environment variable, treating an empty value as absent.
fn env_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(Error::Config(format!(
            "Cannot read environment variable '{}': {}",
            name, err
        ))),
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
    }
}

fn required_env_var(name: &str) -> Result<String> {
    env_var(name)?.ok_or_else(|| Error::Config(format!("{} is not set", name)))
}

impl ProfileBuilder {
    /// Create a builder from environment variables:
    ///
    /// * `SANDBOX_URL` (optional)
    /// * `SANDBOX_CONTAINER`
    /// * `SANDBOX_TOKEN`
    pub fn from_env() -> Result<Self> {
        let container = required_env_var("SANDBOX_CONTAINER")?;
        let token = required_env_var("SANDBOX_TOKEN")?;
        let builder = ProfileBuilder::new(container, token);
        Ok(match env_var("SANDBOX_URL")? {
            Some(url) => builder.url(url),
            None => builder,
        })
    }

    /// Create a builder from the named profile in a profile file.
    pub fn from_profile_file<P: AsRef<Path>>(path: P, name: &str) -> Result<Self> {
        let path = path.as_ref();
        let profiles = load_profiles(path)?;
        let config = profiles.get(name).ok_or_else(|| {
            Error::Config(format!(
                "No profile named `{}` in {}",
                name,
                path.display()
            ))
        })?;
        Ok(config.builder())
    }

    /// Create a builder from the named profile in the user's profile file.
    pub fn from_profile(name: &str) -> Result<Self> {
        let path = default_config_path().ok_or_else(|| {
            Error::Config("Unable to locate the home directory for the profile file".to_owned())
        })?;
        Self::from_profile_file(path, name)
    }
}
