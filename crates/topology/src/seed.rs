//! Seed endpoints used to bootstrap topology discovery.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// A `host:port` endpoint queried for the current cluster topology.
///
/// Seeds are parsed once at configuration time. The host part is kept
/// verbatim; only the port is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Seed {
    host: String,
    port: u16,
}

impl Seed {
    /// Creates a seed from a host and port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSeed`] if the host is empty or contains
    /// whitespace, or if the port is zero.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, ConfigError> {
        let host = host.into();
        validate_host(&host, &format!("{host}:{port}"))?;
        if port == 0 {
            return Err(ConfigError::InvalidSeed {
                seed: format!("{host}:{port}"),
                message: "port must be non-zero".to_owned(),
            });
        }
        Ok(Self { host, port })
    }

    /// Parses a list of `host:port` strings, failing on the first invalid entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSeed`] for the first entry that does not parse.
    pub fn parse_all<I, S>(seeds: I) -> Result<Vec<Self>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        seeds.into_iter().map(|seed| seed.as_ref().parse()).collect()
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

fn validate_host(host: &str, raw: &str) -> Result<(), ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::InvalidSeed {
            seed: raw.to_owned(),
            message: "host cannot be empty".to_owned(),
        });
    }
    if host.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidSeed {
            seed: raw.to_owned(),
            message: "host cannot contain whitespace".to_owned(),
        });
    }
    Ok(())
}

impl FromStr for Seed {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let Some((host, port)) = trimmed.rsplit_once(':') else {
            return Err(ConfigError::InvalidSeed {
                seed: raw.to_owned(),
                message: "expected host:port".to_owned(),
            });
        };
        validate_host(host, raw)?;

        let port: u16 = port.parse().map_err(|_| ConfigError::InvalidSeed {
            seed: raw.to_owned(),
            message: format!("invalid port '{port}'"),
        })?;

        Self::new(host, port)
    }
}

impl TryFrom<String> for Seed {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<Seed> for String {
    fn from(seed: Seed) -> Self {
        seed.to_string()
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
