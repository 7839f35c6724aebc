//! Application configuration.
//!
//! Read once at startup and shared read-only with every request. Values can
//! come from code, from any serde source, or from `STRATA_*` environment
//! variables:
//!
//! | Variable                   | Field              | Default           |
//! |----------------------------|--------------------|-------------------|
//! | `STRATA_ENV`               | `env`              | `development`     |
//! | `STRATA_PROXY`             | `proxy`            | `false`           |
//! | `STRATA_SUBDOMAIN_OFFSET`  | `subdomain_offset` | `2`               |
//! | `STRATA_PROXY_IP_HEADER`   | `proxy_ip_header`  | `x-forwarded-for` |
//! | `STRATA_MAX_IPS_COUNT`     | `max_ips_count`    | `0` (no limit)    |
//! | `STRATA_SILENT`            | `silent`           | `false`           |

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Deployment environment name.
    pub env: String,
    /// Trust `X-Forwarded-*` headers set by a reverse proxy.
    pub proxy: bool,
    /// Number of trailing hostname labels that are not subdomains.
    pub subdomain_offset: usize,
    /// Header holding the client address chain when behind a proxy.
    pub proxy_ip_header: String,
    /// Keep only this many trailing entries of the address chain; `0` keeps all.
    pub max_ips_count: usize,
    /// Suppress the default error log.
    pub silent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: "development".to_owned(),
            proxy: false,
            subdomain_offset: 2,
            proxy_ip_header: "x-forwarded-for".to_owned(),
            max_ips_count: 0,
            silent: false,
        }
    }
}

impl Config {
    /// Defaults overridden by any `STRATA_*` variables in the environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(std::env::vars())
    }

    /// Defaults overridden by `STRATA_*` entries of `vars`. Other keys are
    /// ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            match key.as_ref() {
                "STRATA_ENV"              => config.env = value.to_owned(),
                "STRATA_PROXY"            => config.proxy = parse_bool("STRATA_PROXY", value)?,
                "STRATA_SUBDOMAIN_OFFSET" => config.subdomain_offset = parse("STRATA_SUBDOMAIN_OFFSET", value)?,
                "STRATA_PROXY_IP_HEADER"  => config.proxy_ip_header = value.to_ascii_lowercase(),
                "STRATA_MAX_IPS_COUNT"    => config.max_ips_count = parse("STRATA_MAX_IPS_COUNT", value)?,
                "STRATA_SILENT"           => config.silent = parse_bool("STRATA_SILENT", value)?,
                _ => {}
            }
        }
        Ok(config)
    }

    /// `true` when running with `env = "test"`.
    pub fn is_test(&self) -> bool {
        self.env == "test"
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| Error::config(format!("{key}: invalid value {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on"  => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key}: expected a boolean, got {value:?}"))),
    }
}
