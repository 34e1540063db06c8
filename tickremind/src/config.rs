use failure::{format_err, Error};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: Network,
    pub database: Database,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub dashboard: Dashboard,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| format_err!("failed to open config {}: {}", path.display(), e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let mut config = Self::parse(&contents)?;

        let overrides = envy::prefixed("TICKREMIND_").from_env::<Overrides>()?;
        config.apply(overrides);
        config.check()?;

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(contents)?;
        config.check()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(addr) = overrides.addr {
            info!("network.addr overridden from environment");
            self.network.addr = addr;
        }
        if let Some(url) = overrides.database_url {
            info!("database.url overridden from environment");
            self.database.url = url;
        }
        if let Some(header) = overrides.identity_header {
            info!("auth.identity_header overridden from environment");
            self.auth.identity_header = header;
        }
        if let Some(template) = overrides.template {
            info!("dashboard.template overridden from environment");
            self.dashboard.template = template;
        }
    }

    // Check invariants
    fn check(&self) -> Result<(), Error> {
        Self::check_field_ranges(
            "network.max_form_bytes",
            self.network.max_form_bytes,
            64,
            1 << 20,
        )?;
        Self::check_field_ranges(
            "network.max_csv_bytes",
            self.network.max_csv_bytes,
            64,
            64 << 20,
        )?;
        Self::check_field_ranges("database.pool_size", self.database.pool_size, 1, 64)?;
        Self::check_field_ranges("database.executors", self.database.executors, 1, 64)?;
        Self::check_field_ranges("dashboard.entry_limit", self.dashboard.entry_limit, 1, 10_000)?;

        if self.auth.identity_header.trim().is_empty() {
            return Err(format_err!("auth.identity_header must not be empty"));
        }

        Ok(())
    }

    fn check_field_ranges<T: Ord + Display>(
        name: &str,
        field: T,
        lower: T,
        upper: T,
    ) -> Result<(), Error> {
        if field < lower || field > upper {
            Err(format_err!(
                "value of the field {:?} = {} is out of range {} <= value <= {}",
                name,
                field,
                lower,
                upper
            ))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub addr: String,
    /// limit of urlencoded form bodies
    #[serde(default = "default_max_form_bytes")]
    pub max_form_bytes: usize,
    /// limit of CSV uploads
    #[serde(default = "default_max_csv_bytes")]
    pub max_csv_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// SQLite file path, or `:memory:`
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// number of synchronous storage actors
    #[serde(default = "default_executors")]
    pub executors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    /// header in which the authenticating proxy passes the caller identity
    pub identity_header: String,
}

impl Default for Auth {
    fn default() -> Self {
        Auth {
            identity_header: "X-Authenticated-User".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub template: PathBuf,
    /// most recent entries listed per rule
    pub entry_limit: i64,
}

impl Default for Dashboard {
    fn default() -> Self {
        Dashboard {
            template: PathBuf::from("templates/root.html"),
            entry_limit: 356,
        }
    }
}

/// `TICKREMIND_*` environment variables taking precedence over the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Overrides {
    pub addr: Option<String>,
    pub database_url: Option<String>,
    pub identity_header: Option<String>,
    pub template: Option<PathBuf>,
}

fn default_max_form_bytes() -> usize {
    4096
}

fn default_max_csv_bytes() -> usize {
    4 << 20
}

fn default_pool_size() -> u32 {
    4
}

fn default_executors() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [network]
        addr = "127.0.0.1:8080"

        [database]
        url = ":memory:"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(config.network.max_form_bytes, 4096);
        assert_eq!(config.network.max_csv_bytes, 4 << 20);
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.database.executors, 3);
        assert_eq!(config.auth.identity_header, "X-Authenticated-User");
        assert_eq!(config.dashboard.entry_limit, 356);
        assert_eq!(config.dashboard.template, PathBuf::from("templates/root.html"));
    }

    #[test]
    fn out_of_range_fields_are_named() {
        let contents = format!("{}\n[dashboard]\ntemplate = \"root.html\"\nentry_limit = 0\n", MINIMAL);
        let err = Config::parse(&contents).unwrap_err();
        assert!(err.to_string().contains("dashboard.entry_limit"), "{}", err);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = Config::parse(MINIMAL).unwrap();
        config.apply(Overrides {
            addr: Some("0.0.0.0:9000".into()),
            database_url: Some("ticks.sqlite".into()),
            identity_header: None,
            template: None,
        });

        assert_eq!(config.network.addr, "0.0.0.0:9000");
        assert_eq!(config.database.url, "ticks.sqlite");
        assert_eq!(config.auth.identity_header, "X-Authenticated-User");
    }

    #[test]
    fn blank_identity_header_is_rejected() {
        let contents = format!("{}\n[auth]\nidentity_header = \" \"\n", MINIMAL);
        assert!(Config::parse(&contents).is_err());
    }
}
