use crate::core::db::transport::DriverKind;
use crate::core::{DriverError, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
}

/// Connection settings handed to [`Database::connect`](crate::Database::connect).
#[derive(Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Driver tag: `postgresql` or `sqlite`
    pub driver: String,
    /// Database name, or a file path for sqlite
    pub database: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Table prefix substituted for the `#__` token
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Select the database right after connecting
    #[serde(default = "default_select")]
    pub select: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_prefix() -> String {
    "jos_".to_string()
}

fn default_select() -> bool {
    true
}

impl DatabaseConfig {
    /// Settings for a PostgreSQL server on the default port
    pub fn postgresql(host: &str, database: &str, user: &str, password: &str) -> Self {
        DatabaseConfig {
            driver: DriverKind::Postgresql.name().to_string(),
            database: database.to_string(),
            host: host.to_string(),
            port: None,
            user: user.to_string(),
            password: password.to_string(),
            prefix: default_prefix(),
            select: default_select(),
        }
    }

    /// Settings for an embedded database file, or `:memory:`
    pub fn sqlite(path: &str) -> Self {
        DatabaseConfig {
            driver: DriverKind::Sqlite.name().to_string(),
            database: path.to_string(),
            host: String::new(),
            port: None,
            user: String::new(),
            password: String::new(),
            prefix: default_prefix(),
            select: default_select(),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Parsed driver tag
    pub fn driver_kind(&self) -> Result<DriverKind> {
        self.driver.parse()
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("prefix", &self.prefix)
            .field("select", &self.select)
            .finish()
    }
}

/// Parses configuration from TOML text.
pub fn from_toml_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    config.database.driver_kind()?;
    Ok(config)
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// use pgdriver::config::load_config;
///
/// let config = load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config.database);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    from_toml_str(&content)
}

/// `<config dir>/pgdriver/config.toml` for the current user
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("pgdriver").join("config.toml"))
        .ok_or_else(|| DriverError::Config("no configuration directory for this user".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CONFIG: &str = r#"
[database]
driver = "postgresql"
database = "joomla_ut"
host = "db.internal"
port = 5433
user = "utuser"
password = "ut1234"
prefix = "jos_"
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = from_toml_str(SAMPLE_CONFIG).expect("Failed to parse sample config");
        let db = config.database;
        assert_eq!(db.driver_kind().unwrap(), DriverKind::Postgresql);
        assert_eq!(db.database, "joomla_ut");
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, Some(5433));
        assert_eq!(db.user, "utuser");
        assert!(db.select);
    }

    #[test]
    fn test_defaults() {
        let config = from_toml_str("[database]\ndriver = \"sqlite\"\ndatabase = \":memory:\"\n").unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.prefix, "jos_");
        assert_eq!(config.database.port, None);
        assert!(config.database.password.is_empty());
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let result = from_toml_str("[database]\ndriver = \"mysql\"\ndatabase = \"x\"\n");
        assert!(matches!(result, Err(DriverError::Config(_))));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(from_toml_str("[database"), Err(DriverError::Toml(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.database.password, "ut1234");

        assert!(matches!(
            load_config("/nonexistent/pgdriver.toml"),
            Err(DriverError::Io(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DatabaseConfig::postgresql("localhost", "db", "user", "secret");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_default_config_path() {
        if let Ok(path) = default_config_path() {
            assert!(path.ends_with("pgdriver/config.toml"));
        }
    }
}
