use crate::safe_display::SafeDisplay;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Layered configuration loader: compiled-in defaults, overridden by a TOML
/// file, overridden by `GLARE__`-prefixed environment variables
/// (`GLARE__HTTP_PORT`, `GLARE__DB__HOST`, ...).
pub struct ConfigLoader<T> {
    path: PathBuf,
    _config: PhantomData<T>,
}

impl<T: Default + Serialize + DeserializeOwned> ConfigLoader<T> {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            _config: PhantomData,
        }
    }

    pub fn figment(&self) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(T::default()))
            .merge(Toml::file(&self.path))
            .merge(Env::prefixed("GLARE__").split("__"))
    }

    pub fn load(&self) -> Result<T, figment::Error> {
        self.figment().extract()
    }

    /// Loads the config, or prints the effective config as TOML and returns
    /// `None` when `--dump-config` was passed on the command line.
    pub fn load_or_dump_config(&self) -> Option<T> {
        match self.load() {
            Ok(config) => {
                if std::env::args().any(|arg| arg == "--dump-config") {
                    match toml::to_string_pretty(&config) {
                        Ok(rendered) => println!("{rendered}"),
                        Err(err) => eprintln!("Failed to render config: {err}"),
                    }
                    None
                } else {
                    Some(config)
                }
            }
            Err(err) => {
                eprintln!("Failed to load config: {err}");
                None
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbPostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
}

impl Default for DbPostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "glare".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 10,
        }
    }
}

impl SafeDisplay for DbPostgresConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "host: {}", self.host);
        let _ = writeln!(&mut result, "port: {}", self.port);
        let _ = writeln!(&mut result, "database: {}", self.database);
        let _ = writeln!(&mut result, "username: {}", self.username);
        let _ = writeln!(&mut result, "password: ****");
        let _ = writeln!(&mut result, "max connections: {}", self.max_connections);
        result
    }
}
