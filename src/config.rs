use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Nodo de resolución
    pub node_host: String,
    pub node_port: u16,
    pub node_password: String,
    pub node_secure: bool,

    // Caché de búsquedas
    pub cache_path: PathBuf,
    pub cache_max_entries: usize,
    pub cache_ttl_seconds: f64,

    // Tiempos
    pub ready_timeout_seconds: u64,
    pub diagnostics_timeout_seconds: u64,

    // Rendimiento
    pub worker_threads: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Nodo de resolución
            node_host: std::env::var("NODE_HOST").unwrap_or_else(|_| "localhost".to_string()),
            node_port: std::env::var("NODE_PORT")
                .unwrap_or_else(|_| "2333".to_string())
                .parse()?,
            node_password: std::env::var("NODE_PASSWORD")
                .unwrap_or_else(|_| "youshallnotpass".to_string()),
            node_secure: std::env::var("NODE_SECURE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            // Caché
            cache_path: std::env::var("SEARCH_CACHE_PATH")
                .unwrap_or_else(|_| "data/search_cache.json".to_string())
                .into(),
            cache_max_entries: std::env::var("SEARCH_CACHE_MAX_ENTRIES")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            cache_ttl_seconds: std::env::var("SEARCH_CACHE_TTL")
                .unwrap_or_else(|_| "21600".to_string()) // 6 horas
                .parse()?,

            // Tiempos
            ready_timeout_seconds: std::env::var("NODE_READY_TIMEOUT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            diagnostics_timeout_seconds: std::env::var("DIAGNOSTICS_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            // Rendimiento
            worker_threads: match std::env::var("WORKER_THREADS") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => num_cpus::get(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// URL base de la API REST del nodo, para diagnósticos.
    pub fn node_base_url(&self) -> Result<Url> {
        let scheme = if self.node_secure { "https" } else { "http" };
        Ok(Url::parse(&format!(
            "{}://{}:{}/",
            scheme, self.node_host, self.node_port
        ))?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_host.trim().is_empty() {
            anyhow::bail!("NODE_HOST must not be empty");
        }

        if self.cache_max_entries == 0 {
            anyhow::bail!("Cache max entries must be greater than 0");
        }

        if self.cache_ttl_seconds < 60.0 {
            anyhow::bail!(
                "Cache TTL must be at least 60 seconds, got: {}",
                self.cache_ttl_seconds
            );
        }

        if self.ready_timeout_seconds == 0 {
            anyhow::bail!("Ready timeout must be greater than 0");
        }

        Ok(())
    }

    /// Resumen apto para logs: todo menos la contraseña del nodo.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Node: {}:{} (secure: {})\n  \
            Cache: {} entries max, {}s TTL at {}\n  \
            Timeouts: {}s readiness, {}s diagnostics\n  \
            Workers: {}",
            self.node_host,
            self.node_port,
            self.node_secure,
            self.cache_max_entries,
            self.cache_ttl_seconds,
            self.cache_path.display(),
            self.ready_timeout_seconds,
            self.diagnostics_timeout_seconds,
            self.worker_threads
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_host: "localhost".to_string(),
            node_port: 2333,
            node_password: "youshallnotpass".to_string(),
            node_secure: false,

            cache_path: "data/search_cache.json".into(),
            cache_max_entries: 500,
            cache_ttl_seconds: 21600.0, // 6 horas

            ready_timeout_seconds: 10,
            diagnostics_timeout_seconds: 5,

            worker_threads: num_cpus::get(),
        }
    }
}
