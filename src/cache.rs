//! Caché persistida de búsquedas resueltas por la vía de fallback.
//!
//! Mapea una consulta normalizada a la lista ordenada de fuentes que ya
//! funcionaron, con TTL por entrada y expulsión LRU cuando se supera el
//! límite de tamaño. El archivo JSON se escribe completo en cada
//! mutación (temp + rename atómico) y un archivo corrupto nunca impide
//! el arranque.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

const SCHEMA_VERSION: u32 = 1;
const MIN_TTL_SECONDS: f64 = 60.0;
const DEFAULT_TTL_SECONDS: f64 = 6.0 * 3600.0;
const DEFAULT_MAX_ENTRIES: usize = 256;

/// Entrada de la caché. `sources` nunca está vacía.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: String,
    pub query: String,
    pub sources: Vec<String>,
    pub identifier: Option<String>,
    pub created_at: f64,
    pub ttl: f64,
    pub last_used: f64,
}

impl CacheRecord {
    fn is_expired(&self, now: f64) -> bool {
        now >= self.created_at + self.ttl
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    saved_at: f64,
    entries: Vec<serde_json::Value>,
}

pub struct SearchCache {
    entries: Mutex<HashMap<String, CacheRecord>>,
    path: Option<PathBuf>,
    max_entries: usize,
    default_ttl: f64,
    clock: Arc<dyn Clock>,
}

impl SearchCache {
    /// Caché persistida en `path`. El contenido existente se carga al
    /// construir; las entradas ilegibles se descartan en silencio.
    pub fn persistent(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let cache = Self {
            entries: Mutex::new(HashMap::new()),
            path: Some(path.into()),
            max_entries: max_entries.max(1),
            default_ttl: DEFAULT_TTL_SECONDS,
            clock: Arc::new(SystemClock),
        };
        cache.load();
        cache
    }

    /// Caché solo en memoria (tests y modo degradado).
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            path: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl: DEFAULT_TTL_SECONDS,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_ttl(mut self, ttl_seconds: f64) -> Self {
        self.default_ttl = ttl_seconds.max(MIN_TTL_SECONDS);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Una URL se usa tal cual; texto libre se baja a minúsculas y se
    /// colapsan los espacios, así "Foo  Bar" y "foo bar" comparten entrada.
    pub fn normalize_key(query: &str) -> String {
        let trimmed = query.trim();
        if trimmed.contains("://") {
            return trimmed.to_string();
        }
        trimmed
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Devuelve una copia del registro vivo para `query`, refrescando su
    /// `last_used`. Un registro vencido se borra y devuelve `None`.
    pub fn get(&self, query: &str) -> Option<CacheRecord> {
        let key = Self::normalize_key(query);
        let now = self.clock.now();
        let mut expired = false;
        let record = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                Some(record) if record.is_expired(now) => {
                    entries.remove(&key);
                    expired = true;
                    debug!("🕐 Entrada de caché vencida: {}", key);
                    None
                }
                Some(record) => {
                    record.last_used = now;
                    Some(record.clone())
                }
                None => None,
            }
        };
        if expired {
            self.persist();
        }
        record
    }

    /// Registra (o reemplaza) las fuentes que funcionaron para `query`.
    /// Deduplica las fuentes y aplica el piso de TTL; una lista vacía se
    /// ignora.
    pub fn remember(
        &self,
        query: &str,
        sources: &[String],
        identifier: Option<String>,
        ttl_seconds: Option<f64>,
    ) {
        let mut deduped: Vec<String> = Vec::new();
        for source in sources {
            let trimmed = source.trim();
            if !trimmed.is_empty() && !deduped.iter().any(|s| s == trimmed) {
                deduped.push(trimmed.to_string());
            }
        }
        if deduped.is_empty() {
            return;
        }

        let key = Self::normalize_key(query);
        let now = self.clock.now();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl).max(MIN_TTL_SECONDS);
        let record = CacheRecord {
            key: key.clone(),
            query: query.trim().to_string(),
            sources: deduped,
            identifier,
            created_at: now,
            ttl,
            last_used: now,
        };

        {
            let mut entries = self.entries.lock();
            entries.insert(key.clone(), record);
            Self::prune_locked(&mut entries, now, self.max_entries);
        }
        debug!("💾 Caché actualizada para: {}", key);
        self.persist();
    }

    pub fn evict(&self, query: &str) {
        let key = Self::normalize_key(query);
        let removed = self.entries.lock().remove(&key).is_some();
        if removed {
            debug!("🗑️ Entrada de caché expulsada: {}", key);
            self.persist();
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.persist();
    }

    /// Primero caen las vencidas; si aún sobra tamaño, caen las menos
    /// usadas recientemente hasta cumplir el límite.
    fn prune_locked(entries: &mut HashMap<String, CacheRecord>, now: f64, max_entries: usize) {
        entries.retain(|_, record| !record.is_expired(now));
        while entries.len() > max_entries {
            let oldest = entries
                .iter()
                .min_by(|a, b| a.1.last_used.total_cmp(&b.1.last_used))
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn load(&self) {
        let Some(path) = &self.path else { return };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let file: CacheFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!("⚠️ Archivo de caché ilegible, se ignora: {}", err);
                return;
            }
        };
        if file.version != SCHEMA_VERSION {
            warn!("⚠️ Versión de caché desconocida: {}", file.version);
            return;
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let mut skipped = 0usize;
        for value in file.entries {
            match serde_json::from_value::<CacheRecord>(value) {
                Ok(record) if !record.sources.is_empty() => {
                    entries.insert(record.key.clone(), record);
                }
                _ => skipped += 1,
            }
        }
        Self::prune_locked(&mut entries, now, self.max_entries);
        info!(
            "📂 Caché de búsquedas cargada: {} entradas ({} descartadas)",
            entries.len(),
            skipped
        );
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let entries: Vec<serde_json::Value> = {
            let entries = self.entries.lock();
            entries
                .values()
                .filter_map(|record| serde_json::to_value(record).ok())
                .collect()
        };
        let file = CacheFile {
            version: SCHEMA_VERSION,
            saved_at: self.clock.now(),
            entries,
        };
        if let Err(err) = Self::write_atomic(path, &file) {
            warn!("⚠️ No se pudo persistir la caché: {}", err);
        }
    }

    /// Escritura completa a un temp del mismo directorio + rename, para
    /// que un corte a mitad de escritura nunca deje un archivo truncado.
    fn write_atomic(path: &Path, file: &CacheFile) -> anyhow::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut tmp, file)?;
        tmp.flush()?;
        tmp.persist(path)?;
        Ok(())
    }
}
