use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};
use tracing::{info, warn};

const REFRESH_INTERVAL_SECS: f64 = 1.0;

/// Monitorea el archivo de cookies de YouTube y lo recarga perezosamente.
///
/// La ruta viene de `YT_COOKIES_FILE`; el mtime se revisa como mucho una
/// vez por segundo para no golpear el filesystem en cada extracción.
pub struct CookieManager {
    env_var: &'static str,
    state: Mutex<State>,
}

struct State {
    path: Option<PathBuf>,
    mtime: Option<SystemTime>,
    last_check: Option<Instant>,
}

impl Default for CookieManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieManager {
    pub fn new() -> Self {
        Self::from_env_var("YT_COOKIES_FILE")
    }

    pub fn from_env_var(env_var: &'static str) -> Self {
        let manager = Self {
            env_var,
            state: Mutex::new(State {
                path: None,
                mtime: None,
                last_check: None,
            }),
        };
        manager.refresh(&mut manager.state.lock());
        manager
    }

    fn refresh_if_needed(&self) {
        let mut state = self.state.lock();
        let due = match state.last_check {
            Some(at) => at.elapsed().as_secs_f64() >= REFRESH_INTERVAL_SECS,
            None => true,
        };
        if due {
            self.refresh(&mut state);
        }
    }

    fn refresh(&self, state: &mut State) {
        state.last_check = Some(Instant::now());
        let configured = std::env::var(self.env_var).ok().filter(|v| !v.is_empty());
        match configured {
            Some(raw) => {
                let path = PathBuf::from(raw);
                let mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                if state.path.as_ref() != Some(&path) {
                    if mtime.is_some() {
                        info!("🍪 Cookies encontradas en: {}", path.display());
                    } else {
                        warn!(
                            "🍪 Archivo de cookies configurado pero inexistente: {}",
                            path.display()
                        );
                    }
                }
                state.path = Some(path);
                state.mtime = mtime;
            }
            None => {
                state.path = None;
                state.mtime = None;
            }
        }
    }

    /// Ruta del archivo de cookies, si existe en disco ahora mismo.
    pub fn cookie_file(&self) -> Option<PathBuf> {
        self.refresh_if_needed();
        let state = self.state.lock();
        state
            .path
            .clone()
            .filter(|_| state.mtime.is_some())
    }

    /// Argumentos extra para el binario yt-dlp.
    pub fn extractor_args(&self) -> Vec<String> {
        match self.cookie_file() {
            Some(path) => vec!["--cookies".to_string(), path.display().to_string()],
            None => Vec::new(),
        }
    }

    /// Edad del archivo de cookies en segundos, para diagnósticos.
    pub fn cookie_age_seconds(&self) -> Option<f64> {
        self.refresh_if_needed();
        let state = self.state.lock();
        let mtime = state.mtime?;
        SystemTime::now()
            .duration_since(mtime)
            .ok()
            .map(|d| d.as_secs_f64())
    }
}
