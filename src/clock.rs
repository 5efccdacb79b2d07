use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Fuente de tiempo para TTL/LRU de la caché.
///
/// Inyectable para que los tests puedan avanzar el reloj sin dormir.
pub trait Clock: Send + Sync {
    /// Segundos desde epoch, con fracción.
    fn now(&self) -> f64;
}

/// Reloj del sistema.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Reloj manual para tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Arc<Self> {
        Arc::new(Self {
            now: parking_lot::Mutex::new(start),
        })
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
