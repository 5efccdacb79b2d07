use thiserror::Error;

/// Señales que marcan un fallo de carga como reintentable (rate-limit,
/// cuota, throttling, verificación de edad, firma, fallo de extractor).
const RETRYABLE_INDICATORS: [&str; 6] =
    ["429", "quota", "throttle", "age", "signature", "extractor"];

/// Categorías usadas para clasificar fallos del extractor en métricas.
const EXTRACTOR_CATEGORIES: [&str; 6] =
    ["429", "throttle", "quota", "sign in", "sign-in", "age"];

pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error visible para la capa de comandos.
#[derive(Debug, Error)]
pub enum MusicError {
    /// El nodo de resolución no respondió dentro de la ventana de
    /// readiness. El usuario debe reintentar en unos segundos.
    #[error("El nodo de resolución no está disponible: {0}")]
    NodeUnavailable(String),

    #[error(transparent)]
    TrackLoad(#[from] TrackLoadFailure),

    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),
}

/// Fallo al cargar un track desde el nodo de resolución.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TrackLoadFailure {
    pub message: String,
    #[source]
    pub cause: Option<BoxedCause>,
}

impl TrackLoadFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: impl Into<BoxedCause>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Clasificación por texto del mensaje y de la causa. Un fallo sin
    /// señal reconocida nunca se reintenta.
    pub fn is_retryable(&self) -> bool {
        let mut text = self.message.to_lowercase();
        if let Some(cause) = &self.cause {
            text.push(' ');
            text.push_str(&cause.to_string().to_lowercase());
        }
        RETRYABLE_INDICATORS
            .iter()
            .any(|indicator| text.contains(indicator))
    }
}

/// El extractor local no produjo nada utilizable.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ExtractionFailure {
    pub message: String,
    #[source]
    pub cause: Option<BoxedCause>,
}

impl ExtractionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: impl Into<BoxedCause>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Categoría para el histograma de fallos del extractor.
    pub fn category(&self) -> String {
        let mut text = self.message.to_lowercase();
        if let Some(cause) = &self.cause {
            text.push(' ');
            text.push_str(&cause.to_string().to_lowercase());
        }
        for indicator in EXTRACTOR_CATEGORIES {
            if text.contains(indicator) {
                return indicator.to_string();
            }
        }
        "other".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let plain = TrackLoadFailure::new("No tracks returned");
        assert!(!plain.is_retryable());

        let limited = TrackLoadFailure::new("HTTP 429 from upstream");
        assert!(limited.is_retryable());

        let caused = TrackLoadFailure::with_cause(
            "Failed to communicate with node",
            std::io::Error::other("quota exceeded for key"),
        );
        assert!(caused.is_retryable());
    }

    #[test]
    fn test_extractor_category() {
        let throttled = ExtractionFailure::new("upstream throttle detected");
        assert_eq!(throttled.category(), "throttle");

        let signin = ExtractionFailure::new("Sign in to confirm you are not a bot");
        assert_eq!(signin.category(), "sign in");

        let unknown = ExtractionFailure::new("connection reset");
        assert_eq!(unknown.category(), "other");
    }
}
