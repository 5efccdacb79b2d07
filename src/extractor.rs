use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cookies::CookieManager;
use crate::error::ExtractionFailure;

const KNOWN_SEARCH_PREFIXES: [&str; 7] = [
    "ytsearch:",
    "ytsearch1:",
    "ytsearch5:",
    "ytsearch10:",
    "ytdsearch:",
    "spsearch:",
    "scsearch:",
];

/// Duración reportada por el extractor, con unidad explícita.
///
/// El contrato lleva la unidad en el tipo en lugar de adivinarla por
/// magnitud del valor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractedDuration {
    Millis(u64),
    Seconds(f64),
}

impl ExtractedDuration {
    pub fn as_millis(&self) -> u64 {
        match self {
            Self::Millis(ms) => *ms,
            Self::Seconds(s) => (s * 1000.0).round().max(0.0) as u64,
        }
    }
}

/// Resultado de una extracción local. Todos los campos son best-effort.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub stream_url: Option<String>,
    pub webpage_url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub duration: Option<ExtractedDuration>,
    pub thumbnail: Option<String>,
    /// Identificador estable del video/pista, si el extractor lo conoce.
    pub identifier: Option<String>,
}

/// Contrato del extractor local, usado solo cuando el nodo remoto no
/// puede servir una consulta. Si la fuente devuelve un listado, la
/// implementación entrega únicamente la primera entrada; un listado
/// vacío es en sí un fallo de extracción.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocalExtractor: Send + Sync {
    async fn extract(&self, query: &str) -> Result<Extraction, ExtractionFailure>;

    /// Versión del extractor, para diagnósticos.
    async fn version(&self) -> Option<String>;
}

/// Una URL o un prefijo de búsqueda conocido pasan tal cual; cualquier
/// otro texto se convierte en búsqueda.
pub fn normalize_extractor_query(query: &str) -> String {
    let stripped = query.trim();
    let lower = stripped.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return stripped.to_string();
    }
    if KNOWN_SEARCH_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return stripped.to_string();
    }
    format!("ytsearch:{stripped}")
}

/// Extractor concreto sobre el binario `yt-dlp`.
///
/// Corre como subproceso, así una extracción lenta nunca bloquea el
/// scheduler ni la cola de otro servidor.
pub struct YtDlpExtractor {
    binary: String,
    cookies: Arc<CookieManager>,
    socket_timeout_secs: u32,
}

impl YtDlpExtractor {
    pub fn new(cookies: Arc<CookieManager>) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            cookies,
            socket_timeout_secs: 15,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn parse_line(line: &str) -> Extraction {
        // campos pipe-separados en el orden del --print de abajo
        let mut parts = line.split('|');
        let field = |raw: Option<&str>| {
            raw.map(str::trim)
                .filter(|v| !v.is_empty() && *v != "NA")
                .map(str::to_string)
        };
        let identifier = field(parts.next());
        let stream_url = field(parts.next());
        let webpage_url = field(parts.next());
        let title = field(parts.next());
        let author = field(parts.next());
        let duration = field(parts.next())
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .map(ExtractedDuration::Seconds);
        let thumbnail = field(parts.next());

        Extraction {
            stream_url,
            webpage_url,
            title,
            author,
            duration,
            thumbnail,
            identifier,
        }
    }
}

#[async_trait]
impl LocalExtractor for YtDlpExtractor {
    async fn extract(&self, query: &str) -> Result<Extraction, ExtractionFailure> {
        let normalized = normalize_extractor_query(query);
        info!("🔍 Extracción local: {}", normalized);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "--print",
            "%(id)s|%(url)s|%(webpage_url)s|%(title)s|%(uploader,channel,artist,creator)s|%(duration)s|%(thumbnail)s",
            "--format",
            "bestaudio/best",
            "--skip-download",
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            "--socket-timeout",
            &self.socket_timeout_secs.to_string(),
            "--retries",
            "2",
        ]);
        for arg in self.cookies.extractor_args() {
            cmd.arg(arg);
        }
        cmd.arg(&normalized);

        let output = cmd.output().await.map_err(|err| {
            ExtractionFailure::with_cause("No se pudo lanzar yt-dlp", err)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("⚠️ yt-dlp falló: {}", stderr.trim());
            return Err(ExtractionFailure::new(format!(
                "yt-dlp terminó con error: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // búsquedas y playlists imprimen una línea por entrada; solo la
        // primera nos interesa
        let first = stdout.lines().find(|line| !line.trim().is_empty());
        match first {
            Some(line) => Ok(Self::parse_line(line)),
            None => Err(ExtractionFailure::new("yt-dlp no devolvió entradas")),
        }
    }

    async fn version(&self) -> Option<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!version.is_empty()).then_some(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalization_passes_urls_through() {
        assert_eq!(
            normalize_extractor_query(" https://youtu.be/abc "),
            "https://youtu.be/abc"
        );
        assert_eq!(
            normalize_extractor_query("scsearch:lofi beats"),
            "scsearch:lofi beats"
        );
        assert_eq!(
            normalize_extractor_query("never gonna give you up"),
            "ytsearch:never gonna give you up"
        );
    }

    #[test]
    fn test_parse_line_full() {
        let line = "abc123|https://cdn/stream|https://youtube.com/watch?v=abc123|Song Title|Artist|212.5|https://thumb";
        let extraction = YtDlpExtractor::parse_line(line);
        assert_eq!(extraction.identifier.as_deref(), Some("abc123"));
        assert_eq!(extraction.stream_url.as_deref(), Some("https://cdn/stream"));
        assert_eq!(
            extraction.webpage_url.as_deref(),
            Some("https://youtube.com/watch?v=abc123")
        );
        assert_eq!(extraction.title.as_deref(), Some("Song Title"));
        assert_eq!(extraction.author.as_deref(), Some("Artist"));
        assert_eq!(extraction.duration.unwrap().as_millis(), 212_500);
    }

    #[test]
    fn test_parse_line_missing_fields() {
        let extraction = YtDlpExtractor::parse_line("NA|https://cdn/stream|NA|NA|NA|NA|NA");
        assert!(extraction.identifier.is_none());
        assert_eq!(extraction.stream_url.as_deref(), Some("https://cdn/stream"));
        assert!(extraction.title.is_none());
        assert!(extraction.duration.is_none());
    }

    #[test]
    fn test_duration_units_are_explicit() {
        assert_eq!(ExtractedDuration::Seconds(3.0).as_millis(), 3000);
        assert_eq!(ExtractedDuration::Millis(3000).as_millis(), 3000);
        // un valor grande en segundos no se confunde con milisegundos
        assert_eq!(ExtractedDuration::Seconds(12_000.0).as_millis(), 12_000_000);
    }
}
