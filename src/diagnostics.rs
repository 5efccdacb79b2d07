//! Snapshot de salud bajo demanda: nodo remoto, extractor local,
//! cookies y métricas en un solo reporte.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use url::Url;

use crate::cookies::CookieManager;
use crate::extractor::LocalExtractor;
use crate::metrics::{MetricsSnapshot, PlaybackMetrics};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Reporte estructurado. Cualquier campo puede faltar: un chequeo que
/// falla deja `None` y el reporte parcial sigue siendo válido.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub node_latency_ms: Option<f64>,
    pub node_version: Option<String>,
    pub youtube_plugin_version: Option<String>,
    pub extractor_version: Option<String>,
    pub cookie_age_seconds: Option<f64>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Deserialize)]
struct PluginInfo {
    name: String,
    version: String,
}

/// Consulta la API REST del nodo y el extractor local. Nunca devuelve
/// error: cada chequeo degrada a campo ausente.
pub struct DiagnosticsService {
    client: Client,
    base: Url,
    password: Option<String>,
    extractor: Arc<dyn LocalExtractor>,
    cookies: Arc<CookieManager>,
    metrics: Arc<PlaybackMetrics>,
}

impl DiagnosticsService {
    pub fn new(
        base: Url,
        password: Option<String>,
        extractor: Arc<dyn LocalExtractor>,
        cookies: Arc<CookieManager>,
        metrics: Arc<PlaybackMetrics>,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base,
            password,
            extractor,
            cookies,
            metrics,
        }
    }

    pub async fn collect(&self) -> DiagnosticsReport {
        let (node_latency_ms, node_version) = self.probe_version().await;
        let youtube_plugin_version = self.probe_plugins().await;
        let extractor_version = self.extractor.version().await;

        DiagnosticsReport {
            node_latency_ms,
            node_version,
            youtube_plugin_version,
            extractor_version,
            cookie_age_seconds: self.cookies.cookie_age_seconds(),
            metrics: self.metrics.snapshot(),
        }
    }

    fn endpoint(&self, path: &str) -> Option<Url> {
        self.base.join(path).ok()
    }

    fn request(&self, endpoint: Url) -> reqwest::RequestBuilder {
        let mut request = self.client.get(endpoint);
        if let Some(password) = &self.password {
            request = request.header("Authorization", password);
        }
        request
    }

    /// Handshake contra `/version`: latencia medida de punta a punta y
    /// versión del nodo como texto plano.
    async fn probe_version(&self) -> (Option<f64>, Option<String>) {
        let Some(endpoint) = self.endpoint("version") else {
            return (None, None);
        };
        let start = Instant::now();
        let response = match self.request(endpoint).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!("⚠️ El nodo no respondió al chequeo de versión: {}", err);
                return (None, None);
            }
        };
        let latency = start.elapsed().as_secs_f64() * 1000.0;
        if !response.status().is_success() {
            warn!(
                "⚠️ Chequeo de versión devolvió {}",
                response.status()
            );
            return (Some(latency), None);
        }
        let version = response
            .text()
            .await
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        (Some(latency), version)
    }

    /// Listado de plugins del nodo; nos interesa solo el de YouTube.
    async fn probe_plugins(&self) -> Option<String> {
        let endpoint = self.endpoint("v4/info")?;
        let response = match self.request(endpoint).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("⚠️ Listado de plugins devolvió {}", response.status());
                return None;
            }
            Err(err) => {
                warn!("⚠️ No se pudo listar plugins del nodo: {}", err);
                return None;
            }
        };
        let info: serde_json::Value = response.json().await.ok()?;
        let plugins: Vec<PluginInfo> =
            serde_json::from_value(info.get("plugins")?.clone()).ok()?;
        plugins
            .into_iter()
            .find(|p| p.name.to_lowercase().contains("youtube"))
            .map(|p| p.version)
    }
}
