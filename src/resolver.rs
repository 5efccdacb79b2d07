//! Resolución en dos niveles: nodo remoto primero, extractor local
//! como último recurso, con la caché de búsquedas por delante de ambos.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::SearchCache;
use crate::error::{MusicError, TrackLoadFailure};
use crate::extractor::{Extraction, LocalExtractor};
use crate::metrics::PlaybackMetrics;
use crate::node::AudioResolutionNode;
use crate::track::{ChannelId, QueuedTrack, TrackHandle, UserId};

const MAX_NODE_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Resuelve consultas contra el nodo remoto y cae con gracia al
/// extractor local cuando el nodo no puede servirlas.
pub struct FallbackPlayer {
    node: Arc<dyn AudioResolutionNode>,
    extractor: Arc<dyn LocalExtractor>,
    cache: Arc<SearchCache>,
    metrics: Arc<PlaybackMetrics>,
    ready_timeout: Duration,
}

impl FallbackPlayer {
    pub fn new(
        node: Arc<dyn AudioResolutionNode>,
        extractor: Arc<dyn LocalExtractor>,
        cache: Arc<SearchCache>,
        metrics: Arc<PlaybackMetrics>,
    ) -> Self {
        Self {
            node,
            extractor,
            cache,
            metrics,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn metrics(&self) -> &Arc<PlaybackMetrics> {
        &self.metrics
    }

    /// Resuelve `query` en una entrada lista para encolar.
    ///
    /// Orden: caché → nodo con reintentos → extractor local. Solo el
    /// agotamiento de ambos niveles llega al llamador.
    pub async fn build_queue_entry(
        &self,
        query: &str,
        requested_by: UserId,
        requester_display: &str,
        channel_id: ChannelId,
    ) -> Result<QueuedTrack, MusicError> {
        let start = Instant::now();
        self.ensure_ready().await?;

        if let Some(entry) = self
            .resolve_cached(query, requested_by, requester_display, channel_id)
            .await
        {
            self.observe_startup(start);
            return Ok(entry);
        }

        let prefer_search = !query.starts_with("http");
        match self.resolve_node(query, prefer_search).await {
            Ok(handle) => {
                self.observe_startup(start);
                Ok(self.build_entry(
                    handle,
                    query,
                    requested_by,
                    requester_display,
                    channel_id,
                    false,
                    None,
                ))
            }
            Err(node_err) => {
                warn!(
                    "⚠️ El nodo no resolvió \"{}\", probando extractor local: {}",
                    query, node_err
                );
                match self
                    .resolve_fallback(query, requested_by, requester_display, channel_id, &node_err)
                    .await
                {
                    Ok(entry) => {
                        self.observe_startup(start);
                        Ok(entry)
                    }
                    Err(fallback_err) => {
                        self.metrics.incr_failed();
                        Err(TrackLoadFailure::with_cause(
                            format!(
                                "No se pudo reproducir \"{query}\": el nodo de resolución y el extractor local fallaron ({fallback_err})"
                            ),
                            node_err,
                        )
                        .into())
                    }
                }
            }
        }
    }

    /// Construye directamente una entrada de fallback, sin reintentar el
    /// nodo. La usa el orquestador cuando un track ya falló en runtime.
    pub async fn build_fallback_entry(
        &self,
        query: &str,
        requested_by: UserId,
        requester_display: &str,
        channel_id: ChannelId,
        base_error: TrackLoadFailure,
    ) -> Result<QueuedTrack, MusicError> {
        if let Some(entry) = self
            .resolve_cached(query, requested_by, requester_display, channel_id)
            .await
        {
            return Ok(entry);
        }

        info!("🔁 Resolución de fallback directa para: {}", query);
        match self
            .resolve_fallback(query, requested_by, requester_display, channel_id, &base_error)
            .await
        {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.metrics.incr_failed();
                Err(err)
            }
        }
    }

    /// Conexión perezosa + compuerta de readiness. Durante una ventana de
    /// reconexión esto bloquea con timeout en vez de fallar al instante.
    async fn ensure_ready(&self) -> Result<(), MusicError> {
        self.node
            .connect()
            .await
            .map_err(|err| MusicError::NodeUnavailable(err.to_string()))?;
        if !self.node.wait_ready(self.ready_timeout).await {
            return Err(MusicError::NodeUnavailable(
                "timeout esperando readiness; reintentá en unos segundos".to_string(),
            ));
        }
        Ok(())
    }

    /// Prueba cada fuente cacheada como referencia exacta. Si ninguna
    /// sigue viva, la entrada se expulsa y se continúa la resolución
    /// normal sin propagar error alguno.
    async fn resolve_cached(
        &self,
        query: &str,
        requested_by: UserId,
        requester_display: &str,
        channel_id: ChannelId,
    ) -> Option<QueuedTrack> {
        let cached = self.cache.get(query)?;

        for candidate in &cached.sources {
            let handles = match self.node.resolve(candidate, false).await {
                Ok(handles) => handles,
                Err(err) => {
                    debug!("Candidato cacheado falló ({}): {}", candidate, err);
                    continue;
                }
            };
            let Some(handle) = handles.into_iter().next() else {
                debug!("Candidato cacheado sin tracks: {}", candidate);
                continue;
            };

            self.metrics.incr_fallback();
            self.metrics.record_fallback_source(candidate);
            info!(
                "⚡ Resuelto desde caché: {} → {} (id: {:?})",
                query, candidate, cached.identifier
            );
            return Some(self.build_entry(
                handle,
                query,
                requested_by,
                requester_display,
                channel_id,
                true,
                Some(candidate.clone()),
            ));
        }

        self.cache.evict(query);
        warn!("🗑️ Entrada de caché invalidada para: {}", query);
        None
    }

    /// Resolución remota con hasta 3 intentos. Solo los fallos
    /// clasificados como reintentables duermen y reintentan; el backoff
    /// arranca en 0.5 s y se duplica.
    async fn resolve_node(
        &self,
        query: &str,
        prefer_search: bool,
    ) -> Result<TrackHandle, TrackLoadFailure> {
        let mut attempt = 0u32;
        let mut delay = INITIAL_BACKOFF;
        loop {
            match self.node.resolve(query, prefer_search).await {
                Ok(handles) => {
                    return handles
                        .into_iter()
                        .next()
                        .ok_or_else(|| TrackLoadFailure::new("El nodo no devolvió tracks"));
                }
                Err(err) => {
                    attempt += 1;
                    if !err.is_retryable() || attempt >= MAX_NODE_ATTEMPTS {
                        return Err(err);
                    }
                    debug!(
                        "Reintento {}/{} en {:?}: {}",
                        attempt, MAX_NODE_ATTEMPTS, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    /// Nivel dos: extraer localmente y resolver cada candidato contra el
    /// nodo como referencia exacta; gana el primero que cargue.
    async fn resolve_fallback(
        &self,
        query: &str,
        requested_by: UserId,
        requester_display: &str,
        channel_id: ChannelId,
        base_error: &TrackLoadFailure,
    ) -> Result<QueuedTrack, MusicError> {
        self.metrics.incr_fallback();

        let extraction = match self.extractor.extract(query).await {
            Ok(extraction) => extraction,
            Err(err) => {
                self.metrics.record_extractor_failure(&err.category());
                let lowered = err.to_string().to_lowercase();
                if lowered.contains("sign in to confirm you") {
                    let cookie_hint = "El origen rechazó la reproducción sin autenticar. \
                         Exportá cookies frescas y configurá YT_COOKIES_FILE.";
                    warn!("🍪 {}", cookie_hint);
                    return Err(TrackLoadFailure::with_cause(cookie_hint, err).into());
                }
                return Err(MusicError::Extraction(err));
            }
        };

        let mut candidates: Vec<String> = Vec::new();
        if let Some(stream) = &extraction.stream_url {
            candidates.push(stream.clone());
        }
        if let Some(page) = &extraction.webpage_url {
            if !candidates.contains(page) {
                candidates.push(page.clone());
            }
        }
        if candidates.is_empty() {
            return Err(TrackLoadFailure::with_cause(
                "El extractor no produjo un stream utilizable",
                TrackLoadFailure::new(base_error.to_string()),
            )
            .into());
        }

        let mut last_error: Option<TrackLoadFailure> = None;
        let mut selected: Option<(String, TrackHandle)> = None;
        for candidate in &candidates {
            match self.node.resolve(candidate, false).await {
                Ok(handles) => match handles.into_iter().next() {
                    Some(handle) => {
                        selected = Some((candidate.clone(), handle));
                        break;
                    }
                    None => warn!("⚠️ Candidato de fallback sin tracks: {}", candidate),
                },
                Err(err) => {
                    warn!("⚠️ Candidato de fallback falló ({}): {}", candidate, err);
                    last_error = Some(err);
                }
            }
        }

        let Some((selected_source, handle)) = selected else {
            let cause = last_error
                .unwrap_or_else(|| TrackLoadFailure::new(base_error.to_string()));
            return Err(
                TrackLoadFailure::with_cause("El stream de fallback no cargó", cause).into(),
            );
        };

        // la fuente elegida va primera; el resto queda como respaldo
        let mut remembered = vec![selected_source.clone()];
        for candidate in candidates {
            if candidate != selected_source {
                remembered.push(candidate);
            }
        }
        self.cache
            .remember(query, &remembered, extraction.identifier.clone(), None);

        let handle = augment_handle(handle, &extraction, &selected_source);
        self.metrics.record_fallback_source(&selected_source);
        info!("✅ Fallback resuelto: {} → {}", query, selected_source);

        Ok(self.build_entry(
            handle,
            query,
            requested_by,
            requester_display,
            channel_id,
            true,
            Some(selected_source),
        ))
    }

    fn build_entry(
        &self,
        handle: TrackHandle,
        query: &str,
        requested_by: UserId,
        requester_display: &str,
        channel_id: ChannelId,
        is_fallback: bool,
        fallback_source: Option<String>,
    ) -> QueuedTrack {
        QueuedTrack::new(
            handle,
            query,
            channel_id,
            requested_by,
            requester_display,
            is_fallback,
            fallback_source,
        )
    }

    fn observe_startup(&self, start: Instant) {
        self.metrics
            .observe_startup(start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Completa los metadatos genéricos del nodo con lo que sabe el
/// extractor. Deriva un handle nuevo; el original queda intacto.
fn augment_handle(handle: TrackHandle, extraction: &Extraction, selected_source: &str) -> TrackHandle {
    let title = extraction
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| handle.title.clone());
    let author = extraction
        .author
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| handle.author.clone());
    let duration_ms = extraction
        .duration
        .map(|d| d.as_millis())
        .filter(|ms| *ms > 0)
        .unwrap_or(handle.duration_ms);
    let uri = handle
        .uri
        .clone()
        .or_else(|| extraction.webpage_url.clone())
        .or_else(|| extraction.stream_url.clone());
    let source = if matches!(handle.source.as_str(), "unknown" | "http")
        && selected_source.starts_with("http")
    {
        "http".to_string()
    } else {
        handle.source.clone()
    };

    handle.retag(title, author, duration_ms, uri, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractedDuration, MockLocalExtractor};
    use crate::node::MockAudioResolutionNode;
    use pretty_assertions::assert_eq;

    fn handle(title: &str, source: &str) -> TrackHandle {
        TrackHandle {
            title: title.to_string(),
            author: "Unknown creator".to_string(),
            duration_ms: 0,
            uri: None,
            source: source.to_string(),
            token: crate::track::OpaqueToken::new(title),
        }
    }

    fn ready_node() -> MockAudioResolutionNode {
        let mut node = MockAudioResolutionNode::new();
        node.expect_connect().returning(|| Ok(()));
        node.expect_wait_ready().returning(|_| true);
        node
    }

    fn player(
        node: MockAudioResolutionNode,
        extractor: MockLocalExtractor,
    ) -> (FallbackPlayer, Arc<PlaybackMetrics>, Arc<SearchCache>) {
        let metrics = Arc::new(PlaybackMetrics::new());
        let cache = Arc::new(SearchCache::in_memory());
        let player = FallbackPlayer::new(
            Arc::new(node),
            Arc::new(extractor),
            cache.clone(),
            metrics.clone(),
        );
        (player, metrics, cache)
    }

    #[tokio::test]
    async fn test_direct_resolution_is_not_fallback() {
        // Escenario A: el nodo resuelve a la primera
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, prefer| q == "song X" && *prefer)
            .times(1)
            .returning(|_, _| Ok(vec![handle("Song X", "youtube")]));
        let mut extractor = MockLocalExtractor::new();
        extractor.expect_extract().times(0);

        let (player, metrics, _cache) = player(node, extractor);
        let entry = player
            .build_queue_entry("song X", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();

        assert!(!entry.is_fallback);
        assert!(entry.fallback_source.is_none());
        let snap = metrics.snapshot();
        assert_eq!(snap.fallback_used, 0);
        assert_eq!(snap.plays_failed, 0);
        assert!(snap.avg_startup_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_fallback_after_non_retryable_failure() {
        // Escenario B: nodo falla, el extractor entrega un stream que el
        // nodo sí puede cargar como referencia exacta
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, _| q == "song x")
            .times(1)
            .returning(|_, _| Err(TrackLoadFailure::new("No tracks returned")));
        node.expect_resolve()
            .withf(|q, prefer| q == "https://stream" && !*prefer)
            .times(1)
            .returning(|_, _| Ok(vec![handle("Unknown title", "unknown")]));

        let mut extractor = MockLocalExtractor::new();
        extractor.expect_extract().times(1).returning(|_| {
            Ok(Extraction {
                stream_url: Some("https://stream".to_string()),
                title: Some("t".to_string()),
                duration: Some(ExtractedDuration::Seconds(3.0)),
                identifier: Some("vid1".to_string()),
                ..Extraction::default()
            })
        });

        let (player, metrics, cache) = player(node, extractor);
        let entry = player
            .build_queue_entry("song x", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();

        assert!(entry.is_fallback);
        assert_eq!(entry.fallback_source.as_deref(), Some("https://stream"));
        assert_eq!(entry.handle.title, "t");
        assert_eq!(entry.handle.duration_ms, 3000);
        assert_eq!(entry.handle.source, "http");

        let snap = metrics.snapshot();
        assert_eq!(snap.fallback_used, 1);
        assert_eq!(snap.plays_failed, 0);
        assert_eq!(snap.last_fallback_source.as_deref(), Some("https://stream"));

        let record = cache.get("song x").unwrap();
        assert_eq!(record.sources, vec!["https://stream"]);
        assert_eq!(record.identifier.as_deref(), Some("vid1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_back_off_then_succeed() {
        // Escenario C: dos fallos reintentables, éxito al tercer intento,
        // con backoff 0.5 s y 1.0 s entre medio
        let mut node = ready_node();
        let mut attempts = 0u32;
        node.expect_resolve()
            .withf(|q, _| q == "song y")
            .times(3)
            .returning(move |_, _| {
                attempts += 1;
                if attempts < 3 {
                    Err(TrackLoadFailure::new("HTTP 429 throttled"))
                } else {
                    Ok(vec![handle("Song Y", "youtube")])
                }
            });
        let mut extractor = MockLocalExtractor::new();
        extractor.expect_extract().times(0);

        let (player, metrics, _cache) = player(node, extractor);
        let started = tokio::time::Instant::now();
        let entry = player
            .build_queue_entry("song y", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();

        assert!(!entry.is_fallback);
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(metrics.snapshot().fallback_used, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_skips_backoff() {
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, _| q == "song z")
            .times(1)
            .returning(|_, _| Err(TrackLoadFailure::new("unsupported format")));
        node.expect_resolve()
            .withf(|q, _| q == "https://s")
            .times(1)
            .returning(|_, _| Ok(vec![handle("z", "youtube")]));
        let mut extractor = MockLocalExtractor::new();
        extractor.expect_extract().times(1).returning(|_| {
            Ok(Extraction {
                stream_url: Some("https://s".to_string()),
                ..Extraction::default()
            })
        });

        let (player, _metrics, _cache) = player(node, extractor);
        let entry = player
            .build_queue_entry("song z", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();
        assert!(entry.is_fallback);
    }

    #[tokio::test]
    async fn test_cache_probe_wins_before_node() {
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, prefer| q == "https://cached" && !*prefer)
            .times(1)
            .returning(|_, _| Ok(vec![handle("Cached", "http")]));
        let extractor = MockLocalExtractor::new();

        let (player, metrics, cache) = player(node, extractor);
        cache.remember(
            "song x",
            &["https://cached".to_string()],
            None,
            Some(600.0),
        );

        let entry = player
            .build_queue_entry("song x", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();
        assert!(entry.is_fallback);
        assert_eq!(entry.fallback_source.as_deref(), Some("https://cached"));
        assert_eq!(metrics.snapshot().fallback_used, 1);
    }

    #[tokio::test]
    async fn test_stale_cache_evicts_and_falls_through() {
        let mut node = ready_node();
        // el candidato cacheado ya no carga
        node.expect_resolve()
            .withf(|q, _| q == "https://viejo")
            .times(1)
            .returning(|_, _| Err(TrackLoadFailure::new("No tracks returned")));
        // la resolución normal sigue funcionando
        node.expect_resolve()
            .withf(|q, prefer| q == "song x" && *prefer)
            .times(1)
            .returning(|_, _| Ok(vec![handle("Song X", "youtube")]));
        let extractor = MockLocalExtractor::new();

        let (player, _metrics, cache) = player(node, extractor);
        cache.remember("song x", &["https://viejo".to_string()], None, Some(600.0));

        let entry = player
            .build_queue_entry("song x", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();
        assert!(!entry.is_fallback);
        assert!(cache.get("song x").is_none(), "la entrada muerta se expulsa");
    }

    #[tokio::test]
    async fn test_both_tiers_exhausted_surfaces_combined_error() {
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, _| q == "song x")
            .times(1)
            .returning(|_, _| Err(TrackLoadFailure::new("No tracks returned")));
        let mut extractor = MockLocalExtractor::new();
        extractor
            .expect_extract()
            .times(1)
            .returning(|_| Err(crate::error::ExtractionFailure::new("upstream throttle")));

        let (player, metrics, _cache) = player(node, extractor);
        let err = player
            .build_queue_entry("song x", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap_err();

        let rendered = err.to_string();
        assert!(rendered.contains("song x"), "mensaje apto para el usuario");
        let snap = metrics.snapshot();
        assert_eq!(snap.plays_failed, 1);
        assert_eq!(snap.extractor_failures_by_type["throttle"], 1);
    }

    #[tokio::test]
    async fn test_node_unavailable_on_ready_timeout() {
        let mut node = MockAudioResolutionNode::new();
        node.expect_connect().returning(|| Ok(()));
        node.expect_wait_ready().returning(|_| false);
        let extractor = MockLocalExtractor::new();

        let (player, _metrics, _cache) = player(node, extractor);
        let err = player
            .build_queue_entry("song x", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap_err();
        assert!(matches!(err, MusicError::NodeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_build_fallback_entry_skips_node_retry() {
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, _| q == "https://directo")
            .times(1)
            .returning(|_, _| Ok(vec![handle("d", "http")]));
        let mut extractor = MockLocalExtractor::new();
        extractor.expect_extract().times(1).returning(|_| {
            Ok(Extraction {
                stream_url: Some("https://directo".to_string()),
                ..Extraction::default()
            })
        });

        let (player, _metrics, _cache) = player(node, extractor);
        let entry = player
            .build_fallback_entry(
                "song x",
                UserId(1),
                "tester",
                ChannelId(9),
                TrackLoadFailure::new("runtime exception"),
            )
            .await
            .unwrap();
        assert!(entry.is_fallback);
    }

    #[tokio::test]
    async fn test_webpage_candidate_after_stream_failure() {
        let mut node = ready_node();
        node.expect_resolve()
            .withf(|q, _| q == "song x")
            .times(1)
            .returning(|_, _| Err(TrackLoadFailure::new("No tracks returned")));
        node.expect_resolve()
            .withf(|q, _| q == "https://stream")
            .times(1)
            .returning(|_, _| Err(TrackLoadFailure::new("403 Forbidden")));
        node.expect_resolve()
            .withf(|q, _| q == "https://page")
            .times(1)
            .returning(|_, _| Ok(vec![handle("p", "youtube")]));
        let mut extractor = MockLocalExtractor::new();
        extractor.expect_extract().times(1).returning(|_| {
            Ok(Extraction {
                stream_url: Some("https://stream".to_string()),
                webpage_url: Some("https://page".to_string()),
                ..Extraction::default()
            })
        });

        let (player, _metrics, cache) = player(node, extractor);
        let entry = player
            .build_queue_entry("song x", UserId(1), "tester", ChannelId(9))
            .await
            .unwrap();
        assert_eq!(entry.fallback_source.as_deref(), Some("https://page"));

        // la fuente que funcionó queda primera para la próxima vez
        let record = cache.get("song x").unwrap();
        assert_eq!(record.sources, vec!["https://page", "https://stream"]);
    }
}
