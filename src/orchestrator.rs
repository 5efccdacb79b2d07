//! Máquina de estados de reproducción por servidor.
//!
//! Cada tenant tiene su cola y su slot "sonando ahora"; el avance y la
//! sustitución por fallback en caliente viven acá. Los eventos del
//! transporte llegan como un enum cerrado por un único punto de entrada
//! (`handle_event`), opcionalmente a través de un canal mpsc propio.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::error::TrackLoadFailure;
use crate::metrics::PlaybackMetrics;
use crate::queue::MusicQueue;
use crate::resolver::FallbackPlayer;
use crate::track::{GuildId, OpaqueToken, QueuedTrack};

/// Transporte que reproduce tokens opacos. Lo implementa la capa de
/// voz, fuera de este core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Arranca la sesión del guild con el token dado.
    async fn start(&self, guild_id: GuildId, token: &OpaqueToken) -> anyhow::Result<()>;

    /// Detiene la sesión activa del guild, si la hay.
    async fn stop(&self, guild_id: GuildId) -> anyhow::Result<()>;
}

/// Ciclo de vida de un track, reportado por el transporte.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// El track terminó; `reason != "finished"` es terminación temprana.
    Ended { guild_id: GuildId, reason: String },
    /// Excepción en runtime mientras sonaba.
    Failed { guild_id: GuildId, cause: String },
    /// El track dejó de avanzar más allá del umbral.
    Stuck { guild_id: GuildId, threshold_ms: u64 },
}

impl TrackEvent {
    fn guild_id(&self) -> GuildId {
        match self {
            Self::Ended { guild_id, .. }
            | Self::Failed { guild_id, .. }
            | Self::Stuck { guild_id, .. } => *guild_id,
        }
    }
}

/// Estado de un tenant: su cola y el slot "sonando ahora".
///
/// A lo sumo un `now_playing` por guild; con slot vacío y cola vacía el
/// tenant está idle.
pub struct GuildState {
    pub queue: Arc<MusicQueue>,
    pub now_playing: Option<QueuedTrack>,
}

impl GuildState {
    fn new() -> Self {
        Self {
            queue: Arc::new(MusicQueue::new()),
            now_playing: None,
        }
    }
}

pub struct PlaybackOrchestrator {
    states: DashMap<GuildId, Arc<Mutex<GuildState>>>,
    resolver: Arc<FallbackPlayer>,
    backend: Arc<dyn PlayerBackend>,
    metrics: Arc<PlaybackMetrics>,
}

impl PlaybackOrchestrator {
    pub fn new(
        resolver: Arc<FallbackPlayer>,
        backend: Arc<dyn PlayerBackend>,
        metrics: Arc<PlaybackMetrics>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            resolver,
            backend,
            metrics,
        }
    }

    fn state(&self, guild_id: GuildId) -> Arc<Mutex<GuildState>> {
        self.states
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildState::new())))
            .clone()
    }

    /// Cola del guild, para operaciones de UI. Tiene su propio lock, así
    /// que paginar nunca espera a una resolución en vuelo.
    pub async fn queue(&self, guild_id: GuildId) -> Arc<MusicQueue> {
        self.state(guild_id).lock().await.queue.clone()
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<QueuedTrack> {
        self.state(guild_id).lock().await.now_playing.clone()
    }

    /// Encola una entrada ya resuelta y arranca si el guild estaba idle.
    /// Devuelve la posición en cola (0 = sonando ya o siguiente).
    pub async fn enqueue(&self, guild_id: GuildId, entry: QueuedTrack) -> usize {
        let queue = {
            let state = self.state(guild_id);
            let guard = state.lock().await;
            guard.queue.clone()
        };
        queue.add(entry);
        let position = queue.len().saturating_sub(1);
        self.ensure_playing(guild_id).await;
        position
    }

    /// Si no hay nada sonando, saca la próxima entrada y la arranca. Un
    /// rechazo del backend salta a la siguiente en vez de clavar al
    /// tenant (bucle, no recursión).
    pub async fn ensure_playing(&self, guild_id: GuildId) {
        let state = self.state(guild_id);
        let mut guard = state.lock().await;
        while guard.now_playing.is_none() {
            let Some(next) = guard.queue.pop_next() else {
                break;
            };
            match self.backend.start(guild_id, &next.handle.token).await {
                Ok(()) => {
                    self.metrics.incr_started();
                    info!(
                        "▶️ Reproduciendo en {}: {} ({})",
                        guild_id, next.handle.title, next.handle.source
                    );
                    guard.now_playing = Some(next);
                }
                Err(err) => {
                    self.metrics.incr_failed();
                    error!(
                        "❌ El backend rechazó {} en {}, salto a la siguiente: {}",
                        next.handle.title, guild_id, err
                    );
                }
            }
        }
    }

    /// Detiene al tenant: cola vacía, slot vacío, sesión parada. Siempre
    /// tiene éxito localmente aunque el backend falle.
    pub async fn stop(&self, guild_id: GuildId) {
        {
            let state = self.state(guild_id);
            let mut guard = state.lock().await;
            guard.queue.clear();
            guard.now_playing = None;
        }
        if let Err(err) = self.backend.stop(guild_id).await {
            warn!("⚠️ El backend no pudo detener {}: {}", guild_id, err);
        }
    }

    /// Salta el track actual; el siguiente arranca de inmediato.
    pub async fn skip(&self, guild_id: GuildId) -> Option<QueuedTrack> {
        let skipped = {
            let state = self.state(guild_id);
            let mut guard = state.lock().await;
            guard.now_playing.take()
        };
        if skipped.is_some() {
            if let Err(err) = self.backend.stop(guild_id).await {
                warn!("⚠️ El backend no pudo detener {}: {}", guild_id, err);
            }
        }
        self.ensure_playing(guild_id).await;
        skipped
    }

    /// Único punto de entrada para el ciclo de vida de un track.
    pub async fn handle_event(&self, event: TrackEvent) {
        let guild_id = event.guild_id();
        match event {
            TrackEvent::Ended { reason, .. } => self.on_track_ended(guild_id, &reason).await,
            TrackEvent::Failed { cause, .. } => {
                self.on_runtime_failure(guild_id, TrackLoadFailure::new(cause))
                    .await
            }
            TrackEvent::Stuck { threshold_ms, .. } => {
                self.on_runtime_failure(
                    guild_id,
                    TrackLoadFailure::new(format!("Track atascado tras {threshold_ms} ms")),
                )
                .await
            }
        }
    }

    /// Consume eventos desde un canal propio, desacoplando el mecanismo
    /// de notificación del transporte de la decisión de qué sigue.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<TrackEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("📪 Canal de eventos cerrado, orquestador detenido");
    }

    async fn on_track_ended(&self, guild_id: GuildId, reason: &str) {
        let title = {
            let state = self.state(guild_id);
            let mut guard = state.lock().await;
            guard
                .now_playing
                .take()
                .map(|t| t.handle.title)
                .unwrap_or_else(|| "track desconocido".to_string())
        };
        if reason.eq_ignore_ascii_case("finished") {
            info!("🏁 Track terminado en {}: {}", guild_id, title);
        } else {
            warn!(
                "⚠️ Track terminado antes de tiempo en {} ({}): {}",
                guild_id, reason, title
            );
        }
        self.ensure_playing(guild_id).await;
    }

    /// Fallo en runtime: un track que no era de fallback recibe una única
    /// sustitución en el lugar; uno que ya lo era se descarta para no
    /// entrar en un bucle de fallbacks.
    async fn on_runtime_failure(&self, guild_id: GuildId, cause: TrackLoadFailure) {
        self.metrics.incr_failed();
        let current = {
            let state = self.state(guild_id);
            let mut guard = state.lock().await;
            guard.now_playing.take()
        };

        let Some(current) = current else {
            self.ensure_playing(guild_id).await;
            return;
        };

        error!(
            "💥 Fallo en runtime en {}: {} ({})",
            guild_id, current.handle.title, cause
        );

        if current.is_fallback {
            warn!(
                "⏭️ El track ya era fallback, se descarta: {}",
                current.handle.title
            );
            self.ensure_playing(guild_id).await;
            return;
        }

        match self
            .resolver
            .build_fallback_entry(
                &current.query,
                current.requested_by,
                &current.requester_display,
                current.channel_id,
                cause,
            )
            .await
        {
            Ok(substitute) => {
                info!(
                    "🔁 Sustituyendo por stream de fallback en {}: {}",
                    guild_id, substitute.handle.title
                );
                let state = self.state(guild_id);
                let guard = state.lock().await;
                guard.queue.add_next(substitute);
            }
            Err(err) => {
                error!(
                    "❌ La sustitución de fallback falló en {}, se descarta el track: {}",
                    guild_id, err
                );
            }
        }
        self.ensure_playing(guild_id).await;
    }
}
