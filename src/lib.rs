//! Núcleo de resolución y reproducción de música.
//!
//! Convierte una consulta de usuario en un track reproducible con dos
//! niveles (nodo remoto, luego extractor local), mantiene una cola por
//! servidor y se auto-repara cuando un track falla a mitad de la
//! reproducción. La capa de comandos, el transporte de voz y el tooling
//! de instalación viven fuera de este crate y hablan con él a través de
//! los contratos [`node::AudioResolutionNode`], [`extractor::LocalExtractor`]
//! y [`orchestrator::PlayerBackend`].

use anyhow::Result;

pub mod cache;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod diagnostics;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod node;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod track;

pub use cache::{CacheRecord, SearchCache};
pub use config::Config;
pub use diagnostics::{DiagnosticsReport, DiagnosticsService};
pub use error::{ExtractionFailure, MusicError, TrackLoadFailure};
pub use metrics::{MetricsSnapshot, PlaybackMetrics};
pub use orchestrator::{PlaybackOrchestrator, PlayerBackend, TrackEvent};
pub use queue::MusicQueue;
pub use resolver::FallbackPlayer;
pub use track::{ChannelId, GuildId, OpaqueToken, QueuedTrack, TrackHandle, UserId};

/// Inicializa el logging del proceso. La aplicación que embebe este
/// core lo llama una sola vez, antes de cargar la configuración.
pub fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("melodia_core=debug".parse()?),
        )
        .init();
    Ok(())
}
