use async_trait::async_trait;
use std::time::Duration;

use crate::error::TrackLoadFailure;
use crate::track::{OpaqueToken, TrackHandle};

/// Contrato del nodo remoto de resolución (p. ej. Lavalink).
///
/// El nodo es una conexión compartida por proceso: es dueño de su ciclo
/// de vida y de la reconexión. Este core solo pide `connect()` de forma
/// perezosa y espera readiness con timeout antes de resolver; durante
/// una ventana de reconexión las llamadas bloquean en `wait_ready` en
/// lugar de fallar al instante.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioResolutionNode: Send + Sync {
    /// Establece la conexión si no existe. Idempotente.
    async fn connect(&self) -> Result<(), TrackLoadFailure>;

    /// Espera a que el nodo esté listo; `false` si vence el timeout.
    async fn wait_ready(&self, timeout: Duration) -> bool;

    /// Resuelve una consulta o URL en una lista de tracks.
    ///
    /// Con `prefer_search=false` la consulta se trata como referencia
    /// exacta, no como búsqueda de texto.
    async fn resolve(
        &self,
        query: &str,
        prefer_search: bool,
    ) -> Result<Vec<TrackHandle>, TrackLoadFailure>;

    /// Decodifica un token opaco en sus metadatos.
    async fn decode_token(&self, token: &OpaqueToken) -> Result<TrackHandle, TrackLoadFailure>;

    async fn close(&self);
}
