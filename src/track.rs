use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identificador de un servidor (tenant con su propia cola).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuildId(pub u64);

/// Identificador del canal donde se pidió el track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

/// Identificador del usuario que pidió el track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl std::fmt::Display for GuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle opaco del backend, necesario para iniciar la reproducción.
/// Este core nunca lo interpreta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueToken(pub String);

impl OpaqueToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }
}

/// Metadatos normalizados de un track resuelto.
///
/// Solo la resolución produce estos valores; `retag` deriva una copia
/// nueva al fusionar metadatos del extractor, nunca muta la original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub title: String,
    pub author: String,
    pub duration_ms: u64,
    pub uri: Option<String>,
    pub source: String,
    pub token: OpaqueToken,
}

impl TrackHandle {
    /// Copia con metadatos reemplazados. Devuelve `self` sin clonar campo
    /// alguno cuando nada cambia.
    pub fn retag(
        self,
        title: String,
        author: String,
        duration_ms: u64,
        uri: Option<String>,
        source: String,
    ) -> Self {
        if title == self.title
            && author == self.author
            && duration_ms == self.duration_ms
            && uri == self.uri
            && source == self.source
        {
            return self;
        }
        Self {
            token: self.token,
            title,
            author,
            duration_ms,
            uri,
            source,
        }
    }
}

/// Entrada de la cola: un track resuelto más el contexto del pedido.
#[derive(Debug, Clone)]
pub struct QueuedTrack {
    pub id: Uuid,
    pub handle: TrackHandle,
    /// Texto original del usuario, tal cual lo escribió.
    pub query: String,
    pub channel_id: ChannelId,
    pub requested_by: UserId,
    pub requester_display: String,
    pub is_fallback: bool,
    pub fallback_source: Option<String>,
    /// Mensaje "en cola" que la capa de presentación puede editar luego.
    pub queued_message_id: Option<u64>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedTrack {
    pub fn new(
        handle: TrackHandle,
        query: impl Into<String>,
        channel_id: ChannelId,
        requested_by: UserId,
        requester_display: impl Into<String>,
        is_fallback: bool,
        fallback_source: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            handle,
            query: query.into(),
            channel_id,
            requested_by,
            requester_display: requester_display.into(),
            is_fallback,
            fallback_source,
            queued_message_id: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Copia con id nuevo, usada solo por el replay.
    pub fn clone_for_replay(&self) -> Self {
        let mut copy = self.clone();
        copy.id = Uuid::new_v4();
        copy
    }
}
