use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::debug;

use crate::track::QueuedTrack;

/// Cola de reproducción por servidor.
///
/// Todas las mutaciones se serializan con un mutex interno, así
/// `snapshot()` nunca observa una cola a medio mutar y las operaciones
/// de UI no compiten con resoluciones largas (que no toman este lock).
#[derive(Debug, Default)]
pub struct MusicQueue {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<QueuedTrack>,
    last_played: Option<QueuedTrack>,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Copia independiente para iterar/paginar.
    pub fn snapshot(&self) -> Vec<QueuedTrack> {
        self.inner.lock().items.iter().cloned().collect()
    }

    /// Agrega al final (FIFO).
    pub fn add(&self, track: QueuedTrack) {
        self.inner.lock().items.push_back(track);
    }

    /// Inserta al frente, con prioridad sobre lo ya encolado.
    pub fn add_next(&self, track: QueuedTrack) {
        self.inner.lock().items.push_front(track);
    }

    /// Saca la próxima entrada y la recuerda para el replay.
    pub fn pop_next(&self) -> Option<QueuedTrack> {
        let mut inner = self.inner.lock();
        let track = inner.items.pop_front()?;
        inner.last_played = Some(track.clone());
        Some(track)
    }

    pub fn peek(&self, index: usize) -> Option<QueuedTrack> {
        self.inner.lock().items.get(index).cloned()
    }

    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    /// Quita la entrada en `index`, o `None` si está fuera de rango.
    pub fn remove_index(&self, index: usize) -> Option<QueuedTrack> {
        let mut inner = self.inner.lock();
        if index >= inner.items.len() {
            return None;
        }
        inner.items.remove(index)
    }

    /// Quita el rango `[start, end]` inclusive. Los límites se ajustan al
    /// tamaño actual; un rango invertido devuelve lista vacía sin error.
    pub fn remove_range(&self, start: isize, end: isize) -> Vec<QueuedTrack> {
        let mut inner = self.inner.lock();
        let size = inner.items.len();
        if size == 0 {
            return Vec::new();
        }
        let start = start.max(0) as usize;
        let end = (end.min(size as isize - 1)).max(-1);
        if end < 0 {
            return Vec::new();
        }
        let end = end as usize;
        if start > end {
            return Vec::new();
        }
        let removed: Vec<QueuedTrack> = inner.items.drain(start..=end).collect();
        debug!("🗑️ Quitadas {} entradas de la cola", removed.len());
        removed
    }

    /// Mueve la entrada de `source` a `dest`. El destino se ajusta a
    /// `[0, len-1]`; mover al mismo lugar es un no-op exitoso. Un origen
    /// fuera de rango devuelve `false` sin tocar la cola.
    pub fn move_track(&self, source: usize, dest: usize) -> bool {
        let mut inner = self.inner.lock();
        let size = inner.items.len();
        if size == 0 || source >= size {
            return false;
        }
        let dest = dest.min(size - 1);
        if source == dest {
            return true;
        }
        if let Some(track) = inner.items.remove(source) {
            inner.items.insert(dest, track);
        }
        true
    }

    pub fn shuffle(&self) {
        let mut inner = self.inner.lock();
        let mut items: Vec<QueuedTrack> = inner.items.drain(..).collect();
        items.shuffle(&mut rand::thread_rng());
        inner.items = items.into();
    }

    /// Reinserta al frente una copia (id nuevo) del último track sacado.
    /// No consume el historial: se puede repetir mientras algo haya sonado.
    pub fn replay_last(&self) -> Option<QueuedTrack> {
        let mut inner = self.inner.lock();
        let replay = inner.last_played.as_ref()?.clone_for_replay();
        inner.items.push_front(replay.clone());
        Some(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{ChannelId, OpaqueToken, TrackHandle, UserId};
    use pretty_assertions::assert_eq;

    fn track(title: &str) -> QueuedTrack {
        QueuedTrack::new(
            TrackHandle {
                title: title.to_string(),
                author: "artist".to_string(),
                duration_ms: 1000,
                uri: None,
                source: "youtube".to_string(),
                token: OpaqueToken::new(title),
            },
            title,
            ChannelId(1),
            UserId(2),
            "tester",
            false,
            None,
        )
    }

    fn titles(queue: &MusicQueue) -> Vec<String> {
        queue
            .snapshot()
            .into_iter()
            .map(|t| t.handle.title)
            .collect()
    }

    #[test]
    fn test_fifo_order_with_priority_insert() {
        let queue = MusicQueue::new();
        queue.add(track("a"));
        queue.add(track("b"));
        queue.add_next(track("urgent"));
        queue.add(track("c"));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_next())
            .map(|t| t.handle.title)
            .collect();
        assert_eq!(order, vec!["urgent", "a", "b", "c"]);
    }

    #[test]
    fn test_remove_range_clamps_bounds() {
        let queue = MusicQueue::new();
        for name in ["a", "b", "c", "d", "e"] {
            queue.add(track(name));
        }

        let removed = queue.remove_range(-3, 1);
        assert_eq!(removed.len(), 2);
        assert_eq!(titles(&queue), vec!["c", "d", "e"]);

        let removed = queue.remove_range(1, 99);
        assert_eq!(removed.len(), 2);
        assert_eq!(titles(&queue), vec!["c"]);
    }

    #[test]
    fn test_remove_range_inverted_is_empty() {
        let queue = MusicQueue::new();
        queue.add(track("a"));
        queue.add(track("b"));
        assert!(queue.remove_range(2, 1).is_empty());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_move_preserves_entries() {
        let queue = MusicQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.add(track(name));
        }

        assert!(queue.move_track(0, 2));
        assert_eq!(titles(&queue), vec!["b", "c", "a", "d"]);

        // destino fuera de rango se ajusta al final
        assert!(queue.move_track(0, 99));
        assert_eq!(titles(&queue), vec!["c", "a", "d", "b"]);

        // origen inválido no toca nada
        assert!(!queue.move_track(7, 0));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_move_same_position_is_noop() {
        let queue = MusicQueue::new();
        queue.add(track("a"));
        queue.add(track("b"));
        assert!(queue.move_track(1, 1));
        assert_eq!(titles(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_index_out_of_range() {
        let queue = MusicQueue::new();
        queue.add(track("a"));
        assert!(queue.remove_index(5).is_none());
        assert_eq!(queue.remove_index(0).unwrap().handle.title, "a");
    }

    #[test]
    fn test_replay_last_clones_with_new_id() {
        let queue = MusicQueue::new();
        queue.add(track("a"));
        let played = queue.pop_next().unwrap();
        assert!(queue.is_empty());

        let first = queue.replay_last().unwrap();
        assert_ne!(first.id, played.id);
        assert_eq!(first.handle.title, "a");

        // el historial no se consume: se puede repetir otra vez
        queue.pop_next().unwrap();
        let second = queue.replay_last().unwrap();
        assert_ne!(second.id, first.id);
    }

    #[test]
    fn test_replay_without_history() {
        let queue = MusicQueue::new();
        assert!(queue.replay_last().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let queue = MusicQueue::new();
        queue.add(track("a"));
        queue.clear();
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shuffle_preserves_multiset() {
        let queue = MusicQueue::new();
        for name in ["a", "b", "c", "d", "e", "f"] {
            queue.add(track(name));
        }
        queue.shuffle();
        let mut after = titles(&queue);
        after.sort();
        assert_eq!(after, vec!["a", "b", "c", "d", "e", "f"]);
    }
}
