use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, info};

use crate::sources::Track;

/// Identificador estable de una entrada, único dentro de su cola.
pub type EntryId = u64;

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: EntryId,
    pub track: Arc<Track>,
    pub added_at: DateTime<Utc>,
}

/// Cola de reproducción de un contexto.
///
/// Sin sincronización propia: su único dueño es el controlador de
/// reproducción, que la protege con su propio lock. La cabeza es la única
/// entrada que se reproduce.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<QueueEntry>,
    next_id: EntryId,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, track: Arc<Track>) -> QueueEntry {
        self.next_id += 1;
        QueueEntry {
            id: self.next_id,
            track,
            added_at: Utc::now(),
        }
    }

    /// Agrega un track al final, o al frente si `play_next`.
    pub fn add(&mut self, track: Arc<Track>, play_next: bool) -> EntryId {
        let entry = self.entry(track);
        let id = entry.id;
        info!("➕ Agregado a la cola: {}", entry.track.title);
        if play_next {
            self.items.push_front(entry);
        } else {
            self.items.push_back(entry);
        }
        id
    }

    /// Agrega varios tracks conservando su orden relativo.
    pub fn add_many(&mut self, tracks: Vec<Arc<Track>>, play_next: bool) -> usize {
        let count = tracks.len();
        let entries: Vec<QueueEntry> = tracks.into_iter().map(|t| self.entry(t)).collect();
        if play_next {
            for entry in entries.into_iter().rev() {
                self.items.push_front(entry);
            }
        } else {
            self.items.extend(entries);
        }
        info!("➕ Agregadas {} canciones a la cola", count);
        count
    }

    /// Quita la cabeza. No hace nada si la cola está vacía.
    pub fn remove_current(&mut self) -> Option<QueueEntry> {
        let removed = self.items.pop_front();
        if let Some(entry) = &removed {
            debug!("➖ Quitado de la cola: {}", entry.track.title);
        }
        removed
    }

    /// Quita una entrada concreta, esté donde esté.
    pub fn remove(&mut self, id: EntryId) -> Option<QueueEntry> {
        let index = self.items.iter().position(|e| e.id == id)?;
        self.items.remove(index)
    }

    /// Fisher–Yates sobre toda la cola, cabeza incluida.
    pub fn shuffle(&mut self) {
        if self.items.len() <= 1 {
            return;
        }
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
    }

    pub fn clear(&mut self) {
        let count = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada ({} canciones)", count);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.items.iter()
    }
}
