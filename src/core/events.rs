//! Structural change notifications and the external change watcher

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

/// A change to the index that listeners can react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    PatientAdded {
        uid: i64,
        patient_id: String,
        patients_name: String,
        birth_date: String,
    },
    StudyAdded(String),
    SeriesAdded(String),
    InstanceAdded(String),
    /// Rows were removed or otherwise restructured
    StructureChanged,
    /// The index file was modified (externally, or an in-memory insert finished)
    DatabaseChanged,
    SchemaUpdateStarted(usize),
    SchemaUpdateProgress { index: usize, file: String },
    SchemaUpdated,
}

type Listener = Arc<dyn Fn(&IndexEvent) + Send + Sync>;

/// Observer list shared between the index and its watcher thread
#[derive(Clone, Default)]
pub struct EventHub {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&IndexEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub fn emit(&self, event: IndexEvent) {
        // Clone out so listeners may subscribe from inside a callback
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Emits [`IndexEvent::DatabaseChanged`] when the index file is modified
///
/// Passive: it never re-synchronizes the index, it only tells listeners.
pub struct DatabaseWatcher {
    _watcher: RecommendedWatcher,
}

impl DatabaseWatcher {
    pub fn watch(database_file: &Path, hub: EventHub) -> notify::Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_)) => {
                    hub.emit(IndexEvent::DatabaseChanged);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "database watcher error"),
            }
        })?;
        watcher.watch(database_file, RecursiveMode::NonRecursive)?;
        Ok(Self { _watcher: watcher })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_delivered_in_order_to_all_listeners() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_a = seen.clone();
        hub.subscribe(move |e| seen_a.lock().push(("a", e.clone())));
        let seen_b = seen.clone();
        hub.subscribe(move |e| seen_b.lock().push(("b", e.clone())));

        hub.emit(IndexEvent::StudyAdded("1.2".into()));
        hub.emit(IndexEvent::SeriesAdded("1.2.3".into()));

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], ("a", IndexEvent::StudyAdded("1.2".into())));
        assert_eq!(seen[1], ("b", IndexEvent::StudyAdded("1.2".into())));
        assert_eq!(seen[3], ("b", IndexEvent::SeriesAdded("1.2.3".into())));
    }
}
