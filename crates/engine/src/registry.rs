//! Registry of running transfers.
//!
//! Shells list what is running and cancel individual transfers through an
//! explicit [`TransferRegistry`] they own. Entries live as long as their
//! [`TransferHandle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use gfm_transfer::{ProgressCallback, ProgressControl, ProgressEvent, progress_fn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Upload,
    Download,
}

/// Snapshot of one registered transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferInfo {
    pub id: u64,
    pub kind: TransferKind,
    pub label: String,
    pub last_progress: Option<ProgressEvent>,
}

struct Entry {
    info: TransferInfo,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, Entry>>,
}

/// Tracks running transfers. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct TransferRegistry {
    inner: Arc<Inner>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transfer with its own cancellation token.
    pub fn register(&self, kind: TransferKind, label: impl Into<String>) -> TransferHandle {
        self.insert(kind, label.into(), CancellationToken::new())
    }

    /// Registers a transfer whose token is cancelled together with `parent`.
    pub fn register_child(
        &self,
        kind: TransferKind,
        label: impl Into<String>,
        parent: &CancellationToken,
    ) -> TransferHandle {
        self.insert(kind, label.into(), parent.child_token())
    }

    fn insert(&self, kind: TransferKind, label: String, cancel: CancellationToken) -> TransferHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(id, ?kind, %label, "transfer registered");
        self.inner.entries.write().unwrap().insert(
            id,
            Entry {
                info: TransferInfo {
                    id,
                    kind,
                    label,
                    last_progress: None,
                },
                cancel: cancel.clone(),
            },
        );
        TransferHandle {
            id,
            cancel,
            registry: self.clone(),
        }
    }

    /// Active transfers ordered by id.
    pub fn list(&self) -> Vec<TransferInfo> {
        let entries = self.inner.entries.read().unwrap();
        let mut list: Vec<TransferInfo> = entries.values().map(|e| e.info.clone()).collect();
        list.sort_by_key(|info| info.id);
        list
    }

    pub fn get(&self, id: u64) -> Option<TransferInfo> {
        self.inner
            .entries
            .read()
            .unwrap()
            .get(&id)
            .map(|e| e.info.clone())
    }

    /// Cancels transfer `id`. Returns `false` if it is not registered.
    pub fn cancel(&self, id: u64) -> bool {
        match self.inner.entries.read().unwrap().get(&id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.inner.entries.read().unwrap().values() {
            entry.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, id: u64, event: &ProgressEvent) {
        if let Some(entry) = self.inner.entries.write().unwrap().get_mut(&id) {
            entry.info.last_progress = Some(event.clone());
        }
    }

    fn remove(&self, id: u64) {
        if self.inner.entries.write().unwrap().remove(&id).is_some() {
            debug!(id, "transfer unregistered");
        }
    }
}

/// Registration of one transfer; unregisters on drop.
pub struct TransferHandle {
    id: u64,
    cancel: CancellationToken,
    registry: TransferRegistry,
}

impl TransferHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token to pass to the engine running this transfer.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn record(&self, event: &ProgressEvent) {
        self.registry.record(self.id, event);
    }

    /// Callback that records every event in the registry and then forwards
    /// it to `downstream`, whose answer decides whether to continue.
    pub fn progress_callback(&self, downstream: Option<ProgressCallback>) -> ProgressCallback {
        let registry = self.registry.clone();
        let id = self.id;
        progress_fn(move |event: &ProgressEvent| {
            registry.record(id, event);
            match &downstream {
                Some(cb) => cb(event),
                None => ProgressControl::Continue,
            }
        })
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_drop() {
        let registry = TransferRegistry::new();
        assert!(registry.is_empty());

        let a = registry.register(TransferKind::Upload, "a.bin");
        let b = registry.register(TransferKind::Download, "https://1.gigafile.nu/x");
        assert_eq!(registry.len(), 2);
        assert_ne!(a.id(), b.id());

        let list = registry.list();
        assert_eq!(list[0].label, "a.bin");
        assert_eq!(list[0].kind, TransferKind::Upload);
        assert_eq!(list[1].kind, TransferKind::Download);

        drop(a);
        assert_eq!(registry.len(), 1);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_by_id() {
        let registry = TransferRegistry::new();
        let a = registry.register(TransferKind::Upload, "a");
        let b = registry.register(TransferKind::Upload, "b");

        assert!(registry.cancel(a.id()));
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert!(!registry.cancel(999));
    }

    #[test]
    fn cancel_all_and_parent_token() {
        let registry = TransferRegistry::new();
        let parent = CancellationToken::new();
        let a = registry.register_child(TransferKind::Download, "a", &parent);
        let b = registry.register(TransferKind::Download, "b");

        parent.cancel();
        assert!(a.token().is_cancelled());
        assert!(!b.token().is_cancelled());

        registry.cancel_all();
        assert!(b.token().is_cancelled());
    }

    #[test]
    fn callback_records_and_forwards() {
        let registry = TransferRegistry::new();
        let handle = registry.register(TransferKind::Upload, "a");

        let downstream = progress_fn(|e: &ProgressEvent| e.percent < 50.0);
        let cb = handle.progress_callback(Some(downstream));

        assert_eq!(cb(&ProgressEvent::new(None, 10, 100)), ProgressControl::Continue);
        assert_eq!(
            registry.get(handle.id()).unwrap().last_progress.unwrap().bytes_done,
            10
        );
        assert_eq!(cb(&ProgressEvent::new(None, 60, 100)), ProgressControl::Stop);

        let silent = handle.progress_callback(None);
        assert_eq!(silent(&ProgressEvent::new(None, 70, 100)), ProgressControl::Continue);
        handle.record(&ProgressEvent::new(None, 80, 100));
        assert_eq!(registry.list()[0].last_progress.as_ref().unwrap().bytes_done, 80);
    }
}
