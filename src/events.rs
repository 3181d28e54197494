//! Observer lists shared by the ingestor and the analyzer.
//!
//! Every callback is invoked inside `catch_unwind`, so a panicking listener is
//! logged and skipped while the remaining listeners still see the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Handle returned on registration, used to remove a listener again.
/// Unique across every list in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<E> = Box<dyn FnMut(&E)>;

/// Ordered list of callbacks for one event kind.
pub struct Listeners<E> {
    entries: Vec<(ListenerId, Callback<E>)>,
    label: &'static str,
}

impl<E> Listeners<E> {
    pub fn new(label: &'static str) -> Self {
        Self {
            entries: Vec::new(),
            label,
        }
    }

    pub fn add<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&E) + 'static,
    {
        let id = ListenerId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// Returns true when a listener with this id was registered here.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delivers `event` to every listener in registration order and returns
    /// how many of them panicked.
    pub fn emit(&mut self, event: &E) -> usize {
        self.emit_while(event, || true)
    }

    /// Like [`emit`](Self::emit), but checks `proceed` before each listener
    /// and stops delivering once it returns false.
    pub fn emit_while<P>(&mut self, event: &E, mut proceed: P) -> usize
    where
        P: FnMut() -> bool,
    {
        let mut faults = 0;
        for (id, listener) in self.entries.iter_mut() {
            if !proceed() {
                break;
            }
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                faults += 1;
                log::warn!("{} listener {:?} panicked; ignoring", self.label, id);
            }
        }
        faults
    }
}

impl<E> std::fmt::Debug for Listeners<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("label", &self.label)
            .field("count", &self.entries.len())
            .finish()
    }
}
