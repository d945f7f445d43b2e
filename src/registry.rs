//! Reference-counted tracking of GPU objects with deferred destruction.
//!
//! Every kind of device object (buffers, pipelines, fences, ...) lives in a
//! [`Registry`]. Creating an object through the registry returns a [`Handle`]. Handles
//! are cheap to clone; when the last one drops, the entry is *orphaned*: it leaves the
//! tracked set and waits in the orphan queue, stamped with the frame serial that was
//! recording at the time. The object is only destroyed by [`Registry::house_keep`]
//! once that frame is known to have completed on the GPU.
//!
//! ```text
//!   create()            last Handle dropped           house_keep(completed >= retired_at)
//! ──────────► Tracked ───────────────────────► Orphaned ─────────────────────────────► Destroyed
//! ```
//!
//! Entries adopted with [`Registry::adopt`] follow the same lifecycle, but the
//! registry never calls [`GpuObject::destroy`] on them. Swapchain images are the
//! typical example.
use std::{
    collections::HashMap,
    fmt::Debug,
    mem::ManuallyDrop,
    ops::Deref,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::{
    Error, Result,
    context::{FrameClock, RegistryOps},
};

/// A device object whose teardown is driven by a [`Registry`].
pub trait GpuObject: Send + Sync + Sized + 'static {
    /// Whatever is needed to destroy the object, usually the logical device.
    type Owner: Send + Sync + 'static;
    /// Name used in logs and invariant reports.
    const KIND: &'static str;

    /// Release the underlying device object. Called exactly once, from housekeeping.
    fn destroy(self, owner: &Self::Owner);
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Entry<T> {
    id: u64,
    ref_count: AtomicUsize,
    external: bool,
    object: T,
}

struct Orphan<T> {
    entry: Arc<Entry<T>>,
    retired_at: u64,
}

struct RegistryState<T> {
    tracked: HashMap<u64, Arc<Entry<T>>>,
    orphaned: Vec<Orphan<T>>,
    violations: Vec<String>,
}

pub(crate) struct RegistryInner<T: GpuObject> {
    owner: T::Owner,
    clock: FrameClock,
    next_id: AtomicU64,
    state: Mutex<RegistryState<T>>,
}

/// Tracks every live object of one kind.
///
/// Cloning a registry is cheap and yields another reference to the same set.
pub struct Registry<T: GpuObject>(Arc<RegistryInner<T>>);

impl<T: GpuObject> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: GpuObject> Registry<T> {
    /// Registries are normally obtained from [`ResourceContext::registry`](crate::ResourceContext::registry)
    /// so that housekeeping reaches them.
    pub(crate) fn new(owner: T::Owner, clock: FrameClock) -> Self {
        Self(Arc::new(RegistryInner {
            owner,
            clock,
            next_id: AtomicU64::new(1),
            state: Mutex::new(RegistryState {
                tracked: HashMap::new(),
                orphaned: Vec::new(),
                violations: Vec::new(),
            }),
        }))
    }

    pub(crate) fn ops(&self) -> Arc<dyn RegistryOps> {
        self.0.clone()
    }

    /// Start tracking `object`. The returned handle holds the only reference.
    pub fn create(&self, object: T) -> Handle<T> {
        self.insert(object, false)
    }

    /// Start tracking an object owned by someone else. It is reported and counted like
    /// any other entry but never destroyed by the registry.
    pub fn adopt(&self, object: T) -> Handle<T> {
        self.insert(object, true)
    }

    fn insert(&self, object: T, external: bool) -> Handle<T> {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Entry {
            id,
            ref_count: AtomicUsize::new(1),
            external,
            object,
        });
        lock(&self.0.state).tracked.insert(id, entry.clone());
        Handle {
            entry: ManuallyDrop::new(entry),
            registry: self.0.clone(),
        }
    }

    pub fn owner(&self) -> &T::Owner {
        &self.0.owner
    }

    /// Number of entries with at least one live handle.
    pub fn count(&self) -> usize {
        lock(&self.0.state).tracked.len()
    }

    /// Number of entries waiting for housekeeping.
    pub fn orphan_count(&self) -> usize {
        lock(&self.0.state).orphaned.len()
    }

    /// Destroy every orphan retired at or before `completed_serial`.
    ///
    /// Returns the number of destroyed objects, or the first invariant violation
    /// recorded since the previous call.
    pub fn house_keep(&self, completed_serial: u64) -> Result<usize> {
        self.0.reap(Some(completed_serial))
    }

    /// Destroy every orphan regardless of its serial. Only valid once the device is idle.
    pub fn house_keep_all(&self) -> Result<usize> {
        self.0.reap(None)
    }
}

impl<T: GpuObject> RegistryInner<T> {
    fn orphan(&self, entry: Arc<Entry<T>>) {
        let retired_at = self.clock.recording();
        let mut state = lock(&self.state);
        if state.tracked.remove(&entry.id).is_some() {
            state.orphaned.push(Orphan { entry, retired_at });
        } else {
            let detail = format!("orphaned entry {} is not tracked", entry.id);
            tracing::error!(kind = T::KIND, %detail, "registry invariant violated");
            state.violations.push(detail);
        }
    }

    fn violation(&self, detail: String) {
        tracing::error!(kind = T::KIND, %detail, "registry invariant violated");
        lock(&self.state).violations.push(detail);
    }

    fn reap(&self, completed: Option<u64>) -> Result<usize> {
        let (ready, mut violations) = {
            let mut state = lock(&self.state);
            let orphaned = std::mem::take(&mut state.orphaned);
            let (ready, pending): (Vec<_>, Vec<_>) = orphaned
                .into_iter()
                .partition(|orphan| completed.is_none_or(|c| orphan.retired_at <= c));
            state.orphaned = pending;
            (ready, std::mem::take(&mut state.violations))
        };

        let mut destroyed = 0;
        let mut survivors = Vec::new();
        for orphan in ready {
            match Arc::try_unwrap(orphan.entry) {
                Ok(entry) => {
                    let count = entry.ref_count.load(Ordering::Acquire);
                    if count != 0 {
                        violations.push(format!(
                            "entry {} destroyed with refcount {count}",
                            entry.id
                        ));
                    }
                    if !entry.external {
                        entry.object.destroy(&self.owner);
                    }
                    destroyed += 1;
                }
                Err(entry) => {
                    violations.push(format!(
                        "entry {} still referenced at destruction",
                        entry.id
                    ));
                    survivors.push(Orphan {
                        entry,
                        retired_at: orphan.retired_at,
                    });
                }
            }
        }
        let pending = {
            let mut state = lock(&self.state);
            state.orphaned.extend(survivors);
            state.orphaned.len()
        };
        if destroyed > 0 {
            tracing::debug!(kind = T::KIND, destroyed, pending, "house keeping");
        }

        match violations.into_iter().next() {
            Some(detail) => Err(Error::invariant(T::KIND, detail)),
            None => Ok(destroyed),
        }
    }
}

impl<T: GpuObject> RegistryOps for RegistryInner<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }
    fn house_keep(&self, completed: Option<u64>) -> Result<usize> {
        self.reap(completed)
    }
    fn live_count(&self) -> usize {
        lock(&self.state).tracked.len()
    }
    fn orphan_count(&self) -> usize {
        lock(&self.state).orphaned.len()
    }
}

impl<T: GpuObject> Drop for RegistryInner<T> {
    fn drop(&mut self) {
        let state = lock(&self.state);
        if !state.orphaned.is_empty() {
            tracing::warn!(
                kind = T::KIND,
                count = state.orphaned.len(),
                "registry dropped before its orphans were destroyed"
            );
        }
    }
}

/// A counted reference to a tracked object.
///
/// Cloning increments the entry's count; dropping the last handle orphans the entry.
/// Derefs to the object itself.
pub struct Handle<T: GpuObject> {
    entry: ManuallyDrop<Arc<Entry<T>>>,
    registry: Arc<RegistryInner<T>>,
}

impl<T: GpuObject> Handle<T> {
    /// Registry-unique identifier of this entry.
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Current number of live handles to this entry.
    pub fn ref_count(&self) -> usize {
        self.entry.ref_count.load(Ordering::Acquire)
    }

    pub fn is_external(&self) -> bool {
        self.entry.external
    }
}

impl<T: GpuObject> Clone for Handle<T> {
    fn clone(&self) -> Self {
        self.entry.ref_count.fetch_add(1, Ordering::Relaxed);
        Self {
            entry: ManuallyDrop::new(Arc::clone(&self.entry)),
            registry: self.registry.clone(),
        }
    }
}

impl<T: GpuObject> Drop for Handle<T> {
    fn drop(&mut self) {
        let previous = self.entry.ref_count.fetch_sub(1, Ordering::AcqRel);
        // SAFETY: `self.entry` is never touched again after being taken.
        let entry = unsafe { ManuallyDrop::take(&mut self.entry) };
        match previous {
            1 => self.registry.orphan(entry),
            0 => self
                .registry
                .violation(format!("refcount underflow on entry {}", entry.id)),
            _ => drop(entry),
        }
    }
}

impl<T: GpuObject> Deref for Handle<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.entry.object
    }
}

impl<T: GpuObject> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}
impl<T: GpuObject> Eq for Handle<T> {}

impl<T: GpuObject> Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &T::KIND)
            .field("id", &self.entry.id)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}
