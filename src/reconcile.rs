//! Keeping per-entity GPU artifacts in sync with a list of CPU-side sources.
//!
//! Every draw subsystem owns a [`DerivedCache`] and calls
//! [`DerivedCache::reconcile`] with the current sources once per frame. Entries are
//! matched by [`EntityId`], so reordering the sources never triggers a rebuild. An
//! entry is rebuilt only when the source advertises a generation the cache has not
//! built yet:
//!
//! - a new geometry generation rebuilds geometry, then color (color data is laid out
//!   after the geometry it decorates);
//! - a new color generation rebuilds color only.
//!
//! Entries whose identity no longer appears are dropped before `reconcile` returns.
//! Dropping an artifact drops its [`Handle`](crate::Handle)s, which orphans the GPU
//! objects; the registry destroys them once the frames that used them complete.
use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    num::NonZeroU64,
    sync::{Arc, Weak},
};

use crate::Result;

/// Stable identity of a source entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// A monotonically increasing content version. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(NonZeroU64);

impl Generation {
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Something derived GPU data is built from.
///
/// Generations must only advance after the data they describe is fully written, so
/// that a reader observing generation `n` also observes the data of `n`.
pub trait SourceEntity: Send + Sync + 'static {
    fn identity(&self) -> EntityId;
    fn geometry_generation(&self) -> Generation;
    fn color_generation(&self) -> Generation;
}

/// Strategy that (re)builds one subsystem's artifact for a source.
///
/// On error the previous artifact contents must remain usable; the cache keeps the
/// old generation and retries on the next pass.
pub trait ArtifactBuilder<S: ?Sized> {
    type Artifact: Default;

    fn build_geometry(&mut self, source: &S, artifact: &mut Self::Artifact) -> Result<()>;
    fn build_color(&mut self, source: &S, artifact: &mut Self::Artifact) -> Result<()>;
}

pub struct CacheEntry<S, A> {
    id: EntityId,
    source: Weak<S>,
    geometry: Option<Generation>,
    color: Option<Generation>,
    artifact: A,
}

impl<S, A: Default> CacheEntry<S, A> {
    fn new(id: EntityId, source: &Arc<S>) -> Self {
        Self {
            id,
            source: Arc::downgrade(source),
            geometry: None,
            color: None,
            artifact: A::default(),
        }
    }
}

impl<S, A> CacheEntry<S, A> {
    pub fn id(&self) -> EntityId {
        self.id
    }
    /// The source this entry was built from, if it is still alive.
    pub fn source(&self) -> Option<Arc<S>> {
        self.source.upgrade()
    }
    pub fn artifact(&self) -> &A {
        &self.artifact
    }
    /// Generations the artifact currently reflects. `None` means never built.
    pub fn built_generations(&self) -> (Option<Generation>, Option<Generation>) {
        (self.geometry, self.color)
    }
    /// True once both geometry and color have been built at least once.
    pub fn is_complete(&self) -> bool {
        self.geometry.is_some() && self.color.is_some()
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub kept: usize,
    pub created: usize,
    pub dropped: usize,
    pub geometry_rebuilds: usize,
    pub color_rebuilds: usize,
    pub failed: usize,
}

impl ReconcileStats {
    pub fn is_noop(&self) -> bool {
        self.created == 0
            && self.dropped == 0
            && self.geometry_rebuilds == 0
            && self.color_rebuilds == 0
            && self.failed == 0
    }
}

/// Per-subsystem cache of artifacts keyed by source identity, kept in source order.
pub struct DerivedCache<S, A> {
    label: &'static str,
    entries: Vec<CacheEntry<S, A>>,
}

impl<S, A> Debug for DerivedCache<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedCache")
            .field("label", &self.label)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<S: SourceEntity, A: Default> DerivedCache<S, A> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &CacheEntry<S, A>> {
        self.entries.iter()
    }

    pub fn get(&self, id: EntityId) -> Option<&CacheEntry<S, A>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Drop every entry, releasing all artifacts.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Bring the cache in line with `sources`.
    ///
    /// Recoverable build failures are logged and counted in
    /// [`ReconcileStats::failed`]. A fatal error stops further builds for this pass;
    /// the cache still ends up holding exactly the current sources, and the error is
    /// returned.
    pub fn reconcile<B>(&mut self, sources: &[Arc<S>], builder: &mut B) -> Result<ReconcileStats>
    where
        B: ArtifactBuilder<S, Artifact = A>,
    {
        let mut previous: HashMap<EntityId, CacheEntry<S, A>> =
            self.entries.drain(..).map(|entry| (entry.id, entry)).collect();
        let mut seen = HashSet::with_capacity(sources.len());
        let mut stats = ReconcileStats::default();
        let mut fatal = None;

        for source in sources {
            let id = source.identity();
            if !seen.insert(id) {
                tracing::debug!(cache = self.label, id = id.0, "duplicate source skipped");
                continue;
            }
            let mut entry = match previous.remove(&id) {
                Some(entry) => {
                    stats.kept += 1;
                    entry
                }
                None => {
                    stats.created += 1;
                    CacheEntry::new(id, source)
                }
            };
            if fatal.is_none() {
                if let Err(err) = Self::refresh(&mut entry, source, builder, &mut stats) {
                    if err.is_fatal() {
                        fatal = Some(err);
                    } else {
                        stats.failed += 1;
                        tracing::warn!(cache = self.label, id = id.0, error = %err, "artifact rebuild failed");
                    }
                }
            }
            self.entries.push(entry);
        }

        stats.dropped = previous.len();
        drop(previous);

        if !stats.is_noop() {
            tracing::debug!(
                cache = self.label,
                kept = stats.kept,
                created = stats.created,
                dropped = stats.dropped,
                geometry_rebuilds = stats.geometry_rebuilds,
                color_rebuilds = stats.color_rebuilds,
                failed = stats.failed,
                "reconciled"
            );
        }
        match fatal {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    fn refresh<B>(
        entry: &mut CacheEntry<S, A>,
        source: &S,
        builder: &mut B,
        stats: &mut ReconcileStats,
    ) -> Result<()>
    where
        B: ArtifactBuilder<S, Artifact = A>,
    {
        let geometry = source.geometry_generation();
        if entry.geometry != Some(geometry) {
            builder.build_geometry(source, &mut entry.artifact)?;
            entry.geometry = Some(geometry);
            entry.color = None;
            stats.geometry_rebuilds += 1;
        }
        let color = source.color_generation();
        if entry.color != Some(color) {
            builder.build_color(source, &mut entry.artifact)?;
            entry.color = Some(color);
            stats.color_rebuilds += 1;
        }
        Ok(())
    }
}
