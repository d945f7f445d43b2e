//! The root object owning every registry.
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    Error, Result,
    registry::{GpuObject, Registry, lock},
};

/// Shared view of frame progress.
///
/// `recording` is the serial of the frame the CPU is currently recording. `completed`
/// is the highest serial whose GPU work is known to be finished. Serials start at 1,
/// so a completed serial of 0 means nothing has finished yet.
#[derive(Clone, Default, Debug)]
pub struct FrameClock(Arc<FrameClockInner>);

#[derive(Default, Debug)]
struct FrameClockInner {
    recording: AtomicU64,
    completed: AtomicU64,
}

impl FrameClock {
    pub fn recording(&self) -> u64 {
        self.0.recording.load(Ordering::Acquire)
    }
    pub fn completed(&self) -> u64 {
        self.0.completed.load(Ordering::Acquire)
    }
    pub fn begin_frame(&self, serial: u64) {
        self.0.recording.store(serial, Ordering::Release);
    }
    /// Frames complete in submission order, so this never moves backwards.
    pub fn complete(&self, serial: u64) {
        self.0.completed.fetch_max(serial, Ordering::AcqRel);
    }
    pub fn is_complete(&self, serial: u64) -> bool {
        serial <= self.completed()
    }
}

/// Type-erased access to one registry, used for housekeeping and teardown checks.
pub(crate) trait RegistryOps: Send + Sync {
    fn kind(&self) -> &'static str;
    fn house_keep(&self, completed: Option<u64>) -> Result<usize>;
    fn live_count(&self) -> usize;
    fn orphan_count(&self) -> usize;
}

/// Occupancy of a single registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub kind: &'static str,
    pub live: usize,
    pub orphaned: usize,
}

/// Owns the registries of every resource kind and the frame clock they stamp orphans
/// with. Passed explicitly to everything that creates device objects.
#[derive(Clone, Default)]
pub struct ResourceContext(Arc<ResourceContextInner>);

#[derive(Default)]
struct ResourceContextInner {
    clock: FrameClock,
    registries: Mutex<Vec<Arc<dyn RegistryOps>>>,
}

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.0.clock
    }

    /// Create a registry for `T` and enroll it in housekeeping.
    ///
    /// Registries are visited in reverse creation order, so a kind wrapping another
    /// (framebuffers over image views) should be registered after it.
    pub fn registry<T: GpuObject>(&self, owner: T::Owner) -> Registry<T> {
        let registry = Registry::new(owner, self.0.clock.clone());
        lock(&self.0.registries).push(registry.ops());
        registry
    }

    fn registries(&self) -> Vec<Arc<dyn RegistryOps>> {
        lock(&self.0.registries).clone()
    }

    /// Destroy every orphan whose frame has completed.
    pub fn house_keep(&self) -> Result<usize> {
        self.reap(Some(self.0.clock.completed()))
    }

    /// Destroy every orphan. The device must be idle.
    pub fn house_keep_all(&self) -> Result<usize> {
        self.reap(None)
    }

    fn reap(&self, completed: Option<u64>) -> Result<usize> {
        let mut destroyed = 0;
        let mut first_error = None;
        for registry in self.registries().iter().rev() {
            match registry.house_keep(completed) {
                Ok(n) => destroyed += n,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(destroyed),
        }
    }

    pub fn stats(&self) -> Vec<RegistryStats> {
        self.registries()
            .iter()
            .map(|r| RegistryStats {
                kind: r.kind(),
                live: r.live_count(),
                orphaned: r.orphan_count(),
            })
            .collect()
    }

    /// Final teardown step once the device is idle and every owner of handles is gone.
    ///
    /// Destroys the remaining orphans, then fails if any registry still tracks a live
    /// entry.
    pub fn shutdown(&self) -> Result<()> {
        self.house_keep_all()?;
        let leaked: Vec<_> = self.stats().into_iter().filter(|s| s.live > 0).collect();
        if let Some(first) = leaked.first() {
            for stats in &leaked {
                tracing::error!(kind = stats.kind, live = stats.live, "live entries at shutdown");
            }
            return Err(Error::invariant(
                first.kind,
                format!("{} entries still tracked at shutdown", first.live),
            ));
        }
        tracing::info!("resource context shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorded(&'static str);
    impl GpuObject for Recorded {
        type Owner = Arc<Mutex<Vec<&'static str>>>;
        const KIND: &'static str = "recorded";
        fn destroy(self, owner: &Self::Owner) {
            owner.lock().unwrap().push(self.0);
        }
    }

    struct Wrapper(&'static str);
    impl GpuObject for Wrapper {
        type Owner = Arc<Mutex<Vec<&'static str>>>;
        const KIND: &'static str = "wrapper";
        fn destroy(self, owner: &Self::Owner) {
            owner.lock().unwrap().push(self.0);
        }
    }

    #[test]
    fn test_reverse_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = ResourceContext::new();
        let views = context.registry::<Recorded>(log.clone());
        let framebuffers = context.registry::<Wrapper>(log.clone());
        drop(views.create(Recorded("view")));
        drop(framebuffers.create(Wrapper("framebuffer")));
        assert_eq!(context.house_keep().unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), ["framebuffer", "view"]);
    }

    #[test]
    fn test_shutdown_with_live_entries_fails() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let context = ResourceContext::new();
        let registry = context.registry::<Recorded>(log.clone());
        let live = registry.create(Recorded("live"));
        drop(registry.create(Recorded("dead")));

        let err = context.shutdown().unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { kind: "recorded", .. }));
        assert_eq!(*log.lock().unwrap(), ["dead"]);

        drop(live);
        context.shutdown().unwrap();
        assert_eq!(*log.lock().unwrap(), ["dead", "live"]);
    }

    #[test]
    fn test_clock_never_moves_backwards() {
        let clock = FrameClock::default();
        clock.complete(4);
        clock.complete(2);
        assert_eq!(clock.completed(), 4);
        assert!(clock.is_complete(3));
        assert!(!clock.is_complete(5));
    }
}
