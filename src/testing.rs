//! In-memory backend and mesh source used by unit tests.
use std::{
    sync::{
        Arc, Condvar, Mutex, RwLock,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use glam::{Vec3, Vec4};

use crate::{
    Error, Result,
    backend::{AcquiredImage, Backend, BufferUsage, DrawCall, PresentStatus, TriangleGeometry},
    mesh::{MeshSource, MeshView},
    reconcile::{EntityId, Generation, SourceEntity},
    registry::GpuObject,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass { image: u32 },
    Draw { pipeline: u64, count: u32, indexed: bool, vertex_buffers: Vec<u64> },
    EndPass,
}

#[derive(Default)]
pub struct MockState {
    next_id: AtomicU64,
    pub destroyed: Mutex<Vec<(&'static str, u64)>>,
    pub submissions: Mutex<Vec<u64>>,
    pub presented: Mutex<Vec<u32>>,
    /// When false, submitted fences stay unsignaled until the test signals them.
    pub auto_signal: AtomicBool,
    /// Number of upcoming acquires that report an out-of-date swapchain.
    pub out_of_date: AtomicU32,
    pub recreations: AtomicU32,
    /// Binary semaphores signaled again before anything waited on them.
    pub double_signals: AtomicU32,
    /// When true, buffer writes fail with out of memory.
    pub fail_writes: AtomicBool,
    next_image: AtomicU32,
}

impl MockState {
    fn id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
    fn record_destroyed(&self, kind: &'static str, id: u64) {
        self.destroyed.lock().unwrap().push((kind, id));
    }
    pub fn destroyed_of(&self, kind: &str) -> Vec<u64> {
        self.destroyed
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }
}

pub type MockDevice = Arc<MockState>;

macro_rules! mock_object {
    ($name:ident, $kind:literal) => {
        impl GpuObject for $name {
            type Owner = MockDevice;
            const KIND: &'static str = $kind;
            fn destroy(self, owner: &MockDevice) {
                owner.record_destroyed($kind, self.id);
            }
        }
    };
}

pub struct MockBuffer {
    pub id: u64,
    pub usage: BufferUsage,
    pub data: Mutex<Vec<u8>>,
}
mock_object!(MockBuffer, "buffer");

pub struct MockBinding {
    pub id: u64,
    pub constants: u64,
}
mock_object!(MockBinding, "binding");

pub struct MockPipeline {
    pub id: u64,
}
mock_object!(MockPipeline, "pipeline");

pub struct MockAccelStruct {
    pub id: u64,
    pub triangles: u32,
}
mock_object!(MockAccelStruct, "accel_struct");

pub struct MockSemaphore {
    pub id: u64,
    /// Signaled and not yet waited on.
    pending: AtomicBool,
}

impl MockSemaphore {
    fn signal(&self, state: &MockState) {
        if self.pending.swap(true, Ordering::AcqRel) {
            state.double_signals.fetch_add(1, Ordering::Relaxed);
        }
    }
    fn consume(&self) {
        self.pending.store(false, Ordering::Release);
    }
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}
mock_object!(MockSemaphore, "semaphore");

pub struct MockRecorder {
    pub id: u64,
    pub commands: Mutex<Vec<Command>>,
}
mock_object!(MockRecorder, "recorder");

pub struct MockFence {
    pub id: u64,
    signaled: Mutex<bool>,
    cond: Condvar,
}
mock_object!(MockFence, "fence");

impl MockFence {
    pub fn signal(&self) {
        *self.signaled.lock().unwrap() = true;
        self.cond.notify_all();
    }
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap()
    }
}

#[derive(Clone)]
pub struct MockBackend {
    pub state: MockDevice,
}

impl MockBackend {
    pub fn new() -> Self {
        let state = MockState::default();
        state.auto_signal.store(true, Ordering::Relaxed);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn pipeline(&self) -> MockPipeline {
        MockPipeline {
            id: self.state.id(),
        }
    }
}

impl Backend for MockBackend {
    type Device = MockDevice;
    type Buffer = MockBuffer;
    type Binding = MockBinding;
    type Pipeline = MockPipeline;
    type AccelStruct = MockAccelStruct;
    type Fence = MockFence;
    type Semaphore = MockSemaphore;
    type Recorder = MockRecorder;

    fn device(&self) -> &MockDevice {
        &self.state
    }

    fn create_buffer(&self, usage: BufferUsage, size: u64) -> Result<MockBuffer> {
        Ok(MockBuffer {
            id: self.state.id(),
            usage,
            data: Mutex::new(vec![0; size as usize]),
        })
    }

    fn write_buffer(&self, buffer: &MockBuffer, offset: u64, data: &[u8]) -> Result<()> {
        if self.state.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::OutOfMemory);
        }
        let mut contents = buffer.data.lock().unwrap();
        let range = offset as usize..offset as usize + data.len();
        if range.end > contents.len() {
            return Err(Error::OutOfMemory);
        }
        contents[range].copy_from_slice(data);
        Ok(())
    }

    fn create_binding(&self, constants: &MockBuffer) -> Result<MockBinding> {
        Ok(MockBinding {
            id: self.state.id(),
            constants: constants.id,
        })
    }

    fn build_accel_struct(&self, geometry: &TriangleGeometry<'_, Self>) -> Result<MockAccelStruct> {
        Ok(MockAccelStruct {
            id: self.state.id(),
            triangles: geometry.triangle_count,
        })
    }

    fn create_fence(&self, signaled: bool) -> Result<MockFence> {
        Ok(MockFence {
            id: self.state.id(),
            signaled: Mutex::new(signaled),
            cond: Condvar::new(),
        })
    }

    fn create_semaphore(&self) -> Result<MockSemaphore> {
        Ok(MockSemaphore {
            id: self.state.id(),
            pending: AtomicBool::new(false),
        })
    }

    fn create_recorder(&self) -> Result<MockRecorder> {
        Ok(MockRecorder {
            id: self.state.id(),
            commands: Mutex::new(Vec::new()),
        })
    }

    fn wait_for_fence(&self, fence: &MockFence, timeout: Option<Duration>) -> Result<()> {
        let signaled = fence.signaled.lock().unwrap();
        match timeout {
            None => {
                let _guard = fence.cond.wait_while(signaled, |s| !*s).unwrap();
                Ok(())
            }
            Some(timeout) => {
                let (_guard, result) = fence
                    .cond
                    .wait_timeout_while(signaled, timeout, |s| !*s)
                    .unwrap();
                if result.timed_out() {
                    Err(Error::DeviceTimeout(timeout))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn reset_fence(&self, fence: &MockFence) -> Result<()> {
        *fence.signaled.lock().unwrap() = false;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        Ok(())
    }

    fn begin_recording(&self, recorder: &MockRecorder) -> Result<()> {
        recorder.commands.lock().unwrap().clear();
        Ok(())
    }

    fn begin_pass(&self, recorder: &MockRecorder, image: AcquiredImage, _clear_color: [f32; 4]) {
        recorder
            .commands
            .lock()
            .unwrap()
            .push(Command::BeginPass { image: image.index });
    }

    fn record_draw(&self, recorder: &MockRecorder, draw: &DrawCall<'_, Self>) {
        recorder.commands.lock().unwrap().push(Command::Draw {
            pipeline: draw.pipeline.id,
            count: draw.count,
            indexed: draw.index_buffer.is_some(),
            vertex_buffers: draw.vertex_buffers.iter().map(|b| b.id).collect(),
        });
    }

    fn end_pass(&self, recorder: &MockRecorder) {
        recorder.commands.lock().unwrap().push(Command::EndPass);
    }

    fn submit(
        &self,
        recorder: &MockRecorder,
        wait: Option<&MockSemaphore>,
        signal: Option<&MockSemaphore>,
        fence: &MockFence,
    ) -> Result<()> {
        assert!(!fence.is_signaled(), "submitted with a signaled fence");
        if let Some(wait) = wait {
            wait.consume();
        }
        if let Some(signal) = signal {
            signal.signal(&self.state);
        }
        self.state.submissions.lock().unwrap().push(recorder.id);
        if self.state.auto_signal.load(Ordering::Relaxed) {
            fence.signal();
        }
        Ok(())
    }

    fn acquire_image(
        &self,
        signal: &MockSemaphore,
        _timeout: Option<Duration>,
    ) -> Result<AcquiredImage> {
        let out_of_date = self
            .state
            .out_of_date
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if out_of_date.is_ok() {
            return Err(Error::SwapchainOutOfDate);
        }
        signal.signal(&self.state);
        Ok(AcquiredImage {
            index: self.state.next_image.fetch_add(1, Ordering::Relaxed) % 3,
            suboptimal: false,
        })
    }

    fn present(&self, image: AcquiredImage, wait: &MockSemaphore) -> Result<PresentStatus> {
        wait.consume();
        self.state.presented.lock().unwrap().push(image.index);
        Ok(PresentStatus::Optimal)
    }

    fn recreate_swapchain(&self) -> Result<()> {
        self.state.recreations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct TestMeshData {
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    tangents: Vec<Vec4>,
    colors: Vec<Vec4>,
    indices: Vec<u32>,
}

/// A mesh with manually bumped generations.
pub struct TestMesh {
    id: EntityId,
    geometry: AtomicU64,
    color: AtomicU64,
    data: RwLock<TestMeshData>,
}

impl TestMesh {
    /// A unit quad made of two triangles.
    pub fn quad(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: EntityId(id),
            geometry: AtomicU64::new(1),
            color: AtomicU64::new(1),
            data: RwLock::new(TestMeshData {
                positions: vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(1.0, 0.0, 0.0),
                    Vec3::new(1.0, 1.0, 0.0),
                    Vec3::new(0.0, 1.0, 0.0),
                ],
                normals: vec![Vec3::Z; 4],
                tangents: vec![Vec4::new(1.0, 0.0, 0.0, 1.0); 4],
                colors: vec![Vec4::ONE; 4],
                indices: vec![0, 1, 2, 0, 2, 3],
            }),
        })
    }

    pub fn bump_geometry(&self) {
        self.geometry.fetch_add(1, Ordering::AcqRel);
    }

    /// Replace the index list without bumping generations.
    pub fn set_indices(&self, indices: Vec<u32>) {
        self.data.write().unwrap().indices = indices;
    }

    pub fn bump_color(&self) {
        self.color.fetch_add(1, Ordering::AcqRel);
    }
}

impl SourceEntity for TestMesh {
    fn identity(&self) -> EntityId {
        self.id
    }
    fn geometry_generation(&self) -> Generation {
        Generation::new(self.geometry.load(Ordering::Acquire)).expect("generations start at 1")
    }
    fn color_generation(&self) -> Generation {
        Generation::new(self.color.load(Ordering::Acquire)).expect("generations start at 1")
    }
}

impl MeshSource for TestMesh {
    fn read<R>(&self, f: impl FnOnce(&MeshView<'_>) -> R) -> R {
        let data = self.data.read().unwrap();
        f(&MeshView {
            positions: &data.positions,
            normals: &data.normals,
            tangents: &data.tangents,
            colors: &data.colors,
            indices: &data.indices,
        })
    }
}
