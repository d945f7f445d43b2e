//! Rotating frame slots that let the CPU record ahead of the GPU.
//!
//! A [`FramePipeline`] owns `F` slots. Each bundles a command recorder, a completion
//! fence and the semaphores gating acquire and present. Frames use the slots round
//! robin; before a slot is recorded into again, [`FramePipeline::start_frame`] blocks
//! on its fence. That wait is what makes the slot's previous frame complete, advances
//! the [`FrameClock`](crate::FrameClock) and lets housekeeping destroy the objects
//! orphaned while that frame was recorded.
//!
//! # Slot states
//!
//! ```text
//! Idle --start_frame--> Recording --submit--> Submitted --start_frame (fence wait)--> Recording
//! ```
use std::{
    any::Any,
    time::{Duration, Instant},
};

use smallvec::SmallVec;

use crate::{
    Error, Result,
    backend::{AcquiredImage, Backend, PresentStatus},
    gpu::GpuContext,
    registry::Handle,
};

/// Fence waits longer than this are logged.
const SLOW_FENCE_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Frames in flight.
    pub slot_count: usize,
    /// Upper bound on the wait for a slot's fence. `None` blocks indefinitely.
    pub fence_timeout: Option<Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            slot_count: 2,
            fence_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SlotState {
    /// Never used, or reclaimed by [`FramePipeline::wait_idle`].
    Idle,
    Recording,
    /// Handed to the device. The fence signals when it completes.
    Submitted,
}

pub struct FrameSlot<B: Backend> {
    recorder: Handle<B::Recorder>,
    fence: Handle<B::Fence>,
    acquire_signal: Handle<B::Semaphore>,
    release_signal: Handle<B::Semaphore>,
    state: SlotState,
    /// Serial of the frame that last used this slot.
    serial: u64,
    image: Option<AcquiredImage>,
    /// Values kept alive until the slot's frame has completed.
    retained: Vec<Box<dyn Any + Send>>,
}

impl<B: Backend> FrameSlot<B> {
    fn new(context: &GpuContext<B>) -> Result<Self> {
        Ok(Self {
            recorder: context.create_recorder()?,
            fence: context.create_fence(true)?,
            acquire_signal: context.create_semaphore()?,
            release_signal: context.create_semaphore()?,
            state: SlotState::Idle,
            serial: 0,
            image: None,
            retained: Vec::new(),
        })
    }

    pub fn recorder(&self) -> &Handle<B::Recorder> {
        &self.recorder
    }
    pub fn fence(&self) -> &Handle<B::Fence> {
        &self.fence
    }
    pub fn state(&self) -> SlotState {
        self.state
    }
    pub fn serial(&self) -> u64 {
        self.serial
    }
    pub fn image(&self) -> Option<AcquiredImage> {
        self.image
    }
}

pub struct FramePipeline<B: Backend> {
    context: GpuContext<B>,
    slots: SmallVec<[FrameSlot<B>; 3]>,
    frame_index: usize,
    next_serial: u64,
    fence_timeout: Option<Duration>,
}

impl<B: Backend> FramePipeline<B> {
    pub fn new(context: &GpuContext<B>, config: &FrameConfig) -> Result<Self> {
        if config.slot_count == 0 {
            return Err(Error::InvalidConfig(
                "a frame pipeline needs at least one slot".into(),
            ));
        }
        let slots = (0..config.slot_count)
            .map(|_| FrameSlot::new(context))
            .collect::<Result<SmallVec<_>>>()?;
        tracing::info!(slots = config.slot_count, timeout = ?config.fence_timeout, "Creating frame pipeline");
        Ok(Self {
            context: context.clone(),
            slots,
            // The first frame lands on slot 0.
            frame_index: config.slot_count - 1,
            next_serial: 1,
            fence_timeout: config.fence_timeout,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn slot(&self, index: usize) -> &FrameSlot<B> {
        &self.slots[index]
    }

    pub fn current(&self) -> &FrameSlot<B> {
        &self.slots[self.frame_index]
    }

    /// Move to the next slot, wait for its previous frame, reset its recorder and run
    /// housekeeping. Returns the serial of the new frame.
    pub fn start_frame(&mut self) -> Result<u64> {
        if self.slots[self.frame_index].state == SlotState::Recording {
            return Err(Error::invariant(
                "frame",
                "a frame was started before the previous one was submitted",
            ));
        }
        let index = (self.frame_index + 1) % self.slots.len();
        let backend = self.context.backend();
        let clock = self.context.clock();
        let slot = &mut self.slots[index];

        let started = Instant::now();
        backend.wait_for_fence(&slot.fence, self.fence_timeout)?;
        let waited = started.elapsed();
        if waited > SLOW_FENCE_WAIT {
            tracing::warn!(slot = index, serial = slot.serial, ?waited, "slow frame fence wait");
        }
        if slot.state == SlotState::Submitted {
            clock.complete(slot.serial);
        }
        slot.state = SlotState::Idle;
        slot.image = None;
        slot.retained.clear();

        let serial = self.next_serial;
        self.next_serial += 1;
        clock.begin_frame(serial);
        backend.begin_recording(&slot.recorder)?;
        slot.serial = serial;
        slot.state = SlotState::Recording;
        self.frame_index = index;
        tracing::debug!(serial, slot = index, "frame started");

        self.context.resources().house_keep()?;
        Ok(serial)
    }

    /// Acquire the swapchain image this frame renders into.
    pub fn acquire_image(&mut self) -> Result<AcquiredImage> {
        let backend = self.context.backend();
        let slot = &mut self.slots[self.frame_index];
        if slot.state != SlotState::Recording || slot.image.is_some() {
            return Err(Error::invariant(
                "frame",
                "images are acquired once per recording frame",
            ));
        }
        let image = backend.acquire_image(&slot.acquire_signal, self.fence_timeout)?;
        slot.image = Some(image);
        Ok(image)
    }

    /// Submit the recorded frame.
    ///
    /// With an acquired image the submission waits on the acquire signal and signals
    /// the release signal for [`present_frame`](Self::present_frame). Without one only
    /// the fence is signaled.
    pub fn submit(&mut self) -> Result<()> {
        let slot = &mut self.slots[self.frame_index];
        if slot.state != SlotState::Recording {
            return Err(Error::invariant("frame", "submitted a frame that is not recording"));
        }
        let backend = self.context.backend();
        backend.reset_fence(&slot.fence)?;
        let wait = slot.image.map(|_| &*slot.acquire_signal);
        let signal = slot.image.map(|_| &*slot.release_signal);
        if let Err(err) = backend.submit(&slot.recorder, wait, signal, &slot.fence) {
            // The reset fence would never signal. Swap in a fresh one so the next
            // wait on this slot does not hang.
            slot.fence = self.context.create_fence(true)?;
            slot.state = SlotState::Idle;
            slot.image = None;
            return Err(err);
        }
        slot.state = SlotState::Submitted;
        Ok(())
    }

    /// Present the acquired image once the submitted work signals.
    pub fn present_frame(&mut self) -> Result<PresentStatus> {
        let backend = self.context.backend();
        let slot = &mut self.slots[self.frame_index];
        if slot.state != SlotState::Submitted {
            return Err(Error::invariant("frame", "presented a frame that was not submitted"));
        }
        let image = slot.image.take().ok_or_else(|| {
            Error::invariant("frame", "presented a frame without an acquired image")
        })?;
        backend.present(image, &slot.release_signal)
    }

    /// Keep `value` alive until the current frame has completed on the device.
    pub fn retain<T: Send + 'static>(&mut self, value: T) {
        self.slots[self.frame_index].retained.push(Box::new(value));
    }

    /// Block until the device is idle and mark every submitted frame complete.
    pub fn wait_idle(&mut self) -> Result<()> {
        self.context.backend().wait_idle()?;
        let clock = self.context.clock();
        for slot in self.slots.iter_mut() {
            if slot.state == SlotState::Submitted {
                clock.complete(slot.serial);
                slot.state = SlotState::Idle;
                slot.retained.clear();
            }
        }
        Ok(())
    }
}
