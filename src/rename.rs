//! A ring of per-draw constant buffers.
//!
//! Writing per-draw constants into a single buffer would overwrite data that frames
//! still in flight are reading. Instead every draw takes the next buffer from a
//! [`RenamePool`]. Each slot remembers the serial of the frame that last used it and
//! is only handed out again once that frame has completed. When the ring runs dry
//! (many draws in one frame, or a slow device) it grows rather than overwrite a
//! buffer in use.
use crate::{Error, Result, context::FrameClock};

struct RenameSlot<T> {
    value: T,
    last_used: u64,
}

pub struct RenamePool<T> {
    slots: Vec<RenameSlot<T>>,
    cursor: usize,
    clock: FrameClock,
    factory: Box<dyn FnMut() -> Result<T> + Send>,
}

impl<T> RenamePool<T> {
    /// Preallocate `ring_size` values. `ring_size` must exceed `frames_in_flight`.
    pub fn new(
        ring_size: usize,
        frames_in_flight: usize,
        clock: FrameClock,
        mut factory: impl FnMut() -> Result<T> + Send + 'static,
    ) -> Result<Self> {
        if ring_size <= frames_in_flight {
            return Err(Error::InvalidConfig(format!(
                "renaming ring of {ring_size} cannot cover {frames_in_flight} frames in flight"
            )));
        }
        let slots = (0..ring_size)
            .map(|_| {
                Ok(RenameSlot {
                    value: factory()?,
                    last_used: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            slots,
            cursor: 0,
            clock,
            factory: Box::new(factory),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The next value, round robin. The caller writes it and issues one draw before
    /// asking again.
    pub fn next(&mut self) -> Result<&T> {
        let serial = self.clock.recording();
        let index = self.cursor % self.slots.len();
        if !self.clock.is_complete(self.slots[index].last_used) {
            let value = (self.factory)()?;
            self.slots.insert(
                index,
                RenameSlot {
                    value,
                    last_used: serial,
                },
            );
            tracing::warn!(ring = self.slots.len(), serial, "renaming ring exhausted, growing");
        } else {
            self.slots[index].last_used = serial;
        }
        self.cursor = index + 1;
        Ok(&self.slots[index].value)
    }
}
