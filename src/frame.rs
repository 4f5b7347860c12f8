//! Ring of frame-in-flight slots.
//!
//! Each slot owns a command buffer, a fence and the two semaphores that order
//! presentation. A slot is handed out again only after the fence of its
//! previous submission signalled, which [`ActiveFrame`] witnesses: the token
//! can only be obtained from [`FrameRing::acquire`].

use std::time::Duration;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::resources::Owned;

/// Counters of one recorded frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub draw_calls: u32,
    pub dispatches: u32,
    pub passes: u32,
}

#[derive(Debug)]
struct FrameSlot {
    command_buffer: Owned<CommandBufferHandle>,
    fence: Owned<FenceHandle>,
    image_available: Owned<SemaphoreHandle>,
    render_complete: Owned<SemaphoreHandle>,
}

/// Proof that a slot's previous submission finished and its command buffer
/// is recording.
#[derive(Debug)]
pub struct ActiveFrame {
    slot: usize,
    number: u64,
    command_buffer: CommandBufferHandle,
    fence: FenceHandle,
    image_available: SemaphoreHandle,
    render_complete: SemaphoreHandle,
}

impl ActiveFrame {
    /// Index of the slot in the ring.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Frames acquired before this one.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Signalled when the acquired swapchain image may be written.
    pub fn image_available(&self) -> SemaphoreHandle {
        self.image_available
    }

    /// Signalled when the frame's commands finished, waited on by present.
    pub fn render_complete(&self) -> SemaphoreHandle {
        self.render_complete
    }
}

/// Fixed ring of frame slots, used round-robin.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    next: usize,
    frames: u64,
    timeout: Duration,
    recording: bool,
}

impl FrameRing {
    /// Create `count` slots whose fences start signalled.
    pub fn new<D: RenderDevice>(
        ctx: &mut GpuContext<D>,
        count: usize,
        timeout: Duration,
    ) -> RenderResult<Self> {
        if count == 0 {
            return Err(RenderError::InvalidConfig(
                "a frame ring needs at least one slot".into(),
            ));
        }
        let slots = (0..count)
            .map(|_| {
                let device = ctx.device_mut();
                let command_buffer = device.create_command_buffer()?;
                let fence = device.create_fence(true)?;
                let image_available = device.create_semaphore()?;
                let render_complete = device.create_semaphore()?;
                Ok(FrameSlot {
                    command_buffer: ctx.own(command_buffer),
                    fence: ctx.own(fence),
                    image_available: ctx.own(image_available),
                    render_complete: ctx.own(render_complete),
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            slots,
            next: 0,
            frames: 0,
            timeout,
            recording: false,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames acquired so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Whether a frame is between `acquire` and `submit`.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Wait for the next slot, release what it kept alive and open its
    /// command buffer.
    ///
    /// Fails with [`RenderError::FenceTimeout`] when the GPU did not finish
    /// the slot's previous frame in time.
    pub fn acquire<D: RenderDevice>(&mut self, ctx: &mut GpuContext<D>) -> RenderResult<ActiveFrame> {
        if self.recording {
            return Err(RenderError::InvalidState(
                "previous frame was not submitted".into(),
            ));
        }
        let index = self.next;
        let slot = &self.slots[index];
        let frame = ActiveFrame {
            slot: index,
            number: self.frames,
            command_buffer: slot.command_buffer.handle(),
            fence: slot.fence.handle(),
            image_available: slot.image_available.handle(),
            render_complete: slot.render_complete.handle(),
        };

        let device = ctx.device_mut();
        device.wait_fence(frame.fence, self.timeout)?;
        device.reset_fence(frame.fence)?;
        ctx.retire_frame();
        ctx.device_mut().begin_commands(frame.command_buffer)?;

        log::trace!("Frame {} recording in slot {index}", self.frames);
        self.next = (index + 1) % self.slots.len();
        self.frames += 1;
        self.recording = true;
        Ok(frame)
    }

    /// Close the frame's command buffer and submit it with the slot fence.
    ///
    /// With `presenting`, the submission waits for the acquired swapchain
    /// image and signals the frame's render-complete semaphore.
    pub fn submit<D: RenderDevice>(
        &mut self,
        device: &mut D,
        frame: ActiveFrame,
        presenting: bool,
    ) -> RenderResult<()> {
        self.recording = false;
        device.end_commands()?;
        let result = device.submit(&SubmitInfo {
            command_buffer: frame.command_buffer,
            wait: presenting.then_some(frame.image_available),
            signal: presenting.then_some(frame.render_complete),
            fence: Some(frame.fence),
        });
        if let Err(e) = &result {
            log::error!("Frame {} submission failed: {e}", frame.number);
        }
        result
    }

    /// Block until every slot's last submission finished.
    pub fn wait_all<D: RenderDevice>(&self, device: &mut D) -> RenderResult<()> {
        for slot in &self.slots {
            device.wait_fence(slot.fence.handle(), self.timeout)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn ring(ctx: &mut GpuContext<DummyDevice>) -> FrameRing {
        FrameRing::new(ctx, 3, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_slots_rotate() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut frames = ring(&mut ctx);

        let mut slots = Vec::new();
        for _ in 0..5 {
            let frame = frames.acquire(&mut ctx).unwrap();
            slots.push(frame.slot());
            frames.submit(ctx.device_mut(), frame, false).unwrap();
        }
        assert_eq!(slots, [0, 1, 2, 0, 1]);
        assert_eq!(frames.frame_count(), 5);
        assert!(ctx.device().validation_errors().is_empty());
    }

    #[test]
    fn test_acquire_requires_submit() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut frames = ring(&mut ctx);
        let _frame = frames.acquire(&mut ctx).unwrap();
        assert!(matches!(
            frames.acquire(&mut ctx),
            Err(RenderError::InvalidState(_))
        ));
    }

    #[test]
    fn test_stalled_gpu_times_out_on_reuse() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        let mut frames = ring(&mut ctx);
        ctx.device_mut().set_stalled(true);

        // Every slot starts signalled, so the first lap succeeds.
        for _ in 0..3 {
            let frame = frames.acquire(&mut ctx).unwrap();
            frames.submit(ctx.device_mut(), frame, false).unwrap();
        }
        let err = frames.acquire(&mut ctx).unwrap_err();
        assert_eq!(err, RenderError::FenceTimeout(Duration::from_secs(1)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_empty_ring_is_rejected() {
        let mut ctx = GpuContext::new(DummyDevice::new(), 3).unwrap();
        assert!(FrameRing::new(&mut ctx, 0, Duration::from_secs(1)).is_err());
    }
}
