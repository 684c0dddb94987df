use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::models::audio_models::Direction;
use crate::session::shared::SharedLine;
use crate::traits::audio_host::{HardwareCallback, InputSource};

/// Adapts frame-count hardware callbacks to byte-oriented ring operations.
///
/// Runs on the host's real-time thread. Nothing here blocks beyond the ring's
/// O(1) bookkeeping, and errors never propagate to the host: an underrun
/// becomes silence, an overrun loses the oldest data, and a failed pull marks
/// the line as draining.
pub struct HardwareCallbackAdapter {
    line: Arc<SharedLine>,
    frame_size: usize,
    scratch: Vec<u8>,
}

impl HardwareCallbackAdapter {
    pub(crate) fn new(line: Arc<SharedLine>, frame_size: usize, period_frames: u32) -> Self {
        Self {
            line,
            frame_size,
            scratch: vec![0; frame_size * period_frames as usize],
        }
    }

    /// Playback: fill `out` with `frames` frames from the ring.
    ///
    /// Whatever the ring cannot supply is zero-filled, as is any part of
    /// `out` beyond the requested frames. All frames count as delivered.
    pub fn render(&mut self, out: &mut [u8], frames: u32) {
        self.line.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        let wanted = (frames as usize * self.frame_size).min(out.len());
        let read = self.line.ring.read(&mut out[..wanted]);
        if read < wanted {
            self.line
                .counters
                .underrun_bytes
                .fetch_add((wanted - read) as u64, Ordering::Relaxed);
        }
        out[read..].fill(0);
    }

    /// Capture: pull `frames` frames from the hardware and push them into the
    /// ring, overwriting unread data if the client has fallen behind.
    pub fn capture(&mut self, input: &mut dyn InputSource, frames: u32) {
        self.line.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        let wanted = frames as usize * self.frame_size;
        if self.scratch.len() < wanted {
            // Host delivered a longer period than it advertised.
            self.scratch.resize(wanted, 0);
        }

        if let Err(e) = input.pull(frames, &mut self.scratch[..wanted]) {
            self.line.counters.pull_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("capture pull failed, draining line: {}", e);
            self.line.set_draining(true);
            return;
        }

        let free = self.line.ring.free_byte_count();
        if wanted > free {
            self.line
                .counters
                .overrun_bytes
                .fetch_add((wanted - free) as u64, Ordering::Relaxed);
        }
        self.line.ring.write(&self.scratch[..wanted], false);
        self.line.notify();
    }

    /// Box the adapter as the callback matching `direction`.
    pub fn into_callback(mut self, direction: Direction) -> HardwareCallback {
        match direction {
            Direction::Source => HardwareCallback::Render(Box::new(move |out: &mut [u8], frames: u32| {
                self.render(out, frames)
            })),
            Direction::Target => HardwareCallback::Capture(Box::new(
                move |input: &mut dyn InputSource, frames: u32| self.capture(input, frames),
            )),
        }
    }
}
