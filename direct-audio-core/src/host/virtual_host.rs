//! In-memory audio host.
//!
//! Devices and streams live entirely in memory, which lets applications and
//! tests exercise the full line stack without audio hardware. Streams either
//! advance when the caller invokes [`VirtualStreamHandle::tick`] or on a
//! clock thread that fires once per period, like an OS audio thread would.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::models::audio_models::{DeviceDescriptor, Direction, StreamFormat};
use crate::models::config::LineConfiguration;
use crate::models::error::AudioError;
use crate::traits::audio_host::{AudioHost, HardwareCallback, HardwareStream, InputSource};

/// How virtual streams advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualClock {
    /// Only on [`VirtualStreamHandle::tick`].
    Manual,
    /// On a dedicated thread, once per period of wall-clock time.
    Realtime,
}

/// Knobs shared between the host and the streams it opened.
#[derive(Debug, Default)]
struct HostControls {
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

/// An [`AudioHost`] backed by memory.
pub struct VirtualHost {
    clock: VirtualClock,
    devices: RwLock<Vec<DeviceDescriptor>>,
    period_frames: Option<u32>,
    capture_failure_after: Option<u64>,
    controls: Arc<HostControls>,
    streams: Mutex<Vec<VirtualStreamHandle>>,
}

impl VirtualHost {
    /// Host with a stereo output, a stereo input and an 8-channel duplex
    /// interface, in that mixer order.
    pub fn new(clock: VirtualClock) -> Self {
        Self::with_devices(clock, Self::default_devices())
    }

    pub fn with_devices(clock: VirtualClock, devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            clock,
            devices: RwLock::new(devices),
            period_frames: None,
            capture_failure_after: None,
            controls: Arc::new(HostControls::default()),
            streams: Mutex::new(Vec::new()),
        }
    }

    pub fn default_devices() -> Vec<DeviceDescriptor> {
        vec![
            virtual_device("virtual-speakers", "Virtual Speakers", 0, 1, 2),
            virtual_device("virtual-microphone", "Virtual Microphone", 1, 0, 2),
            virtual_device("virtual-interface", "Virtual Interface", 1, 1, 8),
        ]
    }

    /// Fix the period instead of deriving it from `LineConfiguration::period_millis`.
    pub fn with_period_frames(mut self, frames: u32) -> Self {
        self.period_frames = Some(frames.max(1));
        self
    }

    /// Capture streams opened afterwards fail every pull after `periods`
    /// successful ones, as if the device had been unplugged.
    pub fn fail_capture_after(mut self, periods: u64) -> Self {
        self.capture_failure_after = Some(periods);
        self
    }

    /// Make `start` fail on every stream of this host.
    pub fn set_start_failure(&self, fail: bool) {
        self.controls.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make `stop` fail on every stream of this host. The stream keeps
    /// running; `close` still stops it.
    pub fn set_stop_failure(&self, fail: bool) {
        self.controls.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn add_device(&self, device: DeviceDescriptor) {
        self.devices.write().push(device);
    }

    pub fn remove_device(&self, id: &str) {
        self.devices.write().retain(|d| d.id != id);
    }

    /// Handles to every stream opened so far, oldest first.
    pub fn streams(&self) -> Vec<VirtualStreamHandle> {
        self.streams.lock().clone()
    }

    pub fn last_stream(&self) -> Option<VirtualStreamHandle> {
        self.streams.lock().last().cloned()
    }
}

impl AudioHost for VirtualHost {
    fn name(&self) -> &str {
        "virtual"
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>, AudioError> {
        Ok(self.devices.read().clone())
    }

    fn open_stream(
        &self,
        device: &DeviceDescriptor,
        direction: Direction,
        format: &StreamFormat,
        config: &LineConfiguration,
    ) -> Result<Box<dyn HardwareStream>, AudioError> {
        let known = self.devices.read().iter().any(|d| d.id == device.id);
        if !known {
            return Err(AudioError::DeviceNotAvailable(device.id.clone()));
        }
        if device.stream_count(direction) == 0 {
            return Err(AudioError::DeviceNotAvailable(format!(
                "{} has no {} streams",
                device.id,
                direction.label()
            )));
        }

        let period_frames = self.period_frames.unwrap_or_else(|| {
            ((format.sample_rate * config.period_millis as f32 / 1000.0) as u32).max(1)
        });

        let core = Arc::new(StreamCore {
            device_id: device.id.clone(),
            direction,
            frame_size: format.frame_size(),
            period_frames,
            period: Duration::from_secs_f64(f64::from(period_frames) / f64::from(format.sample_rate)),
            callback: Mutex::new(None),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            rendered: Mutex::new(Vec::new()),
            input: Mutex::new(RampInput {
                next: 0,
                pulls: 0,
                fail_after: self.capture_failure_after,
            }),
        });
        let handle = VirtualStreamHandle { core };
        self.streams.lock().push(handle.clone());

        log::debug!(
            "virtual stream opened on {} ({}, {} frames/period)",
            device.id,
            direction.label(),
            period_frames
        );

        Ok(Box::new(VirtualStream {
            handle,
            clock: self.clock,
            controls: Arc::clone(&self.controls),
            clock_thread: None,
        }))
    }
}

fn virtual_device(id: &str, name: &str, inputs: u32, outputs: u32, channels: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.into(),
        name: name.into(),
        vendor: "Virtual".into(),
        description: format!("{} (in-memory)", name),
        input_stream_count: inputs,
        output_stream_count: outputs,
        channel_count: channels,
    }
}

/// Deterministic capture data: a byte ramp wrapping at 256.
#[derive(Debug)]
struct RampInput {
    next: u8,
    pulls: u64,
    fail_after: Option<u64>,
}

impl InputSource for RampInput {
    fn pull(&mut self, _frames: u32, dst: &mut [u8]) -> Result<(), AudioError> {
        if self.fail_after.is_some_and(|limit| self.pulls >= limit) {
            return Err(AudioError::HardwareFailure("virtual input exhausted".into()));
        }
        for byte in dst.iter_mut() {
            *byte = self.next;
            self.next = self.next.wrapping_add(1);
        }
        self.pulls += 1;
        Ok(())
    }
}

struct StreamCore {
    device_id: String,
    direction: Direction,
    frame_size: usize,
    period_frames: u32,
    period: Duration,
    callback: Mutex<Option<HardwareCallback>>,
    running: AtomicBool,
    closed: AtomicBool,
    ticks: AtomicU64,
    rendered: Mutex<Vec<u8>>,
    input: Mutex<RampInput>,
}

/// Test-side view of a virtual stream.
#[derive(Clone)]
pub struct VirtualStreamHandle {
    core: Arc<StreamCore>,
}

impl VirtualStreamHandle {
    pub fn device_id(&self) -> &str {
        &self.core.device_id
    }

    pub fn direction(&self) -> Direction {
        self.core.direction
    }

    pub fn period_frames(&self) -> u32 {
        self.core.period_frames
    }

    /// Run one period of the callback, as the OS audio thread would.
    ///
    /// Returns `false` when the stream is not running.
    pub fn tick(&self) -> bool {
        let mut callback = self.core.callback.lock();
        // Checked under the callback lock so `stop` can fence in-flight ticks.
        if !self.core.running.load(Ordering::SeqCst) {
            return false;
        }
        let Some(callback) = callback.as_mut() else {
            return false;
        };

        let frames = self.core.period_frames;
        match callback {
            HardwareCallback::Render(render) => {
                let mut buffer = vec![0u8; frames as usize * self.core.frame_size];
                render(&mut buffer, frames);
                self.core.rendered.lock().extend_from_slice(&buffer);
            }
            HardwareCallback::Capture(capture) => {
                let mut input = self.core.input.lock();
                capture(&mut *input, frames);
            }
        }
        self.core.ticks.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Every byte the render callback produced so far.
    pub fn rendered(&self) -> Vec<u8> {
        self.core.rendered.lock().clone()
    }

    pub fn ticks(&self) -> u64 {
        self.core.ticks.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }
}

struct VirtualStream {
    handle: VirtualStreamHandle,
    clock: VirtualClock,
    controls: Arc<HostControls>,
    clock_thread: Option<thread::JoinHandle<()>>,
}

impl VirtualStream {
    fn halt(&mut self) {
        self.handle.core.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.clock_thread.take() {
            let _ = thread.join();
        }
        // Wait out a tick that was already inside the callback.
        drop(self.handle.core.callback.lock());
    }
}

impl HardwareStream for VirtualStream {
    fn period_frames(&self) -> u32 {
        self.handle.core.period_frames
    }

    fn set_callback(&mut self, callback: HardwareCallback) -> Result<(), AudioError> {
        if callback.direction() != self.handle.core.direction {
            return Err(AudioError::InvalidState(format!(
                "{} callback on a {} stream",
                callback.direction().label(),
                self.handle.core.direction.label()
            )));
        }
        *self.handle.core.callback.lock() = Some(callback);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        let core = &self.handle.core;
        if core.closed.load(Ordering::SeqCst) {
            return Err(AudioError::InvalidState("stream is closed".into()));
        }
        if self.controls.fail_start.load(Ordering::SeqCst) {
            return Err(AudioError::HardwareFailure(format!("{} refused to start", core.device_id)));
        }
        if core.callback.lock().is_none() {
            return Err(AudioError::InvalidState("no callback installed".into()));
        }
        if core.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if self.clock == VirtualClock::Realtime {
            let handle = self.handle.clone();
            let thread = thread::Builder::new()
                .name("virtual-audio-clock".into())
                .spawn(move || {
                    while handle.is_running() {
                        thread::sleep(handle.core.period);
                        handle.tick();
                    }
                })
                .map_err(|e| {
                    core.running.store(false, Ordering::SeqCst);
                    AudioError::HardwareFailure(format!("failed to spawn clock thread: {}", e))
                })?;
            self.clock_thread = Some(thread);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if self.controls.fail_stop.load(Ordering::SeqCst) {
            return Err(AudioError::HardwareFailure(format!(
                "{} refused to stop",
                self.handle.core.device_id
            )));
        }
        self.halt();
        Ok(())
    }

    fn close(&mut self) {
        if self.handle.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.halt();
        self.handle.core.callback.lock().take();
        log::debug!("virtual stream on {} closed", self.handle.core.device_id);
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.close();
    }
}
