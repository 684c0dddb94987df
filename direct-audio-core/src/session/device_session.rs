use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::{DeviceDescriptor, Direction, LineDiagnostics, StreamFormat};
use crate::models::config::LineConfiguration;
use crate::models::error::AudioError;
use crate::models::state::LineState;
use crate::processing::callback::HardwareCallbackAdapter;
use crate::processing::ring_buffer::RingBuffer;
use crate::session::shared::SharedLine;
use crate::traits::audio_host::{AudioHost, HardwareStream};

/// One open line: a hardware stream, its ring buffer and its fixed format.
///
/// Data flow:
/// ```text
/// source: client write → [RingBuffer] → render callback → hardware
/// target: hardware → capture callback → [RingBuffer] → client read
/// ```
///
/// All methods take `&self` so a second client thread can `stop` or `close`
/// a line while another is blocked in `read`. Locks are always taken in the
/// order state → stream → line.
pub struct DeviceSession {
    id: Uuid,
    device_id: String,
    direction: Direction,
    format: StreamFormat,
    capacity: usize,
    opened_at: DateTime<Utc>,
    read_wait_timeout: Option<Duration>,
    state: Mutex<LineState>,
    stream: Mutex<Option<Box<dyn HardwareStream>>>,
    line: Mutex<Option<Arc<SharedLine>>>,
    last_position: AtomicI64,
}

impl DeviceSession {
    /// Acquire the device, allocate the ring and install the callback.
    ///
    /// A `buffer_size_bytes` of 0 selects the configured default duration.
    /// The size is rounded down to whole frames. Capture lines get
    /// `capture_slack_periods` hardware periods of extra ring space. If any
    /// step fails the stream is closed before the error is returned.
    pub fn open(
        host: &dyn AudioHost,
        device: &DeviceDescriptor,
        direction: Direction,
        format: StreamFormat,
        buffer_size_bytes: usize,
        config: &LineConfiguration,
    ) -> Result<Self, AudioError> {
        format.validate()?;

        let requested = if buffer_size_bytes == 0 {
            format.millis_to_bytes(config.default_buffer_millis)
        } else {
            buffer_size_bytes
        };
        let capacity = format.frames_to_bytes(format.bytes_to_frames(requested));
        if capacity == 0 {
            return Err(AudioError::AllocationFailed(format!(
                "buffer of {} bytes holds no {}-byte frame",
                requested, format.frame_size
            )));
        }

        let mut stream = host.open_stream(device, direction, &format, config)?;

        let line = match Self::install(stream.as_mut(), direction, &format, capacity, config) {
            Ok(line) => line,
            Err(e) => {
                log::error!("open {} line on {} failed: {}", direction.label(), device.id, e);
                stream.close();
                return Err(e);
            }
        };

        let session = Self {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            direction,
            format,
            capacity,
            opened_at: Utc::now(),
            read_wait_timeout: config.read_wait_timeout(),
            state: Mutex::new(LineState::Open),
            stream: Mutex::new(Some(stream)),
            line: Mutex::new(Some(line)),
            last_position: AtomicI64::new(i64::MIN),
        };

        log::info!(
            "line {} opened: {} on {} ({} Hz, {} ch, {} bits), buffer {} bytes via {}",
            session.id,
            direction.label(),
            device.id,
            format.sample_rate,
            format.channels,
            format.sample_size_bits,
            capacity,
            host.name()
        );
        Ok(session)
    }

    fn install(
        stream: &mut dyn HardwareStream,
        direction: Direction,
        format: &StreamFormat,
        capacity: usize,
        config: &LineConfiguration,
    ) -> Result<Arc<SharedLine>, AudioError> {
        let period_frames = stream.period_frames();
        let extra = match direction {
            Direction::Source => 0,
            Direction::Target => {
                format.frames_to_bytes(period_frames as usize) * config.capture_slack_periods as usize
            }
        };

        let ring = RingBuffer::allocate(capacity, extra)?;
        // Nothing produces data until `start`, so a read must not wait.
        let line = Arc::new(SharedLine::new(ring, true));

        let adapter = HardwareCallbackAdapter::new(Arc::clone(&line), format.frame_size(), period_frames);
        stream.set_callback(adapter.into_callback(direction))?;
        Ok(line)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn state(&self) -> LineState {
        *self.state.lock()
    }

    /// Enable hardware callback delivery. Starting a started line is a no-op.
    pub fn start(&self) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        if state.is_started() {
            return Ok(());
        }
        if !state.can_start() {
            return Err(AudioError::InvalidState(format!("cannot start a {:?} line", *state)));
        }

        let line = self.line()?;
        line.set_draining(false);

        let mut stream = self.stream.lock();
        let stream = stream
            .as_mut()
            .ok_or_else(|| AudioError::InvalidState("line has no stream".into()))?;
        if let Err(e) = stream.start() {
            log::error!("line {} start failed: {}", self.id, e);
            line.set_draining(true);
            return Err(e);
        }

        *state = LineState::Started;
        log::debug!("line {} started", self.id);
        Ok(())
    }

    /// Disable hardware callback delivery. A stopped capture line drains:
    /// blocked readers wake and get whatever is buffered.
    pub fn stop(&self) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        match *state {
            LineState::Started => {}
            LineState::Open | LineState::Stopped => return Ok(()),
            LineState::Closed => return Err(AudioError::InvalidState("line is closed".into())),
        }

        let stopped = match self.stream.lock().as_mut() {
            Some(stream) => stream.stop(),
            None => Ok(()),
        };
        // Blocked readers wake even when the hardware refuses to stop.
        if self.direction == Direction::Target {
            self.line()?.set_draining(true);
        }
        if let Err(e) = stopped {
            log::error!("line {} stop failed: {}", self.id, e);
            return Err(e);
        }

        *state = LineState::Stopped;
        log::debug!("line {} stopped", self.id);
        Ok(())
    }

    /// Queue bytes for playback. Accepts at most the free space; the caller
    /// retries with the remainder.
    pub fn write(&self, data: &[u8]) -> Result<usize, AudioError> {
        self.require(Direction::Source)?;
        let written = self.line()?.ring.write(data, true);
        log::trace!("line {} write {}/{} bytes", self.id, written, data.len());
        Ok(written)
    }

    /// Read captured bytes, blocking until `buf` can be filled (up to the
    /// buffer capacity), the line drains, or the configured wait times out.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, AudioError> {
        self.require(Direction::Target)?;
        let line = self.line()?;

        line.wait_for_data(buf.len().min(self.capacity), self.read_wait_timeout);

        let read = line.ring.read(buf);
        log::trace!("line {} read {}/{} bytes", self.id, read, buf.len());
        Ok(read)
    }

    /// Logical ring capacity in bytes.
    pub fn buffer_size(&self) -> usize {
        self.capacity
    }

    /// Free space for a source line, buffered bytes for a target line.
    pub fn available(&self) -> Result<usize, AudioError> {
        let line = self.line()?;
        Ok(match self.direction {
            Direction::Source => line.ring.free_byte_count(),
            Direction::Target => line.ring.valid_byte_count(),
        })
    }

    /// Hardware-relative byte position derived from the caller's count of
    /// bytes written (source) or read (target).
    ///
    /// Source lines report `reference - buffered`, target lines
    /// `reference + buffered`. Results never decrease, even across flushes.
    pub fn byte_position(&self, reference: i64) -> Result<i64, AudioError> {
        let valid = self.line()?.ring.valid_byte_count() as i64;
        let position = match self.direction {
            Direction::Source => reference - valid,
            Direction::Target => reference + valid,
        };
        let previous = self.last_position.fetch_max(position, Ordering::AcqRel);
        Ok(previous.max(position))
    }

    /// Position is derived from the ring, so it cannot be set.
    pub fn set_byte_position(&self, position: i64) {
        log::trace!("line {} ignoring set_byte_position({})", self.id, position);
    }

    /// Source: started with unplayed bytes left. Target: the capture side
    /// has not drained yet.
    pub fn is_still_draining(&self) -> Result<bool, AudioError> {
        let started = self.state().is_started();
        let line = self.line()?;
        Ok(match self.direction {
            Direction::Source => started && line.ring.valid_byte_count() > 0,
            Direction::Target => !line.is_draining(),
        })
    }

    /// Discard buffered data. Safe while the callback is running.
    ///
    /// Returns the number of bytes discarded.
    pub fn flush(&self) -> Result<usize, AudioError> {
        let line = self.line()?;
        let discarded = line.ring.flush();
        line.counters.flushes.fetch_add(1, Ordering::Relaxed);
        log::debug!("line {} flushed {} bytes", self.id, discarded);
        Ok(discarded)
    }

    pub fn diagnostics(&self) -> Result<LineDiagnostics, AudioError> {
        let line = self.line()?;
        let counters = &line.counters;
        Ok(LineDiagnostics {
            session_id: self.id,
            direction: self.direction,
            opened_at: self.opened_at,
            callback_count: counters.callbacks.load(Ordering::Relaxed),
            underrun_bytes: counters.underrun_bytes.load(Ordering::Relaxed),
            overrun_bytes: counters.overrun_bytes.load(Ordering::Relaxed),
            pull_failures: counters.pull_failures.load(Ordering::Relaxed),
            flush_count: counters.flushes.load(Ordering::Relaxed),
            buffered_bytes: line.ring.valid_byte_count(),
        })
    }

    /// Close the line. Idempotent.
    ///
    /// The stream is closed first, so no callback is in flight or can start
    /// when the ring buffer is released. Blocked readers are woken.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.is_closed() {
            return;
        }

        if let Some(mut stream) = self.stream.lock().take() {
            stream.close();
        }
        *state = LineState::Closed;

        if let Some(line) = self.line.lock().take() {
            line.set_draining(true);
            match Arc::try_unwrap(line) {
                Ok(line) => line.ring.deallocate(),
                // A reader still holds the line; it is freed when that read returns.
                Err(_) => log::debug!("line {} ring release deferred to pending reader", self.id),
            }
        }

        log::info!("line {} closed", self.id);
    }

    fn line(&self) -> Result<Arc<SharedLine>, AudioError> {
        self.line
            .lock()
            .clone()
            .ok_or_else(|| AudioError::InvalidState("line is closed".into()))
    }

    fn require(&self, direction: Direction) -> Result<(), AudioError> {
        if self.direction == direction {
            Ok(())
        } else {
            Err(AudioError::WrongDirection(direction.label()))
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
