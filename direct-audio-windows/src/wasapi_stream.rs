//! Shared-mode WASAPI stream driving a line's hardware callback.
//!
//! Each stream owns a dedicated thread registered with MMCSS. All COM
//! objects are created and used on that thread only; the `HardwareStream`
//! handle talks to it over a command channel and waits for each reply, so
//! `start` errors surface synchronously and `stop` returns only after the
//! last callback has finished.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use direct_audio_core::models::audio_models::{Direction, StreamFormat};
use direct_audio_core::models::config::LineConfiguration;
use direct_audio_core::models::error::AudioError;
use direct_audio_core::traits::audio_host::{HardwareCallback, HardwareStream, InputSource};

use crate::com::ComScope;
use crate::device_enumerator::DeviceEnumerator;
use crate::error::{Context, WasapiError};
use crate::permissions::require_capture_access;

/// WASAPI buffer duration in 100-nanosecond units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;

type Reply = Sender<std::result::Result<(), AudioError>>;

enum Command {
    Start(Reply),
    Stop(Reply),
    Close,
}

type SharedCallback = Arc<Mutex<Option<HardwareCallback>>>;

pub struct WasapiStream {
    device_id: String,
    direction: Direction,
    period_frames: u32,
    callback: SharedCallback,
    commands: Option<Sender<Command>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WasapiStream {
    /// Spawn the stream thread and wait until the endpoint is initialised
    /// with `format`.
    pub fn open(
        device_id: &str,
        direction: Direction,
        format: &StreamFormat,
        config: &LineConfiguration,
    ) -> std::result::Result<Self, AudioError> {
        let period_frames = ((format.sample_rate * config.period_millis as f32 / 1000.0) as u32).max(1);
        let poll = Duration::from_millis(u64::from(config.period_millis));

        let callback: SharedCallback = Arc::new(Mutex::new(None));
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = {
            let device_id = device_id.to_string();
            let format = *format;
            let callback = Arc::clone(&callback);
            thread::Builder::new()
                .name(format!("wasapi-{}", direction.label()))
                .spawn(move || {
                    stream_thread(&device_id, direction, &format, poll, callback, command_rx, ready_tx)
                })
                .map_err(|e| AudioError::HardwareFailure(format!("failed to spawn stream thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(WasapiError::ThreadGone.into());
            }
        }

        log::debug!("wasapi {} stream ready on {}", direction.label(), device_id);
        Ok(Self {
            device_id: device_id.to_string(),
            direction,
            period_frames,
            callback,
            commands: Some(command_tx),
            thread: Some(thread),
        })
    }

    fn request(&self, make: impl FnOnce(Reply) -> Command) -> std::result::Result<(), AudioError> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| AudioError::InvalidState("stream is closed".into()))?;
        let (reply_tx, reply_rx) = mpsc::channel();
        commands
            .send(make(reply_tx))
            .map_err(|_| AudioError::from(WasapiError::ThreadGone))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::from(WasapiError::ThreadGone))?
    }
}

impl HardwareStream for WasapiStream {
    fn period_frames(&self) -> u32 {
        self.period_frames
    }

    fn set_callback(&mut self, callback: HardwareCallback) -> std::result::Result<(), AudioError> {
        if callback.direction() != self.direction {
            return Err(AudioError::InvalidState(format!(
                "{} callback on a {} stream",
                callback.direction().label(),
                self.direction.label()
            )));
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn start(&mut self) -> std::result::Result<(), AudioError> {
        if self.callback.lock().is_none() {
            return Err(AudioError::InvalidState("no callback installed".into()));
        }
        self.request(Command::Start)
    }

    fn stop(&mut self) -> std::result::Result<(), AudioError> {
        self.request(Command::Stop)
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            log::debug!("wasapi stream on {} closed", self.device_id);
        }
        self.callback.lock().take();
    }
}

impl Drop for WasapiStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Endpoint client for one direction.
enum Client {
    Render {
        audio: IAudioClient,
        render: IAudioRenderClient,
        buffer_frames: u32,
    },
    Capture {
        audio: IAudioClient,
        capture: IAudioCaptureClient,
    },
}

impl Client {
    fn audio(&self) -> &IAudioClient {
        match self {
            Self::Render { audio, .. } | Self::Capture { audio, .. } => audio,
        }
    }
}

/// Stream thread body.
///
/// Sequence:
/// 1. CoInitializeEx (MTA)
/// 2. Resolve the endpoint, check microphone access for capture
/// 3. Activate IAudioClient, initialise in shared mode with the line format
/// 4. Get the render or capture service
/// 5. Register with MMCSS, report readiness
/// 6. Serve commands; while running, service the endpoint buffer every poll
fn stream_thread(
    device_id: &str,
    direction: Direction,
    format: &StreamFormat,
    poll: Duration,
    callback: SharedCallback,
    commands: Receiver<Command>,
    ready: Sender<std::result::Result<(), AudioError>>,
) {
    let _com = match ComScope::enter() {
        Ok(com) => com,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let client = match unsafe { open_client(device_id, direction, format) } {
        Ok(client) => client,
        Err(e) => {
            log::error!("wasapi {} open on {} failed: {}", direction.label(), device_id, e);
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    let mut task_index: u32 = 0;
    let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
    let mmcss = unsafe { AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index) };
    if let Err(e) = &mmcss {
        log::warn!("MMCSS registration failed, running at normal priority: {}", e);
    }

    if ready.send(Ok(())).is_err() {
        return;
    }

    let frame_size = format.frame_size();
    let mut running = false;

    loop {
        let command = if running {
            match commands.recv_timeout(poll) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(Command::Close),
            }
        } else {
            Some(commands.recv().unwrap_or(Command::Close))
        };

        match command {
            Some(Command::Start(reply)) => {
                let result = if running {
                    Ok(())
                } else {
                    unsafe { client.audio().Start() }.context("IAudioClient::Start").map_err(AudioError::from)
                };
                running = result.is_ok();
                let _ = reply.send(result);
            }
            Some(Command::Stop(reply)) => {
                let result = if running {
                    unsafe { client.audio().Stop() }.context("IAudioClient::Stop").map_err(AudioError::from)
                } else {
                    Ok(())
                };
                running = false;
                let _ = reply.send(result);
            }
            Some(Command::Close) => break,
            None => {}
        }

        if running {
            if let Err(e) = unsafe { service(&client, frame_size, &callback) } {
                // Keep the thread alive for stop/close. A capture line sees
                // the failure through a failed pull and drains.
                log::error!("wasapi {} stream on {} failed: {}", direction.label(), device_id, e);
                fail_capture(&callback);
                let _ = unsafe { client.audio().Stop() };
                running = false;
            }
        }
    }

    if running {
        let _ = unsafe { client.audio().Stop() };
    }
    if let Ok(handle) = mmcss {
        let _ = unsafe { AvRevertMmThreadCharacteristics(handle) };
    }
}

unsafe fn open_client(
    device_id: &str,
    direction: Direction,
    format: &StreamFormat,
) -> std::result::Result<Client, WasapiError> {
    let enumerator = DeviceEnumerator::new()?;
    let device = enumerator.device(device_id)?;
    if direction == Direction::Target {
        require_capture_access(&device)?;
    }

    let audio: IAudioClient = device.Activate(CLSCTX_ALL, None).context("Activate")?;

    let wave_format = pcm_wave_format(format);
    audio
        .Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
            BUFFER_DURATION,
            0,
            &wave_format,
            None,
        )
        .context("IAudioClient::Initialize")?;

    Ok(match direction {
        Direction::Source => {
            let buffer_frames = audio.GetBufferSize().context("GetBufferSize")?;
            let render: IAudioRenderClient = audio.GetService().context("GetService")?;
            Client::Render {
                audio,
                render,
                buffer_frames,
            }
        }
        Direction::Target => {
            let capture: IAudioCaptureClient = audio.GetService().context("GetService")?;
            Client::Capture { audio, capture }
        }
    })
}

fn pcm_wave_format(format: &StreamFormat) -> WAVEFORMATEX {
    let rate = format.sample_rate as u32;
    WAVEFORMATEX {
        wFormatTag: WAVE_FORMAT_PCM as u16,
        nChannels: format.channels,
        nSamplesPerSec: rate,
        nAvgBytesPerSec: rate * u32::from(format.frame_size),
        nBlockAlign: format.frame_size,
        wBitsPerSample: format.sample_size_bits,
        cbSize: 0,
    }
}

/// Move one poll's worth of data between the endpoint buffer and the
/// line's callback.
unsafe fn service(
    client: &Client,
    frame_size: usize,
    callback: &SharedCallback,
) -> std::result::Result<(), WasapiError> {
    let mut callback = callback.lock();

    match (client, callback.as_mut()) {
        (
            Client::Render {
                audio,
                render,
                buffer_frames,
            },
            Some(HardwareCallback::Render(render_callback)),
        ) => {
            let padding = audio.GetCurrentPadding().context("GetCurrentPadding")?;
            let frames = buffer_frames.saturating_sub(padding);
            if frames == 0 {
                return Ok(());
            }
            let data = render.GetBuffer(frames).context("IAudioRenderClient::GetBuffer")?;
            let out = std::slice::from_raw_parts_mut(data, frames as usize * frame_size);
            render_callback(out, frames);
            render.ReleaseBuffer(frames, 0).context("IAudioRenderClient::ReleaseBuffer")?;
        }
        (Client::Capture { capture, .. }, Some(HardwareCallback::Capture(capture_callback))) => {
            let mut packet_length = capture.GetNextPacketSize().context("GetNextPacketSize")?;
            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                capture
                    .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)
                    .context("IAudioCaptureClient::GetBuffer")?;

                if num_frames > 0 && !buffer_ptr.is_null() {
                    let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
                    let data = std::slice::from_raw_parts(buffer_ptr, num_frames as usize * frame_size);
                    let mut packet = Packet { data, silent };
                    capture_callback(&mut packet as &mut dyn InputSource, num_frames);
                }

                capture
                    .ReleaseBuffer(num_frames)
                    .context("IAudioCaptureClient::ReleaseBuffer")?;
                packet_length = capture.GetNextPacketSize().context("GetNextPacketSize")?;
            }
        }
        // No matching callback installed: leave the endpoint buffer alone.
        _ => {}
    }
    Ok(())
}

/// Tell a capture callback the endpoint is gone by handing it a failing pull.
fn fail_capture(callback: &SharedCallback) {
    if let Some(HardwareCallback::Capture(capture)) = callback.lock().as_mut() {
        capture(&mut Lost as &mut dyn InputSource, 0);
    }
}

/// One captured endpoint packet.
struct Packet<'a> {
    data: &'a [u8],
    silent: bool,
}

impl InputSource for Packet<'_> {
    fn pull(&mut self, _frames: u32, dst: &mut [u8]) -> std::result::Result<(), AudioError> {
        let len = dst.len().min(self.data.len());
        if self.silent {
            dst.fill(0);
        } else {
            dst[..len].copy_from_slice(&self.data[..len]);
            dst[len..].fill(0);
        }
        Ok(())
    }
}

struct Lost;

impl InputSource for Lost {
    fn pull(&mut self, _frames: u32, _dst: &mut [u8]) -> std::result::Result<(), AudioError> {
        Err(AudioError::DeviceNotAvailable("audio endpoint stopped delivering data".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_format_matches_line_format() {
        let wave = pcm_wave_format(&StreamFormat::pcm16(44100.0, 2));
        // WAVEFORMATEX is packed; copy fields out before comparing.
        let (tag, channels, rate) = (wave.wFormatTag, wave.nChannels, wave.nSamplesPerSec);
        let (align, bytes_per_second, bits) = (wave.nBlockAlign, wave.nAvgBytesPerSec, wave.wBitsPerSample);
        assert_eq!(tag, 1);
        assert_eq!(channels, 2);
        assert_eq!(rate, 44100);
        assert_eq!(align, 4);
        assert_eq!(bytes_per_second, 176_400);
        assert_eq!(bits, 16);
    }

    #[test]
    fn packet_copies_or_silences() {
        let data = [1u8, 2, 3, 4];
        let mut dst = [9u8; 6];
        Packet { data: &data, silent: false }.pull(1, &mut dst).unwrap();
        assert_eq!(dst, [1, 2, 3, 4, 0, 0]);

        Packet { data: &data, silent: true }.pull(1, &mut dst).unwrap();
        assert_eq!(dst, [0; 6]);
    }

    #[test]
    fn lost_endpoint_fails_pull() {
        assert!(Lost.pull(1, &mut [0u8; 4]).is_err());
    }
}
