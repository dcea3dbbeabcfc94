use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::device::backend::{
    BufferReadySignal, DeviceBackend, DeviceClient, Direction,
};
use crate::models::config::DuplexConfig;
use crate::models::error::AudioError;
use crate::models::format::SampleFormat;
use crate::models::state::SessionState;
use crate::session::observer::SessionObserver;

/// Pipeline-side receiver for the device capture thread.
///
/// `on_captured` runs on the real-time capture loop; it must not block on
/// anything slower than a short buffer lock.
pub trait CaptureHandler: Send + Sync {
    fn on_captured(&self, bytes: &[u8], format: &SampleFormat, silent: bool);

    /// The hardware stream fully stopped; buffers may be cleared.
    fn on_stopped(&self) {}
}

/// Pipeline-side producer for the device render thread.
///
/// `fill` runs on the real-time render loop with the same blocking rules as
/// `CaptureHandler::on_captured`. It returns the bytes written, always a
/// whole number of frames.
pub trait RenderSource: Send + Sync {
    fn fill(&self, dest: &mut [u8], format: &SampleFormat) -> usize;

    /// The hardware stream fully stopped; buffers may be cleared.
    fn on_stopped(&self) {}
}

/// The pipeline end a session feeds or drains.
pub enum SessionIo {
    Capture(Arc<dyn CaptureHandler>),
    Render(Arc<dyn RenderSource>),
}

/// Per-session knobs, normally derived from [`DuplexConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub desired_format: SampleFormat,
    pub device_buffer: Duration,
    pub drain_grace: Duration,
    pub preferred_device_class: Option<String>,
}

impl SessionOptions {
    pub fn from_config(config: &DuplexConfig) -> Self {
        Self {
            desired_format: config.format,
            device_buffer: config.device_buffer,
            drain_grace: config.drain_grace,
            preferred_device_class: config.preferred_device_class.clone(),
        }
    }
}

/// What a session negotiated with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub format: SampleFormat,
    pub buffer_frames: u32,
    pub latency: Duration,
}

#[derive(Default)]
struct PendingFlags {
    start_pending: bool,
    stop_pending: bool,
}

enum LoopDecision {
    Continue,
    /// A stop and a newer start were both queued: they cancel out and the
    /// loop keeps running.
    CancelStop,
    Exit,
}

/// Drives one hardware audio stream through its lifecycle.
///
/// Owns the state machine, the pending start/stop flag pair, and the loop
/// thread that exchanges buffers with the device. An explicitly owned
/// object: everything it touches is reachable from this handle, there is no
/// process-wide audio state.
///
/// `start()` is asynchronous — endpoint discovery happens inline, but
/// interface activation completes on a backend thread. `stop()` is advisory:
/// it queues a request the loop honors at its next iteration, and a stop
/// followed by a start before teardown completes cancels both, leaving the
/// session running (no device thrash on rapid toggles).
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    direction: Direction,
    backend: Arc<dyn DeviceBackend>,
    io: SessionIo,
    options: SessionOptions,
    observer: Arc<dyn SessionObserver>,
    state: Mutex<SessionState>,
    pending: Mutex<PendingFlags>,
    stream_info: Mutex<Option<StreamInfo>>,
    instance_id: Mutex<Uuid>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    pub fn new(
        direction: Direction,
        backend: Arc<dyn DeviceBackend>,
        io: SessionIo,
        options: SessionOptions,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                direction,
                backend,
                io,
                options,
                observer,
                state: Mutex::new(SessionState::Idle),
                pending: Mutex::new(PendingFlags::default()),
                stream_info: Mutex::new(None),
                instance_id: Mutex::new(Uuid::nil()),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    /// Request the session to run.
    ///
    /// Coalesces with an already running or starting session, cancels a
    /// pending stop, and otherwise kicks off discovery + activation. An
    /// immediate discovery failure is returned; activation failures arrive
    /// through the observer and leave the session `Faulted`.
    pub fn start(&self) -> Result<(), AudioError> {
        SessionInner::start(&self.inner)
    }

    /// Queue a stop request. Asynchronous: hardware goes quiet only once
    /// the machine reaches `Stopped`.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    /// Negotiated stream parameters, available once `Running` was reached.
    pub fn stream_info(&self) -> Option<StreamInfo> {
        *self.inner.stream_info.lock()
    }

    /// Poll until `predicate` holds for the session state or `timeout`
    /// elapses. Returns whether the predicate held.
    pub fn wait_for_state(
        &self,
        predicate: impl Fn(SessionState) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self.state()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl SessionInner {
    fn start(inner: &Arc<SessionInner>) -> Result<(), AudioError> {
        {
            let mut pending = inner.pending.lock();
            let state = *inner.state.lock();
            if state.is_running() || state.is_starting() {
                if pending.stop_pending {
                    // A stop is queued but has not torn anything down yet:
                    // queue the start so the pair cancels out.
                    pending.start_pending = true;
                }
                return Ok(());
            }
            if state.is_stopping() {
                pending.start_pending = true;
                return Ok(());
            }
            pending.start_pending = false;
            pending.stop_pending = false;
        }
        Self::begin_activation(inner)
    }

    fn stop(&self) {
        let mut pending = self.pending.lock();
        pending.start_pending = false;
        let state = *self.state.lock();
        if state.is_running() || state.is_starting() {
            pending.stop_pending = true;
            drop(pending);
            if state.is_running() {
                self.set_state(SessionState::StopRequested);
            }
        }
    }

    fn begin_activation(inner: &Arc<SessionInner>) -> Result<(), AudioError> {
        let endpoint_id = match inner.resolve_endpoint() {
            Ok(id) => id,
            Err(error) => {
                inner.fault(error.clone());
                return Err(error);
            }
        };

        let id = Uuid::new_v4();
        *inner.instance_id.lock() = id;
        inner.set_state(SessionState::Activating);
        log::info!(
            "session {}: activating {} endpoint {}",
            id,
            inner.direction.as_str(),
            endpoint_id
        );

        let completer = Arc::clone(inner);
        inner.backend.activate(
            &endpoint_id,
            inner.direction,
            Box::new(move |result| SessionInner::on_activated(&completer, result)),
        );
        Ok(())
    }

    /// Pick the default endpoint, falling back to a named device class when
    /// the platform reports no default.
    fn resolve_endpoint(&self) -> Result<String, AudioError> {
        if let Some(id) = self.backend.default_endpoint_id(self.direction) {
            return Ok(id);
        }

        if let Some(class) = &self.options.preferred_device_class {
            let endpoints = self.backend.endpoints(self.direction)?;
            if let Some(endpoint) = endpoints.iter().find(|e| e.name.contains(class.as_str())) {
                log::info!(
                    "no default {} endpoint, using {} ({})",
                    self.direction.as_str(),
                    endpoint.name,
                    endpoint.id
                );
                return Ok(endpoint.id.clone());
            }
        }

        log::error!(
            "no usable {} endpoint found, check the sound settings",
            self.direction.as_str()
        );
        Err(AudioError::DeviceNotAvailable)
    }

    /// Activation completion, called from a backend thread.
    fn on_activated(
        inner: &Arc<SessionInner>,
        result: Result<Box<dyn DeviceClient>, AudioError>,
    ) {
        {
            let mut pending = inner.pending.lock();
            if pending.stop_pending && pending.start_pending {
                // Stop and a newer start both arrived mid-activation:
                // cancel out and bring the session up.
                pending.stop_pending = false;
                pending.start_pending = false;
            } else if pending.stop_pending {
                pending.stop_pending = false;
                drop(pending);
                log::info!(
                    "session {}: stop raced activation, abandoning",
                    inner.instance_id.lock()
                );
                inner.set_state(SessionState::Stopped);
                return;
            }
        }

        let mut client = match result {
            Ok(client) => client,
            Err(error) => {
                inner.fault(error);
                return;
            }
        };

        inner.set_state(SessionState::Initializing);
        let (info, signal) = match inner.initialize_client(client.as_mut()) {
            Ok(ready) => ready,
            Err(error) => {
                inner.fault(error);
                return;
            }
        };
        *inner.stream_info.lock() = Some(info);
        inner.set_state(SessionState::Running);

        let runner = Arc::clone(inner);
        let handle = thread::Builder::new()
            .name(format!("audio-{}-loop", inner.direction.as_str()))
            .spawn(move || runner.run_loop(client, info, signal))
            .expect("failed to spawn session loop thread");
        *inner.loop_handle.lock() = Some(handle);
    }

    /// Negotiate the format, set up the stream, and start the hardware.
    fn initialize_client(
        &self,
        client: &mut dyn DeviceClient,
    ) -> Result<(StreamInfo, Arc<BufferReadySignal>), AudioError> {
        let mix = client.mix_format()?;
        let format = negotiate_format(self.direction, &self.options.desired_format, &mix)?;
        client.initialize(&format, self.options.device_buffer)?;

        let signal = Arc::new(BufferReadySignal::new());
        client.register_ready_signal(Arc::clone(&signal))?;

        let buffer_frames = client.buffer_frame_count()?;
        let latency = client.stream_latency()?;
        log::info!(
            "session {}: {} Hz, {} ch, device buffer {} frames, latency {:?}",
            self.instance_id.lock(),
            format.sample_rate_hz,
            format.channels,
            buffer_frames,
            latency
        );

        client.start()?;
        Ok((
            StreamInfo {
                format,
                buffer_frames,
                latency,
            },
            signal,
        ))
    }

    fn run_loop(
        self: Arc<Self>,
        mut client: Box<dyn DeviceClient>,
        info: StreamInfo,
        signal: Arc<BufferReadySignal>,
    ) {
        let result = match self.direction {
            Direction::Capture => self.capture_loop(client.as_mut(), &info, &signal),
            Direction::Render => self.render_loop(client.as_mut(), &info),
        };

        if let Err(error) = result {
            let _ = client.stop();
            self.fault(error);
            return;
        }

        {
            let mut pending = self.pending.lock();
            pending.stop_pending = false;
        }
        self.set_state(SessionState::Stopping);

        // Let a render buffer play out before silencing the stream.
        if matches!(self.direction, Direction::Render) {
            let deadline = Instant::now() + self.options.drain_grace;
            loop {
                match client.current_padding() {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }

        if let Err(error) = client.stop() {
            log::warn!("device stop failed: {}", error);
        }
        if let Err(error) = client.reset() {
            log::warn!("device reset failed: {}", error);
        }
        match &self.io {
            SessionIo::Capture(handler) => handler.on_stopped(),
            SessionIo::Render(source) => source.on_stopped(),
        }
        self.set_state(SessionState::Stopped);

        let restart = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut pending.start_pending)
        };
        if restart {
            if let Err(error) = SessionInner::begin_activation(&self) {
                log::error!("queued restart failed: {}", error);
            }
        }
    }

    fn capture_loop(
        &self,
        client: &mut dyn DeviceClient,
        info: &StreamInfo,
        signal: &BufferReadySignal,
    ) -> Result<(), AudioError> {
        let handler = match &self.io {
            SessionIo::Capture(handler) => Arc::clone(handler),
            SessionIo::Render(_) => {
                return Err(AudioError::InvalidConfiguration(
                    "render io attached to a capture session".into(),
                ))
            }
        };

        let mut capture = client.capture_client()?;
        let mut packet_bytes: Vec<u8> = Vec::new();

        loop {
            match self.loop_decision() {
                LoopDecision::Exit => break,
                LoopDecision::CancelStop => self.set_state(SessionState::Running),
                LoopDecision::Continue => {}
            }

            signal.wait_timeout(Duration::from_secs(1));

            // Drain every packet the device has queued for this wakeup.
            loop {
                let frames = match capture.next_packet_frames() {
                    Ok(frames) => frames,
                    Err(error) if error.is_transient() => {
                        log::warn!("skipping capture cycle: {}", error);
                        break;
                    }
                    Err(error) => return Err(error),
                };
                if frames == 0 {
                    break;
                }

                match capture.read_packet(&mut packet_bytes) {
                    Ok(packet) => handler.on_captured(&packet_bytes, &info.format, packet.silent),
                    Err(error) if error.is_transient() => {
                        log::warn!("skipping capture packet: {}", error);
                        break;
                    }
                    Err(error) => return Err(error),
                }
            }
        }
        Ok(())
    }

    fn render_loop(
        &self,
        client: &mut dyn DeviceClient,
        info: &StreamInfo,
    ) -> Result<(), AudioError> {
        let source = match &self.io {
            SessionIo::Render(source) => Arc::clone(source),
            SessionIo::Capture(_) => {
                return Err(AudioError::InvalidConfiguration(
                    "capture io attached to a render session".into(),
                ))
            }
        };

        let mut render = client.render_client()?;
        let block_align = info.format.block_align() as usize;
        let mut frame_bytes = vec![0u8; info.buffer_frames as usize * block_align];

        loop {
            match self.loop_decision() {
                LoopDecision::Exit => break,
                LoopDecision::CancelStop => self.set_state(SessionState::Running),
                LoopDecision::Continue => {}
            }

            thread::sleep(Duration::from_millis(10));

            let padding = match client.current_padding() {
                Ok(padding) => padding,
                Err(error) if error.is_transient() => {
                    log::warn!("skipping render cycle: {}", error);
                    continue;
                }
                Err(error) => return Err(error),
            };

            let frames_available = info.buffer_frames.saturating_sub(padding);
            if frames_available == 0 {
                continue;
            }

            let dest = &mut frame_bytes[..frames_available as usize * block_align];
            let filled = source.fill(dest, &info.format);
            if filled == 0 {
                continue;
            }

            let frames = (filled / block_align) as u32;
            if let Err(error) = render.submit(frames, &dest[..filled]) {
                if error.is_transient() {
                    log::warn!("skipping render submit: {}", error);
                } else {
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn loop_decision(&self) -> LoopDecision {
        let mut pending = self.pending.lock();
        if pending.stop_pending && pending.start_pending {
            pending.stop_pending = false;
            pending.start_pending = false;
            LoopDecision::CancelStop
        } else if pending.stop_pending {
            LoopDecision::Exit
        } else {
            LoopDecision::Continue
        }
    }

    fn set_state(&self, state: SessionState) {
        {
            *self.state.lock() = state;
        }
        log::debug!(
            "session {}: {:?}",
            self.instance_id.lock(),
            state
        );
        self.observer.on_state_changed(state);
    }

    fn fault(&self, error: AudioError) {
        log::error!("session {}: {}", self.instance_id.lock(), error);
        {
            let mut pending = self.pending.lock();
            pending.start_pending = false;
            pending.stop_pending = false;
        }
        self.set_state(SessionState::Faulted);
        self.observer.on_fault(&error);
    }
}

/// Check the device mix format against what the session needs.
///
/// Capture accepts whatever float format the device mixes at (the pipeline
/// downmixes); render requires a stereo float mix, which is what the
/// spatialization stage produces.
fn negotiate_format(
    direction: Direction,
    desired: &SampleFormat,
    mix: &SampleFormat,
) -> Result<SampleFormat, AudioError> {
    if mix.validate().is_err() || !mix.is_float || mix.bits_per_sample != 32 {
        return Err(AudioError::FormatRejected(format!(
            "need 32-bit float, device offers {}-bit {}",
            mix.bits_per_sample,
            if mix.is_float { "float" } else { "pcm" },
        )));
    }

    match direction {
        Direction::Capture => {
            if mix.sample_rate_hz != desired.sample_rate_hz {
                log::warn!(
                    "capture mix rate {} differs from preferred {}",
                    mix.sample_rate_hz,
                    desired.sample_rate_hz
                );
            }
            Ok(*mix)
        }
        Direction::Render => {
            if mix.channels != 2 {
                return Err(AudioError::FormatRejected(format!(
                    "render path needs a stereo mix, device offers {} channels",
                    mix.channels
                )));
            }
            Ok(*mix)
        }
    }
}
