//! # audio-duplex-core
//!
//! Platform-agnostic real-time duplex audio streaming core.
//!
//! Provides the capture→buffer→packetize path, the network→mix→render path,
//! the spatialization stage between them, and the device-session state
//! machine that drives a platform audio backend through the
//! [`device::backend`] trait boundary. Platform backends (Windows WASAPI)
//! live in sibling crates and plug in through `DeviceBackend`.
//!
//! ## Architecture
//!
//! ```text
//! audio-duplex-core (this crate)
//! ├── models/       ← SampleFormat, DuplexConfig, AudioError, SessionState
//! ├── processing/   ← RingBuffer, SpatialMixer, sample codecs, LevelMeter
//! ├── pipeline/     ← CapturePipeline, RenderPipeline
//! ├── session/      ← DeviceSession state machine, SessionObserver
//! ├── device/       ← DeviceBackend/DeviceClient traits, MockBackend
//! ├── transport/    ← Packet, PacketSink boundary to the network layer
//! └── storage/      ← diagnostic WAV dump
//! ```
//!
//! ## Data flow
//!
//! ```text
//! device → capture loop → RingBuffer → drain_and_send → PacketSink (transport)
//! transport → write_from_network → RingBuffer → SpatialMixer → L/R pair
//!                                      → device render pull → device
//! ```

pub mod device;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod session;
pub mod storage;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use device::backend::{
    BufferReadySignal, CaptureClient, CapturedPacket, DeviceBackend, DeviceClient, Direction,
    EndpointDescriptor, RenderClient,
};
pub use device::mock::MockBackend;
pub use models::config::{DownmixPlan, DuplexConfig, UnderrunFill};
pub use models::error::AudioError;
pub use models::format::SampleFormat;
pub use models::state::SessionState;
pub use pipeline::capture::CapturePipeline;
pub use pipeline::render::RenderPipeline;
pub use pipeline::{CapturePhase, RenderPhase};
pub use processing::meter::{LevelMeter, MeterReport};
pub use processing::ring_buffer::RingBuffer;
pub use processing::spatial_mixer::{
    EmitterParams, PanningSpatializer, SpatialMixer, Spatializer, StereoBuffer,
};
pub use session::device_session::{
    CaptureHandler, DeviceSession, RenderSource, SessionIo, SessionOptions, StreamInfo,
};
pub use session::observer::{NullObserver, SessionObserver};
pub use storage::wav_dump::WavDump;
pub use transport::{Packet, PacketSink, MAX_PACKET_BYTES};
