pub mod meter;
pub mod ring_buffer;
pub mod sample_convert;
pub mod spatial_mixer;
pub mod wav;

use std::sync::atomic::{AtomicU32, Ordering};

/// f32 stored as atomic bits; gains are read on the audio threads and set
/// from anywhere without taking a lock.
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}
