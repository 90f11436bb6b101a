//! Shared progress cell between a blocking open call and the ticker.

use std::sync::atomic::{AtomicU32, Ordering};

/// A single `f32` fraction, written by the driver-construction call and
/// read by the progress ticker. Stored as raw bits in an atomic so the
/// two threads never need a lock; there is exactly one producer and one
/// consumer for the cell's whole lifetime.
#[derive(Debug, Default)]
pub struct ProgressCell {
    bits: AtomicU32,
}

impl ProgressCell {
    /// Creates a cell at fraction 0.0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new fraction complete, clamped to `0.0..=1.0`.
    pub fn set(&self, fraction: f32) {
        self.bits
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Reads the most recently published fraction.
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
