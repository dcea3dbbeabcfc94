use parking_lot::Mutex;

/// Fixed-capacity circular byte store, addressable as raw bytes or as
/// 32-bit little-endian floats.
///
/// One internal mutex serializes every cursor/count mutation, which makes a
/// single instance safe for one producer thread and one consumer thread
/// running concurrently. Nothing but a bounded memory copy ever happens
/// while the lock is held.
///
/// Overflow truncates: `write_*` stores as much as fits and reports the
/// accepted count, so callers can detect drops. Underrun truncates the same
/// way and leaves the untouched remainder of the destination unmodified.
#[derive(Debug)]
pub struct RingBuffer {
    inner: Mutex<RingState>,
}

#[derive(Debug)]
struct RingState {
    buf: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
    count: usize,
}

impl RingBuffer {
    /// Create a ring holding up to `capacity_bytes` bytes.
    ///
    /// The capacity must be a positive multiple of 4 so the float view never
    /// splits a sample across the wrap point.
    pub fn with_byte_capacity(capacity_bytes: usize) -> Self {
        assert!(capacity_bytes > 0 && capacity_bytes % 4 == 0);
        Self {
            inner: Mutex::new(RingState {
                buf: vec![0; capacity_bytes],
                write_pos: 0,
                read_pos: 0,
                count: 0,
            }),
        }
    }

    /// Create a ring holding up to `capacity_floats` f32 samples.
    pub fn with_float_capacity(capacity_floats: usize) -> Self {
        Self::with_byte_capacity(capacity_floats * 4)
    }

    /// Write bytes, truncated to the free space. Returns the bytes accepted;
    /// anything beyond that is dropped.
    pub fn write_bytes(&self, src: &[u8]) -> usize {
        let mut state = self.inner.lock();
        let n = src.len().min(state.buf.len() - state.count);
        state.copy_in(&src[..n]);
        n
    }

    /// Read bytes, truncated to the stored count. Returns the bytes copied;
    /// `dest` beyond that is left untouched.
    pub fn read_bytes(&self, dest: &mut [u8]) -> usize {
        let mut state = self.inner.lock();
        let n = dest.len().min(state.count);
        state.copy_out(&mut dest[..n]);
        n
    }

    /// Write f32 samples, truncated to the free space in whole samples.
    /// Returns the number of samples accepted.
    pub fn write_floats(&self, src: &[f32]) -> usize {
        let mut state = self.inner.lock();
        debug_assert_eq!(state.write_pos % 4, 0);
        let n = src.len().min((state.buf.len() - state.count) / 4);
        for &sample in &src[..n] {
            let pos = state.write_pos;
            state.buf[pos..pos + 4].copy_from_slice(&sample.to_le_bytes());
            state.write_pos = (pos + 4) % state.buf.len();
        }
        state.count += n * 4;
        n
    }

    /// Read f32 samples, truncated to whole stored samples. Returns the
    /// number of samples copied; `dest` beyond that is left untouched.
    pub fn read_floats(&self, dest: &mut [f32]) -> usize {
        let mut state = self.inner.lock();
        debug_assert_eq!(state.read_pos % 4, 0);
        let n = dest.len().min(state.count / 4);
        for slot in &mut dest[..n] {
            let pos = state.read_pos;
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&state.buf[pos..pos + 4]);
            *slot = f32::from_le_bytes(raw);
            state.read_pos = (pos + 4) % state.buf.len();
        }
        state.count -= n * 4;
        n
    }

    /// Discard up to `count` stored bytes without copying. Discarding the
    /// whole store is equivalent to `reset()`.
    pub fn advance(&self, count: usize) {
        let mut state = self.inner.lock();
        if count >= state.count {
            state.reset();
        } else {
            state.read_pos = (state.read_pos + count) % state.buf.len();
            state.count -= count;
        }
    }

    /// Zero the cursors and stored count. Idempotent.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    pub fn byte_count(&self) -> usize {
        self.inner.lock().count
    }

    pub fn float_count(&self) -> usize {
        self.inner.lock().count / 4
    }

    pub fn is_empty(&self) -> bool {
        self.byte_count() == 0
    }

    pub fn capacity_bytes(&self) -> usize {
        self.inner.lock().buf.len()
    }

    pub fn capacity_floats(&self) -> usize {
        self.capacity_bytes() / 4
    }
}

impl RingState {
    /// Copy `src` in at the write cursor in at most two segments.
    fn copy_in(&mut self, src: &[u8]) {
        let first = src.len().min(self.buf.len() - self.write_pos);
        let pos = self.write_pos;
        self.buf[pos..pos + first].copy_from_slice(&src[..first]);
        let rest = src.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&src[first..]);
        }
        self.write_pos = (self.write_pos + src.len()) % self.buf.len();
        self.count += src.len();
    }

    /// Copy out from the read cursor in at most two segments.
    fn copy_out(&mut self, dest: &mut [u8]) {
        let first = dest.len().min(self.buf.len() - self.read_pos);
        let pos = self.read_pos;
        dest[..first].copy_from_slice(&self.buf[pos..pos + first]);
        let rest = dest.len() - first;
        if rest > 0 {
            dest[first..].copy_from_slice(&self.buf[..rest]);
        }
        self.read_pos = (self.read_pos + dest.len()) % self.buf.len();
        self.count -= dest.len();
    }

    fn reset(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let ring = RingBuffer::with_byte_capacity(16);
        assert_eq!(ring.write_bytes(&[1, 2, 3, 4]), 4);
        assert_eq!(ring.byte_count(), 4);

        let mut out = [0u8; 4];
        assert_eq!(ring.read_bytes(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn stored_count_tracks_accepted_io() {
        // Conservation: count equals accepted writes minus accepted
        // reads/advances, clamped to [0, capacity].
        let ring = RingBuffer::with_byte_capacity(8);
        let mut expected = 0usize;

        expected += ring.write_bytes(&[0; 5]);
        assert_eq!(ring.byte_count(), expected);

        expected += ring.write_bytes(&[0; 5]); // only 3 fit
        assert_eq!(expected, 8);
        assert_eq!(ring.byte_count(), 8);

        let mut out = [0u8; 6];
        expected -= ring.read_bytes(&mut out);
        assert_eq!(ring.byte_count(), expected);

        ring.advance(100); // over-advance clamps to empty
        assert_eq!(ring.byte_count(), 0);
    }

    #[test]
    fn round_trip_across_wrap() {
        let ring = RingBuffer::with_byte_capacity(8);

        // Walk the cursors to every possible offset and round-trip 6 bytes,
        // which always crosses the boundary for offsets 3..8.
        for offset in 0..8usize {
            ring.reset();
            let pad = vec![0xEE; offset];
            assert_eq!(ring.write_bytes(&pad), offset);
            let mut sink = vec![0; offset];
            assert_eq!(ring.read_bytes(&mut sink), offset);

            let data: Vec<u8> = (0..6).map(|i| i as u8 + 1).collect();
            assert_eq!(ring.write_bytes(&data), 6);
            let mut out = [0u8; 6];
            assert_eq!(ring.read_bytes(&mut out), 6);
            assert_eq!(&out[..], &data[..]);
        }
    }

    #[test]
    fn overflow_truncates_and_keeps_earliest() {
        let ring = RingBuffer::with_byte_capacity(8);
        let data: Vec<u8> = (0..9).collect();

        // Writing capacity + 1 accepts exactly capacity bytes.
        assert_eq!(ring.write_bytes(&data), 8);

        let mut out = [0u8; 9];
        assert_eq!(ring.read_bytes(&mut out), 8);
        assert_eq!(&out[..8], &data[..8]);
    }

    #[test]
    fn underrun_leaves_destination_untouched() {
        let ring = RingBuffer::with_byte_capacity(8);
        ring.write_bytes(&[7, 8]);

        let mut out = [0xAA; 6];
        assert_eq!(ring.read_bytes(&mut out), 2);
        assert_eq!(out[0], 7);
        assert_eq!(out[1], 8);
        assert_eq!(&out[2..], &[0xAA; 4]); // not overwritten

        // Fully empty: zero bytes read, nothing touched.
        let mut empty_out = [0x55; 4];
        assert_eq!(ring.read_bytes(&mut empty_out), 0);
        assert_eq!(empty_out, [0x55; 4]);
    }

    #[test]
    fn reset_is_idempotent() {
        let ring = RingBuffer::with_byte_capacity(8);
        ring.write_bytes(&[1, 2, 3]);

        ring.reset();
        let after_first = (ring.byte_count(), ring.capacity_bytes());
        ring.reset();
        assert_eq!((ring.byte_count(), ring.capacity_bytes()), after_first);
        assert!(ring.is_empty());
    }

    #[test]
    fn float_round_trip() {
        let ring = RingBuffer::with_float_capacity(8);
        let samples = [0.5f32, -0.25, 1.0, -1.0];
        assert_eq!(ring.write_floats(&samples), 4);
        assert_eq!(ring.float_count(), 4);
        assert_eq!(ring.byte_count(), 16);

        let mut out = [0.0f32; 4];
        assert_eq!(ring.read_floats(&mut out), 4);
        assert_eq!(out, samples);
    }

    #[test]
    fn float_and_byte_views_agree() {
        let ring = RingBuffer::with_float_capacity(4);
        ring.write_floats(&[1.5f32]);

        let mut raw = [0u8; 4];
        assert_eq!(ring.read_bytes(&mut raw), 4);
        assert_eq!(f32::from_le_bytes(raw), 1.5);
    }

    #[test]
    fn float_write_truncates_to_whole_samples() {
        let ring = RingBuffer::with_float_capacity(2);
        assert_eq!(ring.write_floats(&[1.0, 2.0, 3.0]), 2);
        let mut out = [0.0f32; 3];
        assert_eq!(ring.read_floats(&mut out), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
    }

    #[test]
    fn advance_discards_in_order() {
        let ring = RingBuffer::with_byte_capacity(8);
        ring.write_bytes(&[1, 2, 3, 4, 5, 6]);
        ring.advance(4);

        let mut out = [0u8; 2];
        assert_eq!(ring.read_bytes(&mut out), 2);
        assert_eq!(out, [5, 6]);
    }

    #[test]
    fn advance_everything_equals_reset() {
        let ring = RingBuffer::with_byte_capacity(8);
        ring.write_bytes(&[1, 2, 3, 4]);
        ring.advance(4);
        assert!(ring.is_empty());

        // Cursors rewound: a full-capacity write fits again in one piece.
        assert_eq!(ring.write_bytes(&[0; 8]), 8);
    }
}
