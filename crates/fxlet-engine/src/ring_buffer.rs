/// Fixed-capacity multichannel delay line.
///
/// Each channel owns a pre-allocated buffer and its own write cursor. Reads are
/// expressed as a delay in samples relative to the most recent write, so
/// `get(ch, 0)` returns the sample pushed last.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffers: Vec<Box<[f32]>>,
    write_head: Vec<usize>,
    capacity: usize,
}

impl RingBuffer {
    /// `capacity` is clamped to at least one sample.
    pub fn new(capacity: usize, channels: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffers: (0..channels).map(|_| vec![0.0f32; capacity].into_boxed_slice()).collect(),
            write_head: vec![0; channels],
            capacity,
        }
    }

    /// Sized to hold `seconds` of audio at `sample_rate`.
    pub fn for_duration(seconds: f32, sample_rate: f32, channels: usize) -> Self {
        let capacity = (seconds.max(0.0) * sample_rate).ceil() as usize;
        Self::new(capacity, channels)
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn channels(&self) -> usize { self.buffers.len() }

    /// Advance the channel's cursor, then store `value` under it.
    #[inline]
    pub fn push(&mut self, channel: usize, value: f32) {
        let head = (self.write_head[channel] + 1) % self.capacity;
        self.write_head[channel] = head;
        self.buffers[channel][head] = value;
    }

    /// Sample written `floor(delay)` pushes ago. Delays outside
    /// `[0, capacity-1]` are clamped, never wrapped.
    #[inline]
    pub fn get(&self, channel: usize, delay: f32) -> f32 {
        let max = (self.capacity - 1) as f32;
        // NaN clamps to 0 through the `as` cast
        let delay = delay.clamp(0.0, max).floor() as usize;
        let head = self.write_head[channel];
        let read = if head >= delay { head - delay } else { head + self.capacity - delay };
        self.buffers[channel][read]
    }

    /// Linear interpolation between the two neighbouring integer delays.
    #[inline]
    pub fn get_interpolated(&self, channel: usize, delay: f32) -> f32 {
        let whole = delay.floor();
        let frac = delay - whole;
        let a = self.get(channel, whole);
        let b = self.get(channel, whole + 1.0);
        a + frac * (b - a)
    }

    /// Silence every channel. Cursors are left where they are.
    pub fn clear(&mut self) {
        for buf in self.buffers.iter_mut() {
            buf.fill(0.0);
        }
    }

    #[cfg(test)]
    fn write_head(&self, channel: usize) -> usize { self.write_head[channel] }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_resurfaces_after_capacity_minus_one_pushes() {
        let mut rb = RingBuffer::new(64, 1);
        for _ in 0..63 {
            rb.push(0, 0.0);
        }
        rb.push(0, 0.75);
        assert_eq!(rb.get(0, 0.0), 0.75);

        // and again once it is the oldest sample in the line
        let mut rb = RingBuffer::new(64, 1);
        rb.push(0, 0.75);
        for _ in 0..63 {
            rb.push(0, 0.0);
        }
        assert_eq!(rb.get(0, 63.0), 0.75);
    }

    #[test]
    fn reads_are_clamped_for_any_delay() {
        let mut rb = RingBuffer::new(16, 2);
        for i in 0..40 {
            rb.push(0, i as f32);
            rb.push(1, -(i as f32));
        }
        for d in [-5.0, 0.0, 15.0, 16.0, 1_000.0, f32::INFINITY, f32::NAN] {
            let _ = rb.get(0, d);
            let _ = rb.get(1, d);
            let _ = rb.get_interpolated(0, d);
        }
        // anything past the end reads the oldest sample
        assert_eq!(rb.get(0, 1_000.0), rb.get(0, 15.0));
        assert_eq!(rb.get(0, -3.0), 39.0);
        assert!(rb.write_head(0) < rb.capacity());
    }

    #[test]
    fn fractional_delay_reads_floor() {
        let mut rb = RingBuffer::new(8, 1);
        rb.push(0, 1.0);
        rb.push(0, 2.0);
        assert_eq!(rb.get(0, 0.9), 2.0);
        assert_eq!(rb.get(0, 1.2), 1.0);
    }

    #[test]
    fn interpolated_read_blends_neighbours() {
        let mut rb = RingBuffer::new(8, 1);
        rb.push(0, 1.0);
        rb.push(0, 3.0);
        assert!((rb.get_interpolated(0, 0.25) - 2.5).abs() < 1e-6);
        assert!((rb.get_interpolated(0, 0.0) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn clear_silences_all_channels() {
        let mut rb = RingBuffer::new(4, 2);
        rb.push(0, 0.5);
        rb.push(1, 0.5);
        rb.clear();
        for d in 0..4 {
            assert_eq!(rb.get(0, d as f32), 0.0);
            assert_eq!(rb.get(1, d as f32), 0.0);
        }
    }

    #[test]
    fn sized_for_duration() {
        let rb = RingBuffer::for_duration(2.0, 44_100.0, 1);
        assert_eq!(rb.capacity(), 88_200);
        assert_eq!(rb.channels(), 1);
    }
}
