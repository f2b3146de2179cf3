//! Rolling frame buffer.
//!
//! Two parallel fixed-capacity windows of the most recent frames, one raw
//! and one annotated, so a clip can be cut the moment an event fires.
//! Appends overwrite the oldest entry; an event trigger takes a deep
//! snapshot before the worker may mutate the buffer again.

use common::Frame;
use std::collections::VecDeque;

pub struct RollingBuffer {
    capacity: usize,
    raw: VecDeque<Frame>,
    annotated: VecDeque<Frame>,
    /// Frames per second at which entries arrive (capture rate divided by
    /// the buffer decimation).
    effective_fps: f64,
}

/// Deep copy of the buffer contents at trigger time.
pub struct BufferSnapshot {
    pub raw: Vec<Frame>,
    pub annotated: Vec<Frame>,
    pub effective_fps: f64,
}

impl RollingBuffer {
    pub fn new(capacity: usize, effective_fps: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            raw: VecDeque::with_capacity(capacity),
            annotated: VecDeque::with_capacity(capacity),
            effective_fps: if effective_fps > 0.0 { effective_fps } else { 1.0 },
        }
    }

    pub fn push(&mut self, raw: Frame, annotated: Frame) {
        if self.raw.len() == self.capacity {
            self.raw.pop_front();
            self.annotated.pop_front();
        }
        self.raw.push_back(raw);
        self.annotated.push_back(annotated);
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            raw: self.raw.iter().cloned().collect(),
            annotated: self.annotated.iter().cloned().collect(),
            effective_fps: self.effective_fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> Frame {
        Frame::filled(8, 8, [index as u8, 0, 0], index)
    }

    #[test]
    fn overwrites_oldest_at_capacity() {
        let mut buffer = RollingBuffer::new(3, 7.5);
        for i in 0..5 {
            buffer.push(frame(i), frame(i));
        }
        assert_eq!(buffer.len(), 3);
        let snapshot = buffer.snapshot();
        let indices: Vec<u64> = snapshot.raw.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
        assert_eq!(snapshot.effective_fps, 7.5);
    }

    #[test]
    fn snapshot_is_isolated_from_later_pushes() {
        let mut buffer = RollingBuffer::new(2, 15.0);
        buffer.push(frame(0), frame(0));
        let snapshot = buffer.snapshot();
        buffer.push(frame(1), frame(1));
        buffer.push(frame(2), frame(2));
        assert_eq!(snapshot.raw.len(), 1);
        assert_eq!(snapshot.raw[0].index, 0);
    }

    #[test]
    fn raw_and_annotated_stay_in_lockstep() {
        let mut buffer = RollingBuffer::new(4, 15.0);
        for i in 0..6 {
            buffer.push(frame(i), frame(i + 100));
        }
        let snapshot = buffer.snapshot();
        for (raw, annotated) in snapshot.raw.iter().zip(snapshot.annotated.iter()) {
            assert_eq!(raw.index + 100, annotated.index);
        }
    }
}
