//! Frame-addressed segment queue shared by the output devices.

use std::collections::VecDeque;

use super::AudioSegment;

#[derive(Debug)]
struct QueuedSegment {
    start_frame: u64,
    segment: AudioSegment,
}

impl QueuedSegment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.segment.frames() as u64
    }
}

/// Segments placed on a frame timeline, rendered into device buffers.
///
/// The playhead counts frames rendered since creation, so device time is
/// `position_frames() / sample_rate`.
#[derive(Debug)]
pub struct PlaybackQueue {
    sample_rate: f64,
    segments: VecDeque<QueuedSegment>,
    position: u64,
    gain: f32,
}

impl PlaybackQueue {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            segments: VecDeque::new(),
            position: 0,
            gain: 1.0,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn position_frames(&self) -> u64 {
        self.position
    }

    pub fn current_time(&self) -> f64 {
        self.position as f64 / self.sample_rate
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    /// Segments not yet fully played.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Frame at which the last queued segment ends.
    pub fn queued_until_frame(&self) -> u64 {
        self.segments
            .iter()
            .map(QueuedSegment::end_frame)
            .max()
            .unwrap_or(self.position)
    }

    /// Queue `segment` at device time `start_time`.
    ///
    /// A start within one frame of the previous segment's end is snapped to
    /// it, so consecutive batches stay sample-contiguous.
    pub fn push(&mut self, segment: AudioSegment, start_time: f64) {
        if segment.frames() == 0 {
            return;
        }

        let mut start_frame = (start_time.max(0.0) * self.sample_rate).round() as u64;
        if let Some(last) = self.segments.back() {
            let end = last.end_frame();
            if start_frame.abs_diff(end) <= 1 {
                start_frame = end;
            }
        }
        if start_frame < self.position {
            log::debug!(
                "Segment starts {} frames in the past; head will be skipped",
                self.position - start_frame
            );
        }

        let index = self
            .segments
            .partition_point(|q| q.start_frame <= start_frame);
        self.segments.insert(
            index,
            QueuedSegment {
                start_frame,
                segment,
            },
        );
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Render into an interleaved buffer with `channels` channels and advance
    /// the playhead.
    ///
    /// Mono devices receive the average of left and right; channels beyond
    /// the second are silent. Frames with no segment are silent.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }

        let frames = (out.len() / channels) as u64;
        let start = self.position;
        let end = start + frames;

        for queued in &self.segments {
            if queued.start_frame >= end {
                break;
            }
            let seg_end = queued.end_frame();
            if seg_end <= start {
                continue;
            }

            let segment = &queued.segment;
            for abs in start.max(queued.start_frame)..end.min(seg_end) {
                let i = (abs - queued.start_frame) as usize;
                let o = (abs - start) as usize * channels;
                let left = segment.left[i] * self.gain;
                let right = segment.right[i] * self.gain;
                if channels == 1 {
                    out[o] += (left + right) * 0.5;
                } else {
                    out[o] += left;
                    out[o + 1] += right;
                }
            }
        }

        self.position = end;
        self.segments.retain(|q| q.end_frame() > end);
    }
}
