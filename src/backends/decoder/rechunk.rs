// SPDX-License-Identifier: GPL-3.0-only

//! Fixed-size audio blocks from decoder-sized buffers

use crate::media::{AudioBlock, AudioFormat};
use std::collections::VecDeque;
use std::time::Duration;

/// Regroups interleaved samples into blocks of `block_frames` frames
///
/// Block timestamps continue from the first buffer's timestamp; a later
/// buffer only re-anchors the timeline when the accumulator is empty.
#[derive(Debug)]
pub struct AudioRechunker {
    format: AudioFormat,
    block_len: usize,
    pending: VecDeque<f32>,
    next_timestamp: Option<Duration>,
}

impl AudioRechunker {
    pub fn new(format: AudioFormat, block_frames: u32) -> Self {
        let block_len = (block_frames.max(1) as usize) * format.channels.max(1) as usize;
        Self {
            format,
            block_len,
            pending: VecDeque::with_capacity(block_len * 4),
            next_timestamp: None,
        }
    }

    pub fn push(&mut self, samples: &[f32], timestamp: Duration) {
        if self.pending.is_empty() {
            self.next_timestamp = Some(timestamp);
        }
        self.pending.extend(samples.iter().copied());
    }

    /// Next complete block
    pub fn pop(&mut self) -> Option<AudioBlock> {
        if self.pending.len() < self.block_len {
            return None;
        }
        let samples: Vec<f32> = self.pending.drain(..self.block_len).collect();
        Some(self.emit(samples))
    }

    /// Remaining samples as a short final block
    pub fn flush(&mut self) -> Option<AudioBlock> {
        if self.pending.is_empty() {
            return None;
        }
        let samples: Vec<f32> = self.pending.drain(..).collect();
        Some(self.emit(samples))
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.next_timestamp = None;
    }

    fn emit(&mut self, samples: Vec<f32>) -> AudioBlock {
        let timestamp = self.next_timestamp.unwrap_or_default();
        let block = AudioBlock {
            samples: samples.into(),
            format: self.format,
            timestamp,
        };
        self.next_timestamp = Some(timestamp + block.duration());
        block
    }
}
