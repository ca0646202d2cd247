//! Outbound audio fan-out
//!
//! When several audio streams are started at once, each encoded frame
//! pulled from the codec is duplicated into a bounded queue per stream.
//! A full queue never blocks and never grows: the oldest frame is dropped
//! to make room and the caller is told so it can inform the negotiator.

use super::A2dpError;
use crate::constants::{MAX_FANOUT_QUEUE, MAX_MEDIA_FRAME};
use heapless::{Deque, Vec};

/// One encoded media frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    /// RTP timestamp
    pub timestamp: u32,
    /// Number of codec frames in the payload
    pub frames: u8,
    /// Encoded payload
    pub data: Vec<u8, MAX_MEDIA_FRAME>,
}

impl MediaFrame {
    /// Build a frame from an encoded payload
    ///
    /// # Errors
    /// Returns `A2dpError::ConfigurationFailed` if the payload exceeds `MAX_MEDIA_FRAME`
    pub fn new(timestamp: u32, frames: u8, payload: &[u8]) -> Result<Self, A2dpError> {
        Ok(Self {
            timestamp,
            frames,
            data: Vec::from_slice(payload).map_err(|_| A2dpError::ConfigurationFailed)?,
        })
    }
}

/// Outcome of queueing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Frame queued
    Queued,
    /// Frame queued after dropping the oldest one
    DroppedOldest,
}

/// Bounded per-stream frame queue
#[derive(Debug)]
pub struct FanoutQueue {
    depth: usize,
    frames: Deque<MediaFrame, MAX_FANOUT_QUEUE>,
}

impl Default for FanoutQueue {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_FANOUT_QUEUE_DEPTH)
    }
}

impl FanoutQueue {
    /// Queue holding at most `depth` frames (clamped to `1..=MAX_FANOUT_QUEUE`)
    #[must_use]
    pub const fn new(depth: usize) -> Self {
        let depth = if depth == 0 {
            1
        } else if depth > MAX_FANOUT_QUEUE {
            MAX_FANOUT_QUEUE
        } else {
            depth
        };
        Self {
            depth,
            frames: Deque::new(),
        }
    }

    /// Append a frame, dropping the oldest one if the queue is at depth
    pub fn push(&mut self, frame: MediaFrame) -> Enqueue {
        let mut outcome = Enqueue::Queued;
        while self.frames.len() >= self.depth {
            self.frames.pop_front();
            outcome = Enqueue::DroppedOldest;
        }
        if self.frames.push_back(frame).is_err() {
            // depth <= capacity
            return Enqueue::DroppedOldest;
        }
        outcome
    }

    /// Next frame to send
    pub fn pop(&mut self) -> Option<MediaFrame> {
        self.frames.pop_front()
    }

    /// Put back a frame the transport refused so it goes out first
    ///
    /// A full queue keeps its newer frames and drops `frame`.
    pub fn requeue(&mut self, frame: MediaFrame) -> Enqueue {
        if self.frames.len() >= self.depth || self.frames.push_front(frame).is_err() {
            return Enqueue::DroppedOldest;
        }
        Enqueue::Queued
    }

    /// Discard all queued frames, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        dropped
    }

    /// Queued frame count
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True if no frame is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Configured depth
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }
}
