//! Send quota — one global byte budget, split evenly across transfers.
//!
//! Refill: ceil(delta × max_bytes_per_second) per tick, only while some
//! transfer still has bytes to send. An idle engine drops its bank.
//! The bank holds at most one second of budget, or one minimum frame per
//! in-progress transfer when that is larger. Below that floor every share
//! would stay under the minimum frame and nothing would ever be sent.
//!
//! Each tick every in-progress transfer gets `bank / in_progress` bytes.
//! The split is recomputed fresh every tick and weighted by count only.
//! A share that a nearly-finished transfer cannot use stays in the bank.

use std::time::Duration;

use parcel_core::FRAME_PAYLOAD;

#[derive(Debug)]
pub struct SendQuota {
    banked: u64,
    rate: u64,
    min_frame: u64,
}

impl SendQuota {
    pub fn new(max_bytes_per_second: u32, min_frame_quota: u32) -> Self {
        Self {
            banked: 0,
            rate: u64::from(max_bytes_per_second),
            min_frame: u64::from(min_frame_quota).max(1),
        }
    }

    /// Most the bank may hold with `in_progress` transfers sharing it.
    pub fn cap(&self, in_progress: usize) -> u64 {
        self.rate
            .max(self.min_frame.saturating_mul(in_progress as u64))
    }

    /// Add one tick's budget. Returns the bytes added.
    pub fn accrue(&mut self, delta: Duration, in_progress: usize) -> u64 {
        if in_progress == 0 {
            self.banked = 0;
            return 0;
        }
        let added = (delta.as_secs_f64() * self.rate as f64).ceil() as u64;
        let cap = self.cap(in_progress).max(added);
        self.banked = (self.banked + added).min(cap);
        added
    }

    /// Per-transfer allowance for this tick.
    pub fn share(&self, in_progress: usize) -> u64 {
        self.banked / in_progress.max(1) as u64
    }

    pub fn debit(&mut self, bytes: usize) {
        self.banked = self.banked.saturating_sub(bytes as u64);
    }

    pub fn banked(&self) -> u64 {
        self.banked
    }
}

/// One transfer's allowance while it emits frames within a tick.
#[derive(Debug, Clone, Copy)]
pub struct Share {
    left: u64,
    min_frame: u64,
}

impl Share {
    pub fn new(bytes: u64, min_frame_quota: u32) -> Self {
        Self {
            left: bytes,
            min_frame: u64::from(min_frame_quota).max(1),
        }
    }

    /// Size of the next frame, or None when the transfer should stop for
    /// this tick. A share smaller than the minimum frame defers, unless the
    /// transfer's whole remainder fits in it.
    pub fn next_frame_len(&self, remaining: usize) -> Option<usize> {
        let remaining = remaining as u64;
        if remaining == 0 || self.left < self.min_frame.min(remaining) {
            return None;
        }
        Some(self.left.min(FRAME_PAYLOAD as u64).min(remaining) as usize)
    }

    pub fn spend(&mut self, bytes: usize) {
        self.left = self.left.saturating_sub(bytes as u64);
    }

    pub fn left(&self) -> u64 {
        self.left
    }
}
