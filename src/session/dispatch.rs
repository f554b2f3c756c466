use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::state::SharedSessionState;
use crate::audio::{AudioBlock, Resampler};
use crate::encoder::EncoderSink;

/// Block counters shared between the capture path and the controller
#[derive(Debug, Default)]
pub struct DispatchCounters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
    frames: AtomicU64,
}

impl DispatchCounters {
    pub fn blocks_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn blocks_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames sent to the wide-band channel
    pub fn frames_forwarded(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub(crate) fn drop_block(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Routes each captured block to both encoder channels while recording
pub struct BlockDispatcher {
    state: SharedSessionState,
    wide: EncoderSink,
    voice: EncoderSink,
    resampler: Resampler,
    block_length: usize,
    channel_count: usize,
    counters: Arc<DispatchCounters>,
}

impl BlockDispatcher {
    pub fn new(
        state: SharedSessionState,
        wide: EncoderSink,
        voice: EncoderSink,
        resampler: Resampler,
        block_length: usize,
        channel_count: u16,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        Self {
            state,
            wide,
            voice,
            resampler,
            block_length,
            channel_count: channel_count as usize,
            counters,
        }
    }

    /// Forward `block` if the session is recording. Returns whether it was
    /// forwarded.
    pub fn dispatch(&mut self, block: &AudioBlock) -> bool {
        if !self.state.get().is_forwarding() {
            self.counters.drop_block();
            return false;
        }

        if block.frames() != self.block_length || block.channel_count() != self.channel_count {
            warn!(
                "Rejecting block of {} frames x {} channels (expected {} x {})",
                block.frames(),
                block.channel_count(),
                self.block_length,
                self.channel_count
            );
            self.counters.drop_block();
            return false;
        }

        let Some(samples) = block.channel(0) else {
            self.counters.drop_block();
            return false;
        };

        let voice = self.resampler.process(samples);
        self.wide.encode(samples.to_vec());
        self.voice.encode(voice);

        let forwarded = self.counters.forwarded.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters
            .frames
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        if forwarded % 100 == 0 {
            debug!("Forwarded {} blocks", forwarded);
        }
        true
    }
}
