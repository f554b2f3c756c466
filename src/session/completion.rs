use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

use crate::encoder::Band;

/// Joins the terminal events of both encoder channels.
///
/// Holds one pending bit per band. Completing a band clears its bit; the call
/// that clears the last bit is the only one that reports the gate as fired.
/// Completing a band twice is a no-op, so the terminal callback cannot fire
/// twice for one session.
#[derive(Debug, Default)]
pub struct CompletionGate {
    pending: AtomicU8,
}

impl CompletionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every band pending. Called at each recording start.
    pub fn arm(&self) {
        let all = Band::ALL.iter().fold(0, |mask, band| mask | band.mask());
        self.pending.store(all, Ordering::Release);
    }

    /// Record `band`'s terminal event. Returns `true` exactly once per arm,
    /// for the completion that leaves nothing pending.
    pub fn complete(&self, band: Band) -> bool {
        let bit = band.mask();
        let previous = self.pending.fetch_and(!bit, Ordering::AcqRel);
        if previous & bit == 0 {
            warn!("{} completed twice; ignored", band);
            return false;
        }
        let fired = previous == bit;
        debug!("{} completed, {} pending", band, (previous & !bit).count_ones());
        fired
    }

    /// Number of bands still outstanding
    pub fn remaining(&self) -> u32 {
        self.pending.load(Ordering::Acquire).count_ones()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_in_either_order() {
        for order in [[Band::Wide, Band::Voice], [Band::Voice, Band::Wide]] {
            let gate = CompletionGate::new();
            gate.arm();
            assert_eq!(gate.remaining(), 2);
            assert!(!gate.complete(order[0]));
            assert_eq!(gate.remaining(), 1);
            assert!(gate.complete(order[1]));
            assert_eq!(gate.remaining(), 0);
        }
    }

    #[test]
    fn test_double_completion_is_ignored() {
        let gate = CompletionGate::new();
        gate.arm();
        assert!(!gate.complete(Band::Wide));
        assert!(!gate.complete(Band::Wide));
        assert_eq!(gate.remaining(), 1);
        assert!(gate.complete(Band::Voice));
        assert!(!gate.complete(Band::Voice));
    }

    #[test]
    fn test_unarmed_gate_never_fires() {
        let gate = CompletionGate::new();
        assert!(!gate.complete(Band::Wide));
        assert!(!gate.complete(Band::Voice));
    }

    #[test]
    fn test_rearm_for_next_session() {
        let gate = CompletionGate::new();
        gate.arm();
        gate.complete(Band::Wide);
        gate.complete(Band::Voice);
        gate.arm();
        assert_eq!(gate.remaining(), 2);
        assert!(!gate.complete(Band::Voice));
        assert!(gate.complete(Band::Wide));
    }
}
