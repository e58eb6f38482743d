//! Counters kept by the line interrupt.

// -----------------------------------------------------------------------------
// Licence Statement
// -----------------------------------------------------------------------------
// Copyright (c) The dvi-stream developers, 2026
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.
// -----------------------------------------------------------------------------

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

use portable_atomic::{AtomicU32, Ordering};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Interrupt and underrun counts.
///
/// Only the line interrupt writes these, so a load and a store is enough to
/// bump them and we avoid a critical section on every line.
pub struct VideoStats {
    irqs: AtomicU32,
    underruns: AtomicU32,
}

/// A copy of the counters, for logging.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatsSnapshot {
    /// Line interrupts taken
    pub irqs: u32,
    /// Times the output FIFO was found empty
    pub underruns: u32,
    /// CLUT publishes
    pub publishes: u32,
}

impl VideoStats {
    /// All counters at zero.
    pub const fn new() -> VideoStats {
        VideoStats {
            irqs: AtomicU32::new(0),
            underruns: AtomicU32::new(0),
        }
    }

    /// Count one interrupt, and an underrun if there was one.
    pub fn record_irq(&self, underrun: bool) {
        bump(&self.irqs);
        if underrun {
            bump(&self.underruns);
        }
    }

    /// Line interrupts taken so far.
    pub fn irq_count(&self) -> u32 {
        self.irqs.load(Ordering::Relaxed)
    }

    /// Underruns seen so far.
    pub fn underrun_count(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Take a copy of everything. The publish count lives in the CLUT, so
    /// the caller passes it in.
    pub fn snapshot(&self, publishes: u32) -> StatsSnapshot {
        StatsSnapshot {
            irqs: self.irq_count(),
            underruns: self.underrun_count(),
            publishes,
        }
    }
}

impl Default for VideoStats {
    fn default() -> Self {
        VideoStats::new()
    }
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

fn bump(counter: &AtomicU32) {
    counter.store(
        counter.load(Ordering::Relaxed).wrapping_add(1),
        Ordering::Relaxed,
    );
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting() {
        let stats = VideoStats::new();
        stats.record_irq(false);
        stats.record_irq(true);
        stats.record_irq(false);
        assert_eq!(
            stats.snapshot(7),
            StatsSnapshot {
                irqs: 3,
                underruns: 1,
                publishes: 7
            }
        );
    }
}

// End of file
