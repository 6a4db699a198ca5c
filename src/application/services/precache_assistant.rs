//! Scroll-aware precaching for list-like views.
//!
//! Each time a row becomes visible the assistant works out which direction
//! the list is moving and asks the loader to warm the rows ahead of it: the
//! nearest rows into memory, the ones beyond them to disk only. After the
//! first calculation only the single row entering each window is requested.

use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use crate::domain::ports::{PrecacheInformationProvider, PrecachePort, PrecacheRequest};

/// Default number of rows decoded into memory ahead of the visible one.
pub const DEFAULT_MEMORY_RANGE: usize = 4;
/// Default number of rows fetched to disk beyond the memory window.
pub const DEFAULT_DISK_RANGE: usize = 10;

/// Direction the list is moving in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Towards lower positions.
    #[default]
    Up,
    /// Towards higher positions.
    Down,
}

/// Row windows to precache, as half-open index ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheRanges {
    /// Rows to decode into memory.
    pub memory: Range<usize>,
    /// Rows to fetch to disk.
    pub disk: Range<usize>,
}

/// Direction and window bookkeeping, independent of any loader.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    position: usize,
    direction: ScrollDirection,
    first_calculation: bool,
    memory_range: usize,
    disk_range: usize,
}

impl Default for ScrollTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_RANGE, DEFAULT_DISK_RANGE)
    }
}

impl ScrollTracker {
    /// Creates a tracker with the given window sizes.
    #[must_use]
    pub const fn new(memory_range: usize, disk_range: usize) -> Self {
        Self {
            position: 0,
            direction: ScrollDirection::Up,
            first_calculation: true,
            memory_range,
            disk_range,
        }
    }

    /// Current scroll direction.
    #[must_use]
    pub const fn direction(&self) -> ScrollDirection {
        self.direction
    }

    /// Sets the memory window size.
    pub fn set_memory_range(&mut self, range: usize) {
        self.memory_range = range;
    }

    /// Sets the disk window size.
    pub fn set_disk_range(&mut self, range: usize) {
        self.disk_range = range;
    }

    /// Records a visit to `position` in a list of `count` rows and returns
    /// the windows to precache.
    pub fn visit(&mut self, position: usize, count: usize) -> PrecacheRanges {
        self.direction = match self.direction {
            ScrollDirection::Up if position >= self.position => ScrollDirection::Down,
            ScrollDirection::Down if position <= self.position => ScrollDirection::Up,
            unchanged => unchanged,
        };
        self.position = position;

        let ranges = match self.direction {
            ScrollDirection::Up => self.ranges_up(position),
            ScrollDirection::Down => self.ranges_down(position, count),
        };
        self.first_calculation = false;
        ranges
    }

    fn ranges_up(&self, position: usize) -> PrecacheRanges {
        let memory_lo = position.saturating_sub(self.memory_range);
        let memory_hi = if self.first_calculation {
            position
        } else {
            (position + 1).saturating_sub(self.memory_range)
        };

        let disk_lo = memory_lo.saturating_sub(self.disk_range);
        let disk_hi = if self.first_calculation {
            memory_lo
        } else {
            (memory_lo + 1).saturating_sub(self.disk_range)
        };

        PrecacheRanges {
            memory: memory_lo..memory_hi,
            disk: disk_lo..disk_hi,
        }
    }

    fn ranges_down(&self, position: usize, count: usize) -> PrecacheRanges {
        let memory_lo = if self.first_calculation {
            count.min(position + 1)
        } else {
            count.min(position + self.memory_range)
        };
        let memory_hi = count.min(position + 1 + self.memory_range);

        let disk_lo = if self.first_calculation {
            memory_hi
        } else {
            count.min((memory_hi + self.disk_range).saturating_sub(1))
        };
        let disk_hi = count.min(memory_hi + self.disk_range);

        PrecacheRanges {
            memory: memory_lo..memory_hi,
            disk: disk_lo..disk_hi,
        }
    }
}

/// Drives a loader's precache operations from list scroll positions.
pub struct PrecacheAssistant {
    tracker: ScrollTracker,
    loader: Arc<dyn PrecachePort>,
    provider: Arc<dyn PrecacheInformationProvider>,
}

impl PrecacheAssistant {
    /// Creates an assistant with the default window sizes.
    #[must_use]
    pub fn new(
        loader: Arc<dyn PrecachePort>,
        provider: Arc<dyn PrecacheInformationProvider>,
    ) -> Self {
        Self {
            tracker: ScrollTracker::default(),
            loader,
            provider,
        }
    }

    /// Current scroll direction.
    #[must_use]
    pub const fn direction(&self) -> ScrollDirection {
        self.tracker.direction()
    }

    /// Sets how many rows ahead are decoded into memory.
    pub fn set_memory_range(&mut self, range: usize) {
        self.tracker.set_memory_range(range);
    }

    /// Sets how many rows beyond the memory window are fetched to disk.
    pub fn set_disk_range(&mut self, range: usize) {
        self.tracker.set_disk_range(range);
    }

    /// Call whenever the row at `position` is shown.
    pub fn on_position_visited(&mut self, position: usize) {
        let ranges = self.tracker.visit(position, self.provider.count());
        trace!(
            position,
            direction = ?self.tracker.direction(),
            memory = ?ranges.memory,
            disk = ?ranges.disk,
            "Precache ranges"
        );

        for row in ranges.disk {
            for PrecacheRequest { resource, .. } in self.provider.requests_for_row(row) {
                self.loader.precache_to_disk(&resource);
            }
        }

        for row in ranges.memory {
            for PrecacheRequest { resource, bounds } in self.provider.requests_for_row(row) {
                self.loader.precache_to_memory(&resource, bounds);
            }
        }
    }
}

impl std::fmt::Debug for PrecacheAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrecacheAssistant")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ResourceId, ScalingDescriptor};
    use crate::domain::ports::mocks::{MockPrecacheInformationProvider, MockPrecachePort};
    use mockall::Sequence;
    use test_case::test_case;

    fn ranges(memory: Range<usize>, disk: Range<usize>) -> PrecacheRanges {
        PrecacheRanges { memory, disk }
    }

    #[test_case(&[10], 100, ranges(11..15, 15..25) ; "first visit looks down")]
    #[test_case(&[10, 11], 100, ranges(15..16, 25..26) ; "continuing down adds one row")]
    #[test_case(&[10, 9], 100, ranges(5..6, 0..0) ; "reversing looks up")]
    #[test_case(&[30, 20], 100, ranges(16..17, 6..7) ; "jumping up adds one row")]
    #[test_case(&[97], 100, ranges(98..100, 100..100) ; "clamped at list end")]
    #[test_case(&[98, 99], 100, ranges(100..100, 100..100) ; "nothing past the end")]
    #[test_case(&[5, 2], 100, ranges(0..0, 0..0) ; "nothing above the top")]
    fn test_scroll_windows(visits: &[usize], count: usize, expected: PrecacheRanges) {
        let mut tracker = ScrollTracker::default();
        let mut last = None;
        for &position in visits {
            last = Some(tracker.visit(position, count));
        }
        assert_eq!(last, Some(expected));
    }

    #[test]
    fn test_direction_flips() {
        let mut tracker = ScrollTracker::default();
        assert_eq!(tracker.direction(), ScrollDirection::Up);

        tracker.visit(3, 50);
        assert_eq!(tracker.direction(), ScrollDirection::Down);

        tracker.visit(4, 50);
        assert_eq!(tracker.direction(), ScrollDirection::Down);

        tracker.visit(4, 50);
        assert_eq!(tracker.direction(), ScrollDirection::Up);

        tracker.visit(2, 50);
        assert_eq!(tracker.direction(), ScrollDirection::Up);
    }

    #[test]
    fn test_ranges_are_configurable() {
        let mut tracker = ScrollTracker::default();
        tracker.set_memory_range(2);
        tracker.set_disk_range(3);

        assert_eq!(tracker.visit(0, 100), ranges(1..3, 3..6));
    }

    fn row_resource(row: usize) -> ResourceId {
        ResourceId::new(format!("https://images.example/{row}.png"))
    }

    fn provider(count: usize) -> MockPrecacheInformationProvider {
        let mut provider = MockPrecacheInformationProvider::new();
        provider.expect_count().return_const(count);
        provider.expect_requests_for_row().returning(|row| {
            if row % 2 == 0 {
                vec![PrecacheRequest::new(
                    row_resource(row),
                    ScalingDescriptor::bounded(100, 100),
                )]
            } else {
                Vec::new()
            }
        });
        provider
    }

    #[test]
    fn test_first_visit_precaches_disk_then_memory() {
        let mut loader = MockPrecachePort::new();
        let mut seq = Sequence::new();

        for row in [6, 8, 10, 12, 14] {
            let resource = row_resource(row);
            loader
                .expect_precache_to_disk()
                .withf(move |r| *r == resource)
                .times(1)
                .in_sequence(&mut seq)
                .return_const(());
        }
        for row in [2, 4] {
            let resource = row_resource(row);
            loader
                .expect_precache_to_memory()
                .withf(move |r, bounds| {
                    *r == resource && *bounds == ScalingDescriptor::bounded(100, 100)
                })
                .times(1)
                .in_sequence(&mut seq)
                .return_const(());
        }

        let mut assistant = PrecacheAssistant::new(Arc::new(loader), Arc::new(provider(50)));
        assistant.on_position_visited(0);

        assert_eq!(assistant.direction(), ScrollDirection::Down);
    }

    #[test]
    fn test_visit_near_end_requests_nothing() {
        let mut loader = MockPrecachePort::new();
        loader.expect_precache_to_disk().never();
        loader.expect_precache_to_memory().never();

        let mut assistant = PrecacheAssistant::new(Arc::new(loader), Arc::new(provider(5)));
        assistant.on_position_visited(4);
    }
}
