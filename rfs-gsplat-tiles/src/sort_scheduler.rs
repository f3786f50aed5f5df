// Depth sort scheduling
// Requests a back-to-front order from the depth sort service whenever the
// model-view transform changes or the data is marked dirty, with at most one
// request in flight.
//
//   Idle --(view changed | dirty)--> submit --accepted--> Sorting --resolved--> Sorted --take--> Idle
//                                          \--busy-----> Waiting (retry each update)
//   Sorting --rejected / invalid result--> Error (raised every update until cleared)

use glam::Mat4;
use tracing::{debug, error, info, trace, warn};

use crate::error::SortError;
use crate::services::{DepthSortService, SortRequest};
use crate::splat_set::SplatSet;
use crate::task::Task;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortingState {
    #[default]
    Idle,
    /// The service could not take the request; retried on the next update
    Waiting,
    /// A request is in flight
    Sorting,
    /// A result is ready to be taken
    Sorted,
    /// The last request failed; cleared only by `clear_error`
    Error,
}

/// Draw order produced by the sorter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedOrder {
    /// Aggregation epoch the order belongs to
    pub epoch: u64,
    /// Aggregate indices, back to front
    pub order: Vec<u32>,
}

struct PendingSort {
    task: Task<Vec<u32>>,
    epoch: u64,
    count: usize,
}

/// Sort scheduling statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortStats {
    /// Total update calls
    pub total_updates: u64,
    /// Updates that found nothing to do while idle
    pub idle_frames: u64,
    /// Current run of idle updates
    pub current_idle_streak: u32,
    /// Longest run of idle updates
    pub max_idle_streak: u32,
    /// Requests accepted by the service
    pub submissions: u64,
    /// Submissions refused because the service was busy
    pub waiting_retries: u64,
    /// Results accepted
    pub completed: u64,
    /// Results dropped because a newer aggregation replaced their data
    pub stale_discards: u64,
    /// Rejected requests and invalid results
    pub failures: u64,
}

impl SortStats {
    fn record_idle(&mut self) {
        self.idle_frames += 1;
        self.current_idle_streak += 1;
        self.max_idle_streak = self.max_idle_streak.max(self.current_idle_streak);
    }

    /// Fraction of updates that were idle no-ops (0.0 - 1.0)
    pub fn idle_ratio(&self) -> f32 {
        if self.total_updates == 0 {
            0.0
        } else {
            self.idle_frames as f32 / self.total_updates as f32
        }
    }

    pub fn print_summary(&self) {
        info!("📊 Depth Sort Stats:");
        info!(
            "  Idle Ratio: {:.1}% ({}/{})",
            self.idle_ratio() * 100.0,
            self.idle_frames,
            self.total_updates
        );
        info!("  Current Idle Streak: {} frames", self.current_idle_streak);
        info!("  Max Idle Streak: {} frames", self.max_idle_streak);
        info!(
            "  Sorts: {} submitted, {} completed, {} stale, {} failed, {} busy retries",
            self.submissions, self.completed, self.stale_discards, self.failures, self.waiting_retries
        );
    }
}

/// Depth sort state machine (one per primitive)
#[derive(Default)]
pub struct SortScheduler {
    state: SortingState,
    pending: Option<PendingSort>,
    sorted: Option<SortedOrder>,
    error: Option<SortError>,
    /// Model-view of the last accepted request
    last_model_view: Option<Mat4>,
    dirty: bool,
    stats: SortStats,
}

impl std::fmt::Debug for SortScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortScheduler")
            .field("state", &self.state)
            .field("in_flight", &self.pending.is_some())
            .field("dirty", &self.dirty)
            .field("error", &self.error)
            .finish()
    }
}

/// Check that `order` is a permutation of `0..count`
pub fn validate_permutation(order: &[u32], count: usize) -> Result<(), SortError> {
    if order.len() != count {
        return Err(SortError::LengthMismatch {
            expected: count,
            actual: order.len(),
        });
    }
    let mut seen = vec![false; count];
    for (position, &value) in order.iter().enumerate() {
        match seen.get_mut(value as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(SortError::NotAPermutation { position, value }),
        }
    }
    Ok(())
}

impl SortScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SortingState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Request a re-sort on the next update even if the view is unchanged
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn error(&self) -> Option<&SortError> {
        self.error.as_ref()
    }

    pub fn stats(&self) -> &SortStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = SortStats::default();
    }

    /// Leave the Error state; the next update submits a fresh request
    pub fn clear_error(&mut self) {
        if self.state == SortingState::Error {
            self.state = SortingState::Idle;
            self.error = None;
            self.dirty = true;
        }
    }

    /// Drive the state machine one step
    ///
    /// Never blocks on the service. Returns the state after the step, or the
    /// stored error while in the Error state.
    pub fn update(
        &mut self,
        service: &dyn DepthSortService,
        splats: &SplatSet,
        model_view: Mat4,
    ) -> Result<SortingState, SortError> {
        self.stats.total_updates += 1;

        if let Some(e) = &self.error {
            return Err(e.clone());
        }

        match self.state {
            SortingState::Sorting => self.poll_pending(splats)?,
            SortingState::Sorted => {
                let stale = self.sorted.as_ref().map(|s| s.epoch).filter(|&e| e != splats.epoch());
                if let Some(epoch) = stale {
                    self.discard_stale(epoch, splats.epoch());
                }
            }
            _ => {}
        }

        match self.state {
            SortingState::Idle => {
                let view_changed = self.last_model_view != Some(model_view);
                if splats.is_empty() || (!view_changed && !self.dirty) {
                    trace!("Depth sort idle");
                    self.stats.record_idle();
                } else {
                    self.submit(service, splats, model_view);
                }
            }
            SortingState::Waiting => self.submit(service, splats, model_view),
            _ => {}
        }

        if self.state != SortingState::Idle {
            self.stats.current_idle_streak = 0;
        }
        Ok(self.state)
    }

    fn submit(&mut self, service: &dyn DepthSortService, splats: &SplatSet, model_view: Mat4) {
        match service.submit(SortRequest::new(splats, model_view)) {
            Some(task) => {
                debug!("Depth sort accepted: {} splats (epoch {})", splats.len(), splats.epoch());
                self.pending = Some(PendingSort {
                    task,
                    epoch: splats.epoch(),
                    count: splats.len(),
                });
                self.last_model_view = Some(model_view);
                // Marks made from here on belong to the next request
                self.dirty = false;
                self.state = SortingState::Sorting;
                self.stats.submissions += 1;
            }
            None => {
                trace!("Depth sort service busy, retrying next update");
                self.state = SortingState::Waiting;
                self.stats.waiting_retries += 1;
            }
        }
    }

    fn poll_pending(&mut self, splats: &SplatSet) -> Result<(), SortError> {
        let Some(pending) = self.pending.as_mut() else {
            self.state = SortingState::Idle;
            return Ok(());
        };
        let Some(result) = pending.task.poll() else {
            return Ok(());
        };
        let (epoch, count) = (pending.epoch, pending.count);
        self.pending = None;

        let outcome = result
            .map_err(SortError::from)
            .and_then(|order| validate_permutation(&order, count).map(|()| order));

        match outcome {
            Ok(_) if epoch != splats.epoch() => {
                self.discard_stale(epoch, splats.epoch());
                Ok(())
            }
            Ok(order) => {
                self.sorted = Some(SortedOrder { epoch, order });
                self.state = SortingState::Sorted;
                self.stats.completed += 1;
                Ok(())
            }
            Err(e) => {
                error!("Depth sort failed: {}", e);
                self.state = SortingState::Error;
                self.error = Some(e.clone());
                self.stats.failures += 1;
                Err(e)
            }
        }
    }

    fn discard_stale(&mut self, result_epoch: u64, current_epoch: u64) {
        warn!(
            "Discarding depth sort for epoch {} (current epoch {})",
            result_epoch, current_epoch
        );
        self.sorted = None;
        self.state = SortingState::Idle;
        self.dirty = true;
        self.stats.stale_discards += 1;
    }

    /// Hand the finished order to the draw-order consumer and return to Idle
    pub fn take_sorted(&mut self) -> Option<SortedOrder> {
        if self.state != SortingState::Sorted {
            return None;
        }
        self.state = SortingState::Idle;
        self.sorted.take()
    }
}
