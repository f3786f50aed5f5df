// Sort scheduler tests
// State transitions against a sorter completed by hand

mod common;

use common::{tiles, ManualSorter, TileData};
use glam::{Mat4, Vec3};
use rfs_gsplat_tiles::{aggregate, SortError, SortScheduler, SortingState, SplatSet};

fn splats(epoch: u64) -> SplatSet {
    // Depths -1, -10, -5 under an identity view
    let positions = [Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 0.0, -10.0), Vec3::new(0.0, 0.0, -5.0)];
    aggregate(&tiles(&[TileData::from_positions(1, &positions)]), epoch).unwrap()
}

fn view(x: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_sort_and_take() {
        let sorter = ManualSorter::default();
        let set = splats(1);
        let mut scheduler = SortScheduler::new();

        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Sorting));
        assert_eq!(sorter.submissions(), 1);

        // Still in flight
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Sorting));

        sorter.complete_next();
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Sorted));

        let sorted = scheduler.take_sorted().expect("order available");
        assert_eq!(sorted.epoch, 1);
        assert_eq!(sorted.order, vec![1, 2, 0]);
        assert_eq!(scheduler.state(), SortingState::Idle);
        assert!(scheduler.take_sorted().is_none());
    }

    #[test]
    fn test_unchanged_view_is_idle() {
        let sorter = ManualSorter::default();
        let set = splats(1);
        let mut scheduler = SortScheduler::new();

        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        sorter.complete_next();
        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        scheduler.take_sorted();

        for _ in 0..3 {
            assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Idle));
        }
        assert_eq!(sorter.submissions(), 1);
        assert_eq!(scheduler.stats().idle_frames, 3);
        assert_eq!(scheduler.stats().max_idle_streak, 3);

        // A moved camera triggers a new sort
        assert_eq!(scheduler.update(&sorter, &set, view(1.0)), Ok(SortingState::Sorting));
        assert_eq!(sorter.submissions(), 2);
    }

    #[test]
    fn test_dirty_forces_resort() {
        let sorter = ManualSorter::default();
        let set = splats(1);
        let mut scheduler = SortScheduler::new();

        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        assert!(!scheduler.is_dirty());
        sorter.complete_next();
        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        scheduler.take_sorted();

        scheduler.mark_dirty();
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Sorting));
        assert!(!scheduler.is_dirty());
        assert_eq!(sorter.submissions(), 2);
    }

    #[test]
    fn test_empty_set_never_submits() {
        let sorter = ManualSorter::default();
        let mut scheduler = SortScheduler::new();
        scheduler.mark_dirty();

        assert_eq!(scheduler.update(&sorter, &SplatSet::default(), view(0.0)), Ok(SortingState::Idle));
        assert_eq!(sorter.submissions(), 0);
    }

    #[test]
    fn test_busy_service_waits_and_retries() {
        let sorter = ManualSorter::default();
        sorter.set_busy(true);
        let set = splats(1);
        let mut scheduler = SortScheduler::new();

        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Waiting));
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Waiting));
        assert_eq!(scheduler.stats().waiting_retries, 2);

        sorter.set_busy(false);
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Sorting));
        assert_eq!(sorter.submissions(), 1);
    }

    #[test]
    fn test_rejection_is_sticky_until_cleared() {
        let sorter = ManualSorter::default();
        let set = splats(1);
        let mut scheduler = SortScheduler::new();

        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        sorter.reject_next("device lost");

        let err = scheduler.update(&sorter, &set, view(0.0)).unwrap_err();
        assert!(matches!(err, SortError::Rejected(_)));
        assert_eq!(scheduler.state(), SortingState::Error);

        // Raised again, and nothing new is submitted
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Err(err));
        assert_eq!(sorter.submissions(), 1);

        scheduler.clear_error();
        assert_eq!(scheduler.state(), SortingState::Idle);
        assert_eq!(scheduler.update(&sorter, &set, view(0.0)), Ok(SortingState::Sorting));
        assert_eq!(scheduler.stats().failures, 1);
    }

    #[test]
    fn test_invalid_orders_are_errors() {
        let sorter = ManualSorter::default();
        let set = splats(1);

        let mut scheduler = SortScheduler::new();
        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        sorter.resolve_next(vec![0, 1]);
        assert_eq!(
            scheduler.update(&sorter, &set, view(0.0)),
            Err(SortError::LengthMismatch { expected: 3, actual: 2 })
        );

        let mut scheduler = SortScheduler::new();
        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        sorter.resolve_next(vec![0, 2, 2]);
        assert_eq!(
            scheduler.update(&sorter, &set, view(0.0)),
            Err(SortError::NotAPermutation { position: 2, value: 2 })
        );
    }

    #[test]
    fn test_stale_result_is_discarded_and_resubmitted() {
        let sorter = ManualSorter::default();
        let old = splats(1);
        let new = splats(2);
        let mut scheduler = SortScheduler::new();

        scheduler.update(&sorter, &old, view(0.0)).unwrap();
        sorter.complete_next();

        // The aggregate was rebuilt while the sort was in flight
        assert_eq!(scheduler.update(&sorter, &new, view(0.0)), Ok(SortingState::Sorting));
        assert_eq!(scheduler.stats().stale_discards, 1);
        assert_eq!(sorter.submissions(), 2);

        let request = sorter.complete_next();
        assert_eq!(request.epoch, 2);
        scheduler.update(&sorter, &new, view(0.0)).unwrap();
        assert_eq!(scheduler.take_sorted().map(|s| s.epoch), Some(2));
    }

    #[test]
    fn test_dropped_request_is_an_error() {
        let sorter = ManualSorter::default();
        let set = splats(1);
        let mut scheduler = SortScheduler::new();

        scheduler.update(&sorter, &set, view(0.0)).unwrap();
        // Service drops the completer without answering
        sorter.pending.lock().unwrap().clear();

        assert!(matches!(
            scheduler.update(&sorter, &set, view(0.0)),
            Err(SortError::Rejected(_))
        ));
    }
}
