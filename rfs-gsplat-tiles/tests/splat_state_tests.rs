// Splat state table tests
// Batch validation, bit packing and original-id addressing

mod common;

use common::{tiles, TileData};
use glam::Vec4;
use rfs_gsplat_tiles::error::ValidationError;
use rfs_gsplat_tiles::splat_state::COLOR_GROUP_COUNT;
use rfs_gsplat_tiles::{aggregate, state_bits, ColorGroupId, SplatState, SplatStateTable};

fn table(count: usize) -> SplatStateTable {
    let mut table = SplatStateTable::new(1024);
    table.set_count(count);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_indices_are_reported_not_applied() {
        let mut table = table(10);
        let report = table.set_selection([-1i64, 5, 1000], true);

        assert_eq!(report.applied, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(
            report.errors,
            vec![
                ValidationError::IndexOutOfRange { index: -1, count: 10 },
                ValidationError::IndexOutOfRange { index: 1000, count: 10 },
            ]
        );
        assert_eq!(table.selection_sets().selected.iter().copied().collect::<Vec<_>>(), vec![5]);
    }

    #[test]
    fn test_error_list_is_capped() {
        let mut table = table(2);
        let report = table.set_lock(100u32..120, true);
        assert_eq!(report.rejected, 20);
        assert_eq!(report.errors.len(), 5);
        assert_eq!(table.locked_count(), 0);
    }

    #[test]
    fn test_rebuild_packs_state_bits() {
        let mut table = table(10);
        table.set_selection([1u32, 2], true);
        table.set_lock([2u32, 3], true);
        table.set_color_group([2u32, 4], 5);

        assert!(table.rebuild());
        assert_eq!(table.states().len(), table.capacity());
        assert_eq!(table.capacity(), 1024);

        let bytes = table.state_bytes();
        assert_eq!(bytes[0], state_bits::NORMAL);
        assert_eq!(bytes[1], state_bits::SELECTED);
        assert_eq!(bytes[2], state_bits::SELECTED | state_bits::LOCKED | (5 << state_bits::GROUP_SHIFT));
        assert_eq!(bytes[3], state_bits::LOCKED);
        assert_eq!(bytes[4], 5 << state_bits::GROUP_SHIFT);

        let state = table.state(2).unwrap();
        assert!(state.is_selected());
        assert!(state.is_locked());
        assert_eq!(state.color_group().get(), 5);

        // Nothing changed since the last rebuild
        assert!(!table.rebuild());
    }

    #[test]
    fn test_clearing_bits() {
        let mut table = table(4);
        table.set_selection([0u32, 1], true);
        table.set_lock([1u32], true);
        table.set_color_group([1u32], 7);
        table.rebuild();

        table.set_selection([1u32], false);
        table.set_lock([1u32], false);
        table.set_color_group([1u32], 0);
        table.rebuild();

        assert_eq!(table.state(0), Some(SplatState::from_bits(state_bits::SELECTED)));
        assert_eq!(table.state(1), Some(SplatState::NORMAL));
        assert!(table.selection_sets().color_groups.is_empty());
    }

    #[test]
    fn test_color_group_is_clamped() {
        let mut table = table(4);
        table.set_color_group([0u32], 100);
        table.set_color_group([1u32], -3);
        table.rebuild();

        assert_eq!(table.state(0).unwrap().color_group().get(), ColorGroupId::MAX);
        assert!(table.state(1).unwrap().color_group().is_none());
        assert_eq!(table.state(0).unwrap().bits() & state_bits::GROUP_MASK, state_bits::GROUP_MASK);
    }

    #[test]
    fn test_indices_beyond_count_stay_inert() {
        let mut table = table(10);
        table.set_selection([8u32, 9], true);
        table.set_count(8);
        table.rebuild();

        assert_eq!(table.selected_count(), 2);
        assert!(table.states().iter().all(|s| !s.is_selected()));

        // Growing again brings them back
        table.set_count(10);
        table.rebuild();
        assert!(table.state(9).unwrap().is_selected());
    }

    #[test]
    fn test_texture_dimensions() {
        let mut table = SplatStateTable::new(4);
        table.set_count(10);
        assert_eq!(table.texture_height(), 3);
        assert_eq!(table.capacity(), 12);

        table.set_texture_width(2048);
        assert_eq!(table.texture_height(), 1);
        assert!(table.rebuild());
        assert_eq!(table.state_bytes().len(), 2048);
    }

    #[test]
    fn test_selection_by_original_id() {
        let data = vec![TileData::line(1, 4, 0.0).with_original_ids(vec![40, 41, 42, 43])];
        let set = aggregate(&tiles(&data), 1).unwrap();

        let mut table = table(set.len());
        let report = table.set_selection_by_original_id(&set, [41, 43, 99], true);
        assert_eq!(report.applied, 2);
        assert_eq!(report.errors, vec![ValidationError::UnmappedOriginalId(99)]);

        let report = table.set_lock_by_original_id(&set, [40], true);
        assert!(report.is_clean());

        table.rebuild();
        assert!(table.state(1).unwrap().is_selected());
        assert!(table.state(3).unwrap().is_selected());
        assert!(table.state(0).unwrap().is_locked());
    }

    #[test]
    fn test_color_group_palette() {
        let mut table = table(1);
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);

        assert!(table.set_color_group_color(3, red).is_ok());
        assert_eq!(table.get_color_group_color(3), Some(red));
        assert_eq!(
            table.set_color_group_color(0, red),
            Err(ValidationError::ColorGroupOutOfRange(0))
        );
        assert_eq!(
            table.set_color_group_color(64, red),
            Err(ValidationError::ColorGroupOutOfRange(64))
        );

        // Group 0 resolves to the selected color
        assert_eq!(table.get_color_group_color(0), Some(table.palette().selected_color));

        let uniforms = table.palette().uniform_colors();
        assert_eq!(uniforms.len(), COLOR_GROUP_COUNT);
        assert_eq!(uniforms[3], red);
    }
}
