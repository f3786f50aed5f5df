// Tile aggregation tests
// Concatenation order, original-id mapping and rejection of inconsistent tiles

mod common;

use common::{tiles, TileData};
use glam::Vec3;
use rfs_gsplat_tiles::splat_set::FallbackReason;
use rfs_gsplat_tiles::{aggregate, AggregationError, ColorLayout, IdMapping, TileAggregator, TileId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenates_tiles_in_order() {
        let data = vec![TileData::line(1, 3, 0.0), TileData::line(2, 2, 10.0)];
        let set = aggregate(&tiles(&data), 1).unwrap();

        assert_eq!(set.len(), 5);
        assert_eq!(set.epoch(), 1);
        assert_eq!(set.positions().len(), 15);
        assert_eq!(set.rotations().len(), 20);
        assert_eq!(set.scales().len(), 15);
        assert_eq!(set.color_layout(), ColorLayout::Rgba);

        assert_eq!(set.position(0), Some(Vec3::new(0.0, 0.0, -1.0)));
        assert_eq!(set.position(3), Some(Vec3::new(10.0, 0.0, -1.0)));
        assert_eq!(set.position(5), None);

        // Second tile's first color follows the first tile's three
        assert_eq!(set.color(3), Some([0, 100, 200, 255]));

        let ranges = set.tile_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].aggregate_range(), 0..3);
        assert_eq!(ranges[1].aggregate_range(), 3..5);
    }

    #[test]
    fn test_exact_and_fallback_original_ids() {
        let data = vec![
            TileData::line(1, 100, 0.0).with_original_ids((1000..1100).collect()),
            TileData::line(2, 50, 200.0),
        ];
        let set = aggregate(&tiles(&data), 1).unwrap();

        assert_eq!(set.len(), 150);
        let expected: Vec<u32> = (1000..1100).chain(100..150).collect();
        assert_eq!(&set.original_id_by_aggregate()[..], &expected[..]);

        assert_eq!(set.aggregate_index(1000), Some(0));
        assert_eq!(set.aggregate_index(1099), Some(99));
        assert_eq!(set.aggregate_index(100), Some(100));
        assert_eq!(set.aggregate_index(149), Some(149));
        assert_eq!(set.aggregate_index(5000), None);

        let ranges = set.tile_ranges();
        assert_eq!(ranges[0].mapping, IdMapping::Exact);
        assert_eq!(ranges[0].original_min, Some(1000));
        assert_eq!(ranges[0].original_max, Some(1099));
        assert_eq!(
            ranges[1].mapping,
            IdMapping::Contiguous {
                start: 100,
                reason: FallbackReason::Missing
            }
        );
        assert!(!set.has_exact_id_mapping());
    }

    #[test]
    fn test_fallback_ranges() {
        let data = vec![
            TileData::line(1, 4, 0.0),
            TileData::line(2, 3, 10.0).with_original_ids(vec![7, 8]),
            TileData::line(3, 2, 20.0).with_original_id_start(500),
        ];
        let set = aggregate(&tiles(&data), 1).unwrap();

        // Aggregate offset unless the tile supplies its own start
        assert_eq!(&set.original_id_by_aggregate()[..], &[0, 1, 2, 3, 4, 5, 6, 500, 501]);
        assert_eq!(
            set.tile_ranges()[2].mapping,
            IdMapping::Contiguous {
                start: 500,
                reason: FallbackReason::Missing
            }
        );
        assert_eq!(
            set.tile_ranges()[1].mapping,
            IdMapping::Contiguous {
                start: 4,
                reason: FallbackReason::LengthMismatch { len: 2 }
            }
        );
    }

    #[test]
    fn test_rgb_tiles_keep_three_components() {
        let data = vec![TileData::line(1, 2, 0.0).rgb()];
        let set = aggregate(&tiles(&data), 1).unwrap();

        assert_eq!(set.color_layout(), ColorLayout::Rgb);
        assert_eq!(set.colors().len(), 6);
        assert_eq!(set.color(1), Some([1, 100, 200, 255]));
    }

    #[test]
    fn test_rejects_inconsistent_attribute_lengths() {
        let mut broken = TileData::line(2, 3, 0.0);
        broken.scales.pop();
        let data = vec![TileData::line(1, 3, 0.0), broken];

        let err = aggregate(&tiles(&data), 1).unwrap_err();
        assert_eq!(
            err,
            AggregationError::AttributeLength {
                tile: TileId(2),
                attribute: "scales",
                expected: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn test_rejects_mixed_color_layouts() {
        let data = vec![TileData::line(1, 2, 0.0), TileData::line(2, 2, 5.0).rgb()];
        let err = aggregate(&tiles(&data), 1).unwrap_err();
        assert!(matches!(err, AggregationError::MixedColorLayout { tile: TileId(2), expected: 4, found: 3 }));
    }

    #[test]
    fn test_rejects_bad_color_length() {
        let mut broken = TileData::line(1, 2, 0.0);
        broken.colors.truncate(5);
        let err = aggregate(&tiles(&[broken]), 1).unwrap_err();
        assert!(matches!(err, AggregationError::ColorLayout { len: 5, points: 2, .. }));
    }

    #[test]
    fn test_aggregator_rebuilds_only_on_tile_change() {
        let a = TileData::line(1, 3, 0.0);
        let b = TileData::line(2, 2, 10.0);
        let mut aggregator = TileAggregator::new();

        let first = aggregator.update(&tiles(&[a.clone()])).unwrap().expect("first pass builds");
        assert_eq!(first.epoch(), 1);

        // Same tile list: nothing to do
        assert!(aggregator.update(&tiles(&[a.clone()])).unwrap().is_none());

        // Empty selection keeps the previous set
        assert!(aggregator.update(&[]).unwrap().is_none());

        let second = aggregator.update(&tiles(&[a.clone(), b.clone()])).unwrap().expect("tile added");
        assert_eq!(second.epoch(), 2);
        assert_eq!(second.len(), 5);

        // Reordering is a change
        let third = aggregator.update(&tiles(&[b.clone(), a.clone()])).unwrap().expect("tiles reordered");
        assert_eq!(third.epoch(), 3);
        assert_eq!(aggregator.tiles(), &[TileId(2), TileId(1)]);

        aggregator.invalidate();
        assert!(aggregator.update(&tiles(&[b, a])).unwrap().is_some());
        assert_eq!(aggregator.epoch(), 4);
    }

    #[test]
    fn test_failed_update_is_retried() {
        let good = TileData::line(1, 3, 0.0);
        let mut broken = TileData::line(2, 3, 0.0);
        broken.rotations.truncate(4);

        let mut aggregator = TileAggregator::new();
        assert!(aggregator.update(&tiles(&[good.clone(), broken])).is_err());
        assert_eq!(aggregator.epoch(), 0);
        assert!(aggregator.tiles().is_empty());

        let fixed = TileData::line(2, 3, 0.0);
        let set = aggregator.update(&tiles(&[good, fixed])).unwrap().expect("retry succeeds");
        assert_eq!(set.epoch(), 1);
    }

    #[test]
    fn test_absurd_point_count_is_rejected() {
        let data = TileData::line(1, 3, 0.0);
        let mut tile = data.tile();
        tile.points_length = usize::MAX / 2;

        let err = aggregate(&[tile], 1).unwrap_err();
        assert!(matches!(
            err,
            AggregationError::AttributeLength {
                tile: TileId(1),
                attribute: "positions",
                expected: usize::MAX,
                actual: 9
            }
        ));
    }

    #[test]
    fn test_point_count_change_rebuilds() {
        let short = TileData::line(1, 3, 0.0);
        let long = TileData::line(1, 5, 0.0);
        let mut aggregator = TileAggregator::new();

        aggregator.update(&tiles(&[short])).unwrap().expect("first pass builds");
        let set = aggregator.update(&tiles(&[long])).unwrap().expect("same id, more points");
        assert_eq!(set.epoch(), 2);
        assert_eq!(set.len(), 5);
        assert_eq!(aggregator.tiles(), &[TileId(1)]);
    }
}
