use internvl_core::vision::{select_tile_grid, supported_tile_grids};

#[test]
fn enumeration_orders_grids_by_tile_count() {
    let grids = supported_tile_grids(1, 4);
    let expected = vec![
        (1, 1),
        (1, 2),
        (2, 1),
        (1, 3),
        (3, 1),
        (1, 4),
        (2, 2),
        (4, 1),
    ];
    assert_eq!(*grids, expected);
}

#[test]
fn enumeration_respects_tile_budget() {
    for max_tiles in 1..=10u32 {
        for &(columns, rows) in supported_tile_grids(1, max_tiles).iter() {
            let count = columns * rows;
            assert!(
                (1..=max_tiles).contains(&count),
                "grid {columns}x{rows} out of budget"
            );
        }
    }
    for &(columns, rows) in supported_tile_grids(3, 6).iter() {
        let count = columns * rows;
        assert!((3..=6).contains(&count));
    }
}

#[test]
fn selection_stays_within_budget() {
    for (height, width) in [(93, 511), (1024, 77), (300, 300), (1, 5000)] {
        let (columns, rows) = select_tile_grid((height, width), (448, 448), 1, 12);
        assert!((1..=12).contains(&(columns * rows)));
    }
}

#[test]
fn selection_is_deterministic() {
    let first = select_tile_grid((719, 1033), (448, 448), 1, 12);
    let second = select_tile_grid((719, 1033), (448, 448), 1, 12);
    assert_eq!(first, second);
}

#[test]
fn exact_aspect_match_wins() {
    assert_eq!(select_tile_grid((100, 200), (50, 50), 1, 4), (2, 1));
}

#[test]
fn tie_break_prefers_larger_grid_for_large_images() {
    // Aspect 1.5 is equidistant from (1,1) and (2,1); the image covers more
    // than half of the two-tile canvas, so the larger grid wins.
    assert_eq!(select_tile_grid((400, 600), (448, 448), 1, 4), (2, 1));
}

#[test]
fn tie_break_keeps_smaller_grid_for_small_images() {
    // Same aspect ratio, but the image is far smaller than a single tile.
    assert_eq!(select_tile_grid((20, 30), (448, 448), 1, 4), (1, 1));
}

#[test]
fn unit_budget_degenerates_to_single_tile() {
    assert_eq!(select_tile_grid((5000, 100), (448, 448), 1, 1), (1, 1));
}
