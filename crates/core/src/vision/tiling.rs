//! Tile-grid selection for dynamic high-resolution preprocessing.
//!
//! An image is carved into a grid of fixed-size tiles; the grid is chosen so
//! its aspect ratio tracks the source image as closely as the tile budget
//! allows. Both the candidate enumeration and the final selection are pure
//! functions of their inputs and are memoized behind small LRU caches.

use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
    sync::{Arc, Mutex},
};

use once_cell::sync::Lazy;

/// A tile arrangement as `(columns, rows)`.
pub type TileGrid = (u32, u32);

const GRID_ENUM_CACHE_CAPACITY: usize = 10;
const GRID_SELECT_CACHE_CAPACITY: usize = 100;

/// Fixed-capacity map with least-recently-used eviction.
///
/// Not `Sync` on its own; the module-level caches wrap it in a `Mutex`.
/// Racing lookups may recompute the same entry, which is harmless since the
/// cached functions are pure.
struct BoundedCache<K, V> {
    entries: HashMap<K, V>,
    // Access order, oldest at the front.
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&mut self, key: &K) -> Option<V> {
        let value = self.entries.get(key)?.clone();
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let touched = self.order.remove(pos).expect("position is in range");
            self.order.push_back(touched);
        }
        Some(value)
    }

    fn insert(&mut self, key: K, value: V) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key, value);
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

type GridEnumKey = (u32, u32);
type GridSelectKey = ((u32, u32), (u32, u32), u32, u32);

static GRID_ENUM_CACHE: Lazy<Mutex<BoundedCache<GridEnumKey, Arc<Vec<TileGrid>>>>> =
    Lazy::new(|| Mutex::new(BoundedCache::new(GRID_ENUM_CACHE_CAPACITY)));

static GRID_SELECT_CACHE: Lazy<Mutex<BoundedCache<GridSelectKey, TileGrid>>> =
    Lazy::new(|| Mutex::new(BoundedCache::new(GRID_SELECT_CACHE_CAPACITY)));

/// All `(columns, rows)` arrangements whose tile count lies in
/// `[min_tiles, max_tiles]`, ordered by ascending tile count.
///
/// `supported_tile_grids(1, 4)` yields
/// `(1,1), (1,2), (2,1), (1,3), (3,1), (1,4), (2,2), (4,1)`.
pub fn supported_tile_grids(min_tiles: u32, max_tiles: u32) -> Arc<Vec<TileGrid>> {
    let key = (min_tiles, max_tiles);
    if let Some(cached) = GRID_ENUM_CACHE.lock().expect("cache lock").get(&key) {
        return cached;
    }

    let mut grids = Vec::new();
    for columns in 1..=max_tiles {
        for rows in 1..=max_tiles {
            let count = columns * rows;
            if count >= min_tiles && count <= max_tiles {
                grids.push((columns, rows));
            }
        }
    }
    // Stable sort keeps the column-major enumeration order within each count.
    grids.sort_by_key(|&(columns, rows)| columns * rows);

    let grids = Arc::new(grids);
    GRID_ENUM_CACHE
        .lock()
        .expect("cache lock")
        .insert(key, grids.clone());
    grids
}

/// Pick the grid whose aspect ratio is closest to the image's.
///
/// `image_size` and `tile_size` are `(height, width)`. Ties on the aspect
/// difference go to the later (larger) grid only while the image area
/// exceeds half the area the larger grid would cover; small images keep the
/// smaller grid rather than being stretched over extra tiles.
///
/// Always returns a grid as long as `max_tiles >= min_tiles >= 1`,
/// degenerating to `(1, 1)`.
pub fn select_tile_grid(
    image_size: (u32, u32),
    tile_size: (u32, u32),
    min_tiles: u32,
    max_tiles: u32,
) -> TileGrid {
    let key = (image_size, tile_size, min_tiles, max_tiles);
    if let Some(cached) = GRID_SELECT_CACHE.lock().expect("cache lock").get(&key) {
        return cached;
    }

    let (image_height, image_width) = image_size;
    let (tile_height, tile_width) = tile_size;
    let aspect_ratio = image_width as f64 / image_height as f64;
    let image_area = image_width as f64 * image_height as f64;
    let tile_area = tile_width as f64 * tile_height as f64;

    let mut best = (1, 1);
    let mut best_diff = f64::INFINITY;
    for &(columns, rows) in supported_tile_grids(min_tiles, max_tiles).iter() {
        let grid_ratio = columns as f64 / rows as f64;
        let diff = (aspect_ratio - grid_ratio).abs();
        if diff < best_diff {
            best_diff = diff;
            best = (columns, rows);
        } else if (diff - best_diff).abs() < f64::EPSILON
            && image_area > 0.5 * tile_area * (columns * rows) as f64
        {
            best = (columns, rows);
        }
    }

    GRID_SELECT_CACHE
        .lock()
        .expect("cache lock")
        .insert(key, best);
    best
}
