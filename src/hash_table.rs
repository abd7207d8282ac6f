use std::sync::{Arc, RwLock};

use crate::constants::{tile_hash, CHAIN_LENGTH_WARN, HASH_TABLE_SIZE};
use crate::store::TileDataStore;
use crate::tile::Tile;
use crate::tile_data::TileData;

/// Coordinate-indexed, concurrently readable store of tile handles.
///
/// Fixed bucket count, open hash chains, a cheap mixing function. All
/// lookups take the shared lock, all mutation takes the exclusive lock.
/// Absent tiles are answered from a default data block so that reads
/// never allocate.
pub struct TileHashTable {
    inner: RwLock<TableInner>,
    default_data: RwLock<Arc<TileData>>,
    store: Arc<TileDataStore>,
}

struct TableInner {
    buckets: Vec<Vec<Arc<Tile>>>,
    num_tiles: usize,
}

impl TileHashTable {
    pub fn new(store: Arc<TileDataStore>, default_data: Arc<TileData>) -> TileHashTable {
        TileHashTable {
            inner: RwLock::new(TableInner {
                buckets: (0..HASH_TABLE_SIZE).map(|_| Vec::new()).collect(),
                num_tiles: 0,
            }),
            default_data: RwLock::new(default_data),
            store,
        }
    }

    /// Deep copy for device duplication. Tile handles are fresh but the
    /// data blocks are shared; the first write on either side detaches.
    /// The source table is assumed stable for the duration.
    pub fn deep_copy(&self) -> TileHashTable {
        let src = self.inner.read().unwrap();
        let buckets = src
            .buckets
            .iter()
            .map(|chain| {
                chain
                    .iter()
                    .map(|tile| {
                        Arc::new(Tile::new(
                            tile.col(),
                            tile.row(),
                            tile.data(),
                            self.store.clone(),
                        ))
                    })
                    .collect()
            })
            .collect();
        TileHashTable {
            inner: RwLock::new(TableInner {
                buckets,
                num_tiles: src.num_tiles,
            }),
            default_data: RwLock::new(self.default_tile_data()),
            store: self.store.clone(),
        }
    }

    /// Lookup without allocation; None when the coordinate was never
    /// written
    pub fn get(&self, col: i32, row: i32) -> Option<Arc<Tile>> {
        let inner = self.inner.read().unwrap();
        inner.buckets[tile_hash(col, row)]
            .iter()
            .find(|tile| tile.col() == col && tile.row() == row)
            .cloned()
    }

    pub fn tile_exists(&self, col: i32, row: i32) -> bool {
        self.get(col, row).is_some()
    }

    /// Lookup, creating and linking a tile backed by the default data
    /// when absent. The bool is true when the tile was just created.
    pub fn get_lazy(&self, col: i32, row: i32) -> (Arc<Tile>, bool) {
        let mut inner = self.inner.write().unwrap();
        let bucket = tile_hash(col, row);
        if let Some(tile) = inner.buckets[bucket]
            .iter()
            .find(|tile| tile.col() == col && tile.row() == row)
        {
            return (tile.clone(), false);
        }
        let tile = Arc::new(Tile::new(
            col,
            row,
            self.default_tile_data(),
            self.store.clone(),
        ));
        inner.buckets[bucket].push(tile.clone());
        inner.num_tiles += 1;
        (tile, true)
    }

    /// Link a tile, replacing any existing one at the same coordinate
    pub fn add(&self, tile: Arc<Tile>) {
        let mut inner = self.inner.write().unwrap();
        let bucket = tile_hash(tile.col(), tile.row());
        let chain = &mut inner.buckets[bucket];
        if let Some(pos) = chain
            .iter()
            .position(|t| t.col() == tile.col() && t.row() == tile.row())
        {
            chain[pos] = tile;
        } else {
            chain.push(tile);
            inner.num_tiles += 1;
        }
    }

    /// Unlink the tile at (col, row); the handle survives as long as
    /// anyone (history, for instance) still references it
    pub fn remove(&self, col: i32, row: i32) -> Option<Arc<Tile>> {
        let mut inner = self.inner.write().unwrap();
        let bucket = tile_hash(col, row);
        let chain = &mut inner.buckets[bucket];
        let pos = chain
            .iter()
            .position(|tile| tile.col() == col && tile.row() == row)?;
        let tile = chain.swap_remove(pos);
        inner.num_tiles -= 1;
        Some(tile)
    }

    /// Unlink every tile
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        for chain in inner.buckets.iter_mut() {
            chain.clear();
        }
        inner.num_tiles = 0;
    }

    pub fn num_tiles(&self) -> usize {
        self.inner.read().unwrap().num_tiles
    }

    /// Snapshot of every linked tile, for iteration outside the lock
    pub fn tiles(&self) -> Vec<Arc<Tile>> {
        let inner = self.inner.read().unwrap();
        inner.buckets.iter().flatten().cloned().collect()
    }

    pub fn default_tile_data(&self) -> Arc<TileData> {
        self.default_data.read().unwrap().clone()
    }

    /// Content future lazily-created tiles are initialized from
    pub fn set_default_tile_data(&self, data: Arc<TileData>) {
        *self.default_data.write().unwrap() = data;
    }

    /// Dump the chain length distribution. Diagnostic only.
    pub fn debug_print_info(&self) {
        let inner = self.inner.read().unwrap();
        let mut longest = 0usize;
        let mut used = 0usize;
        for chain in &inner.buckets {
            if !chain.is_empty() {
                used += 1;
                longest = longest.max(chain.len());
            }
        }
        log::debug!(
            "tile hash table: {} tiles, {} of {} buckets used, longest chain {}",
            inner.num_tiles,
            used,
            HASH_TABLE_SIZE,
            longest
        );
        if longest > CHAIN_LENGTH_WARN {
            log::warn!(
                "tile hash chain degenerated to {} entries; \
                 the document is probably very sparse",
                longest
            );
        }
    }
}
