use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::store::TileDataStore;
use crate::tile_data::TileData;
use crate::types::{tile_rect, Rect};

/// A positioned handle onto one `TileData` block.
///
/// The (col, row) pair is in tile-grid coordinates and unique within a
/// hash table. The data pointer is shared freely with clones and with
/// history snapshots; a write detaches first whenever anyone else still
/// holds the block, so frozen snapshots are never mutated retroactively.
pub struct Tile {
    col: i32,
    row: i32,
    data: RwLock<Arc<TileData>>,
    store: Arc<TileDataStore>,
}

impl Tile {
    pub fn new(col: i32, row: i32, data: Arc<TileData>, store: Arc<TileDataStore>) -> Tile {
        Tile {
            col,
            row,
            data: RwLock::new(data),
            store,
        }
    }

    pub fn col(&self) -> i32 {
        self.col
    }

    pub fn row(&self) -> i32 {
        self.row
    }

    /// Pixel rectangle this tile covers
    pub fn extent(&self) -> Rect {
        tile_rect(self.col, self.row)
    }

    /// Current data block. The returned handle pins the block's content;
    /// writes on the tile after this point detach instead of mutating it.
    pub fn data(&self) -> Arc<TileData> {
        self.data.read().unwrap().clone()
    }

    /// Repoint the tile at a different block. Used when history is
    /// replayed over the table.
    pub(crate) fn set_data(&self, data: Arc<TileData>) {
        *self.data.write().unwrap() = data;
    }

    /// Read access to the pixel bytes
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let data = self.data.read().unwrap().clone();
        data.with_data(f)
    }

    /// Write access to the pixel bytes, detaching the block first when
    /// it is shared with anyone else (clone tables, snapshots, the
    /// table's default data).
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut guard = self.data.write().unwrap();
        if Arc::strong_count(&guard) > 1 {
            log::trace!(
                "detaching shared tile data {} at ({}, {})",
                guard.id(),
                self.col,
                self.row
            );
            *guard = self.store.duplicate(&guard)?;
        }
        guard.with_data_mut(f)
    }
}

impl std::fmt::Debug for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("col", &self.col)
            .field("row", &self.row)
            .field("data", &*self.data.read().unwrap())
            .finish()
    }
}
