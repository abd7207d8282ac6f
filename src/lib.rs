//! Tiled, copy-on-write raster storage with transactional undo.
//!
//! The canvas is an unbounded grid of 64x64 pixel tiles created on
//! demand. Tile data blocks are shared between devices and history
//! snapshots and detached copy-on-write before mutation; a process-wide
//! store reclaims blocks and swaps cold ones to disk. Commit, rollback
//! and rollforward walk a linear memento history.

pub mod constants;
mod error;
mod hash_table;
mod manager;
mod memento;
mod store;
mod tile;
mod tile_data;
mod types;

pub use error::{Error, Result};
pub use hash_table::TileHashTable;
pub use manager::TiledDataManager;
pub use memento::{Memento, MementoManager};
pub use store::TileDataStore;
pub use tile::Tile;
pub use tile_data::TileData;
pub use types::{tile_rect, x_to_col, y_to_row, Rect};
