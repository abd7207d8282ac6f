// Tile geometry
/// Tile side length in pixels. Power of two; the pixel-to-tile
/// coordinate mapping relies on that.
pub const TILE_WIDTH: i32 = 64;
/// Tiles are square but width and height are kept separate to keep the
/// arithmetic readable.
pub const TILE_HEIGHT: i32 = 64;

// Hash table
/// Number of buckets in a tile hash table. Fixed for the table's
/// lifetime; there is no resizing.
pub const HASH_TABLE_SIZE: usize = 1024;

/// Chain length above which debug_print_info() starts complaining.
pub const CHAIN_LENGTH_WARN: usize = 16;

// Tile data store
/// Resident-memory budget before cold tile data gets swapped out, in bytes.
pub const DEFAULT_MEMORY_LIMIT: usize = 256 * 1024 * 1024;

/// Initial swap file capacity. The mapping doubles when it fills up.
pub const SWAP_INITIAL_CAPACITY: usize = 4 * 1024 * 1024;

/// Hash function for tile coordinates: deliberately cheap mixing that
/// trades chain length for speed. Raster edits cluster spatially, so
/// chains stay short in practice.
#[inline]
pub fn tile_hash(col: i32, row: i32) -> usize {
    (((row << 5) + (col & 0x1f)) & 0x3ff) as usize
}
