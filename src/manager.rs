use std::sync::{Arc, RwLock};

use crate::constants::{TILE_HEIGHT, TILE_WIDTH};
use crate::error::{Error, Result};
use crate::hash_table::TileHashTable;
use crate::memento::MementoManager;
use crate::store::TileDataStore;
use crate::tile::Tile;
use crate::types::{tile_rect, x_to_col, y_to_row, Rect};

/* The data area is divided into 64x64 pixel tiles laid out on a grid
 * with signed indexes, so the canvas grows in any direction. Tiles are
 * created on demand when a rectangle touching them is first written;
 * reads of untouched coordinates are answered from the default pixel
 * without allocating anything.
 */

/// Rectangular pixel I/O façade over the tile grid.
///
/// Translates caller-level byte rectangles into per-tile operations:
/// lazy creation, copy-on-write detachment, memento recording. Commit,
/// rollback and rollforward delegate to the memento history. Mutating
/// calls serialize behind an exclusive lock (so a commit never races an
/// in-flight write); reads share it.
pub struct TiledDataManager {
    pixel_size: usize,
    store: Arc<TileDataStore>,
    table: TileHashTable,
    state: RwLock<ManagerState>,
}

struct ManagerState {
    default_pixel: Vec<u8>,
    mementos: MementoManager,
    extent: ExtentState,
}

/// Pixel-space bounding box of the defined content, maintained
/// incrementally on tile creation and recalculated after removals.
#[derive(Debug, Clone, Copy)]
struct ExtentState {
    min_x: i32,
    min_y: i32,
    max_x: i32,
    max_y: i32,
}

impl ExtentState {
    fn empty() -> ExtentState {
        ExtentState {
            min_x: i32::MAX,
            min_y: i32::MAX,
            max_x: i32::MIN,
            max_y: i32::MIN,
        }
    }

    fn rect(&self) -> Rect {
        if self.max_x < self.min_x || self.max_y < self.min_y {
            Rect::empty()
        } else {
            Rect::new(
                self.min_x,
                self.min_y,
                self.max_x - self.min_x + 1,
                self.max_y - self.min_y + 1,
            )
        }
    }

    fn update(&mut self, col: i32, row: i32) {
        self.min_x = self.min_x.min(col * TILE_WIDTH);
        self.max_x = self.max_x.max((col + 1) * TILE_WIDTH - 1);
        self.min_y = self.min_y.min(row * TILE_HEIGHT);
        self.max_y = self.max_y.max((row + 1) * TILE_HEIGHT - 1);
    }

    fn set(&mut self, rect: Rect) {
        self.min_x = rect.x;
        self.min_y = rect.y;
        self.max_x = rect.right();
        self.max_y = rect.bottom();
    }

    fn recalculate(&mut self, table: &TileHashTable) {
        *self = ExtentState::empty();
        for tile in table.tiles() {
            self.update(tile.col(), tile.row());
        }
    }
}

impl TiledDataManager {
    /// Create a device with the given pixel size and default pixel,
    /// backed by the process-wide tile data store.
    pub fn new(pixel_size: usize, default_pixel: &[u8]) -> Result<TiledDataManager> {
        TiledDataManager::with_store(TileDataStore::global(), pixel_size, default_pixel)
    }

    /// Create a device on an explicitly injected store
    pub fn with_store(
        store: Arc<TileDataStore>,
        pixel_size: usize,
        default_pixel: &[u8],
    ) -> Result<TiledDataManager> {
        if default_pixel.len() != pixel_size {
            return Err(Error::BadPixelSize {
                expected: pixel_size,
                actual: default_pixel.len(),
            });
        }
        let default_data = store.create_tile_data(default_pixel);
        Ok(TiledDataManager {
            pixel_size,
            table: TileHashTable::new(store.clone(), default_data),
            store,
            state: RwLock::new(ManagerState {
                default_pixel: default_pixel.to_vec(),
                mementos: MementoManager::new(),
                extent: ExtentState::empty(),
            }),
        })
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn default_pixel(&self) -> Vec<u8> {
        self.state.read().unwrap().default_pixel.clone()
    }

    /// Replace the default pixel. Participates in undo history: a later
    /// rollback restores the previous default.
    pub fn set_default_pixel(&self, pixel: &[u8]) -> Result<()> {
        if pixel.len() != self.pixel_size {
            return Err(Error::BadPixelSize {
                expected: self.pixel_size,
                actual: pixel.len(),
            });
        }
        let mut state = self.state.write().unwrap();
        state
            .mementos
            .notify_default_changed(self.table.default_tile_data());
        self.table
            .set_default_tile_data(self.store.create_tile_data(pixel));
        state.default_pixel = pixel.to_vec();
        Ok(())
    }

    /// Bounding box of the defined content
    pub fn extent(&self) -> Rect {
        self.state.read().unwrap().extent.rect()
    }

    pub fn num_tiles(&self) -> usize {
        self.table.num_tiles()
    }

    pub fn tile_exists(&self, col: i32, row: i32) -> bool {
        self.table.tile_exists(col, row)
    }

    /// Direct tile lookup; None when the coordinate was never written
    pub fn tile(&self, col: i32, row: i32) -> Option<Arc<Tile>> {
        self.table.get(col, row)
    }

    /// Copy an interleaved pixel rectangle into the device. Tiles
    /// covered by the rectangle are created or detached as needed and
    /// the extent grows to cover them.
    pub fn write_bytes(&self, data: &[u8], x: i32, y: i32, w: i32, h: i32) -> Result<()> {
        let (w, h) = (w.max(0), h.max(0));
        let expected = (w as usize) * (h as usize) * self.pixel_size;
        if data.len() != expected {
            return Err(Error::BadBufferSize {
                expected,
                actual: data.len(),
            });
        }
        if w == 0 || h == 0 {
            return Ok(());
        }

        let mut state = self.state.write().unwrap();
        let rect = Rect::new(x, y, w, h);
        for row in y_to_row(rect.top())..=y_to_row(rect.bottom()) {
            for col in x_to_col(rect.left())..=x_to_col(rect.right()) {
                self.prepare_tile_write(&mut state, col, row);
                let (tile, _) = self.table.get_lazy(col, row);
                let tr = tile_rect(col, row);
                let clip = rect.intersect(&tr);
                tile.write(|bytes| {
                    copy_into_tile(bytes, &clip, &tr, data, &rect, self.pixel_size)
                })?;
            }
        }
        Ok(())
    }

    /// Copy a pixel rectangle out of the device. Never allocates tiles;
    /// unwritten regions come out as the default pixel.
    pub fn read_bytes(&self, data: &mut [u8], x: i32, y: i32, w: i32, h: i32) -> Result<()> {
        let (w, h) = (w.max(0), h.max(0));
        let expected = (w as usize) * (h as usize) * self.pixel_size;
        if data.len() != expected {
            return Err(Error::BadBufferSize {
                expected,
                actual: data.len(),
            });
        }
        if w == 0 || h == 0 {
            return Ok(());
        }

        let state = self.state.read().unwrap();
        let rect = Rect::new(x, y, w, h);
        for row in y_to_row(rect.top())..=y_to_row(rect.bottom()) {
            for col in x_to_col(rect.left())..=x_to_col(rect.right()) {
                let tr = tile_rect(col, row);
                let clip = rect.intersect(&tr);
                match self.table.get(col, row) {
                    Some(tile) => tile.read(|bytes| {
                        copy_from_tile(data, &rect, bytes, &tr, &clip, self.pixel_size)
                    })?,
                    None => fill_rect(data, &rect, &clip, &state.default_pixel),
                }
            }
        }
        Ok(())
    }

    /// Write per-channel planes. Channel sizes must add up to the pixel
    /// size; zero-size channels are legal and contribute nothing.
    pub fn write_planar_bytes(
        &self,
        planes: &[&[u8]],
        channel_sizes: &[usize],
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    ) -> Result<()> {
        let (w, h) = (w.max(0), h.max(0));
        self.check_planar_shape(planes.len(), channel_sizes)?;
        let num_pixels = (w as usize) * (h as usize);
        for (plane, &size) in planes.iter().zip(channel_sizes) {
            if plane.len() != num_pixels * size {
                return Err(Error::BadBufferSize {
                    expected: num_pixels * size,
                    actual: plane.len(),
                });
            }
        }

        let mut data = vec![0u8; num_pixels * self.pixel_size];
        for i in 0..num_pixels {
            let mut offset = i * self.pixel_size;
            for (plane, &size) in planes.iter().zip(channel_sizes) {
                data[offset..offset + size].copy_from_slice(&plane[i * size..(i + 1) * size]);
                offset += size;
            }
        }
        self.write_bytes(&data, x, y, w, h)
    }

    /// Read per-channel planes; the inverse of `write_planar_bytes`
    pub fn read_planar_bytes(
        &self,
        channel_sizes: &[usize],
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    ) -> Result<Vec<Vec<u8>>> {
        let (w, h) = (w.max(0), h.max(0));
        self.check_planar_shape(channel_sizes.len(), channel_sizes)?;
        let num_pixels = (w as usize) * (h as usize);

        let mut data = vec![0u8; num_pixels * self.pixel_size];
        self.read_bytes(&mut data, x, y, w, h)?;

        let mut planes: Vec<Vec<u8>> = channel_sizes
            .iter()
            .map(|&size| Vec::with_capacity(num_pixels * size))
            .collect();
        for i in 0..num_pixels {
            let mut offset = i * self.pixel_size;
            for (plane, &size) in planes.iter_mut().zip(channel_sizes) {
                plane.extend_from_slice(&data[offset..offset + size]);
                offset += size;
            }
        }
        Ok(planes)
    }

    fn check_planar_shape(&self, num_planes: usize, channel_sizes: &[usize]) -> Result<()> {
        if num_planes != channel_sizes.len() {
            return Err(Error::BadPlaneCount {
                planes: num_planes,
                channels: channel_sizes.len(),
            });
        }
        let sum: usize = channel_sizes.iter().sum();
        if sum != self.pixel_size {
            return Err(Error::BadChannelSizes {
                sum,
                pixel_size: self.pixel_size,
            });
        }
        Ok(())
    }

    /// Write one pixel
    pub fn set_pixel(&self, x: i32, y: i32, pixel: &[u8]) -> Result<()> {
        self.write_bytes(pixel, x, y, 1, 1)
    }

    /// Read one pixel
    pub fn pixel(&self, x: i32, y: i32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.pixel_size];
        self.read_bytes(&mut buf, x, y, 1, 1)?;
        Ok(buf)
    }

    /// Reset every tile; afterwards every read yields the default pixel,
    /// same as on a freshly constructed device.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap();
        for tile in self.table.tiles() {
            state
                .mementos
                .notify_tile_changed(tile.col(), tile.row(), Some(tile.data()));
        }
        self.table.clear();
        state.extent = ExtentState::empty();
    }

    /// Fill a rectangle with a pixel value, or with the default pixel
    /// when `pixel` is None. Tiles fully covered by a default-pixel
    /// clear are unlinked outright; tiles fully covered by another value
    /// share one pre-filled data block.
    pub fn clear_rect(&self, rect: Rect, pixel: Option<&[u8]>) -> Result<()> {
        let rect = rect.normalized();
        if rect.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write().unwrap();

        let clear_pixel = match pixel {
            Some(p) => {
                if p.len() != self.pixel_size {
                    return Err(Error::BadPixelSize {
                        expected: self.pixel_size,
                        actual: p.len(),
                    });
                }
                p.to_vec()
            }
            None => state.default_pixel.clone(),
        };
        let is_default = clear_pixel == state.default_pixel;

        // Clearing with the default pixel outside the extent is a no-op
        let rect = if is_default {
            rect.intersect(&state.extent.rect())
        } else {
            rect
        };
        if rect.is_empty() {
            return Ok(());
        }

        let mut cleared_data = None;
        let mut removed_any = false;
        for row in y_to_row(rect.top())..=y_to_row(rect.bottom()) {
            for col in x_to_col(rect.left())..=x_to_col(rect.right()) {
                let tr = tile_rect(col, row);
                let clip = rect.intersect(&tr);
                if clip == tr {
                    let before = self.table.get(col, row).map(|t| t.data());
                    let existed = before.is_some();
                    state.mementos.notify_tile_changed(col, row, before);
                    if is_default {
                        if self.table.remove(col, row).is_some() {
                            removed_any = true;
                        }
                    } else {
                        let data = cleared_data
                            .get_or_insert_with(|| self.store.create_tile_data(&clear_pixel))
                            .clone();
                        if !existed {
                            state.extent.update(col, row);
                        }
                        self.table
                            .add(Arc::new(Tile::new(col, row, data, self.store.clone())));
                    }
                } else {
                    self.prepare_tile_write(&mut state, col, row);
                    let (tile, _) = self.table.get_lazy(col, row);
                    tile.write(|bytes| fill_tile_rows(bytes, &clip, &tr, &clear_pixel))?;
                }
            }
        }
        if removed_any {
            state.extent.recalculate(&self.table);
        }
        Ok(())
    }

    /// Shrink the logical bounding box. Tiles fully outside the new
    /// rectangle are released (recorded for undo); partially covered
    /// tiles have their outside pixels reset to the default. Growing is
    /// a no-op, the extent grows automatically on write.
    pub fn set_extent(&self, rect: Rect) -> Result<()> {
        let rect = rect.normalized();
        let mut state = self.state.write().unwrap();
        let old = state.extent.rect();
        if old.is_empty() || rect.contains(&old) {
            return Ok(());
        }

        for tile in self.table.tiles() {
            let tr = tile.extent();
            if rect.contains(&tr) {
                continue;
            }
            state
                .mementos
                .notify_tile_changed(tile.col(), tile.row(), Some(tile.data()));
            if rect.intersects(&tr) {
                // Keep the inside, reset the rest to the default pixel
                let keep = rect.intersect(&tr).translated(-tr.x, -tr.y);
                let default_pixel = state.default_pixel.clone();
                let pixel_size = self.pixel_size;
                tile.write(|bytes| {
                    for ty in 0..TILE_HEIGHT {
                        for tx in 0..TILE_WIDTH {
                            if !keep.contains_point(tx, ty) {
                                let offset =
                                    ((ty * TILE_WIDTH + tx) as usize) * pixel_size;
                                bytes[offset..offset + pixel_size]
                                    .copy_from_slice(&default_pixel);
                            }
                        }
                    }
                })?;
            } else {
                self.table.remove(tile.col(), tile.row());
            }
        }

        state.extent.set(rect);
        Ok(())
    }

    /// Seal everything changed since the last commit into the history.
    /// Committing with no pending changes is a no-op. Returns true when
    /// a history entry was added.
    pub fn commit(&self) -> bool {
        let mut state = self.state.write().unwrap();
        state.mementos.commit(&self.table)
    }

    /// Undo the most recent committed change-set. Safe no-op at the
    /// oldest point; returns whether the device moved.
    pub fn rollback(&self) -> bool {
        let mut state = self.state.write().unwrap();
        let moved = state.mementos.rollback(&self.table, &self.store);
        if moved {
            self.after_history_move(&mut state);
        }
        moved
    }

    /// Redo the next change-set forward. Safe no-op at the newest point.
    pub fn rollforward(&self) -> bool {
        let mut state = self.state.write().unwrap();
        let moved = state.mementos.rollforward(&self.table, &self.store);
        if moved {
            self.after_history_move(&mut state);
        }
        moved
    }

    /// Committed history length and current cursor position
    pub fn history_position(&self) -> (usize, usize) {
        let state = self.state.read().unwrap();
        (state.mementos.cursor(), state.mementos.history_len())
    }

    /// Dump table and store statistics to the log. Diagnostic only.
    pub fn debug_print_info(&self) {
        let state = self.state.read().unwrap();
        log::debug!(
            "tiled data manager: pixel size {}, extent {:?}, history {}/{}",
            self.pixel_size,
            state.extent.rect(),
            state.mementos.cursor(),
            state.mementos.history_len()
        );
        drop(state);
        self.table.debug_print_info();
        log::debug!(
            "tile data store: {} blocks, {} bytes resident",
            self.store.num_tile_data(),
            self.store.resident_bytes()
        );
    }

    /// Record a memento before-image for (col, row) and grow the extent
    /// when the tile is about to be created
    fn prepare_tile_write(&self, state: &mut ManagerState, col: i32, row: i32) {
        let before = self.table.get(col, row).map(|tile| tile.data());
        if before.is_none() {
            state.extent.update(col, row);
        }
        state.mementos.notify_tile_changed(col, row, before);
    }

    /// Restore derived state after the history replayed over the table
    fn after_history_move(&self, state: &mut ManagerState) {
        let default_data = self.table.default_tile_data();
        match default_data.with_data(|bytes| bytes[..self.pixel_size].to_vec()) {
            Ok(pixel) => state.default_pixel = pixel,
            Err(err) => log::warn!("could not refresh default pixel after history move: {}", err),
        }
        state.extent.recalculate(&self.table);
    }
}

/// Deep duplication for layer copies: tile data is shared copy-on-write,
/// the history is not carried over.
impl Clone for TiledDataManager {
    fn clone(&self) -> TiledDataManager {
        let state = self.state.read().unwrap();
        TiledDataManager {
            pixel_size: self.pixel_size,
            store: self.store.clone(),
            table: self.table.deep_copy(),
            state: RwLock::new(ManagerState {
                default_pixel: state.default_pixel.clone(),
                mementos: MementoManager::new(),
                extent: state.extent,
            }),
        }
    }
}

impl std::fmt::Debug for TiledDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledDataManager")
            .field("pixel_size", &self.pixel_size)
            .field("num_tiles", &self.table.num_tiles())
            .field("extent", &self.extent())
            .finish()
    }
}

/// Copy the clipped sub-rectangle of `src` into the tile buffer
fn copy_into_tile(
    tile_bytes: &mut [u8],
    clip: &Rect,
    tile_r: &Rect,
    src: &[u8],
    src_rect: &Rect,
    pixel_size: usize,
) {
    let line = clip.w as usize * pixel_size;
    for dy in 0..clip.h {
        let ty = (clip.y - tile_r.y + dy) as usize;
        let tx = (clip.x - tile_r.x) as usize;
        let tile_off = (ty * TILE_WIDTH as usize + tx) * pixel_size;
        let sy = (clip.y - src_rect.y + dy) as usize;
        let sx = (clip.x - src_rect.x) as usize;
        let src_off = (sy * src_rect.w as usize + sx) * pixel_size;
        tile_bytes[tile_off..tile_off + line].copy_from_slice(&src[src_off..src_off + line]);
    }
}

/// Copy the clipped sub-rectangle of the tile buffer into `dst`
fn copy_from_tile(
    dst: &mut [u8],
    dst_rect: &Rect,
    tile_bytes: &[u8],
    tile_r: &Rect,
    clip: &Rect,
    pixel_size: usize,
) {
    let line = clip.w as usize * pixel_size;
    for dy in 0..clip.h {
        let ty = (clip.y - tile_r.y + dy) as usize;
        let tx = (clip.x - tile_r.x) as usize;
        let tile_off = (ty * TILE_WIDTH as usize + tx) * pixel_size;
        let oy = (clip.y - dst_rect.y + dy) as usize;
        let ox = (clip.x - dst_rect.x) as usize;
        let dst_off = (oy * dst_rect.w as usize + ox) * pixel_size;
        dst[dst_off..dst_off + line].copy_from_slice(&tile_bytes[tile_off..tile_off + line]);
    }
}

/// Fill the clipped sub-rectangle of the tile buffer with one pixel value
fn fill_tile_rows(tile_bytes: &mut [u8], clip: &Rect, tile_r: &Rect, pixel: &[u8]) {
    let pixel_size = pixel.len();
    for dy in 0..clip.h {
        let ty = (clip.y - tile_r.y + dy) as usize;
        let tx = (clip.x - tile_r.x) as usize;
        let offset = (ty * TILE_WIDTH as usize + tx) * pixel_size;
        let line = &mut tile_bytes[offset..offset + clip.w as usize * pixel_size];
        for chunk in line.chunks_exact_mut(pixel_size) {
            chunk.copy_from_slice(pixel);
        }
    }
}

/// Fill the clipped sub-rectangle of `dst` with one pixel value
fn fill_rect(dst: &mut [u8], dst_rect: &Rect, clip: &Rect, pixel: &[u8]) {
    let pixel_size = pixel.len();
    for dy in 0..clip.h {
        let oy = (clip.y - dst_rect.y + dy) as usize;
        let ox = (clip.x - dst_rect.x) as usize;
        let offset = (oy * dst_rect.w as usize + ox) * pixel_size;
        let line = &mut dst[offset..offset + clip.w as usize * pixel_size];
        for chunk in line.chunks_exact_mut(pixel_size) {
            chunk.copy_from_slice(pixel);
        }
    }
}
