use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::constants::{TILE_HEIGHT, TILE_WIDTH};
use crate::error::Result;
use crate::store::{StoreShared, SwapFile, SwapSlot};

/// One fixed-size block of raw pixel bytes backing a tile.
///
/// Blocks are shared between any number of `Tile` handles and historical
/// snapshots through `Arc<TileData>`; the buffer itself is never mutated
/// while shared (copy-on-write detachment happens at the `Tile` level,
/// where the holder count is visible). The buffer may live in memory or
/// in the store's swap file; `with_data`/`with_data_mut` bring it back
/// transparently.
pub struct TileData {
    id: u64,
    pixel_size: usize,
    content: RwLock<TileBytes>,
    /// Store-wide access tick, used to pick cold blocks for swapping
    last_access: AtomicU64,
    shared: Arc<StoreShared>,
}

enum TileBytes {
    Resident(Box<[u8]>),
    Swapped(SwapSlot),
}

impl TileData {
    /// Byte length of a block with the given pixel size
    pub fn byte_size_for(pixel_size: usize) -> usize {
        pixel_size * (TILE_WIDTH * TILE_HEIGHT) as usize
    }

    /// Create a block filled with `pixel` repeated over the whole tile.
    /// `pixel.len()` must equal `pixel_size`; the store validates that
    /// before calling.
    pub(crate) fn new_with_pixel(
        shared: Arc<StoreShared>,
        id: u64,
        pixel: &[u8],
    ) -> TileData {
        let pixel_size = pixel.len();
        let len = Self::byte_size_for(pixel_size);
        let mut bytes = vec![0u8; len].into_boxed_slice();
        for chunk in bytes.chunks_exact_mut(pixel_size) {
            chunk.copy_from_slice(pixel);
        }
        shared.resident_bytes.fetch_add(len, Ordering::Relaxed);
        TileData {
            id,
            pixel_size,
            content: RwLock::new(TileBytes::Resident(bytes)),
            last_access: AtomicU64::new(shared.next_tick()),
            shared,
        }
    }

    /// Create a block holding a copy of `bytes`. Used for copy-on-write
    /// duplication.
    pub(crate) fn new_with_bytes(
        shared: Arc<StoreShared>,
        id: u64,
        pixel_size: usize,
        bytes: &[u8],
    ) -> TileData {
        debug_assert_eq!(bytes.len(), Self::byte_size_for(pixel_size));
        shared
            .resident_bytes
            .fetch_add(bytes.len(), Ordering::Relaxed);
        TileData {
            id,
            pixel_size,
            content: RwLock::new(TileBytes::Resident(bytes.to_vec().into_boxed_slice())),
            last_access: AtomicU64::new(shared.next_tick()),
            shared,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn byte_size(&self) -> usize {
        Self::byte_size_for(self.pixel_size)
    }

    pub(crate) fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    pub fn is_swapped(&self) -> bool {
        matches!(*self.content.read().unwrap(), TileBytes::Swapped(_))
    }

    fn touch(&self) {
        self.last_access
            .store(self.shared.next_tick(), Ordering::Relaxed);
    }

    /// Run `f` over the pixel bytes, swapping the block back in first if
    /// it went cold.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.touch();
        {
            let guard = self.content.read().unwrap();
            if let TileBytes::Resident(ref bytes) = *guard {
                return Ok(f(bytes));
            }
        }
        let mut guard = self.content.write().unwrap();
        self.swap_in(&mut guard)?;
        match *guard {
            TileBytes::Resident(ref bytes) => Ok(f(bytes)),
            TileBytes::Swapped(_) => unreachable!("swap_in left block swapped"),
        }
    }

    /// Mutable variant of `with_data`. The caller is responsible for
    /// having detached the block first when it is shared.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.touch();
        let mut guard = self.content.write().unwrap();
        self.swap_in(&mut guard)?;
        match *guard {
            TileBytes::Resident(ref mut bytes) => Ok(f(bytes)),
            TileBytes::Swapped(_) => unreachable!("swap_in left block swapped"),
        }
    }

    fn swap_in(&self, guard: &mut TileBytes) -> Result<()> {
        if let TileBytes::Swapped(slot) = *guard {
            let mut swap = self.shared.swap.lock().unwrap();
            let swap = swap
                .as_mut()
                .expect("tile data is marked swapped but no swap file exists");
            let mut bytes = vec![0u8; slot.len].into_boxed_slice();
            swap.fetch(slot, &mut bytes);
            swap.release(slot);
            self.shared
                .resident_bytes
                .fetch_add(bytes.len(), Ordering::Relaxed);
            log::trace!("swapped in tile data {} ({} bytes)", self.id, bytes.len());
            *guard = TileBytes::Resident(bytes);
        }
        Ok(())
    }

    /// Push the buffer out to the swap file. Returns false without
    /// blocking when the block is busy or already swapped.
    pub(crate) fn swap_out(&self) -> Result<bool> {
        let mut guard = match self.content.try_write() {
            Ok(guard) => guard,
            Err(_) => return Ok(false),
        };
        let bytes = match *guard {
            TileBytes::Resident(ref bytes) => bytes,
            TileBytes::Swapped(_) => return Ok(false),
        };
        let slot = {
            let mut swap = self.shared.swap.lock().unwrap();
            if swap.is_none() {
                *swap = Some(SwapFile::create()?);
            }
            swap.as_mut().expect("swap file was just created").store(bytes)?
        };
        self.shared
            .resident_bytes
            .fetch_sub(bytes.len(), Ordering::Relaxed);
        log::trace!("swapped out tile data {} ({} bytes)", self.id, bytes.len());
        *guard = TileBytes::Swapped(slot);
        Ok(true)
    }
}

impl Drop for TileData {
    fn drop(&mut self) {
        match *self.content.get_mut().unwrap() {
            TileBytes::Resident(ref bytes) => {
                self.shared
                    .resident_bytes
                    .fetch_sub(bytes.len(), Ordering::Relaxed);
            }
            TileBytes::Swapped(slot) => {
                if let Some(swap) = self.shared.swap.lock().unwrap().as_mut() {
                    swap.release(slot);
                }
            }
        }
    }
}

impl std::fmt::Debug for TileData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileData")
            .field("id", &self.id)
            .field("pixel_size", &self.pixel_size)
            .field("swapped", &self.is_swapped())
            .finish()
    }
}
