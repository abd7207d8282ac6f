use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use lazy_static::lazy_static;
use memmap2::{MmapMut, MmapOptions};

use crate::constants::{DEFAULT_MEMORY_LIMIT, SWAP_INITIAL_CAPACITY};
use crate::error::Result;
use crate::tile_data::TileData;

lazy_static! {
    /// Process-wide default store. Managers built with
    /// `TiledDataManager::new` share it; anything that wants an isolated
    /// store injects its own through `with_store`.
    static ref GLOBAL_STORE: Arc<TileDataStore> = Arc::new(TileDataStore::new());
}

/// State shared between the store and every `TileData` it allocated.
/// Blocks adjust the resident-byte account and return swap slots on
/// their own, so the store never has to witness a drop.
pub(crate) struct StoreShared {
    pub(crate) swap: Mutex<Option<SwapFile>>,
    pub(crate) resident_bytes: AtomicUsize,
    access_clock: AtomicU64,
}

impl StoreShared {
    pub(crate) fn next_tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed)
    }
}

/// Allocation and reclamation authority for `TileData` blocks.
///
/// The store hands out new and duplicated blocks, keeps weak references
/// to every live one, and relocates cold blocks to a disk-backed swap
/// file when resident memory exceeds the configured limit. Swapped
/// blocks keep their identity; content comes back transparently on the
/// next access.
pub struct TileDataStore {
    shared: Arc<StoreShared>,
    registry: Mutex<HashMap<u64, Weak<TileData>>>,
    next_id: AtomicU64,
    memory_limit: AtomicUsize,
}

impl TileDataStore {
    pub fn new() -> TileDataStore {
        TileDataStore::with_memory_limit(DEFAULT_MEMORY_LIMIT)
    }

    pub fn with_memory_limit(limit: usize) -> TileDataStore {
        TileDataStore {
            shared: Arc::new(StoreShared {
                swap: Mutex::new(None),
                resident_bytes: AtomicUsize::new(0),
                access_clock: AtomicU64::new(0),
            }),
            registry: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            memory_limit: AtomicUsize::new(limit),
        }
    }

    /// The process-wide store
    pub fn global() -> Arc<TileDataStore> {
        GLOBAL_STORE.clone()
    }

    /// Create a block filled with `pixel` repeated over the tile.
    /// Allocation failure is fatal, as it is for the rest of the process.
    pub fn create_tile_data(&self, pixel: &[u8]) -> Arc<TileData> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let data = Arc::new(TileData::new_with_pixel(self.shared.clone(), id, pixel));
        self.register(&data);
        data
    }

    /// Deep copy of an existing block, for copy-on-write detachment
    pub fn duplicate(&self, src: &TileData) -> Result<Arc<TileData>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let data = src.with_data(|bytes| {
            Arc::new(TileData::new_with_bytes(
                self.shared.clone(),
                id,
                src.pixel_size(),
                bytes,
            ))
        })?;
        self.register(&data);
        Ok(data)
    }

    fn register(&self, data: &Arc<TileData>) {
        self.registry
            .lock()
            .unwrap()
            .insert(data.id(), Arc::downgrade(data));
        self.evict_if_needed();
    }

    /// Number of blocks still referenced somewhere
    pub fn num_tile_data(&self) -> usize {
        let mut registry = self.registry.lock().unwrap();
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.len()
    }

    /// Bytes currently held in memory (as opposed to the swap file)
    pub fn resident_bytes(&self) -> usize {
        self.shared.resident_bytes.load(Ordering::Relaxed)
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit.load(Ordering::Relaxed)
    }

    /// Change the resident-memory budget. Takes effect on the next
    /// allocation; call `evict_if_needed` to apply it immediately.
    pub fn set_memory_limit(&self, limit: usize) {
        self.memory_limit.store(limit, Ordering::Relaxed);
    }

    /// Swap out least-recently-used blocks until resident memory fits
    /// the budget again. Swap failures are logged and stop the pass;
    /// the affected blocks simply stay resident.
    pub fn evict_if_needed(&self) {
        let limit = self.memory_limit();
        if self.resident_bytes() <= limit {
            return;
        }

        // Oldest access tick first
        let mut candidates: Vec<(u64, Arc<TileData>)> = {
            let mut registry = self.registry.lock().unwrap();
            registry.retain(|_, weak| weak.strong_count() > 0);
            registry
                .values()
                .filter_map(Weak::upgrade)
                .filter(|data| !data.is_swapped())
                .map(|data| (data.last_access(), data))
                .collect()
        };
        candidates.sort_by_key(|&(tick, _)| tick);

        let mut evicted = 0usize;
        for (_, data) in candidates {
            if self.resident_bytes() <= limit {
                break;
            }
            match data.swap_out() {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(err) => {
                    log::warn!("tile data swap-out failed, keeping block resident: {}", err);
                    break;
                }
            }
        }
        if evicted > 0 {
            log::debug!(
                "evicted {} tile data blocks, {} bytes resident of {} allowed",
                evicted,
                self.resident_bytes(),
                limit
            );
        }
    }
}

impl Default for TileDataStore {
    fn default() -> Self {
        TileDataStore::new()
    }
}

/// Where in the swap file a block's bytes live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SwapSlot {
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

/// Memory-mapped, slot-allocated spill file for cold tile data.
///
/// Slots are sized exactly to the block they hold; freed slots are kept
/// on per-size free lists and reused. The backing file is anonymous and
/// disappears with the process.
pub(crate) struct SwapFile {
    file: File,
    map: MmapMut,
    capacity: usize,
    end: usize,
    free: HashMap<usize, Vec<usize>>,
}

impl SwapFile {
    pub(crate) fn create() -> Result<SwapFile> {
        let file = tempfile::tempfile()?;
        file.set_len(SWAP_INITIAL_CAPACITY as u64)?;
        let map = unsafe { MmapOptions::new().len(SWAP_INITIAL_CAPACITY).map_mut(&file)? };
        log::debug!("created swap file with {} bytes capacity", SWAP_INITIAL_CAPACITY);
        Ok(SwapFile {
            file,
            map,
            capacity: SWAP_INITIAL_CAPACITY,
            end: 0,
            free: HashMap::new(),
        })
    }

    /// Copy `bytes` into a free slot, growing the file when full
    pub(crate) fn store(&mut self, bytes: &[u8]) -> Result<SwapSlot> {
        let len = bytes.len();
        let offset = match self.free.get_mut(&len).and_then(Vec::pop) {
            Some(offset) => offset,
            None => {
                if self.end + len > self.capacity {
                    self.grow(self.end + len)?;
                }
                let offset = self.end;
                self.end += len;
                offset
            }
        };
        self.map[offset..offset + len].copy_from_slice(bytes);
        Ok(SwapSlot { offset, len })
    }

    /// Copy a slot's bytes back out. The slot stays allocated until
    /// `release`.
    pub(crate) fn fetch(&self, slot: SwapSlot, dst: &mut [u8]) {
        debug_assert_eq!(dst.len(), slot.len);
        dst.copy_from_slice(&self.map[slot.offset..slot.offset + slot.len]);
    }

    pub(crate) fn release(&mut self, slot: SwapSlot) {
        self.free.entry(slot.len).or_default().push(slot.offset);
    }

    fn grow(&mut self, needed: usize) -> Result<()> {
        let mut capacity = self.capacity;
        while capacity < needed {
            capacity *= 2;
        }
        self.file.set_len(capacity as u64)?;
        self.map = unsafe { MmapOptions::new().len(capacity).map_mut(&self.file)? };
        log::debug!("grew swap file to {} bytes", capacity);
        self.capacity = capacity;
        Ok(())
    }
}
