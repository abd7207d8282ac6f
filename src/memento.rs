use std::collections::HashMap;
use std::sync::Arc;

use crate::hash_table::TileHashTable;
use crate::store::TileDataStore;
use crate::tile::Tile;
use crate::tile_data::TileData;

/// Per-coordinate structural change between two commit points.
/// `None` means "no tile linked there".
struct TileDiff {
    col: i32,
    row: i32,
    before: Option<Arc<TileData>>,
    after: Option<Arc<TileData>>,
}

/// Immutable record of everything that changed between two commits.
/// Holding the before/after data blocks keeps them alive; copy-on-write
/// at the tile level guarantees live edits never mutate them.
pub struct Memento {
    diffs: Vec<TileDiff>,
    default_change: Option<(Arc<TileData>, Arc<TileData>)>,
}

impl Memento {
    pub fn num_changes(&self) -> usize {
        self.diffs.len() + usize::from(self.default_change.is_some())
    }
}

/// Records structural tile changes and replays them backward and
/// forward along a linear history.
///
/// Mutating operations report the state a coordinate had before its
/// first change since the last commit; `commit` pairs those
/// before-images with the live state and seals the result. The cursor
/// walks the committed sequence; committing while rolled back drops the
/// abandoned forward tail, so history stays linear.
pub struct MementoManager {
    /// First-touch before-images since the last commit
    journal: HashMap<(i32, i32), Option<Arc<TileData>>>,
    default_before: Option<Arc<TileData>>,
    history: Vec<Memento>,
    /// Number of committed mementos currently applied
    cursor: usize,
}

impl MementoManager {
    pub fn new() -> MementoManager {
        MementoManager {
            journal: HashMap::new(),
            default_before: None,
            history: Vec::new(),
            cursor: 0,
        }
    }

    /// Record the state of (col, row) before a structural change.
    /// Only the first change per coordinate per transaction sticks.
    pub fn notify_tile_changed(&mut self, col: i32, row: i32, before: Option<Arc<TileData>>) {
        self.journal.entry((col, row)).or_insert(before);
    }

    /// Record the default tile data before it gets replaced
    pub fn notify_default_changed(&mut self, before: Arc<TileData>) {
        self.default_before.get_or_insert(before);
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.journal.is_empty() || self.default_before.is_some()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Seal the pending changes into a memento and append it.
    /// A commit with nothing recorded is a legal no-op that does not
    /// grow history. Returns true when a memento was actually added.
    pub fn commit(&mut self, table: &TileHashTable) -> bool {
        let mut diffs = Vec::with_capacity(self.journal.len());
        for ((col, row), before) in self.journal.drain() {
            let after = table.get(col, row).map(|tile| tile.data());
            let unchanged = match (&before, &after) {
                (None, None) => true,
                (Some(b), Some(a)) => Arc::ptr_eq(b, a),
                _ => false,
            };
            if !unchanged {
                diffs.push(TileDiff { col, row, before, after });
            }
        }

        let default_change = self.default_before.take().and_then(|before| {
            let after = table.default_tile_data();
            if Arc::ptr_eq(&before, &after) {
                None
            } else {
                Some((before, after))
            }
        });

        if diffs.is_empty() && default_change.is_none() {
            return false;
        }

        // Committing while rolled back abandons the forward tail
        self.history.truncate(self.cursor);
        self.history.push(Memento { diffs, default_change });
        self.cursor += 1;
        log::trace!(
            "committed memento {} with {} changes",
            self.cursor,
            self.history[self.cursor - 1].num_changes()
        );
        true
    }

    /// Undo the most recent applied memento. Safe no-op at the oldest
    /// point; any uncommitted changes are discarded first.
    pub fn rollback(&mut self, table: &TileHashTable, store: &Arc<TileDataStore>) -> bool {
        self.discard_pending();
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        let memento = &self.history[self.cursor];
        for diff in memento.diffs.iter().rev() {
            apply_target(table, store, diff.col, diff.row, &diff.before);
        }
        if let Some((before, _)) = &memento.default_change {
            table.set_default_tile_data(before.clone());
        }
        log::trace!("rolled back to memento cursor {}", self.cursor);
        true
    }

    /// Redo the next memento forward. Safe no-op at the newest point.
    pub fn rollforward(&mut self, table: &TileHashTable, store: &Arc<TileDataStore>) -> bool {
        self.discard_pending();
        if self.cursor == self.history.len() {
            return false;
        }
        let memento = &self.history[self.cursor];
        for diff in &memento.diffs {
            apply_target(table, store, diff.col, diff.row, &diff.after);
        }
        if let Some((_, after)) = &memento.default_change {
            table.set_default_tile_data(after.clone());
        }
        self.cursor += 1;
        log::trace!("rolled forward to memento cursor {}", self.cursor);
        true
    }

    fn discard_pending(&mut self) {
        if self.has_pending_changes() {
            log::debug!(
                "discarding {} uncommitted tile changes before history move",
                self.journal.len()
            );
            self.journal.clear();
            self.default_before = None;
        }
    }
}

impl Default for MementoManager {
    fn default() -> Self {
        MementoManager::new()
    }
}

/// Bring (col, row) to the given target state: link a tile over the
/// recorded block, repoint an existing tile, or unlink.
fn apply_target(
    table: &TileHashTable,
    store: &Arc<TileDataStore>,
    col: i32,
    row: i32,
    target: &Option<Arc<TileData>>,
) {
    match target {
        Some(data) => match table.get(col, row) {
            Some(tile) => tile.set_data(data.clone()),
            None => table.add(Arc::new(Tile::new(col, row, data.clone(), store.clone()))),
        },
        None => {
            table.remove(col, row);
        }
    }
}
