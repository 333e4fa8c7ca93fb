//! Committed selection plus the pending delta of an in-flight gesture.
//!
//! Cell visits during a drag only touch the pending buffers. The buffers
//! are folded into the committed list by [`SelectionEngine::commit`], which
//! the host drives at most once per animation frame (or once at gesture end
//! in preview mode).

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::slot::{normalize, SlotKey, TimeSlot};

/// Whether a drag adds or removes cells. Fixed by the anchor cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintMode {
    Add,
    Remove,
}

/// Additions and removals not yet committed. A key is never in both sets.
#[derive(Debug, Clone, Default)]
pub struct PendingDelta {
    to_add: HashMap<SlotKey, TimeSlot>,
    to_remove: HashSet<SlotKey>,
}

impl PendingDelta {
    fn mark_add(&mut self, slot: TimeSlot) {
        let key = slot.key();
        self.to_remove.remove(&key);
        self.to_add.insert(key, slot);
    }

    fn mark_remove(&mut self, key: SlotKey) {
        self.to_add.remove(&key);
        self.to_remove.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn adds(&self, key: &SlotKey) -> bool {
        self.to_add.contains_key(key)
    }

    pub fn removes(&self, key: &SlotKey) -> bool {
        self.to_remove.contains(key)
    }

    pub fn add_count(&self) -> usize {
        self.to_add.len()
    }

    pub fn remove_count(&self) -> usize {
        self.to_remove.len()
    }

    pub fn is_disjoint(&self) -> bool {
        self.to_remove.iter().all(|k| !self.to_add.contains_key(k))
    }

    fn clear(&mut self) {
        self.to_add.clear();
        self.to_remove.clear();
    }
}

#[derive(Debug, Clone)]
struct ActiveGesture {
    mode: PaintMode,
    /// Committed list at gesture start, restored on abort.
    baseline: Vec<TimeSlot>,
    visited: HashSet<SlotKey>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionEngine {
    committed: Vec<TimeSlot>,
    pending: PendingDelta,
    gesture: Option<ActiveGesture>,
    preview: bool,
    frame_requested: bool,
}

impl SelectionEngine {
    pub fn new(preview: bool) -> Self {
        Self {
            preview,
            ..Self::default()
        }
    }

    pub fn with_slots(mut slots: Vec<TimeSlot>, preview: bool) -> Self {
        normalize(&mut slots);
        Self {
            committed: slots,
            preview,
            ..Self::default()
        }
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.committed
    }

    pub fn pending(&self) -> &PendingDelta {
        &self.pending
    }

    pub fn paint_mode(&self) -> Option<PaintMode> {
        self.gesture.as_ref().map(|g| g.mode)
    }

    pub fn is_gesture_active(&self) -> bool {
        self.gesture.is_some()
    }

    pub fn is_preview(&self) -> bool {
        self.preview
    }

    pub fn frame_requested(&self) -> bool {
        self.frame_requested
    }

    /// Committed state only.
    pub fn is_selected(&self, slot: &TimeSlot) -> bool {
        self.committed.binary_search(slot).is_ok()
    }

    /// What a cell should look like right now. Pending changes are shown
    /// only while previewing an active gesture; otherwise they reach the
    /// committed list on the next frame anyway.
    pub fn is_selected_render(&self, slot: &TimeSlot) -> bool {
        let mut selected = self.is_selected(slot);
        if self.preview && self.gesture.is_some() {
            let key = slot.key();
            if self.pending.removes(&key) {
                selected = false;
            }
            if self.pending.adds(&key) {
                selected = true;
            }
        }
        selected
    }

    /// Flip one cell. Returns whether the cell is selected afterwards.
    pub fn toggle(&mut self, slot: TimeSlot) -> bool {
        match self.committed.binary_search(&slot) {
            Ok(idx) => {
                self.committed.remove(idx);
                false
            }
            Err(idx) => {
                self.committed.insert(idx, slot);
                true
            }
        }
    }

    /// Start a paint gesture anchored at `anchor` and paint the anchor.
    ///
    /// Returns `true` when the host must schedule an animation frame.
    pub fn begin_gesture(&mut self, anchor: TimeSlot) -> bool {
        let mode = if self.is_selected(&anchor) {
            PaintMode::Remove
        } else {
            PaintMode::Add
        };
        self.pending.clear();
        self.gesture = Some(ActiveGesture {
            mode,
            baseline: self.committed.clone(),
            visited: HashSet::new(),
        });
        self.apply_to_cell(anchor)
    }

    /// Paint one cell with the gesture's mode. A cell already visited by
    /// this gesture is a no-op. Returns `true` when a frame must be requested.
    pub fn apply_to_cell(&mut self, slot: TimeSlot) -> bool {
        let Some(gesture) = self.gesture.as_mut() else {
            return false;
        };
        let key = slot.key();
        if !gesture.visited.insert(key.clone()) {
            return false;
        }
        match gesture.mode {
            PaintMode::Add => self.pending.mark_add(slot),
            PaintMode::Remove => self.pending.mark_remove(key),
        }
        self.schedule_commit()
    }

    fn schedule_commit(&mut self) -> bool {
        if self.preview && self.gesture.is_some() {
            return false;
        }
        if self.frame_requested {
            return false;
        }
        self.frame_requested = true;
        true
    }

    /// Animation-frame callback. Coalesces every cell visited since the
    /// last frame into one commit. Returns whether the committed list changed.
    pub fn on_animation_frame(&mut self) -> bool {
        if !std::mem::take(&mut self.frame_requested) {
            return false;
        }
        self.commit()
    }

    /// Fold the pending delta into the committed list: drop removals, add
    /// new keys, sort. Clears both pending sets.
    pub fn commit(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let before = self.committed.len();
        let mut removed = false;
        self.committed.retain(|s| {
            let keep = !self.pending.to_remove.contains(&s.key());
            removed |= !keep;
            keep
        });
        let present: HashSet<SlotKey> = self.committed.iter().map(TimeSlot::key).collect();
        let additions: Vec<TimeSlot> = self
            .pending
            .to_add
            .iter()
            .filter(|(k, _)| !present.contains(*k))
            .map(|(_, slot)| *slot)
            .collect();
        let added = !additions.is_empty();
        self.committed.extend(additions);
        normalize(&mut self.committed);
        self.pending.clear();
        removed || added || before != self.committed.len()
    }

    /// Finish the gesture and flush whatever is still pending.
    /// Returns whether the committed list changed.
    pub fn end_gesture(&mut self) -> bool {
        if self.gesture.take().is_none() {
            return false;
        }
        self.frame_requested = false;
        self.commit()
    }

    /// Drop the gesture without committing its delta, restoring the
    /// selection captured at gesture start.
    pub fn abort_gesture(&mut self) {
        if let Some(gesture) = self.gesture.take() {
            self.committed = gesture.baseline;
        }
        self.pending.clear();
        self.frame_requested = false;
    }

    /// Replace the committed list wholesale. A live pending delta is kept
    /// and still applies on the next commit.
    pub fn rebase(&mut self, mut slots: Vec<TimeSlot>) {
        normalize(&mut slots);
        if let Some(gesture) = self.gesture.as_mut() {
            gesture.baseline = slots.clone();
        }
        self.committed = slots;
    }

    /// Column header: all hours of `date` selected → clear them, else fill.
    pub fn toggle_column(&mut self, date: NaiveDate, hours: &[u8]) -> bool {
        let cells: Vec<TimeSlot> = hours.iter().map(|h| TimeSlot::new(date, *h)).collect();
        self.toggle_block(&cells)
    }

    /// Row header: all dates at `hour` selected → clear them, else fill.
    pub fn toggle_row(&mut self, hour: u8, dates: &[NaiveDate]) -> bool {
        let cells: Vec<TimeSlot> = dates.iter().map(|d| TimeSlot::new(*d, hour)).collect();
        self.toggle_block(&cells)
    }

    /// Master toggle over `dates × hours`.
    pub fn toggle_all(&mut self, dates: &[NaiveDate], hours: &[u8]) -> bool {
        let cells: Vec<TimeSlot> = dates
            .iter()
            .flat_map(|d| hours.iter().map(move |h| TimeSlot::new(*d, *h)))
            .collect();
        self.toggle_block(&cells)
    }

    /// All-or-nothing over `cells`. Returns whether the block is selected afterwards.
    fn toggle_block(&mut self, cells: &[TimeSlot]) -> bool {
        if cells.is_empty() {
            return false;
        }
        let selected_in_block = cells.iter().filter(|c| self.is_selected(c)).count();
        if selected_in_block == cells.len() {
            let block: HashSet<&TimeSlot> = cells.iter().collect();
            self.committed.retain(|s| !block.contains(s));
            false
        } else {
            self.committed.extend_from_slice(cells);
            normalize(&mut self.committed);
            true
        }
    }
}
