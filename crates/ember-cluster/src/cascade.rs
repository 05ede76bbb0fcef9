//! Cascade bookkeeping.
//!
//! Link writes and object removals report "last backlink removed" events
//! here; the state decides, per its mode, whether the affected target must
//! itself be deleted, and collects the link slots that must be nullified
//! instead. The owning table drains the queues with `remove_recursive`.

use ember_types::{ColKey, ObjLink};

/// Which last-backlink-removed events escalate to deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeMode {
    /// Nothing cascades; nullification only.
    None,
    /// Strong links (embedded targets) cascade.
    #[default]
    Strong,
    /// Any orphaned target cascades. Used when severing links that point
    /// at tombstones, which must die with their last incoming link.
    All,
}

/// A link slot that must be severed without deleting its owning object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullifyEntry {
    /// Object holding the link.
    pub origin: ObjLink,
    /// Column (possibly a list or dictionary) holding the link.
    pub origin_col: ColKey,
    /// The link value to sever.
    pub target: ObjLink,
}

/// Work queues accumulated during a mutation.
#[derive(Debug, Default)]
pub struct CascadeState {
    pub mode: CascadeMode,
    /// Objects to delete outright.
    pub to_delete: Vec<ObjLink>,
    /// Link slots to nullify.
    pub to_nullify: Vec<NullifyEntry>,
}

impl CascadeState {
    pub fn new(mode: CascadeMode) -> CascadeState {
        CascadeState {
            mode,
            ..CascadeState::default()
        }
    }

    /// Offer a backlink-removal event. `link_is_strong` is true when the
    /// severed link owned its target (embedded table or strong column);
    /// `orphaned` when the target now has no backlinks at all. Returns
    /// true if the target was enqueued for deletion.
    pub fn enqueue_for_cascade(
        &mut self,
        target: ObjLink,
        link_is_strong: bool,
        orphaned: bool,
    ) -> bool {
        let enqueue = match self.mode {
            CascadeMode::None => false,
            CascadeMode::Strong => link_is_strong && orphaned,
            CascadeMode::All => orphaned,
        };
        if enqueue && !self.to_delete.contains(&target) {
            self.to_delete.push(target);
            return true;
        }
        false
    }

    /// Record a link slot to be severed when its target goes away.
    pub fn enqueue_for_nullify(&mut self, origin: ObjLink, origin_col: ColKey, target: ObjLink) {
        let entry = NullifyEntry {
            origin,
            origin_col,
            target,
        };
        if !self.to_nullify.contains(&entry) {
            self.to_nullify.push(entry);
        }
    }

    pub fn has_work(&self) -> bool {
        !self.to_delete.is_empty() || !self.to_nullify.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_types::{ColKeyIdx, ColumnAttrMask, ColumnType, ObjKey, TableKey};

    fn link(t: u32, k: i64) -> ObjLink {
        ObjLink::new(TableKey::new(t), ObjKey::new(k))
    }

    #[test]
    fn test_none_mode_never_deletes() {
        let mut state = CascadeState::new(CascadeMode::None);
        assert!(!state.enqueue_for_cascade(link(1, 1), true, true));
        assert!(!state.has_work());
    }

    #[test]
    fn test_strong_mode_requires_strong_link() {
        let mut state = CascadeState::new(CascadeMode::Strong);
        assert!(!state.enqueue_for_cascade(link(1, 1), false, true));
        assert!(state.enqueue_for_cascade(link(1, 2), true, true));
        assert!(!state.enqueue_for_cascade(link(1, 3), true, false));
        assert_eq!(state.to_delete, vec![link(1, 2)]);
    }

    #[test]
    fn test_all_mode_deletes_any_orphan() {
        let mut state = CascadeState::new(CascadeMode::All);
        assert!(state.enqueue_for_cascade(link(2, 9), false, true));
        // Re-offering the same target does not duplicate the queue entry.
        assert!(!state.enqueue_for_cascade(link(2, 9), false, true));
        assert_eq!(state.to_delete.len(), 1);
    }

    #[test]
    fn test_nullify_entries_deduplicate() {
        let mut state = CascadeState::new(CascadeMode::Strong);
        let col = ColKey::new(ColKeyIdx(0), ColumnType::Link, ColumnAttrMask::EMPTY, 0);
        state.enqueue_for_nullify(link(1, 1), col, link(2, 2));
        state.enqueue_for_nullify(link(1, 1), col, link(2, 2));
        assert_eq!(state.to_nullify.len(), 1);
        assert!(state.has_work());
    }
}
