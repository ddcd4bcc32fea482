//! Box/position reordering.
//!
//! Every box keeps its live items at dense positions `0..n-1`. A move takes
//! the item out of its source box, re-indexes what is left, inserts it into
//! the destination and re-indexes that. Only items whose box or position
//! actually changed are returned, so the caller persists (and marks dirty)
//! exactly those.

use crate::types::{BoxName, VocabItem};

/// Where a dragged item was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropTarget {
    /// On a box container: append to the end. Dropping on the item's own
    /// box is a no-op.
    EndOf(BoxName),
    /// On another item: take that item's current index in its box.
    OnItem(String),
    /// At an explicit index (`0` prepends). Clamped to the box length.
    At { box_name: BoxName, index: usize },
}

/// Compute the items whose placement changes when `item` moves to
/// `dest_box` at `index` (`None` = end of list).
///
/// `source` is the live, position-ordered content of `item`'s current box
/// (including `item`); `destination` is that of `dest_box` and is ignored for
/// moves within one box.
pub fn plan_move(
    item: &VocabItem,
    source: &[VocabItem],
    destination: &[VocabItem],
    dest_box: BoxName,
    index: Option<usize>,
) -> Vec<VocabItem> {
    let without_item = |list: &[VocabItem]| -> Vec<VocabItem> {
        list.iter().filter(|b| b.id != item.id).cloned().collect()
    };

    if dest_box == item.box_name {
        let mut list = without_item(source);
        let at = index.unwrap_or(list.len()).min(list.len());
        list.insert(at, item.clone());
        return reindex(list, None);
    }

    let mut changed = reindex(without_item(source), None);

    let mut list = without_item(destination);
    let at = index.unwrap_or(list.len()).min(list.len());
    let mut moved = item.clone();
    moved.box_name = dest_box;
    list.insert(at, moved);
    changed.extend(reindex(list, Some(&item.id)));
    changed
}

/// Re-index a position-ordered box to `0..n-1`, returning the items whose
/// position changed.
pub fn resequence(items: &[VocabItem]) -> Vec<VocabItem> {
    reindex(items.to_vec(), None)
}

/// Whether `items` (one box's live content) sits at exactly `0..n-1`.
pub fn is_dense(items: &[VocabItem]) -> bool {
    let mut positions: Vec<u32> = items.iter().map(|b| b.position).collect();
    positions.sort_unstable();
    positions.iter().enumerate().all(|(i, p)| *p as usize == i)
}

fn reindex(list: Vec<VocabItem>, always: Option<&str>) -> Vec<VocabItem> {
    list.into_iter()
        .enumerate()
        .filter_map(|(i, mut b)| {
            let pos = i as u32;
            let forced = always == Some(b.id.as_str());
            if b.position != pos || forced {
                b.position = pos;
                Some(b)
            } else {
                None
            }
        })
        .collect()
}
