use serde::{Deserialize, Serialize};

use crate::{CellRef, Range};

/// The merged-cell ranges declared by one worksheet (`<mergeCells>`).
///
/// Only the top-left cell (the *anchor*) of a merged range holds a value; every other
/// covered cell is a read-only member that displays the anchor's value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRegions {
    ranges: Vec<Range>,
}

/// How a single cell relates to the merged ranges of its sheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeMembership<'a> {
    /// The cell is covered by no merged range.
    Unmerged,
    /// The cell is the anchor of `range`.
    Anchor(Range),
    /// The cell is a member of `range` whose anchor is `range.top_left()`.
    Member(Range),
    /// The cell is covered by several ranges that disagree on the anchor.
    Conflicting(Vec<&'a Range>),
}

impl MergedRegions {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    /// All declared ranges containing `cell`, in declaration order.
    pub fn containing(&self, cell: CellRef) -> impl Iterator<Item = &Range> {
        self.ranges
            .iter()
            .filter(move |range| !range.is_single_cell() && range.contains(cell))
    }

    /// Classify `cell` against the declared ranges.
    ///
    /// Degenerate single-cell "merges" are ignored. Duplicate declarations of the same range
    /// are tolerated; distinct overlapping ranges covering `cell` are reported as
    /// [`MergeMembership::Conflicting`].
    pub fn membership(&self, cell: CellRef) -> MergeMembership<'_> {
        let mut hits: Vec<&Range> = Vec::new();
        for range in self.containing(cell) {
            if !hits.contains(&range) {
                hits.push(range);
            }
        }
        let Some(first) = hits.first().copied() else {
            return MergeMembership::Unmerged;
        };
        if hits.iter().any(|r| r.top_left() != first.top_left()) {
            return MergeMembership::Conflicting(hits);
        }
        // Every covering range agrees on the anchor, so the redirect target is unambiguous.
        if first.top_left() == cell {
            MergeMembership::Anchor(*first)
        } else {
            MergeMembership::Member(*first)
        }
    }
}

impl FromIterator<Range> for MergedRegions {
    fn from_iter<T: IntoIterator<Item = Range>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn regions(refs: &[&str]) -> MergedRegions {
        refs.iter().map(|r| Range::from_a1(r).unwrap()).collect()
    }

    fn cell(a1: &str) -> CellRef {
        CellRef::from_a1(a1).unwrap()
    }

    #[test]
    fn classifies_anchor_member_and_unmerged_cells() {
        let merges = regions(&["C4:E4", "A1:B2"]);
        let c4_e4 = Range::from_a1("C4:E4").unwrap();

        assert_eq!(merges.membership(cell("C4")), MergeMembership::Anchor(c4_e4));
        assert_eq!(merges.membership(cell("D4")), MergeMembership::Member(c4_e4));
        assert_eq!(merges.membership(cell("E4")), MergeMembership::Member(c4_e4));
        assert_eq!(merges.membership(cell("C5")), MergeMembership::Unmerged);
        assert_eq!(merges.membership(cell("F4")), MergeMembership::Unmerged);
    }

    #[test]
    fn single_cell_merge_declarations_are_ignored() {
        let merges = regions(&["C4"]);
        assert_eq!(merges.membership(cell("C4")), MergeMembership::Unmerged);
    }

    #[test]
    fn duplicate_declarations_are_not_conflicts() {
        let merges = regions(&["C4:E4", "C4:E4"]);
        assert!(matches!(
            merges.membership(cell("D4")),
            MergeMembership::Member(_)
        ));
    }

    #[test]
    fn overlapping_ranges_with_different_anchors_conflict() {
        let merges = regions(&["C4:E4", "D3:D5"]);
        match merges.membership(cell("D4")) {
            MergeMembership::Conflicting(ranges) => assert_eq!(ranges.len(), 2),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(matches!(
            merges.membership(cell("E4")),
            MergeMembership::Member(_)
        ));
    }

    proptest! {
        #[test]
        fn every_covered_cell_resolves_to_the_top_left_anchor(
            row in 0u32..200, col in 0u32..50, height in 0u32..6, width in 0u32..6,
            dr in 0u32..6, dc in 0u32..6,
        ) {
            prop_assume!(height > 0 || width > 0);
            let range = Range::new(CellRef::new(row, col), CellRef::new(row + height, col + width));
            let merges = MergedRegions::new(vec![range]);
            let target = CellRef::new(row + dr.min(height), col + dc.min(width));
            match merges.membership(target) {
                MergeMembership::Anchor(r) => {
                    prop_assert_eq!(target, r.top_left());
                }
                MergeMembership::Member(r) => {
                    prop_assert_ne!(target, r.top_left());
                    prop_assert_eq!(r.top_left(), CellRef::new(row, col));
                }
                other => prop_assert!(false, "unexpected membership {:?}", other),
            }
        }
    }
}
