use std::collections::BTreeSet;

use rayon::prelude::*;

use crate::volume::{LabelSlice, LabelVolume};

/// One slice's voxel buffer together with the set of segment indices that
/// appear in it. Source-order indexing is preserved for later reindexing.
#[derive(Clone, Debug)]
pub struct PerSliceSegments<'a> {
    pub segments_present: BTreeSet<u16>,
    pub slice: &'a LabelSlice,
}

/// Scan every slice of the volume once, recording which segments are
/// present. Slices are scanned in parallel; the result stays in source
/// order.
pub fn collect(volume: &LabelVolume) -> Vec<PerSliceSegments<'_>> {
    volume
        .slices()
        .par_iter()
        .map(|slice| {
            let mut segments_present = BTreeSet::new();
            for &voxel in slice.voxels() {
                if voxel != 0 {
                    segments_present.insert(voxel);
                }
            }
            PerSliceSegments {
                segments_present,
                slice,
            }
        })
        .collect()
}
