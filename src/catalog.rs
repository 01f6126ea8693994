use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::collector::PerSliceSegments;
use crate::color::rgb_to_dicom_lab;
use crate::enums::AlgorithmType;
use crate::session::{CodedConcept, SessionSnapshot};

/// Algorithm name recorded when the session does not provide one.
pub const DEFAULT_ALGORITHM_NAME: &str = "Labelmap Brush";

/// Display color applied when the session has none for a segment.
const DEFAULT_COLOR: [u8; 3] = [128, 128, 128];

/// Standards-ready description of one segment of the 3-D catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SegmentDescriptor {
    /// 1-based segment number; 0 is reserved for background.
    pub number: u16,
    pub label: String,
    pub algorithm_type: AlgorithmType,
    pub algorithm_name: String,
    /// 8-bit RGB as shown by the editing tool.
    pub display_color: [u8; 3],
    /// DICOM-encoded CIELAB derived from `display_color`.
    pub recommended_cielab: [u16; 3],
    pub category: CodedConcept,
    pub type_code: CodedConcept,
}

/// Build the volume-wide segment catalog: the union of all per-slice
/// segment sets, each entry described from session metadata where present
/// and synthesized defaults where not.
///
/// Missing descriptive metadata never fails catalog construction; a
/// segment observed in the voxel data always gets a descriptor.
pub fn build(
    per_slice: &[PerSliceSegments<'_>],
    session: &SessionSnapshot,
) -> BTreeMap<u16, SegmentDescriptor> {
    let domain: BTreeSet<u16> = per_slice
        .iter()
        .flat_map(|entry| entry.segments_present.iter().copied())
        .collect();

    domain
        .into_iter()
        .map(|number| {
            let info = session.segments.get(&number);
            let label = info
                .and_then(|i| i.label.clone())
                .unwrap_or_else(|| format!("Segment {number}"));
            let algorithm_type = info.and_then(|i| i.algorithm_type).unwrap_or_default();
            let algorithm_name = info
                .and_then(|i| i.algorithm_name.clone())
                .unwrap_or_else(|| DEFAULT_ALGORITHM_NAME.to_owned());
            let display_color = info.and_then(|i| i.color).unwrap_or(DEFAULT_COLOR);
            let category = info
                .and_then(|i| i.category.clone())
                .unwrap_or_else(CodedConcept::tissue);
            let type_code = info
                .and_then(|i| i.type_code.clone())
                .unwrap_or_else(CodedConcept::tissue);

            let descriptor = SegmentDescriptor {
                number,
                label,
                algorithm_type,
                algorithm_name,
                display_color,
                recommended_cielab: rgb_to_dicom_lab(display_color),
                category,
                type_code,
            };
            (number, descriptor)
        })
        .collect()
}
