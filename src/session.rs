use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::enums::AlgorithmType;

/// A (value, scheme, meaning) triple naming a clinical category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodedConcept {
    pub value: String,
    pub designator: String,
    pub meaning: String,
}

impl CodedConcept {
    pub fn new(
        value: impl Into<String>,
        designator: impl Into<String>,
        meaning: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            designator: designator.into(),
            meaning: meaning.into(),
        }
    }

    /// The generic concept applied when a segment carries no explicit
    /// anatomy coding. Callers needing precise coding supply their own.
    pub fn tissue() -> Self {
        Self::new("T-D0050", "SRT", "Tissue")
    }
}

/// Descriptive metadata for one segment, as recorded by the editing
/// session. Every field may be absent; the catalog builder fills defaults.
#[derive(Clone, Debug, Default)]
pub struct SegmentInfo {
    pub label: Option<String>,
    pub algorithm_type: Option<AlgorithmType>,
    pub algorithm_name: Option<String>,
    /// Display color as 8-bit RGB.
    pub color: Option<[u8; 3]>,
    pub category: Option<CodedConcept>,
    pub type_code: Option<CodedConcept>,
}

/// Immutable snapshot of the host's segmentation session, taken at export
/// time. The pipeline never reaches back into live session state.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub label: String,
    pub segments: BTreeMap<u16, SegmentInfo>,
}

impl SessionSnapshot {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            segments: BTreeMap::new(),
        }
    }

    pub fn with_segment(mut self, index: u16, info: SegmentInfo) -> Self {
        self.segments.insert(index, info);
        self
    }
}

/// Identifiers of the study and image series the labelmap was painted
/// over. Echoed into the encoded object and its manifest.
#[derive(Clone, Debug, Default)]
pub struct SeriesContext {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub frame_of_reference_uid: String,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
}

/// SOP identifiers of one referenced source instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceReference {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
}

/// Per-image geometric metadata accessor.
///
/// Resolution may require awaiting a metadata cache that performs lazy
/// I/O, so every lookup is async. A missing attribute is `None`, never an
/// error; the pipeline decides per call site whether absence is fatal.
///
/// Positions are returned in raw form (arbitrary arity, possibly
/// non-finite components) because the order resolver owns the policy for
/// degrading malformed input.
pub trait MetadataSource {
    fn image_position(&self, image_id: &str) -> impl Future<Output = Option<Vec<f64>>>;

    fn image_orientation(&self, image_id: &str) -> impl Future<Output = Option<[f64; 6]>>;

    fn pixel_spacing(&self, image_id: &str) -> impl Future<Output = Option<[f64; 2]>>;

    fn instance_reference(&self, image_id: &str) -> impl Future<Output = Option<InstanceReference>>;
}

/// Map-backed [`MetadataSource`] for hosts that have already materialized
/// their metadata, and for tests.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetadata {
    positions: HashMap<String, Vec<f64>>,
    orientations: HashMap<String, [f64; 6]>,
    spacings: HashMap<String, [f64; 2]>,
    references: HashMap<String, InstanceReference>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_position(&mut self, image_id: impl Into<String>, position: Vec<f64>) {
        self.positions.insert(image_id.into(), position);
    }

    pub fn insert_orientation(&mut self, image_id: impl Into<String>, orientation: [f64; 6]) {
        self.orientations.insert(image_id.into(), orientation);
    }

    pub fn insert_pixel_spacing(&mut self, image_id: impl Into<String>, spacing: [f64; 2]) {
        self.spacings.insert(image_id.into(), spacing);
    }

    pub fn insert_instance_reference(
        &mut self,
        image_id: impl Into<String>,
        reference: InstanceReference,
    ) {
        self.references.insert(image_id.into(), reference);
    }
}

impl MetadataSource for InMemoryMetadata {
    async fn image_position(&self, image_id: &str) -> Option<Vec<f64>> {
        self.positions.get(image_id).cloned()
    }

    async fn image_orientation(&self, image_id: &str) -> Option<[f64; 6]> {
        self.orientations.get(image_id).copied()
    }

    async fn pixel_spacing(&self, image_id: &str) -> Option<[f64; 2]> {
        self.spacings.get(image_id).copied()
    }

    async fn instance_reference(&self, image_id: &str) -> Option<InstanceReference> {
        self.references.get(image_id).cloned()
    }
}
