//! Assembly of ordered label data, segment catalog, and geometry bindings
//! into serialized DICOM objects.
//!
//! Two target formats are supported: the voxel-based Segmentation object
//! (BINARY, 1-bit packed multi-frame) and the contour-based RT Structure
//! Set, which additionally runs a pluggable boundary-tracing step per
//! segment per slice.

use std::collections::BTreeMap;

use dicom::core::value::{DataSetSequence, PrimitiveValue};
use dicom::core::{DataElement, Tag, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use ndarray::ArrayView2;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::binding::OrderedBinding;
use crate::catalog::SegmentDescriptor;
use crate::session::{CodedConcept, InstanceReference, SeriesContext};

/// Series description applied when the caller supplies none.
pub const DEFAULT_SERIES_DESCRIPTION: &str = "Research Derived Series";

const DEFAULT_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
const DEFAULT_PIXEL_SPACING: [f64; 2] = [1.0, 1.0];

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("segmentation contains no labeled voxels")]
    EmptyCatalog,

    #[error("no image position resolved for referenced image {image_id}")]
    MissingPosition { image_id: String },

    #[error("no SOP reference resolved for referenced image {image_id}")]
    MissingInstanceReference { image_id: String },

    #[error("failed to assemble file meta information: {0}")]
    MetaAssembly(String),

    #[error("DICOM write error: {0}")]
    Write(#[from] dicom::object::WriteError),
}

/// Recognized encoding options.
#[derive(Clone, Debug)]
pub struct EncodeOptions {
    /// Series description of the derived series; defaults to
    /// [`DEFAULT_SERIES_DESCRIPTION`].
    pub series_description: Option<String>,
    /// Omit frames for (segment, slice) pairs where the segment has no
    /// voxels. On by default.
    pub skip_empty_frames: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            series_description: None,
            skip_empty_frames: true,
        }
    }
}

impl EncodeOptions {
    fn effective_description(&self) -> String {
        self.series_description
            .clone()
            .unwrap_or_else(|| DEFAULT_SERIES_DESCRIPTION.to_owned())
    }
}

/// Summary of an encoded object, sufficient to reconstruct which source
/// image each output slice corresponds to. This is the deterministic,
/// byte-comparable part of the export result.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Manifest {
    pub series_description: String,
    pub study_instance_uid: String,
    pub referenced_series_instance_uid: String,
    pub segment_count: usize,
    pub slice_count: usize,
    /// One entry per catalog segment, ascending by number.
    pub segments: Vec<SegmentDescriptor>,
    /// Source image id for every output slice, in output order.
    pub slice_image_ids: Vec<String>,
    /// Root of the storage endpoint the object was posted to, when it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
}

impl Manifest {
    /// Canonical JSON rendering; two exports of the same snapshot yield
    /// identical bytes.
    pub fn json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A serialized segmentation object plus its manifest. Transport-agnostic;
/// the export gateway decides how to frame it.
#[derive(Clone, Debug)]
pub struct EncodedSegmentation {
    pub manifest: Manifest,
    pub payload: Vec<u8>,
}

/// Boundary-tracing step for the Structure Set path, marching-squares
/// style. Implementations return closed planar contours of `segment`
/// within one slice, as (row, column) points in pixel space.
pub trait ContourTracer {
    fn trace(&self, slice: ArrayView2<'_, u16>, segment: u16) -> Vec<Vec<[f64; 2]>>;
}

type Element = DataElement<InMemDicomObject>;
type Catalog = BTreeMap<u16, SegmentDescriptor>;

/// Encode the ordered, bound label data as a DICOM Segmentation object.
pub fn encode_segmentation(
    bindings: &[OrderedBinding<'_>],
    catalog: &Catalog,
    series: &SeriesContext,
    options: &EncodeOptions,
) -> Result<EncodedSegmentation, EncodeError> {
    let geometry = RequiredGeometry::resolve(bindings, catalog)?;
    let description = options.effective_description();

    let (rows, columns) = slice_dim(bindings);
    let mut packer = BitPacker::default();
    let mut frame_items = Vec::new();
    for descriptor in catalog.values() {
        for (index, binding) in bindings.iter().enumerate() {
            let present = binding.per_slice.segments_present.contains(&descriptor.number);
            if !present && options.skip_empty_frames {
                continue;
            }
            for &voxel in binding.per_slice.slice.voxels() {
                packer.push(voxel == descriptor.number);
            }
            frame_items.push(per_frame_item(
                descriptor.number,
                geometry.positions[index],
                &geometry.references[index],
            ));
        }
    }
    let frame_count = frame_items.len();
    let pixel_data = packer.finish();

    let sop_instance_uid = new_uid();
    let mut elements = vec![
        strs_element(tags::IMAGE_TYPE, VR::CS, vec!["DERIVED".into(), "PRIMARY".into()]),
        str_element(tags::SOP_CLASS_UID, VR::UI, uids::SEGMENTATION_STORAGE),
        str_element(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.as_str()),
        str_element(tags::MODALITY, VR::CS, "SEG"),
        str_element(tags::SERIES_DESCRIPTION, VR::LO, description.as_str()),
        str_element(tags::STUDY_INSTANCE_UID, VR::UI, series.study_instance_uid.as_str()),
        str_element(tags::SERIES_INSTANCE_UID, VR::UI, new_uid().as_str()),
        str_element(tags::SERIES_NUMBER, VR::IS, "1"),
        str_element(tags::INSTANCE_NUMBER, VR::IS, "1"),
        str_element(
            tags::FRAME_OF_REFERENCE_UID,
            VR::UI,
            series.frame_of_reference_uid.as_str(),
        ),
        str_element(tags::CONTENT_LABEL, VR::CS, "SEGMENTATION"),
        str_element(tags::CONTENT_DESCRIPTION, VR::LO, description.as_str()),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        str_element(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2"),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        str_element(tags::LOSSY_IMAGE_COMPRESSION, VR::CS, "00"),
        str_element(tags::NUMBER_OF_FRAMES, VR::IS, frame_count.to_string().as_str()),
        str_element(tags::SEGMENTATION_TYPE, VR::CS, "BINARY"),
        seq_element(
            tags::SEGMENT_SEQUENCE,
            catalog.values().map(segment_item).collect(),
        ),
        seq_element(
            tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE,
            vec![shared_groups_item(geometry.orientation, geometry.pixel_spacing)],
        ),
        seq_element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, frame_items),
        seq_element(
            tags::REFERENCED_SERIES_SEQUENCE,
            vec![referenced_series_item(series, &geometry.references)],
        ),
        DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(pixel_data.into())),
    ];
    push_patient_elements(&mut elements, series);

    let payload = serialize_dataset(
        InMemDicomObject::from_element_iter(elements),
        uids::SEGMENTATION_STORAGE,
        &sop_instance_uid,
    )?;
    debug!(
        frames = frame_count,
        segments = catalog.len(),
        slices = bindings.len(),
        "encoded segmentation object"
    );

    Ok(EncodedSegmentation {
        manifest: manifest(bindings, catalog, series, description),
        payload,
    })
}

/// Encode the ordered, bound label data as an RT Structure Set, tracing
/// per-segment per-slice boundaries with the supplied tracer.
pub fn encode_structure_set<T: ContourTracer>(
    bindings: &[OrderedBinding<'_>],
    catalog: &Catalog,
    series: &SeriesContext,
    tracer: &T,
    options: &EncodeOptions,
) -> Result<EncodedSegmentation, EncodeError> {
    let geometry = RequiredGeometry::resolve(bindings, catalog)?;
    let description = options.effective_description();

    let mut roi_items = Vec::new();
    let mut contour_set_items = Vec::new();
    let mut observation_items = Vec::new();
    for descriptor in catalog.values() {
        let roi_number = descriptor.number.to_string();
        roi_items.push(InMemDicomObject::from_element_iter([
            str_element(tags::ROI_NUMBER, VR::IS, roi_number.as_str()),
            str_element(
                tags::REFERENCED_FRAME_OF_REFERENCE_UID,
                VR::UI,
                series.frame_of_reference_uid.as_str(),
            ),
            str_element(tags::ROI_NAME, VR::LO, descriptor.label.as_str()),
            str_element(
                tags::ROI_GENERATION_ALGORITHM,
                VR::CS,
                descriptor.algorithm_type.as_str(),
            ),
        ]));

        let mut contour_items = Vec::new();
        for (index, binding) in bindings.iter().enumerate() {
            if !binding.per_slice.segments_present.contains(&descriptor.number) {
                continue;
            }
            let contours = tracer.trace(binding.per_slice.slice.view(), descriptor.number);
            for points in contours {
                let data: Vec<String> = points
                    .iter()
                    .flat_map(|&[row, column]| {
                        pixel_to_patient(
                            geometry.positions[index],
                            geometry.orientation,
                            geometry.pixel_spacing,
                            row,
                            column,
                        )
                    })
                    .map(format_decimal)
                    .collect();
                contour_items.push(InMemDicomObject::from_element_iter([
                    seq_element(
                        tags::CONTOUR_IMAGE_SEQUENCE,
                        vec![sop_reference_item(&geometry.references[index])],
                    ),
                    str_element(tags::CONTOUR_GEOMETRIC_TYPE, VR::CS, "CLOSED_PLANAR"),
                    str_element(
                        tags::NUMBER_OF_CONTOUR_POINTS,
                        VR::IS,
                        points.len().to_string().as_str(),
                    ),
                    strs_element(tags::CONTOUR_DATA, VR::DS, data),
                ]));
            }
        }
        contour_set_items.push(InMemDicomObject::from_element_iter([
            strs_element(
                tags::ROI_DISPLAY_COLOR,
                VR::IS,
                descriptor.display_color.iter().map(u8::to_string).collect(),
            ),
            str_element(tags::REFERENCED_ROI_NUMBER, VR::IS, roi_number.as_str()),
            seq_element(tags::CONTOUR_SEQUENCE, contour_items),
        ]));
        observation_items.push(InMemDicomObject::from_element_iter([
            str_element(tags::OBSERVATION_NUMBER, VR::IS, roi_number.as_str()),
            str_element(tags::REFERENCED_ROI_NUMBER, VR::IS, roi_number.as_str()),
            DataElement::new(tags::RTROI_INTERPRETED_TYPE, VR::CS, PrimitiveValue::Empty),
            DataElement::new(tags::ROI_INTERPRETER, VR::PN, PrimitiveValue::Empty),
        ]));
    }

    let sop_instance_uid = new_uid();
    let mut elements = vec![
        str_element(tags::SOP_CLASS_UID, VR::UI, uids::RT_STRUCTURE_SET_STORAGE),
        str_element(tags::SOP_INSTANCE_UID, VR::UI, sop_instance_uid.as_str()),
        str_element(tags::MODALITY, VR::CS, "RTSTRUCT"),
        str_element(tags::SERIES_DESCRIPTION, VR::LO, description.as_str()),
        str_element(tags::STUDY_INSTANCE_UID, VR::UI, series.study_instance_uid.as_str()),
        str_element(tags::SERIES_INSTANCE_UID, VR::UI, new_uid().as_str()),
        str_element(tags::SERIES_NUMBER, VR::IS, "1"),
        str_element(tags::INSTANCE_NUMBER, VR::IS, "1"),
        str_element(tags::STRUCTURE_SET_LABEL, VR::SH, description.as_str()),
        seq_element(tags::STRUCTURE_SET_ROI_SEQUENCE, roi_items),
        seq_element(tags::ROI_CONTOUR_SEQUENCE, contour_set_items),
        seq_element(tags::RTROI_OBSERVATIONS_SEQUENCE, observation_items),
        seq_element(
            tags::REFERENCED_SERIES_SEQUENCE,
            vec![referenced_series_item(series, &geometry.references)],
        ),
    ];
    push_patient_elements(&mut elements, series);

    let payload = serialize_dataset(
        InMemDicomObject::from_element_iter(elements),
        uids::RT_STRUCTURE_SET_STORAGE,
        &sop_instance_uid,
    )?;
    debug!(
        segments = catalog.len(),
        slices = bindings.len(),
        "encoded structure set object"
    );

    Ok(EncodedSegmentation {
        manifest: manifest(bindings, catalog, series, description),
        payload,
    })
}

/// Geometry every target format insists on: a position and a SOP reference
/// per slice. Orientation and spacing are shared across the stack, so the
/// first resolvable value wins and sane defaults cover total absence.
struct RequiredGeometry {
    positions: Vec<[f64; 3]>,
    references: Vec<InstanceReference>,
    orientation: [f64; 6],
    pixel_spacing: [f64; 2],
}

impl RequiredGeometry {
    fn resolve(
        bindings: &[OrderedBinding<'_>],
        catalog: &Catalog,
    ) -> Result<Self, EncodeError> {
        if catalog.is_empty() {
            return Err(EncodeError::EmptyCatalog);
        }
        let mut positions = Vec::with_capacity(bindings.len());
        let mut references = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let position =
                binding
                    .image
                    .position
                    .ok_or_else(|| EncodeError::MissingPosition {
                        image_id: binding.image.id.clone(),
                    })?;
            let reference = binding.image.reference.clone().ok_or_else(|| {
                EncodeError::MissingInstanceReference {
                    image_id: binding.image.id.clone(),
                }
            })?;
            positions.push(position);
            references.push(reference);
        }
        let orientation = bindings
            .iter()
            .find_map(|b| b.image.orientation)
            .unwrap_or(DEFAULT_ORIENTATION);
        let pixel_spacing = bindings
            .iter()
            .find_map(|b| b.image.pixel_spacing)
            .unwrap_or(DEFAULT_PIXEL_SPACING);
        Ok(Self {
            positions,
            references,
            orientation,
            pixel_spacing,
        })
    }
}

fn manifest(
    bindings: &[OrderedBinding<'_>],
    catalog: &Catalog,
    series: &SeriesContext,
    series_description: String,
) -> Manifest {
    Manifest {
        series_description,
        study_instance_uid: series.study_instance_uid.clone(),
        referenced_series_instance_uid: series.series_instance_uid.clone(),
        segment_count: catalog.len(),
        slice_count: bindings.len(),
        segments: catalog.values().cloned().collect(),
        slice_image_ids: bindings.iter().map(|b| b.image.id.clone()).collect(),
        storage_root: None,
    }
}

fn slice_dim(bindings: &[OrderedBinding<'_>]) -> (u16, u16) {
    bindings
        .first()
        .map(|b| (b.per_slice.slice.rows(), b.per_slice.slice.columns()))
        .unwrap_or((0, 0))
}

/// Map a (row, column) pixel point to patient space using the standard
/// plane equation: orientation[0..3] runs along increasing column,
/// orientation[3..6] along increasing row, spacing is [row, column].
fn pixel_to_patient(
    position: [f64; 3],
    orientation: [f64; 6],
    spacing: [f64; 2],
    row: f64,
    column: f64,
) -> [f64; 3] {
    let mut point = [0.0; 3];
    for axis in 0..3 {
        point[axis] = position[axis]
            + orientation[axis] * column * spacing[1]
            + orientation[axis + 3] * row * spacing[0];
    }
    point
}

/// 1-bit pixel packer, LSB first, frames contiguous in the bit stream.
#[derive(Default)]
struct BitPacker {
    bytes: Vec<u8>,
    len: usize,
}

impl BitPacker {
    fn push(&mut self, bit: bool) {
        let byte_index = self.len / 8;
        if byte_index == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte_index] |= 1 << (self.len % 8);
        }
        self.len += 1;
    }

    /// Zero-padded to a whole, even number of bytes.
    fn finish(mut self) -> Vec<u8> {
        if self.bytes.len() % 2 != 0 {
            self.bytes.push(0);
        }
        self.bytes
    }
}

fn segment_item(descriptor: &SegmentDescriptor) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::SEGMENT_NUMBER,
            VR::US,
            PrimitiveValue::from(descriptor.number),
        ),
        str_element(tags::SEGMENT_LABEL, VR::LO, descriptor.label.as_str()),
        str_element(
            tags::SEGMENT_ALGORITHM_TYPE,
            VR::CS,
            descriptor.algorithm_type.as_str(),
        ),
        str_element(
            tags::SEGMENT_ALGORITHM_NAME,
            VR::LO,
            descriptor.algorithm_name.as_str(),
        ),
        u16s_element(
            tags::RECOMMENDED_DISPLAY_CIE_LAB_VALUE,
            descriptor.recommended_cielab.to_vec(),
        ),
        seq_element(
            tags::SEGMENTED_PROPERTY_CATEGORY_CODE_SEQUENCE,
            vec![code_item(&descriptor.category)],
        ),
        seq_element(
            tags::SEGMENTED_PROPERTY_TYPE_CODE_SEQUENCE,
            vec![code_item(&descriptor.type_code)],
        ),
    ])
}

fn code_item(concept: &CodedConcept) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        str_element(tags::CODE_VALUE, VR::SH, concept.value.as_str()),
        str_element(
            tags::CODING_SCHEME_DESIGNATOR,
            VR::SH,
            concept.designator.as_str(),
        ),
        str_element(tags::CODE_MEANING, VR::LO, concept.meaning.as_str()),
    ])
}

fn shared_groups_item(orientation: [f64; 6], spacing: [f64; 2]) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        seq_element(
            tags::PLANE_ORIENTATION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([strs_element(
                tags::IMAGE_ORIENTATION_PATIENT,
                VR::DS,
                orientation.iter().copied().map(format_decimal).collect(),
            )])],
        ),
        seq_element(
            tags::PIXEL_MEASURES_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([strs_element(
                tags::PIXEL_SPACING,
                VR::DS,
                spacing.iter().copied().map(format_decimal).collect(),
            )])],
        ),
    ])
}

fn per_frame_item(
    segment: u16,
    position: [f64; 3],
    reference: &InstanceReference,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        seq_element(
            tags::SEGMENT_IDENTIFICATION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([DataElement::new(
                tags::REFERENCED_SEGMENT_NUMBER,
                VR::US,
                PrimitiveValue::from(segment),
            )])],
        ),
        seq_element(
            tags::PLANE_POSITION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([strs_element(
                tags::IMAGE_POSITION_PATIENT,
                VR::DS,
                position.iter().copied().map(format_decimal).collect(),
            )])],
        ),
        seq_element(
            tags::DERIVATION_IMAGE_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([seq_element(
                tags::SOURCE_IMAGE_SEQUENCE,
                vec![sop_reference_item(reference)],
            )])],
        ),
    ])
}

fn referenced_series_item(
    series: &SeriesContext,
    references: &[InstanceReference],
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        str_element(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            series.series_instance_uid.as_str(),
        ),
        seq_element(
            tags::REFERENCED_INSTANCE_SEQUENCE,
            references.iter().map(sop_reference_item).collect(),
        ),
    ])
}

fn sop_reference_item(reference: &InstanceReference) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        str_element(
            tags::REFERENCED_SOP_CLASS_UID,
            VR::UI,
            reference.sop_class_uid.as_str(),
        ),
        str_element(
            tags::REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            reference.sop_instance_uid.as_str(),
        ),
    ])
}

fn push_patient_elements(elements: &mut Vec<Element>, series: &SeriesContext) {
    if let Some(name) = &series.patient_name {
        elements.push(str_element(tags::PATIENT_NAME, VR::PN, name.as_str()));
    }
    if let Some(id) = &series.patient_id {
        elements.push(str_element(tags::PATIENT_ID, VR::LO, id.as_str()));
    }
}

fn serialize_dataset(
    dataset: InMemDicomObject,
    sop_class_uid: &str,
    sop_instance_uid: &str,
) -> Result<Vec<u8>, EncodeError> {
    let file = dataset
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(sop_class_uid)
                .media_storage_sop_instance_uid(sop_instance_uid),
        )
        .map_err(|e| EncodeError::MetaAssembly(e.to_string()))?;
    let mut payload = Vec::new();
    file.write_all(&mut payload)?;
    Ok(payload)
}

fn str_element(tag: Tag, vr: VR, value: &str) -> Element {
    DataElement::new(tag, vr, PrimitiveValue::from(value))
}

fn strs_element(tag: Tag, vr: VR, values: Vec<String>) -> Element {
    DataElement::new(tag, vr, PrimitiveValue::Strs(values.into()))
}

fn u16s_element(tag: Tag, values: Vec<u16>) -> Element {
    DataElement::new(tag, VR::US, PrimitiveValue::U16(values.into()))
}

fn seq_element(tag: Tag, items: Vec<InMemDicomObject>) -> Element {
    DataElement::new(tag, VR::SQ, DataSetSequence::from(items))
}

fn format_decimal(value: f64) -> String {
    format!("{value}")
}

fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}
