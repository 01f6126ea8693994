use std::sync::Mutex;

use dicom_seg_export::encoder::{EncodeError, EncodeOptions, EncodedSegmentation};
use dicom_seg_export::enums::ExportDestination;
use dicom_seg_export::export::{
    ExportGateway, GatewayError, SegmentationExporter, StoreReceipt,
};
use dicom_seg_export::session::{
    InMemoryMetadata, InstanceReference, SegmentInfo, SeriesContext, SessionSnapshot,
};
use dicom_seg_export::volume::{LabelSlice, LabelVolume};
use dicom_dictionary_std::tags;
use ndarray::ArrayView2;

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

fn series() -> SeriesContext {
    SeriesContext {
        study_instance_uid: "1.2.826.0.1.1".to_owned(),
        series_instance_uid: "1.2.826.0.1.2".to_owned(),
        frame_of_reference_uid: "1.2.826.0.1.3".to_owned(),
        patient_id: Some("PID-1".to_owned()),
        patient_name: Some("Doe^Jane".to_owned()),
    }
}

/// One segment-1 voxel per slice, at a slice-specific offset, so output
/// order is visible in the pixel data.
fn volume(count: usize) -> LabelVolume {
    let slices = (0..count)
        .map(|i| {
            let mut voxels = vec![0_u16; 4];
            voxels[i % 4] = 1;
            LabelSlice::new(voxels, 2, 2, format!("img-{i}")).unwrap()
        })
        .collect();
    LabelVolume::new(slices).unwrap()
}

fn metadata_with_positions(count: usize, zs: &[f64]) -> InMemoryMetadata {
    let mut metadata = InMemoryMetadata::new();
    for i in 0..count {
        let id = format!("img-{i}");
        if let Some(&z) = zs.get(i) {
            metadata.insert_position(id.as_str(), vec![1.0, 2.0, z]);
        }
        metadata.insert_orientation(id.as_str(), [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        metadata.insert_pixel_spacing(id.as_str(), [0.8, 0.8]);
        metadata.insert_instance_reference(
            id.as_str(),
            InstanceReference {
                sop_class_uid: CT_IMAGE_STORAGE.to_owned(),
                sop_instance_uid: format!("1.2.826.0.2.{i}"),
            },
        );
    }
    metadata
}

#[derive(Default)]
struct RecordingGateway {
    storage_root: Option<String>,
    deliveries: Mutex<Vec<ExportDestination>>,
}

impl ExportGateway for RecordingGateway {
    async fn deliver(
        &self,
        _object: &EncodedSegmentation,
        destination: &ExportDestination,
    ) -> Result<StoreReceipt, GatewayError> {
        self.deliveries.lock().unwrap().push(destination.clone());
        Ok(StoreReceipt {
            storage_root: self.storage_root.clone(),
        })
    }
}

fn read_back(payload: &[u8]) -> dicom::object::DefaultDicomObject {
    let magic = payload
        .windows(4)
        .position(|w| w == b"DICM")
        .expect("payload carries the DICM magic");
    dicom::object::from_reader(&payload[magic..]).expect("payload parses as a DICOM object")
}

#[tokio::test]
async fn descending_stack_is_reversed_into_ascending_order() {
    // Scenario: 3 slices at z = [10, 5, 0]; output slice 0 must be the
    // original slice index 2.
    let volume = volume(3);
    let metadata = metadata_with_positions(3, &[10.0, 5.0, 0.0]);
    let encoded = SegmentationExporter::generate(
        &volume,
        &SessionSnapshot::new("seg"),
        &series(),
        &metadata,
        &EncodeOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(encoded.manifest.slice_image_ids, ["img-2", "img-1", "img-0"]);
    assert_eq!(encoded.manifest.slice_count, 3);
    assert_eq!(encoded.manifest.segment_count, 1);

    let object = read_back(&encoded.payload);

    // Frames follow output order: original slices 2, 1, 0 carry their
    // marker voxel at offsets 2, 1, 0 → bits 2, 5, 8 of the stream.
    let pixel_data = object
        .element(tags::PIXEL_DATA)
        .unwrap()
        .to_bytes()
        .unwrap()
        .into_owned();
    assert_eq!(pixel_data, vec![0b0010_0100, 0b0000_0001]);

    let frames = object
        .element(tags::NUMBER_OF_FRAMES)
        .unwrap()
        .to_int::<i32>()
        .unwrap();
    assert_eq!(frames, 3);

    // First output frame sits at the lowest z.
    let per_frame = object
        .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
        .unwrap()
        .items()
        .unwrap();
    let plane = per_frame[0]
        .element(tags::PLANE_POSITION_SEQUENCE)
        .unwrap()
        .items()
        .unwrap();
    let position = plane[0]
        .element(tags::IMAGE_POSITION_PATIENT)
        .unwrap()
        .to_multi_float64()
        .unwrap();
    assert_eq!(position, vec![1.0, 2.0, 0.0]);
}

#[tokio::test]
async fn ascending_stack_keeps_source_order() {
    let volume = volume(3);
    let metadata = metadata_with_positions(3, &[0.0, 5.0, 10.0]);
    let encoded = SegmentationExporter::generate(
        &volume,
        &SessionSnapshot::new("seg"),
        &series(),
        &metadata,
        &EncodeOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(encoded.manifest.slice_image_ids, ["img-0", "img-1", "img-2"]);
}

#[tokio::test]
async fn malformed_position_fails_encoding_cleanly() {
    // A position the resolver cannot use is also a position the encoder
    // cannot emit a plane for: the call fails, no partial object.
    let volume = volume(4);
    let mut metadata = metadata_with_positions(4, &[0.0, 1.0, 2.0, 3.0]);
    metadata.insert_position("img-1", vec![1.0]);
    let result = SegmentationExporter::generate(
        &volume,
        &SessionSnapshot::new("seg"),
        &series(),
        &metadata,
        &EncodeOptions::default(),
    )
    .await;
    assert!(matches!(
        result,
        Err(EncodeError::MissingPosition { image_id }) if image_id == "img-1"
    ));
}

#[tokio::test]
async fn empty_labelmap_fails_with_no_partial_object() {
    let slices = (0..3)
        .map(|i| LabelSlice::new(vec![0; 4], 2, 2, format!("img-{i}")).unwrap())
        .collect();
    let volume = LabelVolume::new(slices).unwrap();
    let metadata = metadata_with_positions(3, &[0.0, 1.0, 2.0]);
    let result = SegmentationExporter::generate(
        &volume,
        &SessionSnapshot::new("seg"),
        &series(),
        &metadata,
        &EncodeOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(EncodeError::EmptyCatalog)));
}

#[tokio::test]
async fn session_metadata_reaches_the_segment_sequence() {
    let volume = volume(2);
    let metadata = metadata_with_positions(2, &[0.0, 1.0]);
    let session = SessionSnapshot::new("seg").with_segment(
        1,
        SegmentInfo {
            label: Some("Tumor".to_owned()),
            color: Some([255, 0, 0]),
            ..SegmentInfo::default()
        },
    );
    let encoded = SegmentationExporter::generate(
        &volume,
        &session,
        &series(),
        &metadata,
        &EncodeOptions::default(),
    )
    .await
    .unwrap();

    let descriptor = &encoded.manifest.segments[0];
    assert_eq!(descriptor.label, "Tumor");
    assert_eq!(descriptor.recommended_cielab, [34891, 53480, 50167]);

    let object = read_back(&encoded.payload);
    let segments = object
        .element(tags::SEGMENT_SEQUENCE)
        .unwrap()
        .items()
        .unwrap();
    let label = segments[0]
        .element(tags::SEGMENT_LABEL)
        .unwrap()
        .to_str()
        .unwrap()
        .into_owned();
    assert_eq!(label.trim_end(), "Tumor");
    let cielab = segments[0]
        .element(tags::RECOMMENDED_DISPLAY_CIE_LAB_VALUE)
        .unwrap()
        .to_multi_int::<u16>()
        .unwrap();
    assert_eq!(cielab, vec![34891, 53480, 50167]);
}

#[tokio::test]
async fn encoding_the_same_snapshot_twice_is_idempotent() {
    let volume = volume(3);
    let metadata = metadata_with_positions(3, &[0.0, 1.0, 2.0]);
    let session = SessionSnapshot::new("seg");
    let options = EncodeOptions::default();

    let first = SegmentationExporter::generate(&volume, &session, &series(), &metadata, &options)
        .await
        .unwrap();
    let second = SegmentationExporter::generate(&volume, &session, &series(), &metadata, &options)
        .await
        .unwrap();

    assert_eq!(
        first.manifest.json_bytes().unwrap(),
        second.manifest.json_bytes().unwrap()
    );
}

#[tokio::test]
async fn download_is_named_after_the_session_label() {
    let volume = volume(2);
    let metadata = metadata_with_positions(2, &[0.0, 1.0]);
    let gateway = RecordingGateway::default();
    SegmentationExporter::download(
        &volume,
        &SessionSnapshot::new("Liver Study"),
        &series(),
        &metadata,
        &gateway,
        &EncodeOptions::default(),
    )
    .await
    .unwrap();

    let deliveries = gateway.deliveries.lock().unwrap();
    assert_eq!(
        *deliveries,
        vec![ExportDestination::Download {
            filename: "Liver Study".to_owned()
        }]
    );
}

#[tokio::test]
async fn store_tags_the_manifest_with_the_storage_root() {
    let volume = volume(2);
    let metadata = metadata_with_positions(2, &[0.0, 1.0]);
    let gateway = RecordingGateway {
        storage_root: Some("https://pacs.example.org/wado".to_owned()),
        ..RecordingGateway::default()
    };
    let manifest = SegmentationExporter::store(
        &volume,
        &SessionSnapshot::new("Liver Study"),
        &series(),
        &metadata,
        &gateway,
        None,
    )
    .await
    .unwrap();

    // No caller-supplied description: the session label wins.
    assert_eq!(manifest.series_description, "Liver Study");
    assert_eq!(
        manifest.storage_root.as_deref(),
        Some("https://pacs.example.org/wado")
    );
    let deliveries = gateway.deliveries.lock().unwrap();
    assert_eq!(*deliveries, vec![ExportDestination::Store]);
}

#[tokio::test]
async fn store_prefers_the_caller_description() {
    let volume = volume(2);
    let metadata = metadata_with_positions(2, &[0.0, 1.0]);
    let gateway = RecordingGateway::default();
    let manifest = SegmentationExporter::store(
        &volume,
        &SessionSnapshot::new("Liver Study"),
        &series(),
        &metadata,
        &gateway,
        Some("Follow-up review".to_owned()),
    )
    .await
    .unwrap();
    assert_eq!(manifest.series_description, "Follow-up review");
}

struct BoundingBoxTracer;

impl dicom_seg_export::encoder::ContourTracer for BoundingBoxTracer {
    fn trace(&self, slice: ArrayView2<'_, u16>, segment: u16) -> Vec<Vec<[f64; 2]>> {
        let mut min = [f64::INFINITY; 2];
        let mut max = [f64::NEG_INFINITY; 2];
        for ((row, column), &value) in slice.indexed_iter() {
            if value == segment {
                min[0] = min[0].min(row as f64);
                min[1] = min[1].min(column as f64);
                max[0] = max[0].max(row as f64);
                max[1] = max[1].max(column as f64);
            }
        }
        if min[0].is_infinite() {
            return Vec::new();
        }
        vec![vec![
            [min[0], min[1]],
            [min[0], max[1]],
            [max[0], max[1]],
            [max[0], min[1]],
        ]]
    }
}

#[tokio::test]
async fn structure_set_carries_traced_contours() {
    let volume = volume(2);
    let metadata = metadata_with_positions(2, &[0.0, 1.0]);
    let encoded = SegmentationExporter::generate_structure_set(
        &volume,
        &SessionSnapshot::new("seg"),
        &series(),
        &metadata,
        &BoundingBoxTracer,
        &EncodeOptions::default(),
    )
    .await
    .unwrap();

    let object = read_back(&encoded.payload);
    let modality = object
        .element(tags::MODALITY)
        .unwrap()
        .to_str()
        .unwrap()
        .into_owned();
    assert_eq!(modality.trim_end(), "RTSTRUCT");

    let rois = object
        .element(tags::STRUCTURE_SET_ROI_SEQUENCE)
        .unwrap()
        .items()
        .unwrap();
    assert_eq!(rois.len(), 1);

    let contour_sets = object
        .element(tags::ROI_CONTOUR_SEQUENCE)
        .unwrap()
        .items()
        .unwrap();
    let contours = contour_sets[0]
        .element(tags::CONTOUR_SEQUENCE)
        .unwrap()
        .items()
        .unwrap();
    // One contour per slice; both slices contain segment 1.
    assert_eq!(contours.len(), 2);

    // Slice 0 has its marker voxel at (0, 0) with spacing 0.8 and origin
    // (1, 2, 0): the contour collapses onto the origin.
    let data = contours[0]
        .element(tags::CONTOUR_DATA)
        .unwrap()
        .to_multi_float64()
        .unwrap();
    assert_eq!(data.len(), 12);
    assert_eq!(&data[0..3], [1.0, 2.0, 0.0].as_slice());
}
