//! # DICOM-seg-export library
//!
//! This crate serves a high-level API for encoding in-memory labelmap
//! volumes as DICOM Segmentation or RT Structure Set objects.
//!
//! This library is part of the dicom-rs ecosystem and leverages its
//! components to produce standards-compliant segmentation objects from
//! the per-slice label buffers an interactive segmentation tool paints
//! over a stack of cross-sectional images. The pipeline reconciles the
//! tool-internal slice traversal order with the ascending-position DICOM
//! convention, merges per-slice segment presence into a 3-D segment
//! catalog, synthesizes required per-segment metadata (coded concepts,
//! display color, algorithm provenance) from partial input, and keeps
//! output slice index, voxel buffer, and referenced source image in
//! exact correspondence. Label volumes are assumed to have the following
//! properties:
//!  - Slices arrive in monotonic acquisition order (the resolver only
//!    ever reverses the whole stack, it never re-sorts)
//!  - All slices share one set of dimensions
//!  - Voxel value 0 is background; positive values are segment indices
//!
//!  Contributions are highly welcome!
//!
//! # Roadmap
//!
//!  - FRACTIONAL segmentation output
//!  - Built-in marching-squares tracer for the Structure Set path
//!  - Multi-frame source image references
//!
//! # Examples
//!
//! ## Encoding a two-slice labelmap as a Segmentation object
//!
//! Build a read-only snapshot of the painted volume, resolve geometry
//! through a metadata source, and write the serialized object wherever a
//! byte sink is wanted.
//!
//! ```no_run
//! # use dicom_seg_export::encoder::EncodeOptions;
//! # use dicom_seg_export::export::SegmentationExporter;
//! # use dicom_seg_export::session::{
//! #     InMemoryMetadata, InstanceReference, SeriesContext, SessionSnapshot,
//! # };
//! # use dicom_seg_export::volume::{LabelSlice, LabelVolume};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let volume = LabelVolume::new(vec![
//!     LabelSlice::new(vec![0, 1, 1, 0], 2, 2, "image-0")?,
//!     LabelSlice::new(vec![0, 0, 1, 0], 2, 2, "image-1")?,
//! ])?;
//!
//! let mut metadata = InMemoryMetadata::new();
//! for (index, id) in ["image-0", "image-1"].into_iter().enumerate() {
//!     metadata.insert_position(id, vec![0.0, 0.0, index as f64]);
//!     metadata.insert_instance_reference(
//!         id,
//!         InstanceReference {
//!             sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".into(),
//!             sop_instance_uid: format!("1.2.3.{index}"),
//!         },
//!     );
//! }
//!
//! let series = SeriesContext {
//!     study_instance_uid: "1.2.3".into(),
//!     series_instance_uid: "1.2.3.4".into(),
//!     frame_of_reference_uid: "1.2.3.5".into(),
//!     ..SeriesContext::default()
//! };
//!
//! let encoded = futures::executor::block_on(SegmentationExporter::generate(
//!     &volume,
//!     &SessionSnapshot::new("Research Segmentation"),
//!     &series,
//!     &metadata,
//!     &EncodeOptions::default(),
//! ))?;
//! std::fs::write("segmentation.dcm", &encoded.payload)?;
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod catalog;
pub mod collector;
mod color;
pub mod encoder;
pub mod enums;
pub mod export;
pub mod order;
pub mod session;
pub mod volume;
