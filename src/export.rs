//! Pipeline driver and export handoff.
//!
//! `SegmentationExporter` walks the full encode path over a read-only
//! session snapshot: fetch per-image positions, resolve slice order,
//! collect per-slice segments, build the catalog, bind geometry, encode.
//! Delivery goes through the [`ExportGateway`] collaborator; the core
//! never performs network or disk I/O itself.
//!
//! The pipeline holds no state across calls. Concurrent exports of the
//! same segmentation are not serialized here; callers must do that per
//! segmentation identifier.

use futures::future::join_all;
use thiserror::Error;
use tracing::debug;

use crate::binding::{self, ReferencedImage};
use crate::catalog;
use crate::collector;
use crate::encoder::{
    self, ContourTracer, EncodeError, EncodeOptions, EncodedSegmentation, Manifest,
};
use crate::enums::ExportDestination;
use crate::order;
use crate::session::{MetadataSource, SeriesContext, SessionSnapshot};
use crate::volume::LabelVolume;

/// Failures raised by a gateway implementation, surfaced verbatim. Retry
/// policy belongs to the caller.
pub type GatewayError = Box<dyn std::error::Error + Send + Sync>;

/// What the gateway reports back after a successful delivery.
#[derive(Clone, Debug, Default)]
pub struct StoreReceipt {
    /// Root of the storage endpoint the object landed in, if any.
    pub storage_root: Option<String>,
}

/// External delivery collaborator: frames the payload as a downloadable
/// blob or posts it to a remote storage endpoint with series-identifying
/// headers.
pub trait ExportGateway {
    fn deliver(
        &self,
        object: &EncodedSegmentation,
        destination: &ExportDestination,
    ) -> impl Future<Output = Result<StoreReceipt, GatewayError>>;
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("export handoff failed: {0}")]
    Persistence(#[source] GatewayError),
}

/// Entry points for turning a labelmap snapshot into a stored or
/// downloaded segmentation object.
pub struct SegmentationExporter;

impl SegmentationExporter {
    /// Run the full encode pipeline and produce a Segmentation object.
    pub async fn generate<M: MetadataSource>(
        volume: &LabelVolume,
        session: &SessionSnapshot,
        series: &SeriesContext,
        metadata: &M,
        options: &EncodeOptions,
    ) -> Result<EncodedSegmentation, EncodeError> {
        let positions = fetch_positions(volume, metadata).await;
        let decision = order::resolve(&positions);
        debug!(
            reverse = decision.reverse,
            confidence = ?decision.confidence,
            "resolved slice order"
        );
        let per_slice = collector::collect(volume);
        let catalog = catalog::build(&per_slice, session);
        let images = referenced_images(volume, metadata, positions).await;
        let bindings = binding::bind(per_slice, images, decision.reverse);
        encoder::encode_segmentation(&bindings, &catalog, series, options)
    }

    /// Run the full encode pipeline and produce an RT Structure Set,
    /// tracing segment boundaries with the supplied tracer.
    pub async fn generate_structure_set<M, T>(
        volume: &LabelVolume,
        session: &SessionSnapshot,
        series: &SeriesContext,
        metadata: &M,
        tracer: &T,
        options: &EncodeOptions,
    ) -> Result<EncodedSegmentation, EncodeError>
    where
        M: MetadataSource,
        T: ContourTracer,
    {
        let positions = fetch_positions(volume, metadata).await;
        let decision = order::resolve(&positions);
        debug!(
            reverse = decision.reverse,
            confidence = ?decision.confidence,
            "resolved slice order"
        );
        let per_slice = collector::collect(volume);
        let catalog = catalog::build(&per_slice, session);
        let images = referenced_images(volume, metadata, positions).await;
        let bindings = binding::bind(per_slice, images, decision.reverse);
        encoder::encode_structure_set(&bindings, &catalog, series, tracer, options)
    }

    /// Generate and deliver as a named download; the filename is the
    /// session label.
    pub async fn download<M, G>(
        volume: &LabelVolume,
        session: &SessionSnapshot,
        series: &SeriesContext,
        metadata: &M,
        gateway: &G,
        options: &EncodeOptions,
    ) -> Result<EncodedSegmentation, ExportError>
    where
        M: MetadataSource,
        G: ExportGateway,
    {
        let object = Self::generate(volume, session, series, metadata, options).await?;
        let destination = ExportDestination::Download {
            filename: session.label.clone(),
        };
        gateway
            .deliver(&object, &destination)
            .await
            .map_err(ExportError::Persistence)?;
        Ok(object)
    }

    /// Generate and deliver a Structure Set as a named download.
    pub async fn download_structure_set<M, G, T>(
        volume: &LabelVolume,
        session: &SessionSnapshot,
        series: &SeriesContext,
        metadata: &M,
        tracer: &T,
        gateway: &G,
        options: &EncodeOptions,
    ) -> Result<EncodedSegmentation, ExportError>
    where
        M: MetadataSource,
        G: ExportGateway,
        T: ContourTracer,
    {
        let object =
            Self::generate_structure_set(volume, session, series, metadata, tracer, options)
                .await?;
        let destination = ExportDestination::Download {
            filename: session.label.clone(),
        };
        gateway
            .deliver(&object, &destination)
            .await
            .map_err(ExportError::Persistence)?;
        Ok(object)
    }

    /// Generate and post to the storage endpoint. The series description
    /// is the caller's value, falling back to the session label and then
    /// the default. Returns the manifest tagged with the storage root it
    /// landed in.
    pub async fn store<M, G>(
        volume: &LabelVolume,
        session: &SessionSnapshot,
        series: &SeriesContext,
        metadata: &M,
        gateway: &G,
        series_description: Option<String>,
    ) -> Result<Manifest, ExportError>
    where
        M: MetadataSource,
        G: ExportGateway,
    {
        let description = series_description
            .filter(|d| !d.is_empty())
            .or_else(|| Some(session.label.clone()).filter(|l| !l.is_empty()));
        let options = EncodeOptions {
            series_description: description,
            ..EncodeOptions::default()
        };
        let object = Self::generate(volume, session, series, metadata, &options).await?;
        let receipt = gateway
            .deliver(&object, &ExportDestination::Store)
            .await
            .map_err(ExportError::Persistence)?;
        let mut manifest = object.manifest;
        manifest.storage_root = receipt.storage_root;
        Ok(manifest)
    }
}

/// Raw positions for every referenced image, in source order. Lookups are
/// gathered concurrently; the metadata cache may do lazy I/O per image.
async fn fetch_positions<M: MetadataSource>(
    volume: &LabelVolume,
    metadata: &M,
) -> Vec<Option<Vec<f64>>> {
    join_all(
        volume
            .referenced_image_ids()
            .map(|id| metadata.image_position(id)),
    )
    .await
}

async fn referenced_images<M: MetadataSource>(
    volume: &LabelVolume,
    metadata: &M,
    positions: Vec<Option<Vec<f64>>>,
) -> Vec<ReferencedImage> {
    join_all(
        volume
            .referenced_image_ids()
            .zip(positions)
            .map(|(id, raw_position)| async move {
                ReferencedImage {
                    id: id.to_owned(),
                    position: order::validated(raw_position.as_deref()),
                    orientation: metadata.image_orientation(id).await,
                    pixel_spacing: metadata.pixel_spacing(id).await,
                    reference: metadata.instance_reference(id).await,
                }
            }),
    )
    .await
}
