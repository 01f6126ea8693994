use ndarray::ArrayView2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelVolumeError {
    #[error("label volume contains no slices")]
    EmptyVolume,

    #[error("inconsistent slice dimensions")]
    InconsistentDimensions,

    #[error("slice {index}: buffer holds {actual} voxels, expected {expected}")]
    BufferLengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("raw slice buffer has an odd byte length ({0})")]
    OddByteLength(usize),
}

/// One labelmap slice: a flat voxel buffer plus the identifier of the
/// source image it was painted over.
///
/// Voxel values are segment indices; 0 is background.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSlice {
    voxels: Vec<u16>,
    rows: u16,
    columns: u16,
    referenced_image_id: String,
}

impl LabelSlice {
    pub fn new(
        voxels: Vec<u16>,
        rows: u16,
        columns: u16,
        referenced_image_id: impl Into<String>,
    ) -> Result<Self, LabelVolumeError> {
        let expected = usize::from(rows) * usize::from(columns);
        if voxels.len() != expected {
            return Err(LabelVolumeError::BufferLengthMismatch {
                index: 0,
                expected,
                actual: voxels.len(),
            });
        }
        Ok(Self {
            voxels,
            rows,
            columns,
            referenced_image_id: referenced_image_id.into(),
        })
    }

    /// Build a slice from a raw native-endian byte buffer, as handed over
    /// by hosts that expose pixel data as untyped memory.
    pub fn from_raw_bytes(
        bytes: &[u8],
        rows: u16,
        columns: u16,
        referenced_image_id: impl Into<String>,
    ) -> Result<Self, LabelVolumeError> {
        if bytes.len() % 2 != 0 {
            return Err(LabelVolumeError::OddByteLength(bytes.len()));
        }
        let voxels: Vec<u16> = bytemuck::pod_collect_to_vec(bytes);
        Self::new(voxels, rows, columns, referenced_image_id)
    }

    pub fn voxels(&self) -> &[u16] {
        &self.voxels
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    pub fn referenced_image_id(&self) -> &str {
        &self.referenced_image_id
    }

    /// 2-D (rows × columns) view over the voxel buffer.
    pub fn view(&self) -> ArrayView2<'_, u16> {
        ArrayView2::from_shape(
            (usize::from(self.rows), usize::from(self.columns)),
            &self.voxels,
        )
        .unwrap_or_else(|_| unreachable!("shape validated at construction"))
    }
}

/// Read-only snapshot of a per-slice labelmap stack, taken from the live
/// editing session at export time.
///
/// All slices share identical dimensions and every buffer holds exactly
/// rows × columns voxels; both invariants are checked at construction so
/// the pipeline stages never see structurally invalid data.
#[derive(Clone, Debug, Default)]
pub struct LabelVolume {
    slices: Vec<LabelSlice>,
}

impl LabelVolume {
    pub fn new(slices: Vec<LabelSlice>) -> Result<Self, LabelVolumeError> {
        let first = slices.first().ok_or(LabelVolumeError::EmptyVolume)?;
        let dim = (first.rows, first.columns);
        for (index, slice) in slices.iter().enumerate() {
            if (slice.rows, slice.columns) != dim {
                return Err(LabelVolumeError::InconsistentDimensions);
            }
            let expected = usize::from(slice.rows) * usize::from(slice.columns);
            if slice.voxels.len() != expected {
                return Err(LabelVolumeError::BufferLengthMismatch {
                    index,
                    expected,
                    actual: slice.voxels.len(),
                });
            }
        }
        Ok(Self { slices })
    }

    pub fn slices(&self) -> &[LabelSlice] {
        &self.slices
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    /// (rows, columns) shared by every slice.
    pub fn dim(&self) -> (u16, u16) {
        let first = &self.slices[0];
        (first.rows, first.columns)
    }

    /// Referenced source image ids in source order.
    pub fn referenced_image_ids(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(|s| s.referenced_image_id.as_str())
    }
}
