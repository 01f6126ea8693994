use serde::Serialize;

/// Provenance of a segment, as recorded in the Segment Sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AlgorithmType {
    #[default]
    Manual,
    Automatic,
    Semiautomatic,
}

impl AlgorithmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmType::Manual => "MANUAL",
            AlgorithmType::Automatic => "AUTOMATIC",
            AlgorithmType::Semiautomatic => "SEMIAUTOMATIC",
        }
    }
}

/// How the slice-order decision was reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderConfidence {
    /// Derived from the z components of the first and last slice positions.
    Geometric,
    /// Positions were missing or malformed; the conservative default applies.
    Fallback,
}

/// Where the export gateway should deliver an encoded object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportDestination {
    /// Frame the payload as a downloadable file with the given name.
    Download { filename: String },
    /// Post the payload to the configured remote storage endpoint.
    Store,
}
