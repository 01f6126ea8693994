//! Decides whether the tool-internal slice sequence must be reversed to
//! match the ascending-z DICOM convention.
//!
//! The decision is a single global flag for the whole volume. Slices are
//! assumed to arrive in monotonic acquisition order; this resolver never
//! re-sorts by position.

use tracing::warn;

use crate::enums::OrderConfidence;

/// Outcome of the slice-order resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderDecision {
    pub reverse: bool,
    pub confidence: OrderConfidence,
}

impl OrderDecision {
    /// The predominant slice producer emits descending-z stacks, so the
    /// conservative default when geometry is unusable is to reverse.
    fn fallback() -> Self {
        Self {
            reverse: true,
            confidence: OrderConfidence::Fallback,
        }
    }
}

/// Resolve the slice order from raw per-image positions, in source order.
///
/// Positions come straight from the metadata accessor: absent, short, or
/// non-finite entries are tolerated and degrade the decision to the
/// fallback. Never fails.
pub fn resolve(positions: &[Option<Vec<f64>>]) -> OrderDecision {
    if positions.len() < 2 {
        warn!(
            count = positions.len(),
            "fewer than two slice positions; falling back to reversed order"
        );
        return OrderDecision::fallback();
    }

    let z_components: Option<Vec<f64>> = positions.iter().map(|p| z_of(p.as_deref())).collect();
    let Some(z_components) = z_components else {
        warn!("missing or malformed slice positions; falling back to reversed order");
        return OrderDecision::fallback();
    };

    let first = z_components[0];
    let last = z_components[z_components.len() - 1];
    OrderDecision {
        reverse: first > last,
        confidence: OrderConfidence::Geometric,
    }
}

/// Valid position: at least three finite components. Extra components are
/// ignored.
pub(crate) fn validated(position: Option<&[f64]>) -> Option<[f64; 3]> {
    let position = position?;
    if position.len() < 3 || position.iter().take(3).any(|c| !c.is_finite()) {
        return None;
    }
    Some([position[0], position[1], position[2]])
}

fn z_of(position: Option<&[f64]>) -> Option<f64> {
    validated(position).map(|p| p[2])
}
