use crate::collector::PerSliceSegments;
use crate::session::InstanceReference;

/// A referenced source image and whatever geometric metadata resolved for
/// it. Absent fields are only fatal where the target format needs them.
#[derive(Clone, Debug, Default)]
pub struct ReferencedImage {
    pub id: String,
    pub position: Option<[f64; 3]>,
    pub orientation: Option<[f64; 6]>,
    pub pixel_spacing: Option<[f64; 2]>,
    pub reference: Option<InstanceReference>,
}

/// One output slice: label data paired with its source image, at its
/// final position in the resolved spatial order.
#[derive(Clone, Debug)]
pub struct OrderedBinding<'a> {
    pub per_slice: PerSliceSegments<'a>,
    pub image: ReferencedImage,
}

/// Apply the resolver's global `reverse` flag and pair every label slice
/// with its referenced image.
///
/// Slices and images are zipped index-aligned first and only then
/// reversed, as whole pairs, so the two sequences cannot come apart. The
/// output has exactly one binding per input slice.
pub fn bind<'a>(
    per_slice: Vec<PerSliceSegments<'a>>,
    images: Vec<ReferencedImage>,
    reverse: bool,
) -> Vec<OrderedBinding<'a>> {
    debug_assert_eq!(per_slice.len(), images.len());
    let mut bindings: Vec<OrderedBinding<'a>> = per_slice
        .into_iter()
        .zip(images)
        .map(|(per_slice, image)| OrderedBinding { per_slice, image })
        .collect();
    if reverse {
        bindings.reverse();
    }
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector;
    use crate::volume::{LabelSlice, LabelVolume};

    fn volume(count: usize) -> LabelVolume {
        let slices = (0..count)
            .map(|i| LabelSlice::new(vec![i as u16], 1, 1, format!("img-{i}")).unwrap())
            .collect();
        LabelVolume::new(slices).unwrap()
    }

    fn images(count: usize) -> Vec<ReferencedImage> {
        (0..count)
            .map(|i| ReferencedImage {
                id: format!("img-{i}"),
                ..ReferencedImage::default()
            })
            .collect()
    }

    #[test]
    fn keeps_order_when_not_reversed() {
        let volume = volume(3);
        let bindings = bind(collector::collect(&volume), images(3), false);
        let ids: Vec<_> = bindings.iter().map(|b| b.image.id.as_str()).collect();
        assert_eq!(ids, ["img-0", "img-1", "img-2"]);
    }

    #[test]
    fn reverses_pairs_atomically() {
        let volume = volume(3);
        let bindings = bind(collector::collect(&volume), images(3), true);
        let ids: Vec<_> = bindings.iter().map(|b| b.image.id.as_str()).collect();
        assert_eq!(ids, ["img-2", "img-1", "img-0"]);
        for binding in &bindings {
            assert_eq!(binding.per_slice.slice.referenced_image_id(), binding.image.id);
        }
    }

    #[test]
    fn output_length_matches_input() {
        let volume = volume(5);
        assert_eq!(bind(collector::collect(&volume), images(5), true).len(), 5);
    }
}
