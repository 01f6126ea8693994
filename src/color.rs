//! RGB to DICOM CIELAB conversion for RecommendedDisplayCIELabValue.
//!
//! Kept as a plain value-to-value function over f64 so the result is
//! identical on every platform: sRGB linearization, D65 reference white,
//! CIELAB, then the PCS integer encoding with round-half-away-from-zero.

/// D65 reference white, the row sums of the sRGB matrix below.
const WHITE: [f64; 3] = [0.95047, 1.0, 1.08883];

/// Convert an 8-bit RGB triple to the DICOM-encoded CIELAB triple
/// (L* scaled to 0..=65535, a*/b* offset by 128 and scaled likewise).
pub(crate) fn rgb_to_dicom_lab(rgb: [u8; 3]) -> [u16; 3] {
    let [l, a, b] = rgb_to_cielab([
        f64::from(rgb[0]) / 255.0,
        f64::from(rgb[1]) / 255.0,
        f64::from(rgb[2]) / 255.0,
    ]);
    [
        encode_component(l * 65535.0 / 100.0),
        encode_component((a + 128.0) * 65535.0 / 255.0),
        encode_component((b + 128.0) * 65535.0 / 255.0),
    ]
}

/// CIELAB (L* 0..=100, a*/b* roughly -128..=127) from normalized sRGB.
fn rgb_to_cielab(rgb: [f64; 3]) -> [f64; 3] {
    let r = srgb_to_linear(rgb[0]);
    let g = srgb_to_linear(rgb[1]);
    let b = srgb_to_linear(rgb[2]);

    let x = 0.4124564 * r + 0.3575761 * g + 0.1804375 * b;
    let y = 0.2126729 * r + 0.7151522 * g + 0.0721750 * b;
    let z = 0.0193339 * r + 0.1191920 * g + 0.9503041 * b;

    let fx = lab_f(x / WHITE[0]);
    let fy = lab_f(y / WHITE[1]);
    let fz = lab_f(z / WHITE[2]);

    [
        116.0 * fy - 16.0,
        500.0 * (fx - fy),
        200.0 * (fy - fz),
    ]
}

fn srgb_to_linear(channel: f64) -> f64 {
    if channel > 0.04045 {
        ((channel + 0.055) / 1.055).powf(2.4)
    } else {
        channel / 12.92
    }
}

fn lab_f(t: f64) -> f64 {
    const DELTA: f64 = 6.0 / 29.0;
    if t > DELTA * DELTA * DELTA {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

/// f64::round rounds half away from zero, the rounding this encoding
/// requires.
fn encode_component(value: f64) -> u16 {
    value.round().clamp(0.0, 65535.0) as u16
}
