//! Error-diffusion dithering (§4.5 step 3): Floyd-Steinberg, Atkinson,
//! and Burkes kernels, with cross-tile error carryover via in/out
//! error-row slices (§9 design note: "Raw pixel pointers with in/out
//! error rows → slice pairs").
//!
//! Grounded in signature on
//! `examples/original_source/mxSdk/MxImageUtils.h`'s
//! `formatGrayToFloydDithering:...initialErrors:lastRowErrors:` family
//! (headers only — no `.m` implementation was available in the
//! retrieved pack, so the diffusion math here follows the
//! specification's description of each named algorithm).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherAlgorithm {
    FloydSteinberg,
    Atkinson,
    Burkes,
}

struct Tap {
    dx: i32,
    dy: i32,
    numerator: i32,
    denominator: i32,
}

impl DitherAlgorithm {
    fn kernel(self) -> &'static [Tap] {
        match self {
            DitherAlgorithm::FloydSteinberg => &[
                Tap { dx: 1, dy: 0, numerator: 7, denominator: 16 },
                Tap { dx: -1, dy: 1, numerator: 3, denominator: 16 },
                Tap { dx: 0, dy: 1, numerator: 5, denominator: 16 },
                Tap { dx: 1, dy: 1, numerator: 1, denominator: 16 },
            ],
            DitherAlgorithm::Atkinson => &[
                Tap { dx: 1, dy: 0, numerator: 1, denominator: 8 },
                Tap { dx: 2, dy: 0, numerator: 1, denominator: 8 },
                Tap { dx: -1, dy: 1, numerator: 1, denominator: 8 },
                Tap { dx: 0, dy: 1, numerator: 1, denominator: 8 },
                Tap { dx: 1, dy: 1, numerator: 1, denominator: 8 },
                Tap { dx: 0, dy: 2, numerator: 1, denominator: 8 },
            ],
            DitherAlgorithm::Burkes => &[
                Tap { dx: 1, dy: 0, numerator: 8, denominator: 32 },
                Tap { dx: 2, dy: 0, numerator: 4, denominator: 32 },
                Tap { dx: -2, dy: 1, numerator: 2, denominator: 32 },
                Tap { dx: -1, dy: 1, numerator: 4, denominator: 32 },
                Tap { dx: 0, dy: 1, numerator: 8, denominator: 32 },
                Tap { dx: 1, dy: 1, numerator: 4, denominator: 32 },
                Tap { dx: 2, dy: 1, numerator: 2, denominator: 32 },
            ],
        }
    }
}

/// Quantization threshold used internally by the diffusion step to
/// decide each pixel's 0/255 target before computing its error. This
/// is independent of the caller-chosen binarization threshold applied
/// afterward in step 4 (§4.5) — the two thresholds serve different
/// purposes: this one controls diffusion fidelity, the other controls
/// final ink coverage.
const DIFFUSION_MIDPOINT: i32 = 128;

/// Dithers an 8-bit grayscale buffer in place, accumulating error in a
/// 32-bit accumulator so magnitudes up to ±255 never overflow, and
/// saturating (never wrapping) at the `i32` boundary of a byte's
/// effective range during propagation.
///
/// `initial_errors` is the `lastRowErrors` output of the tile above,
/// applied to row 0 before processing. `out_last_row_errors`, if
/// supplied, receives the error that would have propagated to the row
/// below the final row — threading it into the next tile's
/// `initial_errors` removes the seam between adjacent cropped tiles of
/// the same source image.
pub fn dither(
    pixels: &mut [i32],
    width: usize,
    height: usize,
    algorithm: DitherAlgorithm,
    initial_errors: Option<&[i32]>,
    mut out_last_row_errors: Option<&mut [i32]>,
) {
    assert_eq!(pixels.len(), width * height);

    if let Some(init) = initial_errors {
        for x in 0..width.min(init.len()) {
            pixels[x] = saturate(pixels[x] + init[x]);
        }
    }

    if let Some(out) = out_last_row_errors.as_deref_mut() {
        out.iter_mut().for_each(|e| *e = 0);
    }

    let kernel = algorithm.kernel();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let old = pixels[idx];
            let quantized = if old < DIFFUSION_MIDPOINT { 0 } else { 255 };
            let error = old - quantized;
            pixels[idx] = quantized;

            for tap in kernel {
                let amount = error * tap.numerator / tap.denominator;
                if amount == 0 {
                    continue;
                }
                let tx = x as i32 + tap.dx;
                let ty = y as i32 + tap.dy;
                if tx < 0 || tx >= width as i32 {
                    continue;
                }
                if ty < 0 {
                    continue;
                }
                if (ty as usize) < height {
                    let target = ty as usize * width + tx as usize;
                    pixels[target] = saturate(pixels[target] + amount);
                } else if let Some(out) = out_last_row_errors.as_deref_mut() {
                    out[tx as usize] += amount;
                }
            }
        }
    }
}

fn saturate(value: i32) -> i32 {
    value.clamp(-255, 510)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_buffer(width: usize, height: usize, value: i32) -> Vec<i32> {
        vec![value; width * height]
    }

    #[test]
    fn uniform_dark_image_quantizes_entirely_to_black() {
        let mut pixels = flat_buffer(8, 8, 10);
        dither(&mut pixels, 8, 8, DitherAlgorithm::FloydSteinberg, None, None);
        assert!(pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn uniform_bright_image_quantizes_entirely_to_white() {
        let mut pixels = flat_buffer(8, 8, 250);
        dither(&mut pixels, 8, 8, DitherAlgorithm::Atkinson, None, None);
        assert!(pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn mid_gray_gradient_produces_mixed_output_not_uniform() {
        let width = 16;
        let height = 16;
        let mut pixels: Vec<i32> = (0..width * height).map(|i| ((i % width) * 16) as i32).collect();
        dither(&mut pixels, width, height, DitherAlgorithm::Burkes, None, None);
        let has_black = pixels.iter().any(|&p| p == 0);
        let has_white = pixels.iter().any(|&p| p == 255);
        assert!(has_black && has_white);
    }

    #[test]
    fn seam_freedom_matches_whole_image_dither() {
        let width = 12;
        let height = 20;
        let whole: Vec<i32> = (0..width * height)
            .map(|i| (((i / width) * 7 + (i % width) * 3) % 256) as i32)
            .collect();

        let mut whole_copy = whole.clone();
        dither(&mut whole_copy, width, height, DitherAlgorithm::FloydSteinberg, None, None);

        let top_height = 10;
        let bottom_height = height - top_height;
        let mut top = whole[..top_height * width].to_vec();
        let mut last_row_errors = vec![0i32; width];
        dither(
            &mut top,
            width,
            top_height,
            DitherAlgorithm::FloydSteinberg,
            None,
            Some(&mut last_row_errors),
        );

        let mut bottom = whole[top_height * width..].to_vec();
        dither(
            &mut bottom,
            width,
            bottom_height,
            DitherAlgorithm::FloydSteinberg,
            Some(&last_row_errors),
            None,
        );

        let reassembled: Vec<i32> = top.into_iter().chain(bottom).collect();
        assert_eq!(reassembled, whole_copy);
    }
}
