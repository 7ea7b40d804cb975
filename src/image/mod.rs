//! Image pipeline (§4.5): converts arbitrary RGBA bitmaps into packed
//! 1-bit column-major (or row-major) print data through grayscale
//! conversion, error-diffusion dithering, threshold binarization,
//! run-length compression, and simulation preview regeneration.
//!
//! Orchestration is grounded on the teacher's `escpos.rs`
//! `raster_image()` (image crate `to_luma8()`, resize via Lanczos3,
//! threshold-based 1-bit packing) — generalized from a one-shot
//! ESC/POS raster command into the full multi-row, dither-aware
//! pipeline §4.5 describes, with the algorithm internals grounded on
//! `MxImageUtils.h` as noted in `dither.rs`/`pack.rs`/`compress.rs`.

pub mod compress;
pub mod dither;
pub mod pack;

use crate::device::RowLayoutDirection;
use crate::errors::{EngineError, Result};
use dither::DitherAlgorithm;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbaImage};
use std::path::{Path, PathBuf};

/// Print-head pixel width (§4.5): fixed at 552px regardless of source
/// image dimensions.
pub const PRINT_HEAD_WIDTH: u32 = 552;

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub threshold: u8,
    pub clear_background: bool,
    pub dithering: Option<DitherAlgorithm>,
    pub compress: bool,
    pub flip_horizontally: bool,
    pub is_simulation: bool,
    /// `isCroppedImageSet` (§4.5 step 3): the rows passed to
    /// `build_multi_row_data` are tiles cropped out of one larger
    /// source image, so each row's dither error carries into the next
    /// via `lastRowErrors`/`initialErrors` instead of starting fresh.
    pub is_cropped_image_set: bool,
    /// `thumbToSimulation` (§4.5 "Simulation preview"): derive the job
    /// thumbnail from the rendered 1-bit simulation preview of the
    /// first row rather than from the original source bitmap.
    pub thumb_to_simulation: bool,
    pub layout: RowLayoutDirection,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            threshold: 128,
            clear_background: true,
            dithering: Some(DitherAlgorithm::FloydSteinberg),
            compress: false,
            flip_horizontally: false,
            is_simulation: false,
            is_cropped_image_set: false,
            thumb_to_simulation: false,
            layout: RowLayoutDirection::Vertical,
        }
    }
}

/// One entry of a `MultiRowImage` input set (§4.5): a row's source
/// bitmap plus how many extra pixel rows of transparent context to pad
/// above/below it before dithering, so the error-diffusion kernel
/// doesn't start cold at a tile seam.
#[derive(Debug, Clone)]
pub struct RowImage {
    pub path: PathBuf,
    pub top_beyond_distance: u32,
    pub bottom_beyond_distance: u32,
}

/// `MultiRowImage` (§4.5): the ordered set of source rows fed into one
/// pipeline run.
pub type MultiRowImage = Vec<RowImage>;

/// One print row, held on disk to bound memory for multi-page jobs
/// (§3 "RowData", §9 design note "On-disk row cache → arena of
/// `(path, len)` handles").
#[derive(Debug, Clone)]
pub struct RowData {
    pub data_path: PathBuf,
    pub data_length: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct MultiRowData {
    pub rows: Vec<RowData>,
    pub preview_paths: Vec<PathBuf>,
    pub thumb_path: Option<PathBuf>,
    pub compress: bool,
    pub layout: RowLayoutDirection,
}

/// Grayscale conversion weights (§4.5 step 2): `g = 0.299R + 0.587G +
/// 0.114B`; transparent pixels become white (255) when
/// `clear_background`, otherwise they keep the computed luminance of
/// whatever color channel values they carry.
fn to_grayscale(image: &DynamicImage, clear_background: bool) -> (Vec<i32>, u32, u32) {
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut out = Vec::with_capacity((width * height) as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a == 0 && clear_background {
            out.push(255);
        } else {
            let gray = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            out.push(gray.round() as i32);
        }
    }
    (out, width, height)
}

fn resize_to_print_width(image: DynamicImage) -> DynamicImage {
    if image.width() == PRINT_HEAD_WIDTH {
        return image;
    }
    let ratio = PRINT_HEAD_WIDTH as f64 / image.width() as f64;
    let target_height = (image.height() as f64 * ratio).round() as u32;
    image.resize_exact(PRINT_HEAD_WIDTH, target_height.max(1), FilterType::Lanczos3)
}

/// Result of running one row (or one tile of a larger source image)
/// through the pipeline.
pub struct RowPipelineOutput {
    pub packed: Vec<u8>,
    pub compressed: Option<Vec<u8>>,
    pub last_row_errors: Vec<i32>,
    pub simulation_bits: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Runs steps 1-6 of §4.5 over a single decoded row image.
/// `initial_errors` carries the previous tile's `lastRowErrors` for
/// seam-free dithering across cropped tiles of the same source image.
pub fn process_row(
    image: DynamicImage,
    options: &PipelineOptions,
    initial_errors: Option<&[i32]>,
) -> RowPipelineOutput {
    process_row_core(image, options, initial_errors, (0, 0))
}

/// Pads a resized row image with transparent rows above/below it
/// (§4.5 step 1): dither context only, cropped back off after
/// binarization by `process_row_core`.
fn pad_with_transparent_context(image: &DynamicImage, top: u32, bottom: u32) -> DynamicImage {
    if top == 0 && bottom == 0 {
        return image.clone();
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut padded = RgbaImage::new(width, height + top + bottom);
    image::imageops::replace(&mut padded, &rgba, 0, top as i64);
    DynamicImage::ImageRgba8(padded)
}

fn crop_context_rows(bits: Vec<u8>, width: usize, height: usize, top: usize, bottom: usize) -> (Vec<u8>, usize) {
    if top == 0 && bottom == 0 {
        return (bits, height);
    }
    let start = top.min(height) * width;
    let end = bits.len().saturating_sub(bottom.min(height) * width);
    (bits[start..end].to_vec(), height.saturating_sub(top + bottom))
}

/// Shared steps 2-6 of §4.5. `context_rows` is the `(top, bottom)`
/// padding already baked into `image`'s height, stripped from the
/// binarized bits before packing so callers never see the padding.
fn process_row_core(
    image: DynamicImage,
    options: &PipelineOptions,
    initial_errors: Option<&[i32]>,
    context_rows: (u32, u32),
) -> RowPipelineOutput {
    let image = if options.flip_horizontally {
        image.fliph()
    } else {
        image
    };
    let image = resize_to_print_width(image);

    let (mut gray, width, height) = to_grayscale(&image, options.clear_background);

    let mut last_row_errors = vec![0i32; width as usize];
    if let Some(algorithm) = options.dithering {
        dither::dither(
            &mut gray,
            width as usize,
            height as usize,
            algorithm,
            initial_errors,
            Some(&mut last_row_errors),
        );
    }

    let threshold = options.threshold as i32;
    let bits: Vec<u8> = gray.iter().map(|&g| if g < threshold { 1 } else { 0 }).collect();
    let (bits, height) = crop_context_rows(bits, width as usize, height as usize, context_rows.0 as usize, context_rows.1 as usize);
    let height = height as u32;

    let packed = match options.layout {
        RowLayoutDirection::Vertical => pack::pack_column_major(&bits, width as usize, height as usize),
        RowLayoutDirection::Horizontal => pack::pack_row_major(&bits, width as usize, height as usize),
    };

    let compressed = if options.compress {
        Some(compress::compress_row(&packed))
    } else {
        None
    };

    RowPipelineOutput {
        packed,
        compressed,
        last_row_errors,
        simulation_bits: bits,
        width,
        height,
    }
}

/// Runs the full per-row pipeline from a `RowImage` (§4.5 "Input:
/// `MultiRowImage`"): decode from disk, orient, resize, pad with
/// `topBeyondDistance`/`bottomBeyondDistance` rows of transparent dither
/// context, then dither/binarize/pack/compress and crop the context
/// back off.
pub fn process_row_image(
    row_image: &RowImage,
    options: &PipelineOptions,
    initial_errors: Option<&[i32]>,
) -> Result<RowPipelineOutput> {
    let image = image::open(&row_image.path).map_err(anyhow::Error::from)?;
    let image = if options.flip_horizontally { image.fliph() } else { image };
    let image = resize_to_print_width(image);
    let padded = pad_with_transparent_context(&image, row_image.top_beyond_distance, row_image.bottom_beyond_distance);

    let core_options = PipelineOptions {
        flip_horizontally: false,
        ..*options
    };
    Ok(process_row_core(
        padded,
        &core_options,
        initial_errors,
        (row_image.top_beyond_distance, row_image.bottom_beyond_distance),
    ))
}

/// Persists one row's packed (or compressed) bytes to the row-data
/// cache directory, returning the `RowData` handle (§4.5 step 7,
/// §5 "Shared resources": filenames are timestamp-randomized so
/// concurrent writers never collide).
pub fn persist_row(cache_dir: &Path, row_index: usize, output: &RowPipelineOutput) -> Result<RowData> {
    std::fs::create_dir_all(cache_dir)?;
    let bytes = output.compressed.as_ref().unwrap_or(&output.packed);
    let filename = format!("row-{row_index}-{}.bin", unique_suffix());
    let path = cache_dir.join(filename);
    std::fs::write(&path, bytes)?;
    Ok(RowData {
        data_path: path,
        data_length: bytes.len(),
        compress: output.compressed.is_some(),
    })
}

fn unique_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn render_bits_to_image(bits: &[u8], width: u32, height: u32) -> GrayImage {
    let mut img = GrayImage::new(width, height);
    for (px, &bit) in img.pixels_mut().zip(bits.iter()) {
        *px = Luma([if bit == 1 { 0 } else { 255 }]);
    }
    img
}

/// Renders and persists the row's 1-bit simulation preview (§4.5
/// "Simulation preview"): exactly what the printer will lay down,
/// saved next to the row's packed bytes and shown in the UI.
pub fn persist_preview(cache_dir: &Path, row_index: usize, output: &RowPipelineOutput) -> Result<PathBuf> {
    std::fs::create_dir_all(cache_dir)?;
    let img = render_bits_to_image(&output.simulation_bits, output.width, output.height);
    let filename = format!("preview-{row_index}-{}.png", unique_suffix());
    let path = cache_dir.join(filename);
    img.save(&path).map_err(anyhow::Error::from)?;
    Ok(path)
}

const THUMB_MAX_DIM: u32 = 160;

/// `thumbToSimulation`: derives the job thumbnail from the first row's
/// rendered simulation preview, so it shows post-dither appearance
/// instead of the original source bitmap.
fn persist_thumb_from_simulation(cache_dir: &Path, bits: &[u8], width: u32, height: u32) -> Result<PathBuf> {
    std::fs::create_dir_all(cache_dir)?;
    let img = render_bits_to_image(bits, width, height);
    let ratio = THUMB_MAX_DIM as f64 / width.max(1) as f64;
    let thumb_height = ((height as f64 * ratio).round() as u32).max(1);
    let thumb = image::imageops::thumbnail(&img, THUMB_MAX_DIM.min(width.max(1)), thumb_height);
    let filename = format!("thumb-{}.png", unique_suffix());
    let path = cache_dir.join(filename);
    thumb.save(&path).map_err(anyhow::Error::from)?;
    Ok(path)
}

/// Runs the full §4.5 pipeline over every row of a `MultiRowImage` and
/// assembles the resulting `MultiRowData`: per-row packed/compressed
/// data, per-row simulation previews, and (if `thumbToSimulation`) a
/// job thumbnail derived from the first row's preview. Dither error
/// carries row-to-row when `isCroppedImageSet` is set, removing seams
/// between tiles of one larger source image.
pub fn build_multi_row_data(rows: &MultiRowImage, options: &PipelineOptions, cache_dir: &Path) -> Result<MultiRowData> {
    let mut row_data = Vec::with_capacity(rows.len());
    let mut preview_paths = Vec::with_capacity(rows.len());
    let mut carry_errors: Option<Vec<i32>> = None;
    let mut first_preview: Option<(Vec<u8>, u32, u32)> = None;

    for (index, row_image) in rows.iter().enumerate() {
        let initial_errors = if options.is_cropped_image_set {
            carry_errors.as_deref()
        } else {
            None
        };
        let output = process_row_image(row_image, options, initial_errors)?;
        preview_paths.push(persist_preview(cache_dir, index, &output)?);
        if index == 0 {
            first_preview = Some((output.simulation_bits.clone(), output.width, output.height));
        }
        if options.is_cropped_image_set {
            carry_errors = Some(output.last_row_errors.clone());
        }
        row_data.push(persist_row(cache_dir, index, &output)?);
    }

    let thumb_path = if options.thumb_to_simulation {
        first_preview
            .map(|(bits, width, height)| persist_thumb_from_simulation(cache_dir, &bits, width, height))
            .transpose()?
    } else {
        None
    };

    Ok(MultiRowData {
        rows: row_data,
        preview_paths,
        thumb_path,
        compress: options.compress,
        layout: options.layout,
    })
}

/// Regenerates the simulation preview's binary pixels for a row whose
/// on-wire bytes were RLE-compressed, by simulating the firmware-side
/// decoder rather than re-running the dither pipeline (§11
/// "Compression simulation regeneration").
pub fn simulate_from_compressed(compressed: &[u8], width: usize, height: usize, layout: RowLayoutDirection) -> Vec<u8> {
    let packed = compress::decompress_row(compressed);
    match layout {
        RowLayoutDirection::Vertical => pack::unpack_column_major(&packed, width, height),
        RowLayoutDirection::Horizontal => pack::unpack_row_major(&packed, width, height),
    }
}

pub fn load_row_data(row: &RowData) -> Result<Vec<u8>> {
    std::fs::read(&row.data_path).map_err(EngineError::from)
}
