// Integration coverage of the image preparation pipeline's pure-data
// stages (dither -> binarize -> pack -> compress -> decompress ->
// unpack) chained end to end, the way image/mod.rs chains them ahead
// of a transfer, without needing a real source bitmap on disk.

use mxprint_engine::image::compress::{compress_row, decompress_row};
use mxprint_engine::image::dither::{dither, DitherAlgorithm};
use mxprint_engine::image::pack::{pack_column_major, pack_row_major, unpack_column_major, unpack_row_major};
use pretty_assertions::assert_eq;

fn gradient(width: usize, height: usize) -> Vec<i32> {
    (0..width * height)
        .map(|i| (((i % width) * 255) / width.max(1)) as i32)
        .collect()
}

fn binarize(pixels: &[i32]) -> Vec<u8> {
    pixels.iter().map(|&p| if p >= 128 { 1 } else { 0 }).collect()
}

#[test]
fn gradient_image_survives_dither_pack_compress_round_trip() {
    let width = 48;
    let height = 32;
    let mut pixels = gradient(width, height);
    dither(&mut pixels, width, height, DitherAlgorithm::FloydSteinberg, None, None);

    // dither() quantizes every pixel to exactly 0 or 255.
    assert!(pixels.iter().all(|&p| p == 0 || p == 255));
    let bits = binarize(&pixels);

    let packed = pack_column_major(&bits, width, height);
    let bytes_per_col = (height + 7) / 8;
    let columns: Vec<Vec<u8>> = packed.chunks(bytes_per_col).map(|c| c.to_vec()).collect();
    let compressed: Vec<Vec<u8>> = columns.iter().map(|c| compress_row(c)).collect();

    let decompressed: Vec<u8> = compressed.iter().flat_map(|c| decompress_row(c)).collect();
    assert_eq!(decompressed, packed, "RLE round trip must reproduce the packed bytes exactly");

    let unpacked = unpack_column_major(&decompressed, width, height);
    assert_eq!(unpacked, bits, "unpacking the decompressed bytes must match the pre-compression bits");
}

#[test]
fn row_major_layout_pipeline_matches_column_major_after_transpose_of_bits() {
    let width = 33;
    let height = 19;
    let mut pixels = gradient(width, height);
    dither(&mut pixels, width, height, DitherAlgorithm::Atkinson, None, None);
    let bits = binarize(&pixels);

    let packed = pack_row_major(&bits, width, height);
    let unpacked = unpack_row_major(&packed, width, height);
    assert_eq!(unpacked, bits);

    // The two layouts are genuinely different on-wire encodings of the
    // same bitmap, not aliases of one another.
    let col_packed = pack_column_major(&bits, width, height);
    assert_ne!(packed.len(), col_packed.len());
    assert_eq!(unpack_column_major(&col_packed, width, height), bits);
}

#[test]
fn seam_free_tiled_dither_then_pack_matches_whole_image_pipeline() {
    let width = 24;
    let height = 40;
    let whole_source = gradient(width, height);

    let mut whole = whole_source.clone();
    dither(&mut whole, width, height, DitherAlgorithm::Burkes, None, None);
    let whole_bits = binarize(&whole);
    let whole_packed = pack_column_major(&whole_bits, width, height);

    let split = 17;
    let mut top = whole_source[..split * width].to_vec();
    let mut carry = vec![0i32; width];
    dither(&mut top, width, split, DitherAlgorithm::Burkes, None, Some(&mut carry));

    let mut bottom = whole_source[split * width..].to_vec();
    dither(&mut bottom, width, height - split, DitherAlgorithm::Burkes, Some(&carry), None);

    let tiled_bits: Vec<u8> = binarize(&top).into_iter().chain(binarize(&bottom)).collect();
    let tiled_packed = pack_column_major(&tiled_bits, width, height);

    assert_eq!(tiled_packed, whole_packed);
}
