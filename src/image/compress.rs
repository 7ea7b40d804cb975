//! Run-length compression of packed row bytes (§4.5 step 6) plus
//! simulation-from-compressed regeneration.
//!
//! Grounded on `examples/original_source/mxSdk/Compress.h`: besides
//! forward compression (`compressRowDataArr`/`compressRowData`), the
//! original declares `simulationCompressWithUncompress` /
//! `mergeSimulationCompressWithUncompress` — regenerating the exact
//! pixel buffer a firmware-side decoder would produce from already
//! RLE'd bytes, used to build an accurate simulation preview
//! regardless of which path (raw vs. compressed) produced the on-wire
//! bytes (SPEC_FULL.md §11).

/// Sequences of >=2 equal bytes emit `(count_byte, value_byte)`; lone
/// bytes emit `(0x01, value)`. `count_byte` saturates at 255 per run
/// (a longer run is split across multiple pairs).
pub fn compress_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len());
    let mut i = 0;
    while i < row.len() {
        let value = row[i];
        let mut run = 1usize;
        while i + run < row.len() && row[i + run] == value && run < 255 {
            run += 1;
        }
        out.push(run as u8);
        out.push(value);
        i += run;
    }
    out
}

pub fn compress_rows(rows: &[Vec<u8>]) -> Vec<Vec<u8>> {
    rows.iter().map(|row| compress_row(row)).collect()
}

/// Regenerates the uncompressed byte stream a firmware-side RLE
/// decoder would produce, i.e. `decompress(compress(row)) == row` for
/// any row, and this same function is what the simulation preview
/// pipeline uses when it must preview already-compressed row data
/// rather than raw binarized pixels.
pub fn decompress_row(compressed: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < compressed.len() {
        let count = compressed[i];
        let value = compressed[i + 1];
        out.extend(std::iter::repeat(value).take(count as usize));
        i += 2;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_injective_for_any_byte_stream() {
        for row in [
            vec![],
            vec![0x00],
            vec![0xFF; 4],
            vec![1, 2, 3, 4, 5],
            vec![9; 300], // exceeds the 255 run cap, must split
            {
                let mut mixed = vec![1, 1, 1, 2, 2, 3, 3, 3, 3, 3];
                mixed.extend(vec![7; 10]);
                mixed
            },
        ] {
            let compressed = compress_row(&row);
            let decompressed = decompress_row(&compressed);
            assert_eq!(decompressed, row, "row={row:?}");
        }
    }

    #[test]
    fn lone_bytes_use_single_element_runs() {
        let row = vec![1, 2, 3];
        let compressed = compress_row(&row);
        assert_eq!(compressed, vec![1, 1, 1, 2, 1, 3]);
    }

    #[test]
    fn long_run_splits_at_255() {
        let row = vec![5u8; 300];
        let compressed = compress_row(&row);
        assert_eq!(compressed, vec![255, 5, 45, 5]);
    }
}
