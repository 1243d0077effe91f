//! Run-length decoding.
//!
//! A control byte `n` as `i8`: negative means copy the next `-n` bytes,
//! otherwise repeat the next byte `n + 1` times.

use crate::error::{ReadError, ReadResult};

/// Expands RLE bytes without the predictor and interleave steps.
pub fn decompress_raw(compressed: &[u8], expected_size: usize) -> ReadResult<Vec<u8>> {
    let mut remaining = compressed;
    let mut decompressed = Vec::with_capacity(expected_size);

    while !remaining.is_empty() && decompressed.len() < expected_size {
        let count = take_1(&mut remaining)? as i8 as i32;

        if count < 0 {
            let values = take_n(&mut remaining, (-count) as usize)?;
            decompressed.extend_from_slice(values);
        } else {
            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count as usize + 1, value);
        }
    }

    if decompressed.len() != expected_size {
        return Err(ReadError::CodecFailure(format!(
            "rle produced {} bytes, expected {expected_size}",
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

fn take_1(slice: &mut &[u8]) -> ReadResult<u8> {
    match slice.split_first() {
        Some((&first, rest)) => {
            *slice = rest;
            Ok(first)
        }
        None => Err(ReadError::CodecFailure("rle data ends inside a run".into())),
    }
}

fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> ReadResult<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    } else {
        Err(ReadError::CodecFailure("rle literal run past end of data".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_and_literals() {
        // repeat 5 four times, then literal [1, 2, 3]
        let compressed = [3u8, 5, (-3i8) as u8, 1, 2, 3];
        assert_eq!(decompress_raw(&compressed, 7).unwrap(), vec![5, 5, 5, 5, 1, 2, 3]);
    }

    #[test]
    fn short_output_is_a_codec_failure() {
        let err = decompress_raw(&[1, 9], 4).unwrap_err();
        assert!(matches!(err, ReadError::CodecFailure(_)));
    }

    #[test]
    fn truncated_literal() {
        assert!(decompress_raw(&[(-4i8) as u8, 1, 2], 4).is_err());
    }
}
