//! zlib decoding for ZIP and ZIPS chunks.

use crate::error::{ReadError, ReadResult};

/// Inflates a zlib stream without the predictor and interleave steps.
pub fn decompress_raw(compressed: &[u8], expected_size: usize) -> ReadResult<Vec<u8>> {
    let options = zune_inflate::DeflateOptions::default()
        .set_limit(expected_size)
        .set_size_hint(expected_size);
    let mut decoder = zune_inflate::DeflateDecoder::new_with_options(compressed, options);
    let decompressed = decoder
        .decode_zlib()
        .map_err(|e| ReadError::codec(format_args!("zlib-compressed data malformed: {e:?}")))?;

    if decompressed.len() != expected_size {
        return Err(ReadError::CodecFailure(format!(
            "zip produced {} bytes, expected {expected_size}",
            decompressed.len()
        )));
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflates() {
        let data: Vec<u8> = (0..10000).map(|i| (i % 251) as u8).collect();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&data, 6);
        assert_eq!(decompress_raw(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn garbage_is_a_codec_failure() {
        let err = decompress_raw(&[0xde, 0xad, 0xbe, 0xef], 16).unwrap_err();
        assert!(matches!(err, ReadError::CodecFailure(_)));
    }

    #[test]
    fn size_mismatch() {
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&[1, 2, 3], 6);
        assert!(decompress_raw(&compressed, 4).is_err());
    }
}
