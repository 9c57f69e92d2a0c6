//! Reed-Solomon ECC codec, in-process — the spec explicitly calls out
//! shelling to a sibling binary as the fragile legacy path this replaces.
//!
//! Operates over fixed-size chunks of the source file. Each chunk's parity
//! bytes land in a separate sidecar file rather than interleaved with the
//! data, so a source file read directly (outside the archiver) is never
//! disturbed by the presence of its own protection.

use reed_solomon::{Decoder, Encoder};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::config::MAX_CODEWORD_LEN;
use crate::digest::Digest;

#[derive(Debug, Clone, Copy)]
pub struct EccParams {
    pub chunk_size: u16,
    pub ecc_size: u8,
}

#[derive(Error, Debug)]
pub enum EccError {
    #[error("chunk_size {chunk_size} + ecc_size {ecc_size} exceeds the {MAX_CODEWORD_LEN}-byte GF(256) codeword limit")]
    InvalidParams { chunk_size: u16, ecc_size: u8 },

    #[error("chunk {chunk_index} has too many errors to correct (ecc_size={ecc_size} corrects up to {capacity} bytes)")]
    TooManyErrors {
        chunk_index: usize,
        ecc_size: u8,
        capacity: u8,
    },

    #[error("source and ecc sidecar disagree on chunk count")]
    ChunkCountMismatch,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EccParams {
    pub fn validate(&self) -> Result<(), EccError> {
        if self.chunk_size as usize + self.ecc_size as usize > MAX_CODEWORD_LEN {
            return Err(EccError::InvalidParams {
                chunk_size: self.chunk_size,
                ecc_size: self.ecc_size,
            });
        }
        if self.ecc_size == 0 || self.chunk_size == 0 {
            return Err(EccError::InvalidParams {
                chunk_size: self.chunk_size,
                ecc_size: self.ecc_size,
            });
        }
        Ok(())
    }

    /// Byte errors per chunk correctable without erasure hints.
    pub fn correction_capacity(&self) -> u8 {
        self.ecc_size / 2
    }
}

pub struct EccCodec {
    params: EccParams,
}

#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub checksum: String,
    pub chunk_count: usize,
}

impl EccCodec {
    pub fn new(params: EccParams) -> Result<Self, EccError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> EccParams {
        self.params
    }

    /// Streams `source` in `chunk_size`-byte pieces to `sink` unmodified,
    /// writes each piece's parity bytes to `ecc_sink`, and folds every
    /// byte read into `digest` — one pass computes both the protected
    /// copy and its checksum.
    pub fn encode_stream<R: Read, W: Write, Ecc: Write>(
        &self,
        mut source: R,
        mut sink: W,
        mut ecc_sink: Ecc,
        digest: &dyn Digest,
    ) -> Result<EncodeOutcome, EccError> {
        let encoder = Encoder::new(self.params.ecc_size as usize);
        let mut buf = vec![0u8; self.params.chunk_size as usize];
        let mut hasher = digest.incremental();
        let mut chunk_count = 0usize;

        loop {
            let n = read_fill(&mut source, &mut buf)?;
            if n == 0 {
                break;
            }
            let slice = &buf[..n];
            hasher.update(slice);
            sink.write_all(slice)?;

            let encoded = encoder.encode(slice);
            ecc_sink.write_all(encoded.ecc())?;
            chunk_count += 1;

            if n < buf.len() {
                break;
            }
        }

        Ok(EncodeOutcome {
            checksum: hasher.finish(),
            chunk_count,
        })
    }

    /// Reads `source` and its `ecc_source` sidecar in lockstep, correcting
    /// each chunk independently and writing the corrected bytes to `sink`.
    /// Stops at the first uncorrectable chunk — later chunks can't be
    /// trusted to stay aligned past a chunk whose true length is in
    /// doubt.
    pub fn decode_stream<R: Read, Ecc: Read, W: Write>(
        &self,
        source: R,
        ecc_source: Ecc,
        sink: W,
    ) -> Result<(), EccError> {
        self.repair_stream(source, ecc_source, sink, None::<&mut io::Sink>)
    }

    /// Like [`Self::decode_stream`], but also writes each chunk's
    /// corrected parity bytes to `corrected_ecc_sink` — used by
    /// RestorePipeline to rebuild a clean sidecar in the same pass that
    /// recovers the data, since the original sidecar may itself be the
    /// damaged half of the codeword.
    pub fn repair_stream<R: Read, Ecc: Read, W: Write, EccOut: Write>(
        &self,
        mut source: R,
        mut ecc_source: Ecc,
        mut sink: W,
        mut corrected_ecc_sink: Option<EccOut>,
    ) -> Result<(), EccError> {
        let decoder = Decoder::new(self.params.ecc_size as usize);
        let mut data_buf = vec![0u8; self.params.chunk_size as usize];
        let ecc_len = self.params.ecc_size as usize;
        let mut ecc_buf = vec![0u8; ecc_len];
        let mut chunk_index = 0usize;

        loop {
            let n = read_fill(&mut source, &mut data_buf)?;
            if n == 0 {
                break;
            }
            let ecc_n = read_fill(&mut ecc_source, &mut ecc_buf)?;
            if ecc_n != ecc_len {
                return Err(EccError::ChunkCountMismatch);
            }

            let mut codeword = Vec::with_capacity(n + ecc_len);
            codeword.extend_from_slice(&data_buf[..n]);
            codeword.extend_from_slice(&ecc_buf);

            let corrected = decoder.correct(&mut codeword, None).map_err(|_| {
                EccError::TooManyErrors {
                    chunk_index,
                    ecc_size: self.params.ecc_size,
                    capacity: self.params.correction_capacity(),
                }
            })?;

            sink.write_all(corrected.data())?;
            if let Some(ecc_out) = corrected_ecc_sink.as_mut() {
                ecc_out.write_all(corrected.ecc())?;
            }
            chunk_index += 1;

            if n < data_buf.len() {
                break;
            }
        }

        Ok(())
    }
}

/// Fills `buf` from `reader`, short only at true EOF — `Read::read` alone
/// may return short reads mid-stream for reasons that aren't EOF.
fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = reader.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Md5Digest;

    fn codec() -> EccCodec {
        EccCodec::new(EccParams { chunk_size: 32, ecc_size: 16 }).unwrap()
    }

    #[test]
    fn round_trip_without_damage() {
        let codec = codec();
        let data = b"the quick brown fox jumps over the lazy dog, repeated a bit more for chunking".to_vec();

        let mut protected = Vec::new();
        let mut ecc = Vec::new();
        let outcome = codec
            .encode_stream(&data[..], &mut protected, &mut ecc, &Md5Digest)
            .unwrap();
        assert_eq!(protected, data);
        assert_eq!(outcome.checksum, Md5Digest.hash_bytes(&data));

        let mut restored = Vec::new();
        codec.decode_stream(&protected[..], &ecc[..], &mut restored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn corrects_damage_within_capacity() {
        let codec = codec();
        let data = vec![0x42u8; 70];

        let mut protected = Vec::new();
        let mut ecc = Vec::new();
        codec.encode_stream(&data[..], &mut protected, &mut ecc, &Md5Digest).unwrap();

        // corrupt capacity()-many bytes in the first chunk only.
        let capacity = codec.params().correction_capacity() as usize;
        for b in protected.iter_mut().take(capacity) {
            *b ^= 0xFF;
        }

        let mut restored = Vec::new();
        codec.decode_stream(&protected[..], &ecc[..], &mut restored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn fails_above_correction_capacity() {
        let codec = codec();
        let data = vec![0x7Au8; 32];

        let mut protected = Vec::new();
        let mut ecc = Vec::new();
        codec.encode_stream(&data[..], &mut protected, &mut ecc, &Md5Digest).unwrap();

        let capacity = codec.params().correction_capacity() as usize;
        for b in protected.iter_mut().take(capacity + 1) {
            *b ^= 0xFF;
        }

        let mut restored = Vec::new();
        let err = codec.decode_stream(&protected[..], &ecc[..], &mut restored).unwrap_err();
        assert!(matches!(err, EccError::TooManyErrors { chunk_index: 0, .. }));
    }

    #[test]
    fn rejects_params_over_codeword_limit() {
        let err = EccParams { chunk_size: 250, ecc_size: 16 }.validate().unwrap_err();
        assert!(matches!(err, EccError::InvalidParams { .. }));
    }
}
