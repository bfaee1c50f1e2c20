use crate::sse_internals::{branch_opt_util, error::SecureIndexError, params::PRF_OUTPUT_BYTE_LEN, prf::PrfOutput};
use serde::{Deserialize, Serialize};

/// Ordered tuple of k codewords for one word, `t_i = prf(salt_i, prf(ms, word))`.
///
/// A trapdoor reveals membership of exactly one word to the server without
/// revealing the word itself. Codeword position is semantic: codeword `i` is
/// paired with salt `i` on both sides of the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trapdoor {
    codewords: Vec<Vec<u8>>,
}

impl Trapdoor {
    pub(crate) fn from_codewords(codewords: Vec<PrfOutput>) -> Trapdoor {
        Trapdoor {
            codewords: codewords.into_iter().map(|codeword| codeword.to_vec()).collect(),
        }
    }

    pub fn codewords(&self) -> &[Vec<u8>] {
        &self.codewords
    }

    pub fn arity(&self) -> usize {
        self.codewords.len()
    }

    /// A trapdoor received over the wire is well-formed only if it carries
    /// exactly one codeword per hash function and every codeword has the PRF
    /// output width.
    pub(crate) fn validate(&self, expected_arity: usize) -> Result<(), SecureIndexError> {
        if branch_opt_util::unlikely(self.codewords.len() != expected_arity) {
            return Err(SecureIndexError::TrapdoorArityMismatch(expected_arity, self.codewords.len()));
        }
        if let Some(codeword) = self.codewords.iter().find(|codeword| codeword.len() != PRF_OUTPUT_BYTE_LEN) {
            return Err(SecureIndexError::TrapdoorCodewordLengthMismatch(PRF_OUTPUT_BYTE_LEN, codeword.len()));
        }

        Ok(())
    }

    /// Bit positions this trapdoor probes in an index of `index_bit_len` bits,
    /// in codeword order.
    pub(crate) fn bit_positions<'a>(&'a self, index_bit_len: u64) -> impl Iterator<Item = u64> + 'a {
        self.codewords.iter().map(move |codeword| bit_position(codeword, index_bit_len))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SecureIndexError> {
        bincode::serialize(&self).map_err(|err| SecureIndexError::FailedToSerializeTrapdoorToBytes(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Trapdoor, SecureIndexError> {
        bincode::deserialize(bytes).map_err(|err| SecureIndexError::FailedToDeserializeTrapdoorFromBytes(err.to_string()))
    }
}

/// Interprets a codeword as a big-endian unsigned integer and reduces it
/// modulo the index bit length. The reduction streams byte-at-a-time so the
/// full 256-bit value never needs to be materialized:
/// `(acc << 8 | byte) mod M` keeps the accumulator below `M <= 2^64`.
#[inline(always)]
pub(crate) fn bit_position(codeword: &[u8], index_bit_len: u64) -> u64 {
    codeword.iter().fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % index_bit_len as u128) as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bit_position_matches_direct_reduction_for_short_codewords() {
        // Up to 8 bytes the big-endian value fits a u64, so the streaming
        // reduction can be checked against plain integer arithmetic.
        let codeword = 0xDEAD_BEEF_CAFE_F00Du64.to_be_bytes();

        for index_bit_len in [2u64, 3, 1_000, 1 << 20, u32::MAX as u64] {
            assert_eq!(bit_position(&codeword, index_bit_len), 0xDEAD_BEEF_CAFE_F00Du64 % index_bit_len);
        }
    }

    #[test]
    fn bit_position_ignores_leading_zero_bytes() {
        let mut padded = [0u8; 32];
        padded[24..].copy_from_slice(&42u64.to_be_bytes());

        assert_eq!(bit_position(&padded, 1_000), 42);
    }

    #[test]
    fn bit_position_stays_in_range() {
        let codeword = [0xFFu8; 32];

        for index_bit_len in [2u64, 7, 1_900_000] {
            assert!(bit_position(&codeword, index_bit_len) < index_bit_len);
        }
    }

    #[test]
    fn validation_checks_arity_and_codeword_width() {
        let trapdoor = Trapdoor::from_codewords(vec![[1u8; PRF_OUTPUT_BYTE_LEN]; 13]);
        assert!(trapdoor.validate(13).is_ok());
        assert_eq!(trapdoor.validate(8), Err(SecureIndexError::TrapdoorArityMismatch(8, 13)));

        let truncated = Trapdoor {
            codewords: vec![vec![1u8; PRF_OUTPUT_BYTE_LEN], vec![1u8; 7]],
        };
        assert_eq!(truncated.validate(2), Err(SecureIndexError::TrapdoorCodewordLengthMismatch(PRF_OUTPUT_BYTE_LEN, 7)));
    }

    #[test]
    fn wire_form_round_trips() {
        let trapdoor = Trapdoor::from_codewords(vec![[0xA5u8; PRF_OUTPUT_BYTE_LEN]; 4]);

        let bytes = trapdoor.to_bytes().unwrap();
        let decoded = Trapdoor::from_bytes(&bytes).unwrap();

        assert_eq!(trapdoor, decoded);
    }
}
