use crate::sse_internals::{
    branch_opt_util,
    error::SecureIndexError,
    params::{MIN_INDEX_BIT_LEN, MIN_SALT_BYTE_LEN},
};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

/// Folder-scoped parameters, fixed at registration and shared with every
/// client of the folder.
///
/// * `num_hash_funcs` - Number of Bloom hash functions k, equal to the number of salts and of trapdoor codewords.
/// * `salt_byte_len` - Byte length of each salt, at least 8.
/// * `expected_unique_words` - Upper bound n on unique words per document, used for sizing and blind padding.
/// * `false_positive_rate` - Target per-word false-positive rate p, strictly between 0 and 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FolderConfig {
    pub num_hash_funcs: usize,
    pub salt_byte_len: usize,
    pub expected_unique_words: u64,
    pub false_positive_rate: f64,
}

impl FolderConfig {
    pub fn new(num_hash_funcs: usize, salt_byte_len: usize, expected_unique_words: u64, false_positive_rate: f64) -> Result<FolderConfig, SecureIndexError> {
        let config = FolderConfig {
            num_hash_funcs,
            salt_byte_len,
            expected_unique_words,
            false_positive_rate,
        };
        config.validate()?;

        Ok(config)
    }

    /// Same as [`FolderConfig::new`], but picks the standard optimum `k = ceil(-log2(p))`.
    pub fn with_optimal_hash_funcs(salt_byte_len: usize, expected_unique_words: u64, false_positive_rate: f64) -> Result<FolderConfig, SecureIndexError> {
        let num_hash_funcs = optimal_hash_func_count(false_positive_rate)?;
        FolderConfig::new(num_hash_funcs, salt_byte_len, expected_unique_words, false_positive_rate)
    }

    pub fn validate(&self) -> Result<(), SecureIndexError> {
        if branch_opt_util::unlikely(self.num_hash_funcs < 1) {
            return Err(SecureIndexError::InvalidNumberOfHashFunctions);
        }
        if branch_opt_util::unlikely(self.salt_byte_len < MIN_SALT_BYTE_LEN) {
            return Err(SecureIndexError::SaltLengthTooShort(self.salt_byte_len));
        }
        if branch_opt_util::unlikely(self.expected_unique_words < 1) {
            return Err(SecureIndexError::InvalidExpectedUniqueWordCount);
        }
        if branch_opt_util::unlikely(!(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0)) {
            return Err(SecureIndexError::InvalidFalsePositiveRate(self.false_positive_rate));
        }

        // The index bit length the config implies must itself be usable.
        let index_bit_len = compute_index_size(self.expected_unique_words, self.false_positive_rate, self.num_hash_funcs)?;
        if branch_opt_util::unlikely(index_bit_len < MIN_INDEX_BIT_LEN) {
            return Err(SecureIndexError::IndexBitLengthTooSmall(index_bit_len));
        }

        Ok(())
    }

    pub fn index_bit_len(&self) -> Result<u64, SecureIndexError> {
        compute_index_size(self.expected_unique_words, self.false_positive_rate, self.num_hash_funcs)
    }
}

/// What `register_folder` hands back to clients: everything a
/// `SecureIndexBuilder` needs besides the master secret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FolderParams {
    pub salts: Vec<Vec<u8>>,
    pub index_bit_len: u64,
    pub expected_unique_words: u64,
}

/// Draws `num_salts * salt_byte_len` bytes from the operating system's
/// cryptographic RNG and partitions them into `num_salts` salts. Fails only
/// if parameters are invalid or the RNG fails.
pub fn generate_salts(num_salts: usize, salt_byte_len: usize) -> Result<Vec<Vec<u8>>, SecureIndexError> {
    if branch_opt_util::unlikely(num_salts < 1) {
        return Err(SecureIndexError::InvalidNumberOfHashFunctions);
    }
    if branch_opt_util::unlikely(salt_byte_len < MIN_SALT_BYTE_LEN) {
        return Err(SecureIndexError::SaltLengthTooShort(salt_byte_len));
    }

    let mut rng = ChaCha20Rng::try_from_os_rng().map_err(|_| SecureIndexError::RandomnessSourceFailure)?;

    let mut buffer = vec![0u8; num_salts * salt_byte_len];
    rng.fill_bytes(&mut buffer);

    Ok(buffer.chunks_exact(salt_byte_len).map(<[u8]>::to_vec).collect())
}

/// Standard Bloom-filter sizing: `M = ceil(-(n * k) / ln(1 - p^(1/k)))`,
/// with `p^(1/k)` computed as `exp(ln(p) / k)`. The result is clamped to a
/// minimum of 1 bit; whether that is large enough for a folder is checked by
/// [`FolderConfig::validate`].
pub fn compute_index_size(expected_unique_words: u64, false_positive_rate: f64, num_hash_funcs: usize) -> Result<u64, SecureIndexError> {
    if branch_opt_util::unlikely(num_hash_funcs < 1) {
        return Err(SecureIndexError::InvalidNumberOfHashFunctions);
    }
    if branch_opt_util::unlikely(expected_unique_words < 1) {
        return Err(SecureIndexError::InvalidExpectedUniqueWordCount);
    }
    if branch_opt_util::unlikely(!(false_positive_rate > 0.0 && false_positive_rate < 1.0)) {
        return Err(SecureIndexError::InvalidFalsePositiveRate(false_positive_rate));
    }

    let per_func_rate = (false_positive_rate.ln() / num_hash_funcs as f64).exp();
    let numerator = (expected_unique_words as f64) * (num_hash_funcs as f64);
    let size = (-numerator / (1.0 - per_func_rate).ln()).ceil();

    Ok(size.max(1.0) as u64)
}

/// Recommended number of hash functions for a target false-positive rate,
/// `k = ceil(-log2(p))`.
pub fn optimal_hash_func_count(false_positive_rate: f64) -> Result<usize, SecureIndexError> {
    if branch_opt_util::unlikely(!(false_positive_rate > 0.0 && false_positive_rate < 1.0)) {
        return Err(SecureIndexError::InvalidFalsePositiveRate(false_positive_rate));
    }

    Ok((-false_positive_rate.log2()).ceil().max(1.0) as usize)
}
