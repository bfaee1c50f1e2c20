use crate::sse_internals::params::PRF_OUTPUT_BYTE_LEN;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub type PrfOutput = [u8; PRF_OUTPUT_BYTE_LEN];

/// Keyed pseudorandom function, the only cryptographic primitive of the secure
/// index construction. Both trapdoor stages and the blind-padding codewords go
/// through this seam, so swapping the underlying hash never touches the index
/// builder or the matcher.
///
/// Implementations must be deterministic and pure: equal `(key, msg)` pairs
/// always map to equal outputs.
pub trait Prf: Send + Sync {
    fn eval(&self, key: &[u8], msg: &[u8]) -> PrfOutput;
}

/// HMAC-SHA256 instance of [`Prf`], the default for this crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct HmacSha256Prf;

impl Prf for HmacSha256Prf {
    fn eval(&self, key: &[u8], msg: &[u8]) -> PrfOutput {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);

        let mut output = [0u8; PRF_OUTPUT_BYTE_LEN];
        output.copy_from_slice(&mac.finalize().into_bytes());
        output
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn prf_is_deterministic() {
        let prf = HmacSha256Prf;

        let a = prf.eval(b"some key", b"some message");
        let b = prf.eval(b"some key", b"some message");

        assert_eq!(a, b);
    }

    #[test]
    fn prf_separates_keys_and_messages() {
        let prf = HmacSha256Prf;

        let base = prf.eval(b"key", b"message");

        assert_ne!(base, prf.eval(b"key!", b"message"));
        assert_ne!(base, prf.eval(b"key", b"message!"));
    }

    #[test]
    fn prf_matches_rfc4231_test_case_2() {
        let prf = HmacSha256Prf;

        let expected: [u8; 32] = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95, 0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27,
            0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9, 0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(prf.eval(b"Jefe", b"what do ya want for nothing?"), expected);
    }
}
