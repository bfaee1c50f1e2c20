use crate::sse_internals::error::SecureIndexError;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Opaque document identifier. The server keys its stored indexes by it and
/// never learns anything else about the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl Display for DocId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> DocId {
        DocId(id)
    }
}

/// Per-document secure index: a fixed-length Bloom bit array whose positions
/// are derived from trapdoor codewords under the client's master secret.
/// Immutable once built; a changed document gets a freshly built replacement.
///
/// Bits are stored MSB-first within each byte, which is also the wire order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureIndex {
    doc_id: DocId,
    #[serde(with = "bit_array_serde")]
    bits: BitVec<u8, Msb0>,
}

/// Serde bridge for the bit array: (raw bytes, exact bit count). The trailing
/// bit count lets deserialization restore lengths that are not a multiple of
/// eight and doubles as a consistency check against the folder size.
mod bit_array_serde {
    use bitvec::prelude::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bits: &BitVec<u8, Msb0>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bytes: Vec<u8> = bits.as_raw_slice().to_vec();
        (bytes, bits.len() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BitVec<u8, Msb0>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (bytes, bit_len): (Vec<u8>, u64) = Deserialize::deserialize(deserializer)?;

        if bit_len as usize > bytes.len() * 8 {
            return Err(serde::de::Error::custom("bit count exceeds the stored bytes"));
        }

        let mut bits = BitVec::<u8, Msb0>::from_vec(bytes);
        bits.truncate(bit_len as usize);
        Ok(bits)
    }
}

impl SecureIndex {
    pub(crate) fn zeroed(doc_id: DocId, index_bit_len: u64) -> SecureIndex {
        SecureIndex {
            doc_id,
            bits: bitvec![u8, Msb0; 0; index_bit_len as usize],
        }
    }

    pub fn doc_id(&self) -> DocId {
        self.doc_id
    }

    pub fn bit_len(&self) -> u64 {
        self.bits.len() as u64
    }

    pub fn popcount(&self) -> u64 {
        self.bits.count_ones() as u64
    }

    pub(crate) fn set_bit(&mut self, position: u64) {
        self.bits.set(position as usize, true);
    }

    pub fn test_bit(&self, position: u64) -> bool {
        self.bits[position as usize]
    }

    /// True iff every probed position is set. Short-circuits on the first
    /// zero bit.
    pub(crate) fn matches(&self, mut positions: impl Iterator<Item = u64>) -> bool {
        positions.all(|position| self.test_bit(position))
    }

    /// Same bits rebound under a new document id.
    pub(crate) fn rebound(&self, doc_id: DocId) -> SecureIndex {
        SecureIndex { doc_id, bits: self.bits.clone() }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SecureIndexError> {
        bincode::serialize(&self).map_err(|err| SecureIndexError::FailedToSerializeIndexToBytes(err.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<SecureIndex, SecureIndexError> {
        bincode::deserialize(bytes).map_err(|err| SecureIndexError::FailedToDeserializeIndexFromBytes(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_length_is_exact_and_zero_initialized() {
        let index = SecureIndex::zeroed(DocId(7), 1_901);

        assert_eq!(index.bit_len(), 1_901);
        assert_eq!(index.popcount(), 0);
        assert!(!index.test_bit(0));
        assert!(!index.test_bit(1_900));
    }

    #[test]
    fn setting_bits_is_idempotent() {
        let mut index = SecureIndex::zeroed(DocId(7), 64);

        index.set_bit(5);
        index.set_bit(5);
        index.set_bit(63);

        assert_eq!(index.popcount(), 2);
        assert!(index.test_bit(5));
        assert!(index.test_bit(63));
    }

    #[test]
    fn matching_short_circuits_but_agrees_with_full_scan() {
        let mut index = SecureIndex::zeroed(DocId(7), 128);
        [3u64, 17, 90].iter().for_each(|&position| index.set_bit(position));

        assert!(index.matches([3u64, 17, 90].into_iter()));
        assert!(!index.matches([3u64, 17, 91].into_iter()));
        assert!(index.matches(std::iter::empty()));
    }

    #[test]
    fn wire_form_round_trips_with_odd_bit_lengths() {
        let mut index = SecureIndex::zeroed(DocId(42), 1_901);
        [0u64, 7, 8, 1_900].iter().for_each(|&position| index.set_bit(position));

        let bytes = index.to_bytes().unwrap();
        let decoded = SecureIndex::from_bytes(&bytes).unwrap();

        assert_eq!(index, decoded);
        assert_eq!(decoded.bit_len(), 1_901);
        assert_eq!(decoded.popcount(), 4);
    }

    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(SecureIndex::from_bytes(&[0xFFu8; 3]).is_err());
    }

    #[test]
    fn rebinding_keeps_bits() {
        let mut index = SecureIndex::zeroed(DocId(7), 64);
        index.set_bit(11);

        let rebound = index.rebound(DocId(42));

        assert_eq!(rebound.doc_id(), DocId(42));
        assert!(rebound.test_bit(11));
        assert_eq!(rebound.popcount(), index.popcount());
    }
}
