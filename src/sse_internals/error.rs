use std::{error::Error, fmt::Display};

#[derive(Debug, PartialEq)]
pub enum SecureIndexError {
    // Folder parameters
    InvalidNumberOfHashFunctions,
    SaltLengthTooShort(usize),
    InvalidFalsePositiveRate(f64),
    InvalidExpectedUniqueWordCount,
    IndexBitLengthTooSmall(u64),

    // Randomness
    RandomnessSourceFailure,

    // Document indexing
    FailedToReadDocument(String),

    // Trapdoors
    TrapdoorArityMismatch(usize, usize),
    TrapdoorCodewordLengthMismatch(usize, usize),

    // Server-side state
    UnknownFolder(String),
    UnknownClientNumber(usize),
    IndexBitLengthMismatch(u64, u64),
    FailedToPersistFolder(String),
    FailedToLoadFolder(String),
    FailedToSerializeIndexToBytes(String),
    FailedToDeserializeIndexFromBytes(String),
    FailedToSerializeTrapdoorToBytes(String),
    FailedToDeserializeTrapdoorFromBytes(String),

    // Client-side bookkeeping
    FileAlreadyAdded(String),
    UnknownFilename(String),
    UnknownDocumentId(u64),
    FailedToSerializeLookupTable(String),
    FailedToDeserializeLookupTable(String),

    // Cancellation
    OperationCancelled,
}

impl Display for SecureIndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumberOfHashFunctions => write!(f, "The number of hash functions must be at least one."),
            Self::SaltLengthTooShort(len) => write!(f, "Salts of '{}' bytes are too short, at least 8 bytes are required.", len),
            Self::InvalidFalsePositiveRate(p) => write!(f, "The false-positive rate '{}' must lie strictly between 0 and 1.", p),
            Self::InvalidExpectedUniqueWordCount => write!(f, "The expected unique word count per document must be at least one."),
            Self::IndexBitLengthTooSmall(m) => write!(f, "An index of '{}' bits is too small, at least 2 bits are required.", m),

            Self::RandomnessSourceFailure => write!(f, "The operating system's randomness source failed."),

            Self::FailedToReadDocument(e) => write!(f, "Reading the document stream failed with: {}", e),

            Self::TrapdoorArityMismatch(expected, actual) => {
                write!(f, "The trapdoor carries '{}' codewords while the folder uses '{}' hash functions.", actual, expected)
            }
            Self::TrapdoorCodewordLengthMismatch(expected, actual) => {
                write!(f, "A trapdoor codeword is '{}' bytes long while the PRF output width is '{}' bytes.", actual, expected)
            }

            Self::UnknownFolder(id) => write!(f, "No folder registered under id '{}'.", id),
            Self::UnknownClientNumber(num) => write!(f, "No key half is held for client number '{}'.", num),
            Self::IndexBitLengthMismatch(expected, actual) => {
                write!(f, "The index is '{}' bits long while the folder size is '{}' bits.", actual, expected)
            }
            Self::FailedToPersistFolder(e) => write!(f, "Persisting folder state failed with: {}", e),
            Self::FailedToLoadFolder(e) => write!(f, "Loading folder state failed with: {}", e),
            Self::FailedToSerializeIndexToBytes(e) => write!(f, "Secure index serialization failed with: {}", e),
            Self::FailedToDeserializeIndexFromBytes(e) => write!(f, "Secure index deserialization failed with: {}", e),
            Self::FailedToSerializeTrapdoorToBytes(e) => write!(f, "Trapdoor serialization failed with: {}", e),
            Self::FailedToDeserializeTrapdoorFromBytes(e) => write!(f, "Trapdoor deserialization failed with: {}", e),

            Self::FileAlreadyAdded(name) => write!(f, "A file named '{}' was already added to this folder.", name),
            Self::UnknownFilename(name) => write!(f, "No file named '{}' is known to this client.", name),
            Self::UnknownDocumentId(id) => write!(f, "No filename is bound to document id '{}' in the lookup table.", id),
            Self::FailedToSerializeLookupTable(e) => write!(f, "Lookup table serialization failed with: {}", e),
            Self::FailedToDeserializeLookupTable(e) => write!(f, "Lookup table deserialization failed with: {}", e),

            Self::OperationCancelled => write!(f, "The operation was cancelled before it completed."),
        }
    }
}

impl Error for SecureIndexError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}
