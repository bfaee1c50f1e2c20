pub const PRF_OUTPUT_BYTE_LEN: usize = 32;
pub const MASTER_SECRET_BYTE_LEN: usize = 32;
pub const MIN_SALT_BYTE_LEN: usize = 8;
pub const MIN_INDEX_BIT_LEN: u64 = 2;
pub const TOKENIZER_CHUNK_BYTE_LEN: usize = 8192;
pub const PADDING_CANCEL_CHECK_INTERVAL: u64 = 1024;
pub const INDEX_FILE_EXTENSION: &str = "idx";
pub const INITIAL_KEY_GENERATION: u32 = 1;
