use crate::sse_internals::{cancel::CancelToken, error::SecureIndexError, params::TOKENIZER_CHUNK_BYTE_LEN};
use std::{collections::HashSet, io::Read};

/// Streams a document and collects its set of unique tokens, split on ASCII
/// whitespace. Tokens are kept as-is: no trimming, no case folding, no
/// punctuation stripping. The word "file." and the word "file" are distinct.
///
/// The document is consumed in fixed-size chunks with a carry for tokens that
/// straddle a chunk boundary, so memory stays proportional to the unique-token
/// set rather than the document. Cancellation is checked once per chunk.
///
/// Returns the token set together with the number of bytes actually read.
pub(crate) fn unique_words<R: Read>(mut document: R, cancel: &CancelToken) -> Result<(HashSet<Vec<u8>>, usize), SecureIndexError> {
    let mut words = HashSet::new();
    let mut pending_token: Vec<u8> = Vec::new();
    let mut bytes_read = 0;

    let mut chunk = [0u8; TOKENIZER_CHUNK_BYTE_LEN];
    loop {
        cancel.guard()?;

        let chunk_len = match document.read(&mut chunk) {
            Ok(0) => break,
            Ok(chunk_len) => chunk_len,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(SecureIndexError::FailedToReadDocument(err.to_string())),
        };
        bytes_read += chunk_len;

        for &byte in &chunk[..chunk_len] {
            if byte.is_ascii_whitespace() {
                if !pending_token.is_empty() {
                    words.insert(std::mem::take(&mut pending_token));
                }
            } else {
                pending_token.push(byte);
            }
        }
    }

    if !pending_token.is_empty() {
        words.insert(pending_token);
    }

    Ok((words, bytes_read))
}
