use crate::{
    server::SearchServer,
    sse_internals::{
        branch_opt_util,
        cancel::CancelToken,
        error::SecureIndexError,
        params::{MIN_INDEX_BIT_LEN, MIN_SALT_BYTE_LEN, PADDING_CANCEL_CHECK_INTERVAL},
        prf::{HmacSha256Prf, Prf, PrfOutput},
        secure_index::{DocId, SecureIndex},
        store::FolderId,
        tokenize::unique_words,
        trapdoor::Trapdoor,
    },
};
use sha2::{Digest, Sha256};
use std::{
    cmp::min,
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Client master secret, keying every trapdoor and every index bit the client
/// produces. Fixed for the client's lifetime.
#[derive(Clone)]
pub struct MasterSecret {
    bytes: Vec<u8>,
}

impl MasterSecret {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> MasterSecret {
        MasterSecret { bytes: bytes.into() }
    }

    /// Standard derivation: SHA-256 of the client number's decimal form,
    /// XORed with the key half the server holds for that client. Neither side
    /// alone determines the secret.
    pub fn derive(client_num: usize, server_key_half: &[u8]) -> MasterSecret {
        let client_half = Sha256::digest(client_num.to_string().as_bytes());

        let byte_len = min(client_half.len(), server_key_half.len());
        let bytes = client_half[..byte_len].iter().zip(&server_key_half[..byte_len]).map(|(a, b)| a ^ b).collect();

        MasterSecret { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Builds per-document secure indexes and word trapdoors under one master
/// secret. Immutable after construction, so one builder can serve any number
/// of concurrent builds.
pub struct SecureIndexBuilder<P: Prf = HmacSha256Prf> {
    prf: P,
    master_secret: MasterSecret,
    salts: Vec<Vec<u8>>,
    index_bit_len: u64,
    expected_unique_words: u64,
}

impl SecureIndexBuilder {
    pub fn new(master_secret: MasterSecret, salts: Vec<Vec<u8>>, index_bit_len: u64, expected_unique_words: u64) -> Result<SecureIndexBuilder, SecureIndexError> {
        SecureIndexBuilder::with_prf(HmacSha256Prf, master_secret, salts, index_bit_len, expected_unique_words)
    }
}

impl<P: Prf> SecureIndexBuilder<P> {
    /// Builder over a caller-chosen PRF. The salts, index bit length and
    /// expected unique word count must be the folder's frozen parameters,
    /// typically obtained from `register_folder`.
    pub fn with_prf(
        prf: P,
        master_secret: MasterSecret,
        salts: Vec<Vec<u8>>,
        index_bit_len: u64,
        expected_unique_words: u64,
    ) -> Result<SecureIndexBuilder<P>, SecureIndexError> {
        if branch_opt_util::unlikely(salts.is_empty()) {
            return Err(SecureIndexError::InvalidNumberOfHashFunctions);
        }
        if let Some(salt) = salts.iter().find(|salt| salt.len() < MIN_SALT_BYTE_LEN) {
            return Err(SecureIndexError::SaltLengthTooShort(salt.len()));
        }
        if branch_opt_util::unlikely(index_bit_len < MIN_INDEX_BIT_LEN) {
            return Err(SecureIndexError::IndexBitLengthTooSmall(index_bit_len));
        }
        if branch_opt_util::unlikely(expected_unique_words < 1) {
            return Err(SecureIndexError::InvalidExpectedUniqueWordCount);
        }

        Ok(SecureIndexBuilder {
            prf,
            master_secret,
            salts,
            index_bit_len,
            expected_unique_words,
        })
    }

    pub fn num_hash_funcs(&self) -> usize {
        self.salts.len()
    }

    pub fn index_bit_len(&self) -> u64 {
        self.index_bit_len
    }

    /// Trapdoor for one word: the inner PRF stage binds the word to the
    /// master secret, the outer stage re-keys that binding once per salt. The
    /// two stages are deliberately separate calls; folding the salts into a
    /// single PRF invocation would collapse the independence of the k
    /// codewords.
    pub fn compute_trapdoors(&self, word: &[u8]) -> Trapdoor {
        let inner = self.prf.eval(self.master_secret.as_bytes(), word);
        self.salted_codewords(&inner)
    }

    fn salted_codewords(&self, inner: &PrfOutput) -> Trapdoor {
        let codewords = self.salts.iter().map(|salt| self.prf.eval(salt, inner)).collect();
        Trapdoor::from_codewords(codewords)
    }

    /// Synthetic trapdoor used for blind padding: keyed by (docID, counter)
    /// instead of a word, then pushed through the same salt stage and bit
    /// mapping as real words. Counter-driven, so rebuilds stay bit-identical.
    fn synthetic_trapdoor(&self, doc_id: DocId, counter: u64) -> Trapdoor {
        let mut message = [0u8; 16];
        message[..8].copy_from_slice(&doc_id.0.to_be_bytes());
        message[8..].copy_from_slice(&counter.to_be_bytes());

        let inner = self.prf.eval(self.master_secret.as_bytes(), &message);
        self.salted_codewords(&inner)
    }

    /// Builds the secure index of one document.
    ///
    /// The document is tokenized in a streaming fashion (memory stays
    /// proportional to the unique-word set, not the document), each unique
    /// word's trapdoor sets its k bit positions, and the index is then
    /// blind-padded up to the folder's expected unique word count so the
    /// server cannot estimate the true word count from the bit density.
    ///
    /// `declared_byte_len` is advisory: a mismatch with the bytes actually
    /// read is logged but not fatal. Read failures abort the build with no
    /// index emitted.
    pub fn build_secure_index<R: Read>(&self, doc_id: DocId, document: R, declared_byte_len: usize, cancel: &CancelToken) -> Result<SecureIndex, SecureIndexError> {
        let (words, bytes_read) = unique_words(document, cancel)?;
        if bytes_read != declared_byte_len {
            debug!(doc = %doc_id, declared_byte_len, bytes_read, "document length differed from declaration");
        }

        let mut index = SecureIndex::zeroed(doc_id, self.index_bit_len);

        for word in &words {
            for position in self.compute_trapdoors(word).bit_positions(self.index_bit_len) {
                index.set_bit(position);
            }
        }

        let pad = self.expected_unique_words.saturating_sub(words.len() as u64);
        for counter in 0..pad {
            if counter % PADDING_CANCEL_CHECK_INTERVAL == 0 {
                cancel.guard()?;
            }
            for position in self.synthetic_trapdoor(doc_id, counter).bit_positions(self.index_bit_len) {
                index.set_bit(position);
            }
        }

        Ok(index)
    }
}

/// One user's view of a folder: the directory holding the folder's files, a
/// builder for indexes and trapdoors, and the filename <-> docID lookup
/// table that is stored server-side as an opaque blob.
///
/// Clients of the same folder point at the same directory (the folder's
/// mounted file tree); how file bytes reach that directory is outside this
/// crate, which only ever ships indexes and trapdoors to the server.
///
/// A `Client` snapshots the lookup table at construction; after another
/// client has modified the folder, construct a fresh `Client` to observe the
/// newest table.
pub struct Client<'a, S: SearchServer> {
    server: &'a S,
    folder_id: FolderId,
    directory: PathBuf,
    builder: SecureIndexBuilder,
    lookup_table: HashMap<DocId, String>,
    reverse_lookup: HashMap<String, DocId>,
}

impl<'a, S: SearchServer> Client<'a, S> {
    /// Registers (or joins) `folder_id` on the server, sets up the index
    /// builder from the folder parameters, fetches the current lookup table
    /// and ensures the local directory exists.
    pub fn new(server: &'a S, folder_id: FolderId, master_secret: MasterSecret, directory: impl Into<PathBuf>, cancel: &CancelToken) -> Result<Client<'a, S>, SecureIndexError> {
        let params = server.register_folder(&folder_id, cancel)?;
        let builder = SecureIndexBuilder::new(master_secret, params.salts, params.index_bit_len, params.expected_unique_words)?;

        let lookup_table: HashMap<DocId, String> = match server.read_lookup_table(&folder_id, cancel)? {
            Some(bytes) => bincode::deserialize(&bytes).map_err(|err| SecureIndexError::FailedToDeserializeLookupTable(err.to_string()))?,
            None => HashMap::new(),
        };
        let reverse_lookup = lookup_table.iter().map(|(doc_id, filename)| (filename.clone(), *doc_id)).collect();

        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;

        Ok(Client {
            server,
            folder_id,
            directory,
            builder,
            lookup_table,
            reverse_lookup,
        })
    }

    pub fn folder_id(&self) -> &FolderId {
        &self.folder_id
    }

    pub fn builder(&self) -> &SecureIndexBuilder {
        &self.builder
    }

    pub fn doc_id_of(&self, filename: &str) -> Option<DocId> {
        self.reverse_lookup.get(filename).copied()
    }

    /// All filenames currently known to the folder, sorted.
    pub fn filenames(&self) -> Vec<String> {
        let mut filenames: Vec<String> = self.reverse_lookup.keys().cloned().collect();
        filenames.sort_unstable();
        filenames
    }

    fn next_doc_id(&self) -> DocId {
        DocId(self.lookup_table.keys().map(|doc_id| doc_id.0 + 1).max().unwrap_or(0))
    }

    fn push_lookup_table(&self, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        // TODO: encrypt the serialized table under the master secret before
        // uploading; the server only needs an opaque blob back.
        let bytes = bincode::serialize(&self.lookup_table).map_err(|err| SecureIndexError::FailedToSerializeLookupTable(err.to_string()))?;
        self.server.write_lookup_table(&self.folder_id, &bytes, cancel)
    }

    /// Adds a file to the folder: builds and uploads its secure index, copies
    /// the file into the client directory and publishes the refreshed lookup
    /// table. Fails without side effects if a file of the same name was
    /// already added.
    pub fn add_file(&mut self, path: &Path, cancel: &CancelToken) -> Result<DocId, SecureIndexError> {
        let filename = match path.file_name().and_then(|name| name.to_str()) {
            Some(filename) => filename.to_string(),
            None => return Err(SecureIndexError::UnknownFilename(path.display().to_string())),
        };
        if self.reverse_lookup.contains_key(&filename) {
            return Err(SecureIndexError::FileAlreadyAdded(filename));
        }

        let file = File::open(path).map_err(|err| SecureIndexError::FailedToReadDocument(err.to_string()))?;
        let declared_byte_len = file.metadata().map(|metadata| metadata.len() as usize).unwrap_or(0);

        let doc_id = self.next_doc_id();
        let index = self.builder.build_secure_index(doc_id, file, declared_byte_len, cancel)?;
        self.server.write_index(&self.folder_id, index, cancel)?;

        // Files staged from elsewhere are copied into the folder directory;
        // a file already living there stays put.
        let destination = self.directory.join(&filename);
        if path != destination {
            std::fs::copy(path, &destination).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;
        }

        self.lookup_table.insert(doc_id, filename.clone());
        self.reverse_lookup.insert(filename, doc_id);
        self.push_lookup_table(cancel)?;

        Ok(doc_id)
    }

    /// Renames a file. The document gets a fresh id and the server rebinds
    /// the stored bits to it; the index itself is never rebuilt.
    pub fn rename_file(&mut self, old_name: &str, new_name: &str, cancel: &CancelToken) -> Result<DocId, SecureIndexError> {
        let old_id = match self.reverse_lookup.get(old_name) {
            Some(old_id) => *old_id,
            None => return Err(SecureIndexError::UnknownFilename(old_name.to_string())),
        };
        if self.reverse_lookup.contains_key(new_name) {
            return Err(SecureIndexError::FileAlreadyAdded(new_name.to_string()));
        }

        let new_id = self.next_doc_id();
        self.server.rename_index(&self.folder_id, old_id, new_id, cancel)?;

        std::fs::rename(self.directory.join(old_name), self.directory.join(new_name)).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;

        self.lookup_table.remove(&old_id);
        self.reverse_lookup.remove(old_name);
        self.lookup_table.insert(new_id, new_name.to_string());
        self.reverse_lookup.insert(new_name.to_string(), new_id);
        self.push_lookup_table(cancel)?;

        Ok(new_id)
    }

    /// Removes a file and its index. Removing a name that was never added is
    /// an error; the server-side index delete itself is idempotent.
    pub fn remove_file(&mut self, filename: &str, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        let doc_id = match self.reverse_lookup.get(filename) {
            Some(doc_id) => *doc_id,
            None => return Err(SecureIndexError::UnknownFilename(filename.to_string())),
        };

        self.server.delete_index(&self.folder_id, doc_id, cancel)?;

        if let Err(err) = std::fs::remove_file(self.directory.join(filename)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(SecureIndexError::FailedToPersistFolder(err.to_string()));
            }
        }

        self.lookup_table.remove(&doc_id);
        self.reverse_lookup.remove(filename);
        self.push_lookup_table(cancel)
    }

    /// Searches the folder for `word`: asks the server for the candidate set
    /// via the word's trapdoor, then re-scans each candidate file locally
    /// with the same tokenizer to drop Bloom false positives.
    ///
    /// Returns the sorted matching filenames and the false-positive rate
    /// observed among the candidates.
    pub fn search_word(&self, word: &str, cancel: &CancelToken) -> Result<(Vec<String>, f64), SecureIndexError> {
        let trapdoor = self.builder.compute_trapdoors(word.as_bytes());
        let candidates = self.server.search_word(&self.folder_id, &trapdoor, cancel)?;
        self.verify_candidates(word, &candidates, cancel)
    }

    /// Baseline variant of [`Client::search_word`] that skips the index and
    /// scans every known document locally.
    pub fn search_word_naive(&self, word: &str, cancel: &CancelToken) -> Result<(Vec<String>, f64), SecureIndexError> {
        let mut candidates: Vec<DocId> = self.lookup_table.keys().copied().collect();
        candidates.sort_unstable();
        self.verify_candidates(word, &candidates, cancel)
    }

    fn verify_candidates(&self, word: &str, candidates: &[DocId], cancel: &CancelToken) -> Result<(Vec<String>, f64), SecureIndexError> {
        let mut confirmed = Vec::new();

        for &doc_id in candidates {
            cancel.guard()?;

            let filename = match self.lookup_table.get(&doc_id) {
                Some(filename) => filename,
                None => return Err(SecureIndexError::UnknownDocumentId(doc_id.0)),
            };

            let file = File::open(self.directory.join(filename)).map_err(|err| SecureIndexError::FailedToReadDocument(err.to_string()))?;
            let (words, _) = unique_words(file, cancel)?;

            if words.contains(word.as_bytes()) {
                confirmed.push(filename.clone());
            }
        }

        let false_positives = candidates.len() - confirmed.len();
        let non_members = self.lookup_table.len() - confirmed.len();
        let false_positive_rate = if non_members > 0 { false_positives as f64 / non_members as f64 } else { 0.0 };

        confirmed.sort_unstable();
        Ok((confirmed, false_positive_rate))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sse_internals::folder::generate_salts;
    use std::io::Cursor;

    const INDEX_BIT_LEN: u64 = 200_000;

    fn test_builder(expected_unique_words: u64) -> SecureIndexBuilder {
        let salts = generate_salts(13, 8).unwrap();
        SecureIndexBuilder::new(MasterSecret::from_bytes(*b"an arbitrary 32-byte master key!"), salts, INDEX_BIT_LEN, expected_unique_words).unwrap()
    }

    #[test]
    fn master_secret_derivation_mixes_both_halves() {
        let half = [0xA7u8; 32];

        let a = MasterSecret::derive(0, &half);
        let b = MasterSecret::derive(0, &half);
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.as_bytes().len(), 32);

        assert_ne!(MasterSecret::derive(1, &half).as_bytes(), a.as_bytes());
        assert_ne!(MasterSecret::derive(0, &[0x33u8; 32]).as_bytes(), a.as_bytes());
    }

    #[test]
    fn builder_rejects_bad_parameters() {
        let ms = MasterSecret::from_bytes(*b"an arbitrary 32-byte master key!");
        let salts = generate_salts(5, 8).unwrap();

        assert!(SecureIndexBuilder::new(ms.clone(), vec![], INDEX_BIT_LEN, 100).is_err());
        assert!(SecureIndexBuilder::new(ms.clone(), vec![vec![0u8; 4]; 5], INDEX_BIT_LEN, 100).is_err());
        assert!(SecureIndexBuilder::new(ms.clone(), salts.clone(), 1, 100).is_err());
        assert!(SecureIndexBuilder::new(ms, salts, INDEX_BIT_LEN, 0).is_err());
    }

    #[test]
    fn builds_are_bit_identical() {
        let builder = test_builder(1_000);
        let cancel = CancelToken::new();
        let content = b"This is a test file. It has a pretty random content.";

        let first = builder.build_secure_index(DocId(42), Cursor::new(content), content.len(), &cancel).unwrap();
        let second = builder.build_secure_index(DocId(42), Cursor::new(content), content.len(), &cancel).unwrap();

        assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
    }

    #[test]
    fn every_document_word_is_found() {
        let builder = test_builder(1_000);
        let cancel = CancelToken::new();
        let content = b"This is a test file. It has a pretty random content.";

        let index = builder.build_secure_index(DocId(42), Cursor::new(content), content.len(), &cancel).unwrap();

        for word in content.split(|byte: &u8| byte.is_ascii_whitespace()).filter(|word| !word.is_empty()) {
            let trapdoor = builder.compute_trapdoors(word);
            assert!(index.matches(trapdoor.bit_positions(builder.index_bit_len())));
        }
    }

    #[test]
    fn builders_sharing_secret_and_salts_agree_on_trapdoors() {
        let salts = generate_salts(13, 8).unwrap();
        let ms = MasterSecret::from_bytes(*b"an arbitrary 32-byte master key!");

        let a = SecureIndexBuilder::new(ms.clone(), salts.clone(), INDEX_BIT_LEN, 1_000).unwrap();
        let b = SecureIndexBuilder::new(ms, salts, INDEX_BIT_LEN, 1_000).unwrap();

        assert_eq!(a.compute_trapdoors(b"keyword"), b.compute_trapdoors(b"keyword"));
    }

    #[test]
    fn padding_flattens_the_bit_density() {
        let builder = test_builder(500);
        let cancel = CancelToken::new();

        let sparse_content = b"two words".to_vec();
        let dense_content: Vec<u8> = (0..400).map(|i| format!("word{} ", i)).collect::<String>().into_bytes();

        let sparse = builder.build_secure_index(DocId(1), Cursor::new(sparse_content.as_slice()), sparse_content.len(), &cancel).unwrap();
        let dense = builder.build_secure_index(DocId(2), Cursor::new(dense_content.as_slice()), dense_content.len(), &cancel).unwrap();

        let (low, high) = (sparse.popcount().min(dense.popcount()), sparse.popcount().max(dense.popcount()));
        assert!(high - low < high / 10, "popcounts {} and {} leak the unique-word count", sparse.popcount(), dense.popcount());
    }

    #[test]
    fn empty_document_is_fully_synthetic() {
        let builder = test_builder(100);
        let cancel = CancelToken::new();

        let index = builder.build_secure_index(DocId(3), Cursor::new(b"".as_slice()), 0, &cancel).unwrap();

        assert!(index.popcount() > 0);
        assert!(index.popcount() <= 100 * builder.num_hash_funcs() as u64);
    }

    #[test]
    fn oversized_documents_simply_skip_padding() {
        let builder = test_builder(10);
        let cancel = CancelToken::new();
        let content: Vec<u8> = (0..50).map(|i| format!("unique{} ", i)).collect::<String>().into_bytes();

        let first = builder.build_secure_index(DocId(4), Cursor::new(content.as_slice()), content.len(), &cancel).unwrap();
        let second = builder.build_secure_index(DocId(4), Cursor::new(content.as_slice()), content.len(), &cancel).unwrap();

        assert_eq!(first, second);
        assert!(first.popcount() <= 50 * builder.num_hash_funcs() as u64);
    }

    #[test]
    fn cancelled_build_emits_no_index() {
        let builder = test_builder(1_000);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = builder.build_secure_index(DocId(5), Cursor::new(b"some words".as_slice()), 10, &cancel);
        assert_eq!(result.unwrap_err(), SecureIndexError::OperationCancelled);
    }
}
