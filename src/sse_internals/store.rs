use crate::sse_internals::{
    branch_opt_util,
    cancel::CancelToken,
    error::SecureIndexError,
    folder::{generate_salts, FolderConfig, FolderParams},
    params::{INDEX_FILE_EXTENSION, INITIAL_KEY_GENERATION, MIN_SALT_BYTE_LEN},
    secure_index::{DocId, SecureIndex},
    trapdoor::Trapdoor,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::{debug, info, trace, warn};

const SALTS_FILE_NAME: &str = "salts";
const SIZE_FILE_NAME: &str = "size";
const LOOKUP_TABLE_FILE_NAME: &str = "lookup_table";

/// Identifier of one folder (tenant) on the server. Doubles as the name of
/// the folder's on-disk directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub String);

impl FolderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FolderId {
    fn from(id: &str) -> FolderId {
        FolderId(id.to_string())
    }
}

/// Server-side state of one folder: the frozen salts and index size, the
/// docID -> SecureIndex map, and the opaque client-maintained lookup-table
/// blob. The store never sees plaintext words, inverted lists, or trapdoor
/// preimages.
///
/// All mutation happens under the write side of an `RwLock`, so searches
/// observe either the state before a write or the state after it, never a
/// torn half of a rename.
pub(crate) struct FolderStore {
    folder_id: FolderId,
    dir: PathBuf,
    salts: Vec<Vec<u8>>,
    index_bit_len: u64,
    expected_unique_words: u64,
    key_gens: Vec<u32>,
    indexes: RwLock<HashMap<DocId, SecureIndex>>,
    lookup_table: RwLock<Option<Vec<u8>>>,
}

impl FolderStore {
    /// Loads the folder rooted at `root/<folder_id>` if it already exists on
    /// disk, otherwise creates it with fresh salts and a size computed from
    /// the server configuration. Registration is thereby idempotent across
    /// process restarts.
    pub(crate) fn open_or_create(root: &Path, folder_id: &FolderId, config: &FolderConfig) -> Result<FolderStore, SecureIndexError> {
        let dir = root.join(folder_id.as_str());

        // Re-registering an existing folder is the common case; creation
        // happens once per folder lifetime.
        if branch_opt_util::likely(dir.join(SALTS_FILE_NAME).exists()) {
            FolderStore::load(dir, folder_id, config)
        } else {
            FolderStore::create(dir, folder_id, config)
        }
    }

    fn create(dir: PathBuf, folder_id: &FolderId, config: &FolderConfig) -> Result<FolderStore, SecureIndexError> {
        config.validate()?;

        let salts = generate_salts(config.num_hash_funcs, config.salt_byte_len)?;
        let index_bit_len = config.index_bit_len()?;

        fs::create_dir_all(&dir).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;
        fs::write(dir.join(SALTS_FILE_NAME), salts.concat()).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;
        fs::write(dir.join(SIZE_FILE_NAME), index_bit_len.to_string()).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;

        info!(folder = %folder_id, num_salts = salts.len(), index_bit_len, "registered new folder");

        Ok(FolderStore {
            folder_id: folder_id.clone(),
            dir,
            salts,
            index_bit_len,
            expected_unique_words: config.expected_unique_words,
            key_gens: vec![INITIAL_KEY_GENERATION],
            indexes: RwLock::new(HashMap::new()),
            lookup_table: RwLock::new(None),
        })
    }

    fn load(dir: PathBuf, folder_id: &FolderId, config: &FolderConfig) -> Result<FolderStore, SecureIndexError> {
        let salt_bytes = fs::read(dir.join(SALTS_FILE_NAME)).map_err(|err| SecureIndexError::FailedToLoadFolder(err.to_string()))?;
        if branch_opt_util::unlikely(config.salt_byte_len < MIN_SALT_BYTE_LEN || salt_bytes.is_empty() || salt_bytes.len() % config.salt_byte_len != 0) {
            return Err(SecureIndexError::FailedToLoadFolder(format!(
                "salt file of {} bytes does not partition into salts of {} bytes",
                salt_bytes.len(),
                config.salt_byte_len
            )));
        }
        let salts: Vec<Vec<u8>> = salt_bytes.chunks_exact(config.salt_byte_len).map(<[u8]>::to_vec).collect();

        let index_bit_len: u64 = fs::read_to_string(dir.join(SIZE_FILE_NAME))
            .map_err(|err| SecureIndexError::FailedToLoadFolder(err.to_string()))?
            .trim()
            .parse()
            .map_err(|err: std::num::ParseIntError| SecureIndexError::FailedToLoadFolder(err.to_string()))?;

        let mut indexes = HashMap::new();
        let entries = fs::read_dir(&dir).map_err(|err| SecureIndexError::FailedToLoadFolder(err.to_string()))?;
        for entry in entries {
            let path = entry.map_err(|err| SecureIndexError::FailedToLoadFolder(err.to_string()))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(INDEX_FILE_EXTENSION) {
                continue;
            }

            let doc_id = match path.file_stem().and_then(|stem| stem.to_str()).and_then(|stem| stem.parse::<u64>().ok()) {
                Some(doc_id) => DocId(doc_id),
                None => {
                    warn!(folder = %folder_id, path = %path.display(), "skipping index file with unparsable name");
                    continue;
                }
            };

            let bytes = fs::read(&path).map_err(|err| SecureIndexError::FailedToLoadFolder(err.to_string()))?;
            let index = SecureIndex::from_bytes(&bytes)?;

            if branch_opt_util::unlikely(index.doc_id() != doc_id) {
                return Err(SecureIndexError::FailedToLoadFolder(format!(
                    "index file '{}' carries document id {}",
                    path.display(),
                    index.doc_id()
                )));
            }
            if branch_opt_util::unlikely(index.bit_len() != index_bit_len) {
                return Err(SecureIndexError::IndexBitLengthMismatch(index_bit_len, index.bit_len()));
            }

            indexes.insert(doc_id, index);
        }

        let lookup_table = match fs::read(dir.join(LOOKUP_TABLE_FILE_NAME)) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(SecureIndexError::FailedToLoadFolder(err.to_string())),
        };

        info!(folder = %folder_id, num_indexes = indexes.len(), index_bit_len, "loaded folder from disk");

        Ok(FolderStore {
            folder_id: folder_id.clone(),
            dir,
            salts,
            index_bit_len,
            expected_unique_words: config.expected_unique_words,
            key_gens: vec![INITIAL_KEY_GENERATION],
            indexes: RwLock::new(indexes),
            lookup_table: RwLock::new(lookup_table),
        })
    }

    pub(crate) fn params(&self) -> FolderParams {
        FolderParams {
            salts: self.salts.clone(),
            index_bit_len: self.index_bit_len,
            expected_unique_words: self.expected_unique_words,
        }
    }

    pub(crate) fn key_gens(&self) -> Vec<u32> {
        self.key_gens.clone()
    }

    fn index_path(&self, doc_id: DocId) -> PathBuf {
        self.dir.join(format!("{}.{}", doc_id, INDEX_FILE_EXTENSION))
    }

    /// Insert or replace by document id. Replaying the same index is a no-op
    /// besides rewriting its file.
    pub(crate) fn write_index(&self, index: SecureIndex, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        cancel.guard()?;

        if branch_opt_util::unlikely(index.bit_len() != self.index_bit_len) {
            return Err(SecureIndexError::IndexBitLengthMismatch(self.index_bit_len, index.bit_len()));
        }

        let bytes = index.to_bytes()?;
        let doc_id = index.doc_id();

        let mut indexes = self.indexes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::write(self.index_path(doc_id), bytes).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;
        indexes.insert(doc_id, index);

        debug!(folder = %self.folder_id, doc = %doc_id, "wrote index");
        Ok(())
    }

    /// Rebinds the stored bits under a new document id. No-op when the old id
    /// is absent. Searches never observe the half-applied state: the swap
    /// happens under the write lock.
    pub(crate) fn rename_index(&self, old: DocId, new: DocId, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        cancel.guard()?;

        let mut indexes = self.indexes.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        let index = match indexes.get(&old) {
            Some(index) => index.rebound(new),
            None => {
                debug!(folder = %self.folder_id, doc = %old, "rename of absent index is a no-op");
                return Ok(());
            }
        };

        fs::write(self.index_path(new), index.to_bytes()?).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;
        if let Err(err) = fs::remove_file(self.index_path(old)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(SecureIndexError::FailedToPersistFolder(err.to_string()));
            }
        }

        indexes.remove(&old);
        indexes.insert(new, index);

        debug!(folder = %self.folder_id, old = %old, new = %new, "renamed index");
        Ok(())
    }

    /// Removes by document id. No-op when absent.
    pub(crate) fn delete_index(&self, doc_id: DocId, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        cancel.guard()?;

        let mut indexes = self.indexes.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Err(err) = fs::remove_file(self.index_path(doc_id)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                return Err(SecureIndexError::FailedToPersistFolder(err.to_string()));
            }
        }
        indexes.remove(&doc_id);

        debug!(folder = %self.folder_id, doc = %doc_id, "deleted index");
        Ok(())
    }

    /// The matcher: every stored index whose bits are set at all k positions
    /// the trapdoor probes. Short-circuits per index on the first zero bit;
    /// cost is O(D * k) over D stored documents by construction, since no
    /// inverted structure exists to consult.
    pub(crate) fn search(&self, trapdoor: &Trapdoor, cancel: &CancelToken) -> Result<Vec<DocId>, SecureIndexError> {
        cancel.guard()?;
        trapdoor.validate(self.salts.len())?;

        let positions: Vec<u64> = trapdoor.bit_positions(self.index_bit_len).collect();

        let indexes = self.indexes.read().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut matching = Vec::new();
        for (doc_id, index) in indexes.iter() {
            cancel.guard()?;
            if index.matches(positions.iter().copied()) {
                matching.push(*doc_id);
            }
        }
        matching.sort_unstable();

        trace!(folder = %self.folder_id, candidates = matching.len(), searched = indexes.len(), "trapdoor search");
        Ok(matching)
    }

    pub(crate) fn write_lookup_table(&self, table: &[u8], cancel: &CancelToken) -> Result<(), SecureIndexError> {
        cancel.guard()?;

        let mut lookup_table = self.lookup_table.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        fs::write(self.dir.join(LOOKUP_TABLE_FILE_NAME), table).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;
        *lookup_table = Some(table.to_vec());

        debug!(folder = %self.folder_id, table_byte_len = table.len(), "wrote lookup table");
        Ok(())
    }

    pub(crate) fn read_lookup_table(&self, cancel: &CancelToken) -> Result<Option<Vec<u8>>, SecureIndexError> {
        cancel.guard()?;

        let lookup_table = self.lookup_table.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(lookup_table.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_config() -> FolderConfig {
        FolderConfig::new(5, 8, 100, 1e-3).unwrap()
    }

    fn test_trapdoor(arity: usize) -> Trapdoor {
        Trapdoor::from_codewords(vec![[0x5Au8; crate::sse_internals::params::PRF_OUTPUT_BYTE_LEN]; arity])
    }

    fn index_with_positions(doc_id: DocId, bit_len: u64, positions: &[u64]) -> SecureIndex {
        let mut index = SecureIndex::zeroed(doc_id, bit_len);
        positions.iter().for_each(|&position| index.set_bit(position));
        index
    }

    #[test]
    fn create_then_reopen_preserves_salts_size_and_indexes() {
        let root = tempfile::tempdir().unwrap();
        let folder_id = FolderId::from("tlf-a");
        let cancel = CancelToken::new();
        let config = test_config();

        let created = FolderStore::open_or_create(root.path(), &folder_id, &config).unwrap();
        let params = created.params();

        let trapdoor = test_trapdoor(5);
        let positions: Vec<u64> = trapdoor.bit_positions(params.index_bit_len).collect();
        created.write_index(index_with_positions(DocId(3), params.index_bit_len, &positions), &cancel).unwrap();
        created.write_lookup_table(b"opaque blob", &cancel).unwrap();
        drop(created);

        let reopened = FolderStore::open_or_create(root.path(), &folder_id, &config).unwrap();

        assert_eq!(reopened.params(), params);
        assert_eq!(reopened.search(&trapdoor, &cancel).unwrap(), vec![DocId(3)]);
        assert_eq!(reopened.read_lookup_table(&cancel).unwrap().as_deref(), Some(b"opaque blob".as_slice()));
    }

    #[test]
    fn rename_rebinds_and_delete_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let store = FolderStore::open_or_create(root.path(), &FolderId::from("tlf-b"), &test_config()).unwrap();
        let bit_len = store.params().index_bit_len;

        let trapdoor = test_trapdoor(5);
        let positions: Vec<u64> = trapdoor.bit_positions(bit_len).collect();
        store.write_index(index_with_positions(DocId(7), bit_len, &positions), &cancel).unwrap();

        store.rename_index(DocId(7), DocId(42), &cancel).unwrap();
        assert_eq!(store.search(&trapdoor, &cancel).unwrap(), vec![DocId(42)]);

        // Renaming an absent id stays a no-op.
        store.rename_index(DocId(7), DocId(13), &cancel).unwrap();
        assert_eq!(store.search(&trapdoor, &cancel).unwrap(), vec![DocId(42)]);

        store.delete_index(DocId(42), &cancel).unwrap();
        store.delete_index(DocId(42), &cancel).unwrap();
        assert!(store.search(&trapdoor, &cancel).unwrap().is_empty());
    }

    #[test]
    fn search_rejects_malformed_trapdoors() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let store = FolderStore::open_or_create(root.path(), &FolderId::from("tlf-c"), &test_config()).unwrap();

        assert_eq!(store.search(&test_trapdoor(4), &cancel), Err(SecureIndexError::TrapdoorArityMismatch(5, 4)));
    }

    #[test]
    fn mismatched_index_length_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let store = FolderStore::open_or_create(root.path(), &FolderId::from("tlf-d"), &test_config()).unwrap();

        let err = store.write_index(SecureIndex::zeroed(DocId(1), 17), &cancel).unwrap_err();
        assert_eq!(err, SecureIndexError::IndexBitLengthMismatch(store.params().index_bit_len, 17));
    }

    #[test]
    fn cancelled_operations_leave_the_store_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let live = CancelToken::new();
        let cancelled = CancelToken::new();
        cancelled.cancel();

        let store = FolderStore::open_or_create(root.path(), &FolderId::from("tlf-e"), &test_config()).unwrap();
        let bit_len = store.params().index_bit_len;

        let trapdoor = test_trapdoor(5);
        let positions: Vec<u64> = trapdoor.bit_positions(bit_len).collect();
        let index = index_with_positions(DocId(9), bit_len, &positions);

        assert_eq!(store.write_index(index.clone(), &cancelled), Err(SecureIndexError::OperationCancelled));
        assert!(store.search(&trapdoor, &live).unwrap().is_empty());

        store.write_index(index, &live).unwrap();
        assert_eq!(store.search(&trapdoor, &cancelled), Err(SecureIndexError::OperationCancelled));
        assert_eq!(store.delete_index(DocId(9), &cancelled), Err(SecureIndexError::OperationCancelled));
        assert_eq!(store.search(&trapdoor, &live).unwrap(), vec![DocId(9)]);
    }
}
