use crate::sse_internals::{
    branch_opt_util,
    cancel::CancelToken,
    error::SecureIndexError,
    folder::{FolderConfig, FolderParams},
    secure_index::{DocId, SecureIndex},
    store::{FolderId, FolderStore},
    trapdoor::Trapdoor,
};
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};
use tracing::info;

/// The server-side surface of the protocol. Everything a client can ask of a
/// search server goes through these operations, so transports and test fakes
/// implement this trait instead of depending on [`Server`] directly.
///
/// The server only ever handles opaque material: document ids, index bit
/// arrays, trapdoor codewords and the lookup-table blob. Plaintext words
/// never cross this boundary.
pub trait SearchServer {
    /// Idempotent: creates salts and index size for the folder if absent,
    /// otherwise returns the existing parameters.
    fn register_folder(&self, folder_id: &FolderId, cancel: &CancelToken) -> Result<FolderParams, SecureIndexError>;

    /// Insert or replace the index stored under its document id.
    fn write_index(&self, folder_id: &FolderId, index: SecureIndex, cancel: &CancelToken) -> Result<(), SecureIndexError>;

    /// Rebind the bits stored under `old` to `new`. No-op if `old` is absent.
    fn rename_index(&self, folder_id: &FolderId, old: DocId, new: DocId, cancel: &CancelToken) -> Result<(), SecureIndexError>;

    /// Remove the index stored under the document id. No-op if absent.
    fn delete_index(&self, folder_id: &FolderId, doc_id: DocId, cancel: &CancelToken) -> Result<(), SecureIndexError>;

    /// All document ids whose index tests positive for every codeword of the
    /// trapdoor.
    fn search_word(&self, folder_id: &FolderId, trapdoor: &Trapdoor, cancel: &CancelToken) -> Result<Vec<DocId>, SecureIndexError>;

    /// Key generations known for the folder, oldest first.
    fn get_key_gens(&self, folder_id: &FolderId, cancel: &CancelToken) -> Result<Vec<u32>, SecureIndexError>;

    /// Store the folder's filename lookup table. The blob is opaque to the
    /// server; clients serialize and encrypt it as they see fit.
    fn write_lookup_table(&self, folder_id: &FolderId, table: &[u8], cancel: &CancelToken) -> Result<(), SecureIndexError>;

    /// The blob last stored with `write_lookup_table`, if any.
    fn read_lookup_table(&self, folder_id: &FolderId, cancel: &CancelToken) -> Result<Option<Vec<u8>>, SecureIndexError>;
}

/// In-process search server persisting its folders under one root directory.
///
/// Folder layout on disk: `<root>/<folder-id>/salts` (concatenated),
/// `<root>/<folder-id>/size` (decimal bit count) and one `<docID>.idx` file
/// per stored index, plus the opaque `lookup_table` blob.
pub struct Server {
    root_dir: PathBuf,
    config: FolderConfig,
    client_key_halves: Vec<Vec<u8>>,
    folders: RwLock<HashMap<FolderId, Arc<FolderStore>>>,
}

impl Server {
    /// Sets up a server rooted at `root_dir`, holding one key half per
    /// client. The halves all cancel against the respective client-derived
    /// half to the same master secret, so every client of the server indexes
    /// and searches under one key without the halves themselves coinciding.
    ///
    /// The configuration applies to folders created afterwards; folders
    /// already on disk keep the parameters they were registered with.
    pub fn new(root_dir: impl Into<PathBuf>, num_clients: usize, master_secret_byte_len: usize, config: FolderConfig) -> Result<Server, SecureIndexError> {
        config.validate()?;

        let root_dir = root_dir.into();
        fs::create_dir_all(&root_dir).map_err(|err| SecureIndexError::FailedToPersistFolder(err.to_string()))?;

        let mut rng = ChaCha20Rng::try_from_os_rng().map_err(|_| SecureIndexError::RandomnessSourceFailure)?;
        let mut shared_secret = vec![0u8; master_secret_byte_len];
        rng.fill_bytes(&mut shared_secret);

        let client_key_halves = (0..num_clients)
            .map(|client_num| {
                let client_half = Sha256::digest(client_num.to_string().as_bytes());
                client_half.iter().zip(&shared_secret).map(|(a, b)| a ^ b).collect()
            })
            .collect();

        info!(root = %root_dir.display(), num_clients, "search server ready");

        Ok(Server {
            root_dir,
            config,
            client_key_halves,
            folders: RwLock::new(HashMap::new()),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The key half held for `client_num`, from which that client derives its
    /// master secret.
    pub fn key_half(&self, client_num: usize) -> Result<&[u8], SecureIndexError> {
        match self.client_key_halves.get(client_num) {
            Some(half) => Ok(half),
            None => Err(SecureIndexError::UnknownClientNumber(client_num)),
        }
    }

    fn folder(&self, folder_id: &FolderId) -> Result<Arc<FolderStore>, SecureIndexError> {
        let folders = self.folders.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        match folders.get(folder_id) {
            Some(folder) => Ok(folder.clone()),
            None => {
                branch_opt_util::cold();
                Err(SecureIndexError::UnknownFolder(folder_id.to_string()))
            }
        }
    }
}

impl SearchServer for Server {
    fn register_folder(&self, folder_id: &FolderId, cancel: &CancelToken) -> Result<FolderParams, SecureIndexError> {
        cancel.guard()?;

        let mut folders = self.folders.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(folder) = folders.get(folder_id) {
            return Ok(folder.params());
        }

        let folder = Arc::new(FolderStore::open_or_create(&self.root_dir, folder_id, &self.config)?);
        let params = folder.params();
        folders.insert(folder_id.clone(), folder);

        Ok(params)
    }

    fn write_index(&self, folder_id: &FolderId, index: SecureIndex, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        self.folder(folder_id)?.write_index(index, cancel)
    }

    fn rename_index(&self, folder_id: &FolderId, old: DocId, new: DocId, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        self.folder(folder_id)?.rename_index(old, new, cancel)
    }

    fn delete_index(&self, folder_id: &FolderId, doc_id: DocId, cancel: &CancelToken) -> Result<(), SecureIndexError> {
        self.folder(folder_id)?.delete_index(doc_id, cancel)
    }

    fn search_word(&self, folder_id: &FolderId, trapdoor: &Trapdoor, cancel: &CancelToken) -> Result<Vec<DocId>, SecureIndexError> {
        self.folder(folder_id)?.search(trapdoor, cancel)
    }

    fn get_key_gens(&self, folder_id: &FolderId, cancel: &CancelToken) -> Result<Vec<u32>, SecureIndexError> {
        cancel.guard()?;
        Ok(self.folder(folder_id)?.key_gens())
    }

    fn write_lookup_table(&self, folder_id: &FolderId, table: &[u8], cancel: &CancelToken) -> Result<(), SecureIndexError> {
        self.folder(folder_id)?.write_lookup_table(table, cancel)
    }

    fn read_lookup_table(&self, folder_id: &FolderId, cancel: &CancelToken) -> Result<Option<Vec<u8>>, SecureIndexError> {
        self.folder(folder_id)?.read_lookup_table(cancel)
    }
}
