//! zidx: A Rust library implementation of searchable symmetric encryption (SSE) over per-document secure indexes, following Goh's **Z-IDX** construction, described in <https://ia.cr/2003/216>.
//!
//! This crate lets clients ask a remote server "which documents contain word W?" without the server learning W, the file contents, or any document's word set.
//! Every document is summarized client-side into a fixed-size Bloom bit array keyed by a client master secret; queries are answered only when the client supplies per-word cryptographic *trapdoors*.
//!
//! ## Features
//!
//! * **Oblivious search:** The server stores only opaque document ids and bit arrays, and matches trapdoors against them. It never sees plaintext words, inverted lists, or trapdoor preimages.
//! * **Blind padding:** Indexes are padded with counter-derived synthetic trapdoors up to the folder's expected unique-word bound, so bit density does not leak document size.
//! * **Pluggable PRF:** The keyed primitive behind trapdoors is a small capability trait; HMAC-SHA256 is the shipped default.
//! * **Error Handling:** Comprehensive error handling to catch and report issues during folder registration, index building, and search.
//!
//! ## Usage
//!
//! This crate is designed to be used in conjunction with other crates which provide the communication mechanism between clients and server.
//! You'll typically interact with the `SecureIndexBuilder` and `Client` structs on the client side and the `Server` struct (or your own `SearchServer` implementation) on the server side.
//!
//! Add zidx as dependency to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! zidx = "=0.1.0"
//! ```
//!
//! Then, you can use it in your code:
//!
//! ```rust
//! use zidx::client::{MasterSecret, SecureIndexBuilder};
//! use zidx::server::{SearchServer, Server};
//! use zidx::{CancelToken, DocId, FolderConfig, FolderId, MASTER_SECRET_BYTE_LEN};
//!
//! fn main() {
//!     let root = std::env::temp_dir().join("zidx-crate-demo");
//!     let config = FolderConfig::new(13, 8, 1_000, 1e-6).expect("folder parameters are valid");
//!     let server = Server::new(&root, 1, MASTER_SECRET_BYTE_LEN, config).expect("server setup failed");
//!
//!     let cancel = CancelToken::new();
//!     let folder_id = FolderId::from("demo-folder");
//!     let params = server.register_folder(&folder_id, &cancel).expect("folder registration failed");
//!
//!     // Derive the master secret from the server-held key half for client number 0.
//!     let ms = MasterSecret::derive(0, server.key_half(0).expect("client 0 is known"));
//!     let builder = SecureIndexBuilder::new(ms, params.salts, params.index_bit_len, params.expected_unique_words).expect("builder setup failed");
//!
//!     let document = b"search for a word without revealing it";
//!     let index = builder.build_secure_index(DocId(1), &document[..], document.len(), &cancel).expect("index build failed");
//!     server.write_index(&folder_id, index, &cancel).expect("index upload failed");
//!
//!     let hits = server.search_word(&folder_id, &builder.compute_trapdoors(b"revealing"), &cancel).expect("search failed");
//!     assert!(hits.contains(&DocId(1)));
//! }
//! ```
//!
//! ## Modules
//!
//! * `client`: Contains the `MasterSecret`, `SecureIndexBuilder` and `Client` types for building indexes, computing trapdoors and running the add/rename/remove/search file workflow over a folder.
//! * `server`: Contains the `SearchServer` trait describing the server surface and the `Server` struct implementing it with on-disk persistence.

pub use sse_internals::cancel::CancelToken;
pub use sse_internals::error::SecureIndexError;
pub use sse_internals::folder::{compute_index_size, generate_salts, optimal_hash_func_count, FolderConfig, FolderParams};
pub use sse_internals::params::{MASTER_SECRET_BYTE_LEN, MIN_SALT_BYTE_LEN, PRF_OUTPUT_BYTE_LEN};
pub use sse_internals::prf::{HmacSha256Prf, Prf, PrfOutput};
pub use sse_internals::secure_index::{DocId, SecureIndex};
pub use sse_internals::store::FolderId;
pub use sse_internals::trapdoor::Trapdoor;

pub mod client;
pub mod server;

mod sse_internals;

mod test_sse;
