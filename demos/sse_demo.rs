// This program demonstrates the full searchable-encryption round trip on one machine.
// It sets up a search server with an on-disk folder, lets a client add a handful of
// text files, and then searches for words through trapdoors, printing which documents
// the server proposed and which survived the client's local verification pass.
// Run with RUST_LOG=debug to watch the server-side index operations.

use std::error::Error;
use std::fs;

use zidx::client::{Client, MasterSecret};
use zidx::server::Server;
use zidx::{CancelToken, FolderConfig, FolderId, MASTER_SECRET_BYTE_LEN};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let workspace = tempfile::tempdir()?;
    let server_root = workspace.path().join("server");
    let folder_dir = workspace.path().join("folder");
    let staging_dir = workspace.path().join("staging");
    fs::create_dir_all(&staging_dir)?;

    // Folder parameters: 13 hash functions, 8-byte salts, at most 1000 unique
    // words per document, one-in-a-million false-positive rate.
    let config = FolderConfig::new(13, 8, 1_000, 1e-6)?;
    let server = Server::new(&server_root, 2, MASTER_SECRET_BYTE_LEN, config)?;

    let cancel = CancelToken::new();
    let folder_id = FolderId::from("demo-folder");

    let ms = MasterSecret::derive(0, server.key_half(0)?);
    let mut client = Client::new(&server, folder_id.clone(), ms, &folder_dir, &cancel)?;

    let documents = [
        ("fruit.txt", "apple banana cherry"),
        ("colors.txt", "red yellow banana-yellow"),
        ("mixed.txt", "banana red apple"),
    ];

    for (filename, content) in documents {
        let staged = staging_dir.join(filename);
        fs::write(&staged, content)?;
        let doc_id = client.add_file(&staged, &cancel)?;
        println!("Indexed '{}' as document {}", filename, doc_id);
    }

    for word in ["banana", "red", "cherry", "durian"] {
        let (filenames, fp_rate) = client.search_word(word, &cancel)?;
        println!("Searching '{}' -> {:?} (observed false-positive rate {:.6})", word, filenames, fp_rate);
    }

    // A second client with a different client number derives the same master
    // secret from its own key half and can search the same folder.
    let ms2 = MasterSecret::derive(1, server.key_half(1)?);
    let second_client = Client::new(&server, folder_id, ms2, &folder_dir, &cancel)?;
    let (filenames, _) = second_client.search_word("apple", &cancel)?;
    println!("Second client searching 'apple' -> {:?}", filenames);

    Ok(())
}
