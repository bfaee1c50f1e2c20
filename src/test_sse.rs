#![cfg(test)]

use crate::{
    client::{Client, MasterSecret, SecureIndexBuilder},
    server::{SearchServer, Server},
    CancelToken, DocId, FolderConfig, FolderId,
};
use std::{fs, io::Cursor, path::Path, sync::Arc};

fn start_test_server(root: &Path, num_clients: usize, config: FolderConfig) -> Server {
    Server::new(root, num_clients, 32, config).expect("Server setup failed")
}

fn folder_builder(server: &Server, folder_id: &FolderId, client_num: usize, cancel: &CancelToken) -> SecureIndexBuilder {
    let params = server.register_folder(folder_id, cancel).expect("Folder registration failed");
    let ms = MasterSecret::derive(client_num, server.key_half(client_num).expect("Client must be known to the server"));
    SecureIndexBuilder::new(ms, params.salts, params.index_bit_len, params.expected_unique_words).expect("Builder setup failed")
}

fn write_document(builder: &SecureIndexBuilder, server: &Server, folder_id: &FolderId, doc_id: DocId, content: &str, cancel: &CancelToken) {
    let index = builder
        .build_secure_index(doc_id, Cursor::new(content.as_bytes()), content.len(), cancel)
        .expect("Index build failed");
    server.write_index(folder_id, index, cancel).expect("Index upload failed");
}

#[test]
fn document_words_match_and_absent_words_do_not() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("scenario-folder");

    let server = start_test_server(root.path(), 1, FolderConfig::new(13, 8, 10_000, 1e-6).unwrap());
    let builder = folder_builder(&server, &folder_id, 0, &cancel);

    let content = "This is a test file.";
    write_document(&builder, &server, &folder_id, DocId(0), content, &cancel);

    for word in ["This", "is", "a", "test", "file."] {
        let hits = server.search_word(&folder_id, &builder.compute_trapdoors(word.as_bytes()), &cancel).unwrap();
        assert_eq!(hits, vec![DocId(0)], "word '{}' must be found", word);
    }

    // Tokenization splits on whitespace only, so "file" (without the trailing
    // dot) is not a word of this document.
    for word in ["absent", "file", "Test"] {
        let hits = server.search_word(&folder_id, &builder.compute_trapdoors(word.as_bytes()), &cancel).unwrap();
        assert!(hits.is_empty(), "word '{}' must not be found", word);
    }
}

#[test]
fn clients_with_distinct_numbers_share_one_master_secret() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("shared-secret-folder");

    let server = start_test_server(root.path(), 5, FolderConfig::new(13, 8, 1_000, 1e-6).unwrap());

    let first = folder_builder(&server, &folder_id, 0, &cancel);
    let second = folder_builder(&server, &folder_id, 3, &cancel);

    assert_ne!(server.key_half(0).unwrap(), server.key_half(3).unwrap());
    assert_eq!(first.compute_trapdoors(b"keyword"), second.compute_trapdoors(b"keyword"));
}

#[test]
fn five_documents_searched_through_the_client_workflow() {
    let root = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let folder_dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("five-docs");

    let server = start_test_server(root.path(), 2, FolderConfig::new(13, 8, 100, 1e-6).unwrap());

    let contents = [
        ("simple.txt", "This is a simple test file"),
        ("another.txt", "This is another test file"),
        ("different.txt", "This is a different test file"),
        ("yet_another.txt", "This is yet another test file"),
        ("last.txt", "This is the last test file"),
    ];

    let ms = MasterSecret::derive(0, server.key_half(0).unwrap());
    let mut client = Client::new(&server, folder_id.clone(), ms, folder_dir.path(), &cancel).expect("Client setup failed");

    for (filename, content) in contents {
        let staged = staging.path().join(filename);
        fs::write(&staged, content).unwrap();
        client.add_file(&staged, &cancel).expect("Adding a fresh file must succeed");
    }

    // Re-adding an already indexed file is refused.
    let staged = staging.path().join("simple.txt");
    assert!(client.add_file(&staged, &cancel).is_err());

    // A second client of the same folder sees the published lookup table.
    let ms2 = MasterSecret::derive(1, server.key_half(1).unwrap());
    let client2 = Client::new(&server, folder_id, ms2, folder_dir.path(), &cancel).expect("Second client setup failed");
    assert_eq!(client2.filenames().len(), 5);

    let (hits, _) = client2.search_word("another", &cancel).unwrap();
    assert_eq!(hits, vec!["another.txt".to_string(), "yet_another.txt".to_string()]);

    let (hits, _) = client2.search_word("test", &cancel).unwrap();
    assert_eq!(hits.len(), 5);

    let (hits, fp_rate) = client2.search_word("non-existing", &cancel).unwrap();
    assert!(hits.is_empty());
    assert!(fp_rate <= 1.0);

    let (naive_hits, _) = client2.search_word_naive("another", &cancel).unwrap();
    assert_eq!(naive_hits, vec!["another.txt".to_string(), "yet_another.txt".to_string()]);
}

#[test]
fn renamed_documents_answer_under_the_new_id_only() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("rename-folder");

    let server = start_test_server(root.path(), 1, FolderConfig::new(13, 8, 1_000, 1e-6).unwrap());
    let builder = folder_builder(&server, &folder_id, 0, &cancel);

    write_document(&builder, &server, &folder_id, DocId(7), "rebinding keeps every bit", &cancel);
    server.rename_index(&folder_id, DocId(7), DocId(42), &cancel).unwrap();

    for word in ["rebinding", "keeps", "every", "bit"] {
        let hits = server.search_word(&folder_id, &builder.compute_trapdoors(word.as_bytes()), &cancel).unwrap();
        assert_eq!(hits, vec![DocId(42)]);
    }
}

#[test]
fn deleting_twice_succeeds_and_excludes_the_document() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("delete-folder");

    let server = start_test_server(root.path(), 1, FolderConfig::new(13, 8, 1_000, 1e-6).unwrap());
    let builder = folder_builder(&server, &folder_id, 0, &cancel);

    write_document(&builder, &server, &folder_id, DocId(1), "short lived document", &cancel);

    server.delete_index(&folder_id, DocId(1), &cancel).expect("First delete must succeed");
    server.delete_index(&folder_id, DocId(1), &cancel).expect("Repeated delete must stay a no-op success");

    let hits = server.search_word(&folder_id, &builder.compute_trapdoors(b"document"), &cancel).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn observed_false_positive_rate_stays_near_the_configured_one() {
    const NUM_CORPUS_WORDS: usize = 1_000;
    const NUM_PROBE_WORDS: usize = 10_000;

    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("fp-folder");

    let server = start_test_server(root.path(), 1, FolderConfig::new(13, 8, NUM_CORPUS_WORDS as u64, 1e-6).unwrap());
    let builder = folder_builder(&server, &folder_id, 0, &cancel);

    let corpus: String = (0..NUM_CORPUS_WORDS).map(|i| format!("corpus-word-{} ", i)).collect();
    write_document(&builder, &server, &folder_id, DocId(0), &corpus, &cancel);

    let mut num_found = 0;
    for i in 0..NUM_PROBE_WORDS {
        let probe = format!("probe-word-{}", i);
        if !server.search_word(&folder_id, &builder.compute_trapdoors(probe.as_bytes()), &cancel).unwrap().is_empty() {
            num_found += 1;
        }
    }

    // With p = 1e-6 the expected number of false positives over 10^4 probes
    // is 0.01; more than one hit means the rate is off by orders of
    // magnitude.
    assert!(num_found <= 1, "{} of {} non-member probes matched", num_found, NUM_PROBE_WORDS);
}

#[test]
fn folders_survive_a_server_restart() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("durable-folder");
    let config = FolderConfig::new(13, 8, 1_000, 1e-6).unwrap();

    let server = start_test_server(root.path(), 1, config.clone());
    let builder = folder_builder(&server, &folder_id, 0, &cancel);
    let params = server.register_folder(&folder_id, &cancel).unwrap();

    write_document(&builder, &server, &folder_id, DocId(11), "durable words persist", &cancel);
    drop(server);

    let restarted = start_test_server(root.path(), 1, config);
    let reloaded_params = restarted.register_folder(&folder_id, &cancel).unwrap();
    assert_eq!(reloaded_params, params);

    let hits = restarted.search_word(&folder_id, &builder.compute_trapdoors(b"persist"), &cancel).unwrap();
    assert_eq!(hits, vec![DocId(11)]);
}

#[test]
fn searches_never_observe_a_torn_rename() {
    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("atomic-rename");

    let server = Arc::new(start_test_server(root.path(), 1, FolderConfig::new(7, 8, 100, 1e-3).unwrap()));
    let builder = folder_builder(&server, &folder_id, 0, &cancel);

    write_document(&builder, &server, &folder_id, DocId(1), "pivot", &cancel);
    let trapdoor = builder.compute_trapdoors(b"pivot");

    std::thread::scope(|scope| {
        let searcher_server = server.clone();
        let searcher_folder = folder_id.clone();
        let searcher_trapdoor = trapdoor.clone();
        let searcher = scope.spawn(move || {
            let cancel = CancelToken::new();
            for _ in 0..500 {
                let hits = searcher_server.search_word(&searcher_folder, &searcher_trapdoor, &cancel).expect("Search must not fail");
                assert_eq!(hits.len(), 1, "a search observed a half-applied rename: {:?}", hits);
                assert!(hits == vec![DocId(1)] || hits == vec![DocId(2)]);
            }
        });

        server.rename_index(&folder_id, DocId(1), DocId(2), &cancel).expect("Rename must succeed");
        searcher.join().expect("Searcher thread panicked");
    });

    let hits = server.search_word(&folder_id, &trapdoor, &cancel).unwrap();
    assert_eq!(hits, vec![DocId(2)]);
}

#[test]
fn client_rename_and_remove_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let folder_dir = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("client-lifecycle");

    let server = start_test_server(root.path(), 1, FolderConfig::new(13, 8, 100, 1e-6).unwrap());
    let ms = MasterSecret::derive(0, server.key_half(0).unwrap());
    let mut client = Client::new(&server, folder_id, ms, folder_dir.path(), &cancel).unwrap();

    let staged = staging.path().join("notes.txt");
    fs::write(&staged, "meeting notes about trapdoors").unwrap();
    let original_id = client.add_file(&staged, &cancel).unwrap();

    let renamed_id = client.rename_file("notes.txt", "minutes.txt", &cancel).unwrap();
    assert_ne!(original_id, renamed_id);
    assert_eq!(client.doc_id_of("minutes.txt"), Some(renamed_id));
    assert_eq!(client.doc_id_of("notes.txt"), None);

    let (hits, _) = client.search_word("trapdoors", &cancel).unwrap();
    assert_eq!(hits, vec!["minutes.txt".to_string()]);

    client.remove_file("minutes.txt", &cancel).unwrap();
    assert!(client.filenames().is_empty());

    let (hits, _) = client.search_word("trapdoors", &cancel).unwrap();
    assert!(hits.is_empty());
}
