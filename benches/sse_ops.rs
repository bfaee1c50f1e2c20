use divan;
use std::io::Cursor;
use zidx::{
    client::{MasterSecret, SecureIndexBuilder},
    generate_salts, CancelToken, DocId, FolderConfig, FolderId,
};
use zidx::server::{SearchServer, Server};

fn main() {
    divan::main();
}

#[derive(Debug)]
struct FolderSetup {
    num_hash_funcs: usize,
    expected_unique_words: u64,
    false_positive_rate: f64,
}

const ARGS: &[FolderSetup] = &[
    FolderSetup {
        num_hash_funcs: 7,
        expected_unique_words: 1_000,
        false_positive_rate: 1e-2,
    },
    FolderSetup {
        num_hash_funcs: 13,
        expected_unique_words: 10_000,
        false_positive_rate: 1e-6,
    },
];

fn document_of(num_words: usize) -> Vec<u8> {
    (0..num_words).map(|i| format!("word-{} ", i)).collect::<String>().into_bytes()
}

fn builder_for(setup: &FolderSetup) -> SecureIndexBuilder {
    let config = FolderConfig::new(setup.num_hash_funcs, 8, setup.expected_unique_words, setup.false_positive_rate).unwrap();
    let salts = generate_salts(config.num_hash_funcs, config.salt_byte_len).unwrap();

    SecureIndexBuilder::new(
        MasterSecret::from_bytes(*b"an arbitrary 32-byte master key!"),
        salts,
        config.index_bit_len().unwrap(),
        config.expected_unique_words,
    )
    .unwrap()
}

#[divan::bench(args = ARGS)]
fn compute_trapdoors(bencher: divan::Bencher, setup: &FolderSetup) {
    let builder = builder_for(setup);

    bencher.bench_local(|| divan::black_box(builder.compute_trapdoors(divan::black_box(b"benchmark"))));
}

#[divan::bench(args = ARGS, max_time = std::time::Duration::from_secs(60))]
fn build_secure_index(bencher: divan::Bencher, setup: &FolderSetup) {
    let builder = builder_for(setup);
    let cancel = CancelToken::new();
    let document = document_of(setup.expected_unique_words as usize / 2);

    bencher.bench_local(|| {
        divan::black_box(
            builder
                .build_secure_index(DocId(1), Cursor::new(document.as_slice()), document.len(), &cancel)
                .unwrap(),
        )
    });
}

#[divan::bench(args = ARGS, max_time = std::time::Duration::from_secs(120))]
fn search_hundred_documents(bencher: divan::Bencher, setup: &FolderSetup) {
    const NUM_DOCUMENTS: u64 = 100;

    let root = tempfile::tempdir().unwrap();
    let cancel = CancelToken::new();
    let folder_id = FolderId::from("bench-folder");

    let config = FolderConfig::new(setup.num_hash_funcs, 8, setup.expected_unique_words, setup.false_positive_rate).unwrap();
    let server = Server::new(root.path(), 1, 32, config).unwrap();
    let params = server.register_folder(&folder_id, &cancel).unwrap();

    let builder = SecureIndexBuilder::new(
        MasterSecret::derive(0, server.key_half(0).unwrap()),
        params.salts,
        params.index_bit_len,
        params.expected_unique_words,
    )
    .unwrap();

    let document = document_of(64);
    for doc_num in 0..NUM_DOCUMENTS {
        let index = builder.build_secure_index(DocId(doc_num), Cursor::new(document.as_slice()), document.len(), &cancel).unwrap();
        server.write_index(&folder_id, index, &cancel).unwrap();
    }

    let trapdoor = builder.compute_trapdoors(b"word-32");

    bencher.bench_local(|| divan::black_box(server.search_word(&folder_id, divan::black_box(&trapdoor), &cancel).unwrap()));
}
