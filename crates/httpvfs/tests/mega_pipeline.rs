//! MEGA links served through a volume, against a stubbed API gateway.

use std::sync::Arc;

use httpvfs::drivers::mega::codes::ENOENT;
use httpvfs::drivers::mega::crypto::{
    b64_encode, encrypt_attributes, encrypt_key, nonce_of, unmerge_key, Attributes, ContentDecryptor,
};
use httpvfs::http::testing::{StubHttpClient, StubResponse};
use httpvfs::http::Method;
use httpvfs::{VfsError, Volume};
use serde_json::{json, Value};

const CS: &str = "https://g.api.mega.co.nz/cs";
const GATEWAY: &str = "https://gfs270n112.userstorage.mega.co.nz/dl/token";
const FOLDER_KEY: [u8; 16] = [0x5a; 16];
const FILE_KEY: [u8; 32] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f,
];

fn plaintext() -> Vec<u8> {
    (0..64u8).collect()
}

fn ciphertext() -> Vec<u8> {
    let mut data = plaintext();
    ContentDecryptor::new(&unmerge_key(&FILE_KEY).unwrap(), nonce_of(&FILE_KEY), 0).apply(&mut data);
    data
}

fn at(key: &[u8; 16], name: &str) -> String {
    b64_encode(&encrypt_attributes(key, &Attributes::named(name)).unwrap())
}

fn wrapped(raw: &[u8]) -> String {
    format!("RT:{}", b64_encode(&encrypt_key(&FOLDER_KEY, raw).unwrap()))
}

fn listing() -> Value {
    json!([{ "f": [
        { "h": "RT", "p": "", "t": 1, "ts": 1_650_000_000u64, "k": wrapped(&[0x6b; 16]), "a": at(&[0x6b; 16], "share") },
        { "h": "DOCS", "p": "RT", "t": 1, "k": wrapped(&[9; 16]), "a": at(&[9; 16], "docs") },
        { "h": "BIN", "p": "DOCS", "t": 0, "s": 64, "ts": 1_650_000_100u64,
          "k": wrapped(&FILE_KEY), "a": at(&unmerge_key(&FILE_KEY).unwrap(), "data.bin") },
    ]}])
}

fn folder_url() -> String {
    format!("https://mega.nz/folder/FOLDERID#{}", b64_encode(&FOLDER_KEY))
}

fn volume(stub: &Arc<StubHttpClient>, url: &str) -> Volume {
    Volume::builder(url).with_http_client(stub.clone()).build().unwrap()
}

#[tokio::test]
async fn test_shared_folder_tree_and_ranged_read() {
    let stub = Arc::new(StubHttpClient::new());
    stub.on_post(CS, StubResponse::ok(listing().to_string()));
    stub.on_post(CS, StubResponse::ok(json!([{"g": GATEWAY, "s": 64}]).to_string()));
    stub.on_get(&format!("{GATEWAY}/0-19"), StubResponse::ok(ciphertext()[..20].to_vec()));

    let vol = volume(&stub, &folder_url());
    vol.load_remote().await.unwrap();

    // One listing request populates the whole tree.
    assert_eq!(vol.readdir_sync("/").unwrap(), vec!["docs"]);
    assert_eq!(vol.readdir_sync("/docs").unwrap(), vec!["data.bin"]);
    let attr = vol.stat_sync("/docs/data.bin").unwrap();
    assert_eq!(attr.size, 64);
    assert_eq!(attr.perm, 0o444);
    assert_eq!(stub.total(), 1);

    let bytes = vol
        .create_range_stream("/docs/data.bin", 5, Some(19))
        .collect_bytes()
        .await
        .unwrap();
    assert_eq!(bytes.len(), 15);
    assert_eq!(&bytes[..], &plaintext()[5..20]);
    assert_eq!(stub.count(Method::Get, &format!("{GATEWAY}/0-19")), 1);

    let meta = stub.requests()[1].clone();
    assert_eq!(meta.json().unwrap(), json!([{"a": "g", "g": 1, "ssl": 2, "n": "BIN"}]));
    assert!(meta.url.query().unwrap().ends_with("&n=FOLDERID"));
}

#[tokio::test]
async fn test_whole_file_via_descriptor_and_stream() {
    let stub = Arc::new(StubHttpClient::new());
    stub.on_post(CS, StubResponse::ok(listing().to_string()));
    stub.on_post(CS, StubResponse::ok(json!([{"g": GATEWAY, "s": 64}]).to_string()));
    stub.on_get(&format!("{GATEWAY}/0-63"), StubResponse::ok(ciphertext()).with_chunk_size(10));
    stub.on_get(&format!("{GATEWAY}/32-35"), StubResponse::ok(ciphertext()[32..36].to_vec()));

    let vol = volume(&stub, &folder_url());
    let all = vol.read_file("/docs/data.bin").await.unwrap();
    assert_eq!(&all[..], &plaintext()[..]);

    let fd = vol.open("/docs/data.bin", httpvfs::OpenFlags::read()).await.unwrap();
    let part = vol.read(fd, 33, 3).await.unwrap();
    assert_eq!(&part[..], &plaintext()[33..36]);
    vol.close(fd).await.unwrap();
}

#[tokio::test]
async fn test_single_file_link_with_alias() {
    let stub = Arc::new(StubHttpClient::new());
    let blob = at(&unmerge_key(&FILE_KEY).unwrap(), "report.pdf");
    stub.on_post(CS, StubResponse::ok(json!([{"s": 64, "at": blob}]).to_string()));
    stub.on_post(CS, StubResponse::ok(json!([{"g": GATEWAY, "s": 64}]).to_string()));
    stub.on_get(&format!("{GATEWAY}/0-63"), StubResponse::ok(ciphertext()));

    let url = format!("https://mega.nz/file/PUBID#{}", b64_encode(&FILE_KEY));
    let vol = Volume::builder(&url)
        .with_root_file_alias(true)
        .with_http_client(stub.clone())
        .build()
        .unwrap();
    assert_eq!(vol.readdir("/").await.unwrap(), vec!["report.pdf"]);
    assert_eq!(&vol.read_file("/report.pdf").await.unwrap()[..], &plaintext()[..]);
    assert_eq!(
        stub.requests()[1].json().unwrap(),
        json!([{"a": "g", "g": 1, "ssl": 2, "p": "PUBID"}])
    );
}

#[tokio::test]
async fn test_protocol_errors_surface() {
    let stub = Arc::new(StubHttpClient::new());
    stub.on_post(CS, StubResponse::ok("-9"));
    let vol = volume(&stub, &folder_url());
    let err = vol.readdir("/").await.unwrap_err();
    let proto = err.as_protocol().expect("protocol error");
    assert_eq!(proto.code, ENOENT);
    assert!(proto.description().contains("not found"));
    assert!(!vol.tree().root().is_loaded());

    let stub = Arc::new(StubHttpClient::new());
    stub.on_post(
        CS,
        StubResponse::ok("[-4]").with_header("x-mega-time-left", "30"),
    );
    let vol = volume(&stub, &folder_url());
    let err = vol.stat("/").await.unwrap_err();
    let proto = err.as_protocol().expect("protocol error");
    assert!(proto.is_rate_limited());
    assert_eq!(proto.time_left, Some(30));
}

#[tokio::test]
async fn test_wrong_key_is_a_decode_error() {
    let stub = Arc::new(StubHttpClient::new());
    stub.on_post(CS, StubResponse::ok(listing().to_string()));
    let url = format!("https://mega.nz/folder/FOLDERID#{}", b64_encode(&[0x77; 16]));
    let vol = volume(&stub, &url);
    assert!(matches!(vol.readdir("/").await, Err(VfsError::Decode(_))));
}
