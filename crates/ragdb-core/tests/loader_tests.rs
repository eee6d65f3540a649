use std::fs;
use tempfile::TempDir;

use ragdb_core::loader::{list_supported_files, TextFileLoader};
use ragdb_core::traits::DocumentLoader;

#[test]
fn loads_text_with_source_metadata() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.md");
    fs::write(&path, "# Title\n\nbody").unwrap();

    let loaded = TextFileLoader::new().load(&path).expect("load");
    assert_eq!(loaded.content, "# Title\n\nbody");
    assert_eq!(loaded.metadata.get("filename").and_then(|v| v.as_str()), Some("notes.md"));
    assert_eq!(loaded.metadata.get("format").and_then(|v| v.as_str()), Some("md"));
    assert_eq!(loaded.metadata.get("size").and_then(|v| v.as_u64()), Some(13));
}

#[test]
fn invalid_utf8_is_decoded_lossily() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("raw.txt");
    fs::write(&path, [b'o', b'k', 0xff, b'!']).unwrap();
    let loaded = TextFileLoader::new().load(&path).expect("load");
    assert!(loaded.content.starts_with("ok"));
    assert!(loaded.content.ends_with('!'));
}

#[test]
fn unsupported_and_missing_files_fail() {
    let tmp = TempDir::new().unwrap();
    let pdf = tmp.path().join("paper.pdf");
    fs::write(&pdf, b"%PDF").unwrap();
    let loader = TextFileLoader::new();
    assert!(loader.load(&pdf).is_err());
    assert!(loader.load(&tmp.path().join("gone.txt")).is_err());
}

#[test]
fn lists_supported_files_sorted() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("sub")).unwrap();
    fs::write(tmp.path().join("b.txt"), "b").unwrap();
    fs::write(tmp.path().join("a.TXT"), "a").unwrap();
    fs::write(tmp.path().join("sub/c.json"), "{}").unwrap();
    fs::write(tmp.path().join("skip.pdf"), "x").unwrap();

    let files = list_supported_files(tmp.path(), &TextFileLoader::new());
    let names: Vec<String> = files
        .iter()
        .map(|p| p.strip_prefix(tmp.path()).unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.TXT", "b.txt", "sub/c.json"]);
}
