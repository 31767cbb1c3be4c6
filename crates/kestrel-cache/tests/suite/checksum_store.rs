use kestrel_cache::{CacheDir, CacheLocation, ChecksumStore, Fingerprint};
use tempfile::TempDir;

#[test]
fn checksum_table_lives_in_the_project_cache_dir() {
    let cache_root = TempDir::new().unwrap();
    let project = TempDir::new().unwrap();
    let file = project.path().join("A.java");
    std::fs::write(&file, "class A {}").unwrap();

    let dir = CacheDir::new(
        project.path(),
        &CacheLocation::new(Some(cache_root.path().to_path_buf())),
    )
    .unwrap();
    let store = ChecksumStore::open(dir.checksum_path());
    store.refresh(&file).unwrap();
    store.save().unwrap();

    assert!(dir.checksum_path().is_file());
    let reopened = ChecksumStore::open(dir.checksum_path());
    assert!(reopened.matches(&file, &Fingerprint::from_bytes("class A {}")));
}

#[test]
fn relative_and_absolute_spellings_share_a_record() {
    let project = TempDir::new().unwrap();
    std::fs::create_dir_all(project.path().join("src")).unwrap();
    let file = project.path().join("src").join("B.java");
    std::fs::write(&file, "class B {}").unwrap();

    let store = ChecksumStore::in_memory();
    let fp = store.refresh(&file).unwrap();

    let dotted = project.path().join("src").join("..").join("src").join("B.java");
    assert!(store.matches(&dotted, &fp));
    assert_eq!(store.remove(&dotted), Some(fp));
    assert!(store.is_empty());
}
