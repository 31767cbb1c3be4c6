use crate::suite::support::Fixture;
use kestrel_registry::{FileSourceMapDatabase, SourceMapDatabase};
use std::collections::HashMap;

#[test]
fn source_map_is_in_memory_until_saved() {
    let fx = Fixture::new(4);
    assert_eq!(fx.registry.get_source_map(&fx.project, "a.B"), None);

    fx.registry
        .replace_source_map(&fx.project, "a.B", "/src/a/B.java");
    assert_eq!(
        fx.registry.get_source_map(&fx.project, "a.B").as_deref(),
        Some("/src/a/B.java")
    );
    assert_eq!(fx.reopen().get_source_map(&fx.project, "a.B"), None);

    assert!(fx.registry.save_source_map(&fx.project));
    assert_eq!(
        fx.reopen().get_source_map(&fx.project, "a.B").as_deref(),
        Some("/src/a/B.java")
    );
}

#[test]
fn source_map_hydrates_from_the_database_once() {
    let fx = Fixture::new(4);
    let db = FileSourceMapDatabase::new(fx.settings.cache_location());
    let mut persisted = HashMap::new();
    persisted.insert("a.B".to_owned(), "/src/a/B.java".to_owned());
    assert!(db.save_source_map(fx.project_dir.path(), &persisted));

    assert_eq!(
        fx.registry.get_source_map(&fx.project, "a.B").as_deref(),
        Some("/src/a/B.java")
    );

    // Later database writes are not observed by the hydrated table.
    persisted.insert("a.C".to_owned(), "/src/a/C.java".to_owned());
    assert!(db.save_source_map(fx.project_dir.path(), &persisted));
    assert_eq!(fx.registry.get_source_map(&fx.project, "a.C"), None);

    // Saving writes the whole in-memory table back.
    fx.registry
        .replace_source_map(&fx.project, "a.D", "/src/a/D.java");
    assert!(fx.registry.save_source_map(&fx.project));
    let saved = db.load_source_map(fx.project_dir.path());
    assert_eq!(saved.len(), 2);
    assert!(saved.contains_key("a.D"));
    assert!(!saved.contains_key("a.C"));
}
