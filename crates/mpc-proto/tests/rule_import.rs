use mpc_proto::rules::{ImportError, MergeMode, RuleStore, SkipRule, StoreError};
use mpc_proto::timespec::TimeSpec;

fn seeded_store(dir: &tempfile::TempDir) -> RuleStore {
    let mut store = RuleStore::open(dir.path().join("skip-rules.json"));
    store
        .add(SkipRule::from_input("Season 1", "01:30", "21:10").unwrap())
        .unwrap();
    store
        .add(SkipRule::from_input("", "00:00:05-00:01:00", "").unwrap())
        .unwrap();
    store
}

const FIVE_WITH_BAD_THIRD: &str = r#"[
    {"folder": "A", "start": "00:01:00", "end": "00:20:00", "enabled": true},
    {"folder": "B", "start": "10-20", "end": "", "enabled": true},
    {"folder": "C", "start": "05:00-02:00", "end": "00:20:00", "enabled": true},
    {"folder": "D", "start": "00:00:30", "end": "00:21:00", "enabled": false},
    {"folder": "E", "start": "", "end": "00:22:00", "enabled": true}
]"#;

#[test]
fn invalid_record_aborts_whole_import() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded_store(&dir);
    let before = store.rules().to_vec();
    let on_disk_before = std::fs::read_to_string(store.path()).unwrap();

    let err = store
        .import(FIVE_WITH_BAD_THIRD, MergeMode::Replace)
        .unwrap_err();

    match &err {
        StoreError::Import(ImportError::InvalidRecord { index, reason }) => {
            assert_eq!(*index, 3);
            assert!(reason.contains("05:00-02:00"), "reason: {reason}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().starts_with("record 3:"));
    assert_eq!(store.rules(), before.as_slice());
    assert_eq!(std::fs::read_to_string(store.path()).unwrap(), on_disk_before);
}

#[test]
fn wrong_field_type_names_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded_store(&dir);
    let json = r#"[{"folder": "A", "start": "10", "end": ""}, {"folder": 7, "start": "", "end": ""}]"#;
    let err = store.import(json, MergeMode::Append).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Import(ImportError::InvalidRecord { index: 2, .. })
    ));
    assert_eq!(store.rules().len(), 2);
}

#[test]
fn non_array_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded_store(&dir);
    assert!(matches!(
        store.import(r#"{"folder": ""}"#, MergeMode::Replace),
        Err(StoreError::Import(ImportError::NotAnArray))
    ));
    assert!(matches!(
        store.import("not json", MergeMode::Replace),
        Err(StoreError::Import(ImportError::Json(_)))
    ));
}

#[test]
fn replace_and_append_modes() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = seeded_store(&dir);
    let json = r#"[{"folder": "X", "start": "1:00", "end": "20:00", "enabled": true}]"#;

    assert_eq!(store.import(json, MergeMode::Append).unwrap(), 1);
    assert_eq!(store.rules().len(), 3);
    assert_eq!(store.rules()[2].folder_scope, "X");

    assert_eq!(store.import(json, MergeMode::Replace).unwrap(), 1);
    assert_eq!(store.rules().len(), 1);
    assert_eq!(store.rules()[0].head, Some(TimeSpec::Point { ms: 60_000 }));

    let reopened = RuleStore::open(store.path());
    assert_eq!(reopened.rules(), store.rules());
}

#[test]
fn export_then_import_preserves_rules() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir);
    let exported = store.export().unwrap();

    let other_dir = tempfile::tempdir().unwrap();
    let mut other = RuleStore::open(other_dir.path().join("rules.json"));
    other.import(&exported, MergeMode::Replace).unwrap();
    assert_eq!(other.rules(), store.rules());
}
