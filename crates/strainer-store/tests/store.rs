//! End-to-end tests against real SQLite databases.

use std::sync::{Arc, OnceLock};
use strainer_core::{
    ContextId, ExecutionContext, FilterDecl, FilterDocument, FilterGroup, FilterId,
    FilterRegistry, HostEnvironment, PersistableFilter, Process, RuntimeEnvironment, SettingDecl,
    SettingValue,
    Settings, Value, Version,
};
use strainer_store::{Database, IntegrityViolation, Lookup, SCHEMA_VERSION, StoreError};

const SITE: ContextId = ContextId::SITE;

/// Passes text through, but only on hosts with PDF support.
struct PdfText;

impl Process for PdfText {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("test.pdf-text").runtime(
                RuntimeEnvironment::new()
                    .min_version(Version::new(2, 0, 0))
                    .extension("pdf"),
            )
        })
    }

    fn process(
        &self,
        input: Value,
        _settings: &Settings,
        _ctx: &ExecutionContext,
        _errors: &mut Vec<String>,
    ) -> Option<Value> {
        Some(input)
    }
}

/// Passes text through; carries an optional localized caption.
struct Captioned;

impl Process for Captioned {
    fn decl(&self) -> &FilterDecl {
        static DECL: OnceLock<FilterDecl> = OnceLock::new();
        DECL.get_or_init(|| {
            FilterDecl::new("test.captioned").setting(SettingDecl::localized("caption"))
        })
    }

    fn process(
        &self,
        input: Value,
        _settings: &Settings,
        _ctx: &ExecutionContext,
        _errors: &mut Vec<String>,
    ) -> Option<Value> {
        Some(input)
    }
}

fn registry() -> Arc<FilterRegistry> {
    let mut registry = FilterRegistry::new();
    strainer_std::register_all(&mut registry);
    registry.register(PdfText);
    registry.register(Captioned);
    Arc::new(registry)
}

fn open() -> Database {
    Database::open_in_memory(registry()).unwrap()
}

fn group(db: &Database, symbolic: &str, input: &str, output: &str) -> Arc<FilterGroup> {
    let mut group = FilterGroup::new(symbolic, input.parse().unwrap(), output.parse().unwrap());
    db.filter_groups().insert_object(&mut group).unwrap();
    Arc::new(group)
}

fn strings(db: &Database, symbolic: &str) -> Arc<FilterGroup> {
    group(db, symbolic, "primitive::string", "primitive::string")
}

fn create(db: &Database, class: &str, group: &Arc<FilterGroup>) -> PersistableFilter {
    db.registry()
        .create_in_group(class, group.clone(), SITE)
        .unwrap()
}

/// sequence [ text.trim, text.case(mode=upper) ]
fn shout(db: &Database, group: &Arc<FilterGroup>) -> PersistableFilter {
    let mut root = create(db, "sequence", group);
    root.display_name = "Shout".into();
    root.add_filter(create(db, "text.trim", group)).unwrap();
    root.add_filter(
        create(db, "text.case", group)
            .with_setting("mode", "upper")
            .unwrap(),
    )
    .unwrap();
    root
}

fn count(db: &Database, table: &str) -> i64 {
    db.connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

fn classes(filter: &PersistableFilter) -> Vec<&str> {
    filter.filters().iter().map(|f| f.class()).collect()
}

// ============================================
// Round trips
// ============================================

#[test]
fn test_insert_and_load_tree() {
    let db = open();
    let g = strings(&db, "shout");

    let mut tree = shout(&db, &g);
    let id = db.filters().insert_object(&mut tree, SITE).unwrap();

    assert_eq!(tree.id(), Some(id));
    for child in tree.filters() {
        assert!(child.id().is_some());
        assert_eq!(child.parent_id(), Some(id));
    }
    assert_eq!(count(&db, "filters"), 3);

    let mut loaded = db.filters().get_object_by_id(id).unwrap().unwrap();
    assert_eq!(loaded.display_name, "Shout");
    assert_eq!(loaded.group().symbolic, "shout");
    assert_eq!(loaded.context_id(), SITE);
    assert_eq!(loaded.parent_id(), None);
    assert_eq!(classes(&loaded), ["text.trim", "text.case"]);
    assert_eq!(loaded.filters()[1].settings().str("mode"), Some("upper"));
    assert_eq!(loaded.filters()[1].parent_id(), Some(id));

    let out = loaded
        .execute(&ExecutionContext::default(), Value::from("  hi "))
        .unwrap();
    assert_eq!(out, Some(Value::from("HI")));
}

#[test]
fn test_load_inner_node() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let case_id = tree.filters()[1].id().unwrap();

    let case = db.filters().get_object_by_id(case_id).unwrap().unwrap();
    assert_eq!(case.class(), "text.case");
    assert_eq!(case.parent_id(), Some(root));
    assert_eq!(db.filters().get_object(&case).unwrap().unwrap().id(), Some(case_id));
}

#[test]
fn test_insert_twice_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let id = db.filters().insert_object(&mut tree, SITE).unwrap();

    let err = db.filters().insert_object(&mut tree, SITE).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyPersisted(found) if found == id));
    assert_eq!(count(&db, "filters"), 3);
}

#[test]
fn test_missing_required_setting_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut case = create(&db, "text.case", &g);

    assert!(matches!(
        db.filters().insert_object(&mut case, SITE),
        Err(StoreError::Filter(_))
    ));
    assert_eq!(case.id(), None);
    assert_eq!(count(&db, "filters"), 0);
}

#[test]
fn test_file_database_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filters.db");

    let id = {
        let db = Database::open(&path, registry()).unwrap();
        let g = strings(&db, "shout");
        let mut tree = shout(&db, &g);
        db.filters().insert_object(&mut tree, SITE).unwrap()
    };

    let db = Database::open(&path, registry()).unwrap();
    let version: i64 = db
        .connection()
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);

    let loaded = db.filters().get_object_by_id(id).unwrap().unwrap();
    assert_eq!(classes(&loaded), ["text.trim", "text.case"]);
}

// ============================================
// Settings
// ============================================

#[test]
fn test_localized_settings_round_trip() {
    let db = open();
    let g = strings(&db, "label");
    let template = SettingValue::Localized(
        [("en", "Total: {}"), ("de", "Summe: {}")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    let mut format = create(&db, "text.format", &g)
        .with_setting("template", template.clone())
        .unwrap();
    let id = db.filters().insert_object(&mut format, SITE).unwrap();

    // One row per locale.
    assert_eq!(count(&db, "filter_settings"), 2);

    let mut loaded = db.filters().get_object_by_id(id).unwrap().unwrap();
    assert_eq!(loaded.settings().get("template"), Some(&template));

    let ctx = ExecutionContext::default().with_locale("de");
    let out = loaded.execute(&ctx, Value::from("3")).unwrap();
    assert_eq!(out, Some(Value::from("Summe: 3")));
}

#[test]
fn test_scalar_settings_round_trip() {
    let db = open();
    let g = group(&db, "hex", "primitive::string", "primitive::integer");
    let mut parse = create(&db, "number.parse-int", &g)
        .with_setting("radix", 16i64)
        .unwrap();
    let id = db.filters().insert_object(&mut parse, SITE).unwrap();

    let mut loaded = db.filters().get_object_by_id(id).unwrap().unwrap();
    assert_eq!(loaded.settings().scalar("radix"), Some(&Value::Int(16)));
    let out = loaded
        .execute(&ExecutionContext::default(), Value::from("ff"))
        .unwrap();
    assert_eq!(out, Some(Value::Int(255)));
}

#[test]
fn test_undeclared_stored_setting_ignored() {
    let db = open();
    let g = strings(&db, "trim");
    let mut trim = create(&db, "text.trim", &g);
    let id = db.filters().insert_object(&mut trim, SITE).unwrap();

    db.connection()
        .execute(
            "INSERT INTO filter_settings (filter_id, setting_name, locale, setting_value)
             VALUES (?1, 'retired', NULL, '1')",
            [id.0],
        )
        .unwrap();

    let loaded = db.filters().get_object_by_id(id).unwrap().unwrap();
    assert!(loaded.settings().is_empty());
}

#[test]
fn test_corrupt_setting_reported() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let case_id = tree.filters()[1].id().unwrap();

    db.connection()
        .execute(
            "UPDATE filter_settings SET setting_value = '{broken' WHERE filter_id = ?1",
            [case_id.0],
        )
        .unwrap();

    let err = db.filters().get_object_by_id(root).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::CorruptSetting { filter, .. }) if filter == case_id
    ));
}

// ============================================
// Updates
// ============================================

#[test]
fn test_update_reconciles_children() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let trim_id = tree.filters()[0].id().unwrap();
    let case_id = tree.filters()[1].id().unwrap();

    // Drop trim, change case, append a fresh trim.
    tree.remove_filter(1).unwrap();
    tree.filter_by_seq_mut(2)
        .unwrap()
        .set_setting("mode", "lower")
        .unwrap();
    tree.add_filter(create(&db, "text.trim", &g)).unwrap();
    tree.display_name = "Whisper".into();

    db.filters().update_object(&mut tree).unwrap();
    let new_trim = tree.filters()[1].id().unwrap();
    assert_ne!(new_trim, trim_id);
    assert_eq!(tree.filters()[1].parent_id(), Some(root));

    let loaded = db.filters().get_object_by_id(root).unwrap().unwrap();
    assert_eq!(loaded.display_name, "Whisper");
    assert_eq!(classes(&loaded), ["text.case", "text.trim"]);
    assert_eq!(loaded.filters()[0].id(), Some(case_id));
    assert_eq!(loaded.filters()[0].settings().str("mode"), Some("lower"));
    assert_eq!(loaded.filters()[1].id(), Some(new_trim));

    assert!(db.filters().get_object_by_id(trim_id).unwrap().is_none());
    assert_eq!(count(&db, "filters"), 3);
    assert_eq!(count(&db, "filter_settings"), 1);
}

#[test]
fn test_update_moves_node_within_tree() {
    let db = open();
    let g = strings(&db, "shout");

    // root [ inner [ trim ], case ]
    let mut inner = create(&db, "sequence", &g);
    inner.add_filter(create(&db, "text.trim", &g)).unwrap();
    let mut root = create(&db, "sequence", &g);
    root.add_filter(inner).unwrap();
    root.add_filter(
        create(&db, "text.case", &g)
            .with_setting("mode", "upper")
            .unwrap(),
    )
    .unwrap();
    let root_id = db.filters().insert_object(&mut root, SITE).unwrap();
    let trim_id = root.filters()[0].filters()[0].id().unwrap();

    let trim = root.filter_by_seq_mut(1).unwrap().remove_filter(1).unwrap();
    root.add_filter(trim).unwrap();
    db.filters().update_object(&mut root).unwrap();

    let loaded = db.filters().get_object_by_id(root_id).unwrap().unwrap();
    assert_eq!(classes(&loaded), ["sequence", "text.case", "text.trim"]);
    assert!(loaded.filters()[0].filters().is_empty());
    assert_eq!(loaded.filters()[2].id(), Some(trim_id));
    assert_eq!(loaded.filters()[2].parent_id(), Some(root_id));
}

#[test]
fn test_update_rejects_foreign_node() {
    let db = open();
    let g = strings(&db, "shout");
    let mut a = shout(&db, &g);
    let a_id = db.filters().insert_object(&mut a, SITE).unwrap();
    let mut b = shout(&db, &g);
    let b_id = db.filters().insert_object(&mut b, SITE).unwrap();

    let stolen = b.remove_filter(1).unwrap();
    let stolen_id = stolen.id().unwrap();
    a.add_filter(create(&db, "text.trim", &g)).unwrap();
    a.add_filter(stolen).unwrap();

    let err = db.filters().update_object(&mut a).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::ForeignNode { filter }) if filter == stolen_id
    ));

    // Nothing written, nothing assigned.
    assert!(a.filters()[2].id().is_none());
    assert_eq!(db.filters().get_object_by_id(a_id).unwrap().unwrap().filters().len(), 2);
    assert_eq!(db.filters().get_object_by_id(b_id).unwrap().unwrap().filters().len(), 2);
    assert_eq!(count(&db, "filters"), 6);
}

#[test]
fn test_update_rejects_duplicate_node() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();

    let mut copy = db.filters().get_object_by_id(root).unwrap().unwrap();
    let twin = copy.remove_filter(1).unwrap();
    let twin_id = twin.id().unwrap();
    tree.add_filter(twin).unwrap();

    let err = db.filters().update_object(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::DuplicateNode { filter }) if filter == twin_id
    ));
    assert_eq!(count(&db, "filters"), 3);
}

#[test]
fn test_update_rejects_cycle() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let child = tree.filters()[0].id().unwrap();

    tree.meta_mut().parent_id = Some(child);
    let err = db.filters().update_object(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::Cycle { filter }) if filter == root
    ));

    let stored = db.filters().get_object_by_id(root).unwrap().unwrap();
    assert_eq!(stored.parent_id(), None);
    assert_eq!(stored.filters().len(), 2);
}

#[test]
fn test_update_unsaved_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    assert!(matches!(
        db.filters().update_object(&mut tree),
        Err(StoreError::NotPersisted(_))
    ));
}

fn loose() -> Arc<FilterGroup> {
    Arc::new(FilterGroup::new(
        "loose",
        "primitive::string".parse().unwrap(),
        "primitive::string".parse().unwrap(),
    ))
}

// ============================================
// Parents and rollback
// ============================================

#[test]
fn test_insert_under_stored_composite() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();

    let mut trim = create(&db, "text.trim", &g);
    trim.sequence = 3;
    trim.meta_mut().parent_id = Some(root);
    let id = db.filters().insert_object(&mut trim, SITE).unwrap();
    assert_eq!(trim.parent_id(), Some(root));

    let loaded = db.filters().get_object_by_id(root).unwrap().unwrap();
    assert_eq!(classes(&loaded), ["text.trim", "text.case", "text.trim"]);
    assert_eq!(loaded.filters()[2].id(), Some(id));
}

#[test]
fn test_insert_under_leaf_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut leaf = create(&db, "text.trim", &g);
    let leaf_id = db.filters().insert_object(&mut leaf, SITE).unwrap();

    let mut case = create(&db, "text.case", &g)
        .with_setting("mode", "upper")
        .unwrap();
    case.meta_mut().parent_id = Some(leaf_id);
    let err = db.filters().insert_object(&mut case, SITE).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::ChildOfLeaf { filter, ref class })
            if filter == leaf_id && class == "text.trim"
    ));

    assert!(case.id().is_none());
    assert_eq!(count(&db, "filters"), 1);
    assert_eq!(count(&db, "filter_settings"), 0);
    let stored = db.filters().get_object_by_id(leaf_id).unwrap().unwrap();
    assert!(stored.filters().is_empty());
}

#[test]
fn test_insert_under_missing_parent_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut trim = create(&db, "text.trim", &g);
    trim.meta_mut().parent_id = Some(FilterId(999));

    let err = db.filters().insert_object(&mut trim, SITE).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::MissingParent { parent })
            if parent == FilterId(999)
    ));
    assert!(trim.id().is_none());
    assert_eq!(count(&db, "filters"), 0);
}

#[test]
fn test_update_under_leaf_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let mut leaf = create(&db, "text.trim", &g);
    let leaf_id = db.filters().insert_object(&mut leaf, SITE).unwrap();

    tree.meta_mut().parent_id = Some(leaf_id);
    let err = db.filters().update_object(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::ChildOfLeaf { filter, .. }) if filter == leaf_id
    ));
    let stored = db.filters().get_object_by_id(root).unwrap().unwrap();
    assert_eq!(stored.parent_id(), None);
}

#[test]
fn test_update_under_missing_parent_rejected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();

    tree.meta_mut().parent_id = Some(FilterId(999));
    let err = db.filters().update_object(&mut tree).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Integrity(IntegrityViolation::OrphanedChild { filter, parent })
            if filter == root && parent == FilterId(999)
    ));
}

#[test]
fn test_failed_insert_rolls_back_written_rows() {
    let db = open();
    let g = strings(&db, "shout");

    // The root and its first child are written before the second child fails.
    let mut root = create(&db, "sequence", &g);
    root.add_filter(create(&db, "text.trim", &g)).unwrap();
    root.add_filter(create(&db, "text.trim", &loose())).unwrap();

    let err = db.filters().insert_object(&mut root, SITE).unwrap_err();
    assert!(matches!(err, StoreError::GroupNotPersisted(ref name) if name == "loose"));

    assert_eq!(count(&db, "filters"), 0);
    assert_eq!(root.id(), None);
    root.walk(&mut |node| assert!(node.id().is_none()));
    assert!(db.filters().get_objects_by_group("shout", SITE).unwrap().is_empty());
}

#[test]
fn test_failed_update_rolls_back_written_rows() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let trim_id = tree.filters()[0].id().unwrap();

    // Every change below is written before the loose child fails.
    tree.display_name = "Whisper".into();
    tree.remove_filter(1).unwrap();
    tree.filter_by_seq_mut(2)
        .unwrap()
        .set_setting("mode", "lower")
        .unwrap();
    tree.add_filter(create(&db, "text.trim", &loose())).unwrap();

    let err = db.filters().update_object(&mut tree).unwrap_err();
    assert!(matches!(err, StoreError::GroupNotPersisted(_)));
    assert!(tree.filters()[1].id().is_none());

    assert_eq!(count(&db, "filters"), 3);
    assert_eq!(count(&db, "filter_settings"), 1);
    let stored = db.filters().get_object_by_id(root).unwrap().unwrap();
    assert_eq!(stored.display_name, "Shout");
    assert_eq!(classes(&stored), ["text.trim", "text.case"]);
    assert_eq!(stored.filters()[0].id(), Some(trim_id));
    assert_eq!(stored.filters()[1].settings().str("mode"), Some("upper"));
}

// ============================================
// Deletes
// ============================================

#[test]
fn test_delete_cascades() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let id = db.filters().insert_object(&mut tree, SITE).unwrap();
    let mut other = shout(&db, &g);
    db.filters().insert_object(&mut other, SITE).unwrap();

    assert!(db.filters().delete_object_by_id(id).unwrap());
    assert_eq!(count(&db, "filters"), 3);
    assert_eq!(count(&db, "filter_settings"), 1);
    assert!(!db.filters().delete_object_by_id(id).unwrap());

    assert!(db.filters().delete_object(&mut other).unwrap());
    assert_eq!(other.id(), None);
    assert!(other.filters().iter().all(|c| c.id().is_none()));
    assert_eq!(count(&db, "filters"), 0);
}

// ============================================
// Lookups
// ============================================

#[test]
fn test_lookup_by_group_class_and_context() {
    let db = open();
    let shout_group = strings(&db, "shout");
    let trim_group = strings(&db, "trim");

    let mut a = shout(&db, &shout_group);
    db.filters().insert_object(&mut a, SITE).unwrap();
    let mut b = create(&db, "text.trim", &trim_group);
    db.filters().insert_object(&mut b, SITE).unwrap();
    let mut elsewhere = create(&db, "text.trim", &trim_group);
    db.filters().insert_object(&mut elsewhere, ContextId(5)).unwrap();

    let dao = db.filters();
    assert_eq!(dao.get_objects_by_group("shout", SITE).unwrap().len(), 1);
    // Inner text.trim nodes are not roots.
    assert_eq!(dao.get_objects_by_class("text.trim", SITE).unwrap().len(), 1);
    assert_eq!(
        dao.get_objects_by_group_and_class("trim", "text.trim", ContextId(5))
            .unwrap()
            .len(),
        1
    );
    assert!(dao.get_objects_by_group_and_class("shout", "text.trim", SITE).unwrap().is_empty());
    assert_eq!(dao.get_objects(SITE, Lookup::new()).unwrap().len(), 2);
    assert_eq!(elsewhere.context_id(), ContextId(5));
}

#[test]
fn test_templates_excluded_by_default() {
    let db = open();
    let g = strings(&db, "shout");
    let mut live = shout(&db, &g);
    db.filters().insert_object(&mut live, SITE).unwrap();
    let mut template = shout(&db, &g).template(true);
    let template_id = db.filters().insert_object(&mut template, SITE).unwrap();

    let dao = db.filters();
    assert_eq!(dao.get_objects_by_group("shout", SITE).unwrap().len(), 1);

    let all = dao
        .get_objects_by_group_with("shout", SITE, Lookup::new().templates(true))
        .unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|f| f.id() == Some(template_id) && f.is_template()));
}

#[test]
fn test_lookup_by_type_description() {
    let db = open();
    let shout_group = strings(&db, "shout");
    let trim_group = strings(&db, "trim");
    let hex = group(&db, "hex", "primitive::string", "primitive::integer");

    let mut a = shout(&db, &shout_group);
    db.filters().insert_object(&mut a, SITE).unwrap();
    let mut b = create(&db, "text.trim", &trim_group);
    db.filters().insert_object(&mut b, SITE).unwrap();
    let mut c = create(&db, "number.parse-int", &hex);
    db.filters().insert_object(&mut c, SITE).unwrap();

    let s = "primitive::string".parse().unwrap();
    let i = "primitive::integer".parse().unwrap();
    let found = db.filters().get_objects_by_type_description(&s, &s, SITE).unwrap();
    assert_eq!(found.len(), 2);
    let found = db.filters().get_objects_by_type_description(&s, &i, SITE).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].class(), "number.parse-int");
    assert!(db.filters().get_objects_by_type_description(&i, &s, SITE).unwrap().is_empty());
}

#[test]
fn test_compatible_objects_check_types_and_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filters.db");
    let old_host = HostEnvironment::new(Version::new(1, 4, 0));
    let pdf_host = HostEnvironment::new(Version::new(2, 1, 0)).with_extension("pdf");

    let extract_id = {
        let db = Database::open(&path, registry()).unwrap();
        let extract = strings(&db, "extract");
        let hex = group(&db, "hex", "primitive::string", "primitive::integer");

        let mut parse = create(&db, "number.parse-int", &hex);
        db.filters().insert_object(&mut parse, SITE).unwrap();

        // A sequence inherits its children's requirements.
        let mut pipeline = create(&db, "sequence", &extract);
        pipeline.add_filter(create(&db, "text.trim", &extract)).unwrap();
        pipeline.add_filter(create(&db, "test.pdf-text", &extract)).unwrap();
        db.filters().insert_object(&mut pipeline, SITE).unwrap()
    };

    let text = Value::from("x");
    let old = Database::open(&path, registry()).unwrap().with_host(old_host);
    assert!(old.filters().get_compatible_objects(&text, &text, SITE).unwrap().is_empty());
    assert_eq!(
        old.filters()
            .get_objects_by_group_with("extract", SITE, Lookup::new().check_runtime(false))
            .unwrap()
            .len(),
        1
    );

    let found = old
        .filters()
        .get_compatible_objects(&text, &Value::Int(1), SITE)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].class(), "number.parse-int");
    assert!(old.filters().get_compatible_objects(&Value::Int(1), &Value::Int(1), SITE).unwrap().is_empty());

    let new = Database::open(&path, registry()).unwrap().with_host(pdf_host);
    let found = new.filters().get_compatible_objects(&text, &text, SITE).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), Some(extract_id));
}

// ============================================
// Groups
// ============================================

#[test]
fn test_group_lifecycle() {
    let db = open();
    let g = strings(&db, "shout");
    let groups = db.filter_groups();

    let mut dup = FilterGroup::new(
        "shout",
        "primitive::string".parse().unwrap(),
        "primitive::string".parse().unwrap(),
    );
    assert!(matches!(
        groups.insert_object(&mut dup),
        Err(StoreError::DuplicateFilterGroupSymbolic(_))
    ));
    assert_eq!(dup.id, None);

    let mut renamed = (*g).clone().display_name("filter.shout.name");
    groups.update_object(&renamed).unwrap();
    let stored = groups.get_object_by_id(g.id.unwrap()).unwrap().unwrap();
    assert_eq!(stored.display_name_key, "filter.shout.name");

    renamed.output_type = "primitive::integer".parse().unwrap();
    assert!(matches!(
        groups.update_object(&renamed),
        Err(StoreError::GroupContractChanged(_))
    ));

    let mut tree = shout(&db, &g);
    db.filters().insert_object(&mut tree, SITE).unwrap();
    assert!(matches!(
        groups.delete_object_by_symbolic("shout"),
        Err(StoreError::GroupInUse { count: 3, .. })
    ));

    db.filters().delete_object(&mut tree).unwrap();
    assert!(groups.delete_object(&g).unwrap());
    assert!(!groups.delete_object_by_symbolic("shout").unwrap());
    assert!(groups.get_object_by_symbolic("shout").unwrap().is_none());
}

#[test]
fn test_groups_listed_by_symbolic() {
    let db = open();
    strings(&db, "zeta");
    strings(&db, "alpha");
    let names: Vec<String> = db
        .filter_groups()
        .get_objects()
        .unwrap()
        .into_iter()
        .map(|g| g.symbolic)
        .collect();
    assert_eq!(names, ["alpha", "zeta"]);
}

#[test]
fn test_unsaved_group_rejected() {
    let db = open();
    let g = loose();
    let mut trim = create(&db, "text.trim", &g);
    assert!(matches!(
        db.filters().insert_object(&mut trim, SITE),
        Err(StoreError::GroupNotPersisted(_))
    ));
}

// ============================================
// Integrity
// ============================================

#[test]
fn test_orphan_detected() {
    let db = open();
    let g = strings(&db, "shout");
    let conn = db.connection();
    conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
    conn.execute(
        "INSERT INTO filters (filter_group_id, class_name, parent_filter_id, seq)
         VALUES (?1, 'text.trim', 999, 1)",
        [g.id.unwrap().0],
    )
    .unwrap();
    let orphan = FilterId(conn.last_insert_rowid());

    assert_eq!(
        db.filters().check_integrity().unwrap(),
        [IntegrityViolation::OrphanedChild {
            filter: orphan,
            parent: FilterId(999),
        }]
    );
    assert!(matches!(
        db.filters().get_object_by_id(orphan),
        Err(StoreError::Integrity(IntegrityViolation::OrphanedChild { .. }))
    ));
}

#[test]
fn test_stored_cycle_detected() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    let root = db.filters().insert_object(&mut tree, SITE).unwrap();
    let child = tree.filters()[0].id().unwrap();
    assert!(db.filters().check_integrity().unwrap().is_empty());

    db.connection()
        .execute(
            "UPDATE filters SET parent_filter_id = ?1 WHERE filter_id = ?2",
            [child.0, root.0],
        )
        .unwrap();

    let violations = db.filters().check_integrity().unwrap();
    assert_eq!(violations.len(), 3);
    assert!(violations
        .iter()
        .all(|v| matches!(v, IntegrityViolation::Cycle { .. })));
    assert!(matches!(
        db.filters().get_object_by_id(root),
        Err(StoreError::Integrity(IntegrityViolation::Cycle { .. }))
    ));
}

#[test]
fn test_child_of_leaf_detected() {
    let db = open();
    let g = strings(&db, "trim");
    let mut trim = create(&db, "text.trim", &g);
    let id = db.filters().insert_object(&mut trim, SITE).unwrap();

    db.connection()
        .execute(
            "INSERT INTO filters (filter_group_id, class_name, parent_filter_id, seq)
             VALUES (?1, 'text.trim', ?2, 1)",
            [g.id.unwrap().0, id.0],
        )
        .unwrap();

    assert!(matches!(
        db.filters().get_object_by_id(id),
        Err(StoreError::Integrity(IntegrityViolation::ChildOfLeaf { .. }))
    ));
}

#[test]
fn test_unknown_class_skipped_in_listings() {
    let db = open();
    let g = strings(&db, "shout");
    let mut tree = shout(&db, &g);
    db.filters().insert_object(&mut tree, SITE).unwrap();
    db.connection()
        .execute(
            "INSERT INTO filters (filter_group_id, class_name, seq) VALUES (?1, 'gone.class', 0)",
            [g.id.unwrap().0],
        )
        .unwrap();

    assert_eq!(db.filters().get_objects_by_group("shout", SITE).unwrap().len(), 1);
}

// ============================================
// Documents
// ============================================

const DOCUMENT: &str = r#"
groups:
  - symbolic: shout
    display_name: filter.shout.name
    input: primitive::string
    output: primitive::string
filters:
  - class: sequence
    group: shout
    display_name: Shout
    children:
      - class: text.trim
      - class: text.case
        settings:
          mode: upper
"#;

#[test]
fn test_install_document_is_idempotent() {
    let db = open();
    let document = FilterDocument::from_bytes(DOCUMENT.as_bytes(), Some("shout.yaml")).unwrap();

    let first = db.helper().install_document(&document, SITE).unwrap();
    assert_eq!(first.groups_created, ["shout"]);
    assert_eq!(first.filters_created.len(), 1);

    let second = db.helper().install_document(&document, SITE).unwrap();
    assert!(second.groups_created.is_empty());
    assert_eq!(second.groups_kept, ["shout"]);
    assert!(second.filters_created.is_empty());
    assert_eq!(second.filters_skipped, 1);

    let mut stored = db.filters().get_object_by_id(first.filters_created[0]).unwrap().unwrap();
    assert_eq!(stored.display_name, "Shout");
    let out = stored
        .execute(&ExecutionContext::default(), Value::from(" ok "))
        .unwrap();
    assert_eq!(out, Some(Value::from("OK")));

    // The same document in another context installs again.
    let other = db.helper().install_document(&document, ContextId(2)).unwrap();
    assert_eq!(other.filters_created.len(), 1);
}

#[test]
fn test_install_changed_document() {
    let db = open();
    let document = FilterDocument::from_bytes(DOCUMENT.as_bytes(), Some("shout.yaml")).unwrap();
    db.helper().install_document(&document, SITE).unwrap();

    let lower = DOCUMENT.replace("mode: upper", "mode: lower");
    let document = FilterDocument::from_bytes(lower.as_bytes(), Some("shout.yaml")).unwrap();
    let report = db.helper().install_document(&document, SITE).unwrap();
    assert_eq!(report.filters_created.len(), 1);
    assert_eq!(db.filters().get_objects_by_group("shout", SITE).unwrap().len(), 2);

    let retyped = DOCUMENT.replace("output: primitive::string", "output: primitive::integer");
    let document = FilterDocument::from_bytes(retyped.as_bytes(), Some("shout.yaml")).unwrap();
    assert!(matches!(
        db.helper().install_document(&document, SITE),
        Err(StoreError::GroupContractChanged(_))
    ));
}

#[test]
fn test_install_document_with_empty_caption() {
    let db = open();
    let yaml = r#"
groups:
  - symbolic: shout
    input: primitive::string
    output: primitive::string
filters:
  - class: test.captioned
    group: shout
    settings:
      caption: {}
"#;
    let document = FilterDocument::from_bytes(yaml.as_bytes(), Some("caption.yaml")).unwrap();

    let first = db.helper().install_document(&document, SITE).unwrap();
    assert_eq!(first.filters_created.len(), 1);
    assert_eq!(count(&db, "filter_settings"), 0);
    let stored = db.filters().get_object_by_id(first.filters_created[0]).unwrap().unwrap();
    assert!(stored.settings().is_empty());

    let second = db.helper().install_document(&document, SITE).unwrap();
    assert!(second.filters_created.is_empty());
    assert_eq!(second.filters_skipped, 1);
    assert_eq!(count(&db, "filters"), 1);
}

#[test]
fn test_install_document_with_unknown_group() {
    let db = open();
    let document = FilterDocument::from_bytes(
        br#"{"filters": [{"class": "text.trim", "group": "missing"}]}"#,
        Some("doc.json"),
    )
    .unwrap();
    assert!(matches!(
        db.helper().install_document(&document, SITE),
        Err(StoreError::Document(_))
    ));
}
