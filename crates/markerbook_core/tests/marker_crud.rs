use markerbook_core::db::open_db_in_memory;
use markerbook_core::{
    CategoryRepository, ExampleDraft, MarkerDraft, MarkerRepoError, MarkerRepository,
    SqliteCategoryRepository, SqliteMarkerRepository, ValidationError,
};

fn setup() -> rusqlite::Connection {
    open_db_in_memory().unwrap()
}

fn draft(name: &str) -> MarkerDraft {
    MarkerDraft {
        name: name.to_string(),
        definition: format!("{name} definition"),
        anchor_example: format!("{name} anchor"),
        coding_rule: format!("{name} rule"),
        ..MarkerDraft::default()
    }
}

#[test]
fn create_marker_stores_fields_verbatim_with_equal_timestamps() {
    let conn = setup();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();

    let created = repo
        .create_marker(&MarkerDraft {
            name: "Guilt Induction".to_string(),
            definition: String::new(),
            anchor_example: "If you really loved me...".to_string(),
            coding_rule: String::new(),
            tags: vec!["Manipulation".to_string(), "emotional".to_string()],
            category_uuid: None,
        })
        .unwrap();

    assert_eq!(created.name, "Guilt Induction");
    // Empty strings are legal values and must survive verbatim.
    assert_eq!(created.definition, "");
    assert_eq!(created.coding_rule, "");
    assert_eq!(
        created.tags,
        vec!["Manipulation".to_string(), "emotional".to_string()]
    );
    assert_eq!(created.created_at, created.updated_at);
}

#[test]
fn update_marker_strictly_increases_updated_at() {
    let conn = setup();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();

    let created = repo.create_marker(&draft("Original")).unwrap();

    let mut renamed = created.clone();
    renamed.name = "Renamed".to_string();
    let first_update = repo.update_marker(&renamed).unwrap();
    assert!(first_update.updated_at > created.updated_at);
    assert_eq!(first_update.created_at, created.created_at);
    assert_eq!(first_update.name, "Renamed");

    let second_update = repo.update_marker(&first_update).unwrap();
    assert!(second_update.updated_at > first_update.updated_at);
}

#[test]
fn delete_marker_cascades_examples() {
    let conn = setup();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();

    let marker = repo.create_marker(&draft("Doomed")).unwrap();
    repo.add_example(marker.uuid, &ExampleDraft::new("first"))
        .unwrap();
    repo.add_example(marker.uuid, &ExampleDraft::new("second"))
        .unwrap();
    assert_eq!(repo.list_examples(marker.uuid).unwrap().len(), 2);

    repo.delete_marker(marker.uuid).unwrap();

    let orphans: i64 = conn
        .query_row("SELECT COUNT(*) FROM marker_examples;", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(orphans, 0);
    assert!(repo.get_marker(marker.uuid).unwrap().is_none());
}

#[test]
fn fetch_markers_sorts_by_name_and_filters_by_search() {
    let conn = setup();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();

    repo.create_marker(&MarkerDraft {
        name: "Blame Shifting".to_string(),
        definition: "moving responsibility onto the partner".to_string(),
        anchor_example: "this is your fault".to_string(),
        coding_rule: "explicit reassignment only".to_string(),
        ..MarkerDraft::default()
    })
    .unwrap();
    repo.create_marker(&MarkerDraft {
        name: "Appeasement".to_string(),
        definition: "giving in to avoid conflict".to_string(),
        anchor_example: "fine, whatever you want".to_string(),
        coding_rule: String::new(),
        ..MarkerDraft::default()
    })
    .unwrap();

    let all = repo.fetch_markers(None).unwrap();
    let names: Vec<&str> = all.iter().map(|marker| marker.name.as_str()).collect();
    assert_eq!(names, vec!["Appeasement", "Blame Shifting"]);

    // Case-insensitive, matches across name OR definition OR anchor.
    let by_name = repo.fetch_markers(Some("blame")).unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].name, "Blame Shifting");

    let by_definition = repo.fetch_markers(Some("CONFLICT")).unwrap();
    assert_eq!(by_definition.len(), 1);
    assert_eq!(by_definition[0].name, "Appeasement");

    let by_anchor = repo.fetch_markers(Some("your fault")).unwrap();
    assert_eq!(by_anchor.len(), 1);

    assert!(repo.fetch_markers(Some("nowhere")).unwrap().is_empty());
    // Blank search applies no filter.
    assert_eq!(repo.fetch_markers(Some("  ")).unwrap().len(), 2);
}

#[test]
fn fetch_markers_by_tags_uses_or_substring_semantics() {
    let conn = setup();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();

    let category = categories
        .create_category("Emotional Manipulation", None, None)
        .unwrap();
    let guilt = repo
        .create_marker(&MarkerDraft {
            name: "Guilt Induction".to_string(),
            tags: vec!["manipulation".to_string(), "emotional".to_string()],
            category_uuid: Some(category.uuid),
            ..MarkerDraft::default()
        })
        .unwrap();
    repo.create_marker(&MarkerDraft {
        name: "Stonewalling".to_string(),
        tags: vec!["avoidance".to_string()],
        ..MarkerDraft::default()
    })
    .unwrap();

    let hits = repo
        .fetch_markers_by_tags(&["emotional".to_string()])
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, guilt.uuid);

    // Substring and case both fold.
    let partial = repo.fetch_markers_by_tags(&["EMOT".to_string()]).unwrap();
    assert_eq!(partial.len(), 1);

    let either = repo
        .fetch_markers_by_tags(&["avoidance".to_string(), "manipulation".to_string()])
        .unwrap();
    assert_eq!(either.len(), 2);

    // An empty query set applies no filter.
    assert_eq!(repo.fetch_markers_by_tags(&[]).unwrap().len(), 2);
}

#[test]
fn fetch_markers_by_category_matches_identity() {
    let conn = setup();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();

    let first = categories.create_category("First", None, None).unwrap();
    let second = categories.create_category("Second", None, None).unwrap();

    let inside = repo
        .create_marker(&MarkerDraft {
            name: "Inside".to_string(),
            category_uuid: Some(first.uuid),
            ..MarkerDraft::default()
        })
        .unwrap();
    repo.create_marker(&MarkerDraft {
        name: "Elsewhere".to_string(),
        category_uuid: Some(second.uuid),
        ..MarkerDraft::default()
    })
    .unwrap();

    let hits = repo.fetch_markers_by_category(first.uuid).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, inside.uuid);
}

#[test]
fn add_example_validates_subtlety_and_bumps_marker() {
    let conn = setup();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();
    let marker = repo.create_marker(&draft("Target")).unwrap();

    let err = repo
        .add_example(
            marker.uuid,
            &ExampleDraft {
                subtlety: 6,
                ..ExampleDraft::new("too subtle")
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        MarkerRepoError::Validation(ValidationError::SubtletyOutOfRange(6))
    ));
    assert!(repo.list_examples(marker.uuid).unwrap().is_empty());

    let example = repo
        .add_example(
            marker.uuid,
            &ExampleDraft {
                context: Some("during an argument".to_string()),
                relationship_type: Some("Partner".to_string()),
                ..ExampleDraft::new("you never listen")
            },
        )
        .unwrap();
    assert_eq!(example.subtlety, 3);
    assert_eq!(example.marker_uuid, marker.uuid);

    let bumped = repo.get_marker(marker.uuid).unwrap().unwrap();
    assert!(bumped.updated_at > marker.updated_at);
}

#[test]
fn remove_example_detaches_and_bumps_marker() {
    let conn = setup();
    let repo = SqliteMarkerRepository::try_new(&conn).unwrap();
    let marker = repo.create_marker(&draft("Target")).unwrap();
    let other = repo.create_marker(&draft("Other")).unwrap();
    let example = repo
        .add_example(marker.uuid, &ExampleDraft::new("kept"))
        .unwrap();

    // The example is not attached to `other`.
    let err = repo.remove_example(example.uuid, other.uuid).unwrap_err();
    assert!(matches!(err, MarkerRepoError::ExampleNotFound(_)));
    assert_eq!(repo.list_examples(marker.uuid).unwrap().len(), 1);

    let before = repo.get_marker(marker.uuid).unwrap().unwrap();
    repo.remove_example(example.uuid, marker.uuid).unwrap();
    assert!(repo.list_examples(marker.uuid).unwrap().is_empty());
    let after = repo.get_marker(marker.uuid).unwrap().unwrap();
    assert!(after.updated_at > before.updated_at);
}
