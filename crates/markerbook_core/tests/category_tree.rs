use markerbook_core::db::open_db_in_memory;
use markerbook_core::{
    CategoryRepoError, CategoryRepository, MarkerDraft, MarkerRepository,
    SqliteCategoryRepository, SqliteMarkerRepository, ValidationError,
};

fn setup() -> rusqlite::Connection {
    open_db_in_memory().unwrap()
}

#[test]
fn create_category_rejects_blank_name() {
    let conn = setup();
    let repo = SqliteCategoryRepository::try_new(&conn).unwrap();

    let err = repo.create_category("   ", None, None).unwrap_err();
    assert!(matches!(
        err,
        CategoryRepoError::Validation(ValidationError::EmptyCategoryName)
    ));
    assert!(repo.fetch_categories().unwrap().categories.is_empty());
}

#[test]
fn fetch_categories_sorts_by_name_and_tracks_roots() {
    let conn = setup();
    let repo = SqliteCategoryRepository::try_new(&conn).unwrap();

    let root = repo.create_category("Zeta", None, None).unwrap();
    let child = repo
        .create_category("Alpha", Some("child"), Some(root.uuid))
        .unwrap();
    repo.create_category("Mid", None, None).unwrap();

    let projection = repo.fetch_categories().unwrap();
    let names: Vec<&str> = projection
        .categories
        .iter()
        .map(|category| category.name.as_str())
        .collect();
    assert_eq!(names, vec!["Alpha", "Mid", "Zeta"]);

    let root_names: Vec<&str> = projection
        .roots
        .iter()
        .map(|category| category.name.as_str())
        .collect();
    assert_eq!(root_names, vec!["Mid", "Zeta"]);
    assert_eq!(child.parent_uuid, Some(root.uuid));
}

#[test]
fn move_category_rejects_self_and_descendants() {
    let conn = setup();
    let repo = SqliteCategoryRepository::try_new(&conn).unwrap();

    let root = repo.create_category("Root", None, None).unwrap();
    let mid = repo.create_category("Mid", None, Some(root.uuid)).unwrap();
    let leaf = repo.create_category("Leaf", None, Some(mid.uuid)).unwrap();

    for target in [root.uuid, mid.uuid, leaf.uuid] {
        let err = repo.move_category(root.uuid, Some(target)).unwrap_err();
        assert!(matches!(err, CategoryRepoError::CircularReference { .. }));
    }

    // The failed moves must leave the tree untouched.
    let reloaded = repo.get_category(root.uuid).unwrap().unwrap();
    assert_eq!(reloaded.parent_uuid, None);
    let reloaded_mid = repo.get_category(mid.uuid).unwrap().unwrap();
    assert_eq!(reloaded_mid.parent_uuid, Some(root.uuid));
}

#[test]
fn move_category_reparents_on_success() {
    let conn = setup();
    let repo = SqliteCategoryRepository::try_new(&conn).unwrap();

    let first = repo.create_category("First", None, None).unwrap();
    let second = repo.create_category("Second", None, None).unwrap();
    let leaf = repo.create_category("Leaf", None, Some(first.uuid)).unwrap();

    repo.move_category(leaf.uuid, Some(second.uuid)).unwrap();
    let reloaded = repo.get_category(leaf.uuid).unwrap().unwrap();
    assert_eq!(reloaded.parent_uuid, Some(second.uuid));

    repo.move_category(leaf.uuid, None).unwrap();
    let reloaded = repo.get_category(leaf.uuid).unwrap().unwrap();
    assert_eq!(reloaded.parent_uuid, None);
}

#[test]
fn category_tree_sorts_children_and_counts_markers() {
    let conn = setup();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let markers = SqliteMarkerRepository::try_new(&conn).unwrap();

    let root = categories.create_category("Root", None, None).unwrap();
    let beta = categories
        .create_category("Beta", None, Some(root.uuid))
        .unwrap();
    let alpha = categories
        .create_category("Alpha", None, Some(root.uuid))
        .unwrap();

    for (name, category) in [
        ("Direct", root.uuid),
        ("In Alpha", alpha.uuid),
        ("In Beta 1", beta.uuid),
        ("In Beta 2", beta.uuid),
    ] {
        markers
            .create_marker(&MarkerDraft {
                name: name.to_string(),
                category_uuid: Some(category),
                ..MarkerDraft::default()
            })
            .unwrap();
    }

    let tree = categories.get_category_tree().unwrap();
    assert_eq!(tree.len(), 1);
    let root_node = &tree[0];
    assert_eq!(root_node.category.uuid, root.uuid);
    assert_eq!(root_node.direct_marker_count, 1);
    assert_eq!(root_node.marker_count(), 4);

    let child_names: Vec<&str> = root_node
        .children
        .iter()
        .map(|node| node.category.name.as_str())
        .collect();
    assert_eq!(child_names, vec!["Alpha", "Beta"]);
    assert_eq!(root_node.children[1].marker_count(), 2);
}

#[test]
fn get_all_markers_covers_the_whole_subtree_without_duplicates() {
    let conn = setup();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let markers = SqliteMarkerRepository::try_new(&conn).unwrap();

    let root = categories.create_category("Root", None, None).unwrap();
    let mid = categories
        .create_category("Mid", None, Some(root.uuid))
        .unwrap();
    let leaf = categories
        .create_category("Leaf", None, Some(mid.uuid))
        .unwrap();
    let sibling = categories.create_category("Sibling", None, None).unwrap();

    let mut expected = Vec::new();
    for (name, category) in [
        ("Root marker", root.uuid),
        ("Mid marker", mid.uuid),
        ("Leaf marker", leaf.uuid),
    ] {
        let marker = markers
            .create_marker(&MarkerDraft {
                name: name.to_string(),
                category_uuid: Some(category),
                ..MarkerDraft::default()
            })
            .unwrap();
        expected.push(marker.uuid);
    }
    markers
        .create_marker(&MarkerDraft {
            name: "Outside".to_string(),
            category_uuid: Some(sibling.uuid),
            ..MarkerDraft::default()
        })
        .unwrap();

    let collected = categories.get_all_markers(root.uuid, true).unwrap();
    let mut collected_ids: Vec<_> = collected.iter().map(|marker| marker.uuid).collect();
    collected_ids.sort();
    let mut expected_ids = expected.clone();
    expected_ids.sort();
    assert_eq!(collected_ids, expected_ids);

    let direct_only = categories.get_all_markers(root.uuid, false).unwrap();
    assert_eq!(direct_only.len(), 1);
    assert_eq!(direct_only[0].name, "Root marker");
}

#[test]
fn delete_category_reparents_children_and_detaches_markers() {
    let conn = setup();
    let categories = SqliteCategoryRepository::try_new(&conn).unwrap();
    let markers = SqliteMarkerRepository::try_new(&conn).unwrap();

    let root = categories.create_category("Root", None, None).unwrap();
    let mid = categories
        .create_category("Mid", None, Some(root.uuid))
        .unwrap();
    let leaf = categories
        .create_category("Leaf", None, Some(mid.uuid))
        .unwrap();
    let marker = markers
        .create_marker(&MarkerDraft {
            name: "Attached".to_string(),
            category_uuid: Some(mid.uuid),
            ..MarkerDraft::default()
        })
        .unwrap();

    categories.delete_category(mid.uuid).unwrap();

    assert!(categories.get_category(mid.uuid).unwrap().is_none());
    let reloaded_leaf = categories.get_category(leaf.uuid).unwrap().unwrap();
    assert_eq!(reloaded_leaf.parent_uuid, Some(root.uuid));
    let reloaded_marker = markers.get_marker(marker.uuid).unwrap().unwrap();
    assert_eq!(reloaded_marker.category_uuid, None);
}

#[test]
fn delete_missing_category_reports_not_found() {
    let conn = setup();
    let repo = SqliteCategoryRepository::try_new(&conn).unwrap();
    let err = repo.delete_category(uuid::Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, CategoryRepoError::NotFound(_)));
}
