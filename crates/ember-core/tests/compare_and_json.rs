//! Group comparison and JSON export.

use ember_core::{
    compare_groups, default_table_filter, CollectingReporter, ColumnType, Group, LinkType, Mixed,
};

fn sample_group(value: i64) -> Group {
    let mut g = Group::new();
    let b = g.add_table("B").unwrap();
    g.add_primary_key_column(b, "id", ColumnType::String).unwrap();
    let a = g.add_table("A").unwrap();
    g.add_primary_key_column(a, "id", ColumnType::String).unwrap();
    let n = g.add_column(a, "n", ColumnType::Int, false).unwrap();
    let link = g.add_column_link(a, "link", LinkType::Single, b).unwrap();

    let b1 = g
        .create_object_with_primary_key(b, Mixed::from("b-one"))
        .unwrap();
    let a1 = g
        .create_object_with_primary_key(a, Mixed::from("a-one"))
        .unwrap();
    a1.set(&mut g, n, value).unwrap();
    a1.set(&mut g, link, b1.key()).unwrap();
    g
}

#[test]
fn test_equal_groups_compare_equal() {
    let g1 = sample_group(5);
    let g2 = sample_group(5);
    let mut reporter = CollectingReporter::default();
    let equal = compare_groups(&g1, &g2, &default_table_filter, &mut reporter).unwrap();
    assert!(equal, "diffs: {:?}", reporter.messages);
}

#[test]
fn test_value_difference_is_reported_with_prefixes() {
    let g1 = sample_group(5);
    let g2 = sample_group(6);
    let mut reporter = CollectingReporter::default();
    let equal = compare_groups(&g1, &g2, &default_table_filter, &mut reporter).unwrap();
    assert!(!equal);
    assert!(reporter
        .messages
        .iter()
        .any(|m| m.contains("Table[A]") && m.contains("'n'")));
}

#[test]
fn test_internal_pk_table_is_ignored_by_default_filter() {
    let g1 = sample_group(5);
    let mut g2 = sample_group(5);
    // Only difference: an internal bookkeeping table on one side.
    g2.add_table("pk_registry").unwrap();
    g2.add_table("metadata_log").unwrap();
    let mut reporter = CollectingReporter::default();
    let equal = compare_groups(&g1, &g2, &default_table_filter, &mut reporter).unwrap();
    assert!(equal, "diffs: {:?}", reporter.messages);

    // A permissive filter sees the extra tables.
    let mut reporter = CollectingReporter::default();
    let equal = compare_groups(&g1, &g2, &|_| true, &mut reporter).unwrap();
    assert!(!equal);
}

#[test]
fn test_links_compare_by_target_primary_key() {
    let build = |target_pk: &str| {
        let mut g = Group::new();
        let b = g.add_table("B").unwrap();
        g.add_primary_key_column(b, "id", ColumnType::String).unwrap();
        let a = g.add_table("A").unwrap();
        g.add_primary_key_column(a, "id", ColumnType::String).unwrap();
        let link = g.add_column_link(a, "link", LinkType::Single, b).unwrap();
        let target = g
            .create_object_with_primary_key(b, Mixed::from(target_pk))
            .unwrap();
        // A second target in one insertion order or another never
        // affects the outcome; identity is the primary key.
        g.create_object_with_primary_key(b, Mixed::from("spare"))
            .unwrap();
        let a1 = g
            .create_object_with_primary_key(a, Mixed::from("a-one"))
            .unwrap();
        a1.set(&mut g, link, target.key()).unwrap();
        g
    };
    let g1 = build("wanted");
    let g2 = build("wanted");
    let g3 = build("other");
    let mut reporter = CollectingReporter::default();
    assert!(compare_groups(&g1, &g2, &default_table_filter, &mut reporter).unwrap());
    let equal = compare_groups(&g1, &g3, &default_table_filter, &mut reporter).unwrap();
    assert!(!equal);
    assert!(reporter.messages.iter().any(|m| m.contains("link")
        || m.contains("not found in right-hand side")));
}

#[test]
fn test_embedded_targets_compare_structurally() {
    let build = |city: &str| {
        let mut g = Group::new();
        let addr = g.add_embedded_table("Address").unwrap();
        let person = g.add_table("Person").unwrap();
        g.add_primary_key_column(person, "id", ColumnType::String).unwrap();
        let city_col = g.add_column(addr, "city", ColumnType::String, true).unwrap();
        let addr_col = g
            .add_column_link(person, "address", LinkType::Single, addr)
            .unwrap();
        let p = g
            .create_object_with_primary_key(person, Mixed::from("p1"))
            .unwrap();
        let mut g2 = g;
        let a = p.create_and_set_linked_object(&mut g2, addr_col).unwrap();
        a.set(&mut g2, city_col, city.to_owned()).unwrap();
        g2
    };
    let g1 = build("Aarhus");
    let g2 = build("Aarhus");
    let g3 = build("Copenhagen");

    let mut reporter = CollectingReporter::default();
    assert!(compare_groups(&g1, &g2, &default_table_filter, &mut reporter).unwrap());
    assert!(!compare_groups(&g1, &g3, &default_table_filter, &mut reporter).unwrap());
}

#[test]
fn test_json_export_shape() {
    let g = sample_group(5);
    let json = g.to_json().unwrap();
    let a_rows = json.get("A").and_then(|v| v.as_array()).unwrap();
    assert_eq!(a_rows.len(), 1);
    let row = &a_rows[0];
    assert_eq!(row.get("n").and_then(|v| v.as_i64()), Some(5));
    assert_eq!(
        row.get("id").and_then(|v| v.as_str()),
        Some("a-one")
    );
    // Depth-zero links print as table/key references.
    let link = row.get("link").unwrap();
    assert_eq!(link.get("table").and_then(|v| v.as_str()), Some("B"));
    assert!(link.get("key").and_then(|v| v.as_i64()).is_some());
    assert!(row.get("_key").is_some());
}

#[test]
fn test_json_export_agrees_for_equal_groups() {
    let g1 = sample_group(5);
    let g2 = sample_group(5);
    assert_eq!(g1.to_json().unwrap(), g2.to_json().unwrap());
}
