//! Lists and dictionaries.

use ember_core::{ColumnType, EmberError, Group, Mixed};

fn list_fixture() -> (Group, ember_core::Obj, ember_core::ColKey) {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let col = g.add_column_list(t, "nums", ColumnType::Int, false).unwrap();
    let obj = g.create_object(t).unwrap();
    (g, obj, col)
}

#[test]
fn test_list_insert_set_remove() {
    let (mut g, obj, col) = list_fixture();
    let list = obj.get_list::<i64>(col);
    assert_eq!(list.size(&g).unwrap(), 0);

    list.add(&mut g, 10).unwrap();
    list.add(&mut g, 30).unwrap();
    list.insert(&mut g, 1, 20).unwrap();
    assert_eq!(list.size(&g).unwrap(), 3);
    assert_eq!(list.get(&g, 1).unwrap(), 20);

    list.set(&mut g, 1, 21).unwrap();
    assert_eq!(list.get(&g, 1).unwrap(), 21);

    let before = list.size(&g).unwrap();
    list.insert(&mut g, 0, 5).unwrap();
    list.remove(&mut g, 0).unwrap();
    assert_eq!(list.size(&g).unwrap(), before);

    assert_eq!(list.find_first(&g, 30).unwrap(), Some(2));
    assert_eq!(list.find_first(&g, 99).unwrap(), None);
}

#[test]
fn test_list_resize_and_move() {
    let (mut g, obj, col) = list_fixture();
    let list = obj.get_list::<i64>(col);
    list.resize(&mut g, 3).unwrap();
    assert_eq!(list.size(&g).unwrap(), 3);
    assert_eq!(list.get(&g, 2).unwrap(), 0);

    list.set(&mut g, 0, 1).unwrap();
    list.set(&mut g, 1, 2).unwrap();
    list.set(&mut g, 2, 3).unwrap();
    list.move_elem(&mut g, 0, 2).unwrap();
    assert_eq!(
        obj.get_list_values::<i64>(&g, col).unwrap(),
        vec![2, 3, 1]
    );

    list.resize(&mut g, 1).unwrap();
    assert_eq!(obj.get_list_values::<i64>(&g, col).unwrap(), vec![2]);
    list.clear(&mut g).unwrap();
    assert_eq!(list.size(&g).unwrap(), 0);
}

#[test]
fn test_list_out_of_bounds() {
    let (mut g, obj, col) = list_fixture();
    let list = obj.get_list::<i64>(col);
    assert!(list.get(&g, 0).is_err());
    assert!(list.set(&mut g, 0, 1).is_err());
    assert!(list.insert(&mut g, 1, 1).is_err());
}

#[test]
fn test_nullable_string_list() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let col = g.add_column_list(t, "tags", ColumnType::String, true).unwrap();
    let obj = g.create_object(t).unwrap();
    let list = obj.get_list::<Option<String>>(col);
    list.add(&mut g, Some("a".to_owned())).unwrap();
    list.add(&mut g, None).unwrap();
    assert_eq!(list.get(&g, 0).unwrap(), Some("a".to_owned()));
    assert_eq!(list.get(&g, 1).unwrap(), None);
}

#[test]
fn test_dictionary_insert_overwrite_get() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let col = g.add_column_dictionary(t, "props").unwrap();
    let obj = g.create_object(t).unwrap();
    let dict = obj.get_dictionary(col);

    assert!(dict.insert(&mut g, Mixed::from("k"), Mixed::Int(1)).unwrap());
    assert!(!dict.insert(&mut g, Mixed::from("k"), Mixed::Int(2)).unwrap());
    assert_eq!(dict.get(&g, &Mixed::from("k")).unwrap(), Mixed::Int(2));
    assert_eq!(dict.size(&g).unwrap(), 1);

    let err = dict.get(&g, &Mixed::from("missing")).unwrap_err();
    assert!(matches!(err, EmberError::KeyNotFound));
}

#[test]
fn test_dictionary_get_or_insert_null_returns_prior_value() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let col = g.add_column_dictionary(t, "props").unwrap();
    let obj = g.create_object(t).unwrap();
    let dict = obj.get_dictionary(col);

    // Miss: inserts a null entry, reports no prior value.
    assert_eq!(dict.get_or_insert_null(&mut g, Mixed::from("k")).unwrap(), None);
    assert_eq!(dict.get(&g, &Mixed::from("k")).unwrap(), Mixed::Null);
    assert_eq!(dict.size(&g).unwrap(), 1);

    dict.insert(&mut g, Mixed::from("k"), Mixed::Int(9)).unwrap();
    assert_eq!(
        dict.get_or_insert_null(&mut g, Mixed::from("k")).unwrap(),
        Some(Mixed::Int(9))
    );
    assert_eq!(dict.size(&g).unwrap(), 1);
}

#[test]
fn test_dictionary_erase_and_clear() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let col = g.add_column_dictionary(t, "props").unwrap();
    let obj = g.create_object(t).unwrap();
    let dict = obj.get_dictionary(col);

    for i in 0..10i64 {
        dict.insert(&mut g, Mixed::Int(i), Mixed::Int(i * i)).unwrap();
    }
    let before = dict.size(&g).unwrap();
    dict.insert(&mut g, Mixed::from("extra"), Mixed::Bool(true)).unwrap();
    dict.erase(&mut g, &Mixed::from("extra")).unwrap();
    assert_eq!(dict.size(&g).unwrap(), before);

    assert!(matches!(
        dict.erase(&mut g, &Mixed::from("extra")),
        Err(EmberError::KeyNotFound)
    ));

    dict.clear(&mut g).unwrap();
    assert_eq!(dict.size(&g).unwrap(), 0);
}

#[test]
fn test_dictionary_mixed_key_types_coexist() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let col = g.add_column_dictionary(t, "props").unwrap();
    let obj = g.create_object(t).unwrap();
    let dict = obj.get_dictionary(col);

    dict.insert(&mut g, Mixed::Int(1), Mixed::from("int key")).unwrap();
    dict.insert(&mut g, Mixed::from("1"), Mixed::from("string key")).unwrap();
    dict.insert(&mut g, Mixed::Bool(true), Mixed::from("bool key")).unwrap();
    assert_eq!(dict.size(&g).unwrap(), 3);
    assert_eq!(dict.get(&g, &Mixed::Int(1)).unwrap(), Mixed::from("int key"));
    assert_eq!(
        dict.get(&g, &Mixed::from("1")).unwrap(),
        Mixed::from("string key")
    );

    let mut entries = dict.entries(&g).unwrap();
    entries.sort_by_key(|(k, _)| format!("{k}"));
    assert_eq!(entries.len(), 3);
}
