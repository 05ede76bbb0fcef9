//! Accessor lifecycle, boundary cases and durability.

use ember_core::{
    ColumnType, Decimal128, EmberError, Group, InstructionLog, Instruction, Mixed, ObjectId,
    Timestamp,
};

#[test]
fn test_set_get_round_trip_per_type() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c_int = g.add_column(t, "int", ColumnType::Int, false).unwrap();
    let c_opt = g.add_column(t, "opt", ColumnType::Int, true).unwrap();
    let c_bool = g.add_column(t, "flag", ColumnType::Bool, false).unwrap();
    let c_float = g.add_column(t, "f", ColumnType::Float, false).unwrap();
    let c_double = g.add_column(t, "d", ColumnType::Double, false).unwrap();
    let c_str = g.add_column(t, "name", ColumnType::String, true).unwrap();
    let c_bin = g.add_column(t, "blob", ColumnType::Binary, true).unwrap();
    let c_ts = g.add_column(t, "at", ColumnType::Timestamp, true).unwrap();
    let c_dec = g.add_column(t, "amount", ColumnType::Decimal, true).unwrap();
    let c_oid = g.add_column(t, "oid", ColumnType::ObjectId, true).unwrap();
    let c_any = g.add_column(t, "any", ColumnType::Mixed, true).unwrap();

    let obj = g.create_object(t).unwrap();
    obj.set(&mut g, c_int, -12i64).unwrap();
    obj.set(&mut g, c_opt, Some(99i64)).unwrap();
    obj.set(&mut g, c_bool, true).unwrap();
    obj.set(&mut g, c_float, 1.25f32).unwrap();
    obj.set(&mut g, c_double, -2.5f64).unwrap();
    obj.set(&mut g, c_str, "hello".to_owned()).unwrap();
    obj.set(&mut g, c_bin, vec![1u8, 2, 3]).unwrap();
    obj.set(&mut g, c_ts, Timestamp::new(10, 20)).unwrap();
    obj.set(&mut g, c_dec, Decimal128::new(314, -2)).unwrap();
    obj.set(&mut g, c_oid, ObjectId::from_bytes([7; 12])).unwrap();
    obj.set(&mut g, c_any, Mixed::from("tagged")).unwrap();

    assert_eq!(obj.get::<i64>(&g, c_int).unwrap(), -12);
    assert_eq!(obj.get::<Option<i64>>(&g, c_opt).unwrap(), Some(99));
    assert!(obj.get::<bool>(&g, c_bool).unwrap());
    assert_eq!(obj.get::<f32>(&g, c_float).unwrap(), 1.25);
    assert_eq!(obj.get::<f64>(&g, c_double).unwrap(), -2.5);
    assert_eq!(obj.get::<String>(&g, c_str).unwrap(), "hello");
    assert_eq!(obj.get::<Vec<u8>>(&g, c_bin).unwrap(), vec![1, 2, 3]);
    assert_eq!(obj.get::<Timestamp>(&g, c_ts).unwrap(), Timestamp::new(10, 20));
    assert_eq!(obj.get::<Decimal128>(&g, c_dec).unwrap(), Decimal128::new(314, -2));
    assert_eq!(obj.get::<ObjectId>(&g, c_oid).unwrap(), ObjectId::from_bytes([7; 12]));
    assert_eq!(obj.get_any(&g, c_any).unwrap(), Mixed::from("tagged"));

    obj.set_null(&mut g, c_opt).unwrap();
    assert_eq!(obj.get::<Option<i64>>(&g, c_opt).unwrap(), None);
    assert!(obj.is_null(&g, c_opt).unwrap());
}

#[test]
fn test_null_into_non_nullable_column() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "n", ColumnType::Int, false).unwrap();
    let obj = g.create_object(t).unwrap();
    let err = obj.set_null(&mut g, c).unwrap_err();
    assert!(matches!(err, EmberError::ColumnNotNullable));
}

#[test]
fn test_add_int_wraps_and_rejects_null() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "n", ColumnType::Int, false).unwrap();
    let c_opt = g.add_column(t, "m", ColumnType::Int, true).unwrap();
    let obj = g.create_object(t).unwrap();

    obj.set(&mut g, c, i64::MAX).unwrap();
    obj.add_int(&mut g, c, 1).unwrap();
    assert_eq!(obj.get::<i64>(&g, c).unwrap(), i64::MIN);

    let err = obj.add_int(&mut g, c_opt, 5).unwrap_err();
    assert!(matches!(err, EmberError::IllegalCombination { .. }));
    obj.set(&mut g, c_opt, Some(10i64)).unwrap();
    obj.add_int(&mut g, c_opt, -3).unwrap();
    assert_eq!(obj.get::<Option<i64>>(&g, c_opt).unwrap(), Some(7));
}

#[test]
fn test_string_size_limit() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "s", ColumnType::String, false).unwrap();
    let obj = g.create_object(t).unwrap();
    let huge = "x".repeat(ember_core::limits::MAX_STRING_SIZE + 1);
    let err = obj.set(&mut g, c, huge).unwrap_err();
    assert!(matches!(err, EmberError::StringTooBig { .. }));
}

#[test]
fn test_type_mismatch_is_rejected() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "n", ColumnType::Int, false).unwrap();
    let obj = g.create_object(t).unwrap();
    let err = obj.set(&mut g, c, "not an int".to_owned()).unwrap_err();
    assert!(matches!(err, EmberError::IllegalType { .. }));
}

#[test]
fn test_accessor_survives_cluster_splits() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "n", ColumnType::Int, false).unwrap();
    let obj = g.create_object(t).unwrap();
    obj.set(&mut g, c, 42i64).unwrap();

    let v0 = g.storage_version();
    for _ in 0..(ember_core::limits::CLUSTER_NODE_SIZE * 4) {
        g.create_object(t).unwrap();
    }
    assert!(g.storage_version() > v0);
    // The accessor re-resolves through the moved tree and reads its row.
    assert_eq!(obj.get::<i64>(&g, c).unwrap(), 42);
}

#[test]
fn test_accessor_becomes_permanently_invalid_after_removal() {
    let mut g = Group::new();
    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "n", ColumnType::Int, false).unwrap();
    let obj = g.create_object(t).unwrap();
    obj.remove(&mut g).unwrap();

    assert!(!obj.is_valid(&g));
    let err = obj.get::<i64>(&g, c).unwrap_err();
    assert!(matches!(err, EmberError::InvalidObject));
    // Recreating a row with the same key does not revive the accessor.
    g.create_object_with_key(t, obj.key()).unwrap();
    assert!(!obj.is_valid(&g));
}

#[test]
fn test_commit_and_reopen_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.ember");
    let (t, c_name, c_nums, obj_key);
    {
        let mut g = Group::open(&path).unwrap();
        t = g.add_table("People").unwrap();
        c_name = g.add_column(t, "name", ColumnType::String, true).unwrap();
        c_nums = g.add_column_list(t, "nums", ColumnType::Int, false).unwrap();
        let obj = g.create_object(t).unwrap();
        obj.set(&mut g, c_name, "ada".to_owned()).unwrap();
        obj.set_list_values(&mut g, c_nums, vec![3i64, 1, 4]).unwrap();
        obj_key = obj.key();
        g.commit().unwrap();
    }
    let g = Group::open(&path).unwrap();
    let obj = g
        .get_object(ember_core::ObjLink::new(t, obj_key))
        .unwrap();
    assert_eq!(obj.get::<String>(&g, c_name).unwrap(), "ada");
    assert_eq!(obj.get_list_values::<i64>(&g, c_nums).unwrap(), vec![3, 1, 4]);
}

#[test]
fn test_reader_snapshot_is_stable_across_writer_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.ember");
    let (t, c);
    {
        let mut writer = Group::open(&path).unwrap();
        t = writer.add_table("T").unwrap();
        c = writer.add_column(t, "n", ColumnType::Int, false).unwrap();
        let obj = writer.create_object(t).unwrap();
        obj.set(&mut writer, c, 1i64).unwrap();
        writer.commit().unwrap();
    }

    // The reader pins the committed snapshot.
    let reader = Group::open(&path).unwrap();
    let keys = reader.get_table(t).unwrap().object_keys(reader.alloc());
    let obj = reader
        .get_object(ember_core::ObjLink::new(t, keys[0]))
        .unwrap();
    assert_eq!(obj.get::<i64>(&reader, c).unwrap(), 1);

    // A writer mutates heavily, forcing splits, and commits.
    {
        let mut writer = Group::open(&path).unwrap();
        let w_obj = writer
            .get_object(ember_core::ObjLink::new(t, keys[0]))
            .unwrap();
        w_obj.set(&mut writer, c, 2i64).unwrap();
        for _ in 0..(ember_core::limits::CLUSTER_NODE_SIZE * 2) {
            writer.create_object(t).unwrap();
        }
        writer.commit().unwrap();
    }

    // The reader still observes its snapshot's value.
    assert_eq!(obj.get::<i64>(&reader, c).unwrap(), 1);
    assert_eq!(reader.get_table(t).unwrap().size(reader.alloc()), 1);
}

#[test]
fn test_replication_instructions_are_emitted_in_order() {
    let mut g = Group::new();
    let log = InstructionLog::new();
    g.set_replication(Box::new(log.clone()));

    let t = g.add_table("T").unwrap();
    let c = g.add_column(t, "n", ColumnType::Int, false).unwrap();
    let obj = g.create_object(t).unwrap();
    obj.set(&mut g, c, 5i64).unwrap();
    obj.add_int(&mut g, c, 2).unwrap();
    obj.remove(&mut g).unwrap();

    let instrs = log.take();
    assert!(matches!(instrs[0], Instruction::InsertColumn { .. }));
    assert!(matches!(instrs[1], Instruction::CreateObject { .. }));
    assert!(matches!(
        instrs[2],
        Instruction::Set {
            value: Mixed::Int(5),
            ..
        }
    ));
    assert!(matches!(instrs[3], Instruction::AddInt { value: 2, .. }));
    assert!(matches!(instrs[4], Instruction::RemoveObject { .. }));
    assert_eq!(instrs.len(), 5);
}
