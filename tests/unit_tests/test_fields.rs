// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::fields::{
    Container, FieldFlags, FieldKind, FieldSchema, FieldStore, FieldValue,
};

fn schema_with(kind: FieldKind, container: Container, flags: FieldFlags) -> (FieldSchema, u16) {
    let mut schema = FieldSchema::new();
    let pos = schema.define("test", "test.value", kind, container, flags);
    (schema, pos)
}

#[test]
fn defining_the_same_expression_twice_reuses_the_position() {
    let mut schema = FieldSchema::new();
    let a = schema.define(
        "test",
        "test.host",
        FieldKind::Str,
        Container::Set,
        FieldFlags::CNT,
    );
    let b = schema.define(
        "test",
        "test.host",
        FieldKind::Str,
        Container::Set,
        FieldFlags::CNT,
    );
    assert_eq!(a, b);
    assert_eq!(schema.len(), 1);
    assert_eq!(schema.by_expression("test.host"), Some(a));
}

#[test]
fn set_container_deduplicates_preserving_order() {
    let (schema, pos) = schema_with(FieldKind::Str, Container::Set, FieldFlags::CNT);
    let mut store = FieldStore::new();

    assert!(store.add_string(&schema, pos, "b"));
    assert!(store.add_string(&schema, pos, "a"));
    assert!(!store.add_string(&schema, pos, "b"), "duplicate refused");

    match store.get(pos) {
        Some(FieldValue::StrArray(values)) => {
            assert_eq!(values, &vec!["b".to_string(), "a".to_string()]);
        },
        other => panic!("unexpected slot {other:?}"),
    }
}

#[test]
fn array_container_keeps_duplicates() {
    let (schema, pos) = schema_with(FieldKind::Int, Container::Array, FieldFlags::empty());
    let mut store = FieldStore::new();

    store.add_int(&schema, pos, 7);
    store.add_int(&schema, pos, 7);
    store.add_int(&schema, pos, 9);

    match store.get(pos) {
        Some(FieldValue::IntArray(values)) => assert_eq!(values, &vec![7, 7, 9]),
        other => panic!("unexpected slot {other:?}"),
    }
}

#[test]
fn single_container_is_last_write_wins() {
    let (schema, pos) = schema_with(FieldKind::Str, Container::Single, FieldFlags::empty());
    let mut store = FieldStore::new();

    store.add_string(&schema, pos, "first");
    store.add_string(&schema, pos, "second");

    match store.get(pos) {
        Some(FieldValue::Str(value)) => assert_eq!(value, "second"),
        other => panic!("unexpected slot {other:?}"),
    }
}

#[test]
fn lowercase_add_normalizes() {
    let (schema, pos) = schema_with(FieldKind::Str, Container::Set, FieldFlags::empty());
    let mut store = FieldStore::new();

    store.add_string_lower(&schema, pos, "WorkStation-7");
    match store.get(pos) {
        Some(FieldValue::StrArray(values)) => {
            assert_eq!(values, &vec!["workstation-7".to_string()]);
        },
        other => panic!("unexpected slot {other:?}"),
    }
}

#[test]
fn force_utf8_scrubs_invalid_sequences() {
    let (schema, pos) =
        schema_with(FieldKind::Str, Container::Set, FieldFlags::FORCE_UTF8);
    let mut store = FieldStore::new();

    store.add_string_bytes(&schema, pos, &[b'o', b'k', 0xff, b'!']);

    match store.get(pos) {
        Some(FieldValue::StrArray(values)) => {
            assert_eq!(values.len(), 1);
            assert!(values[0].starts_with("ok"));
            assert!(values[0].ends_with('!'));
            assert!(values[0].contains('\u{fffd}'), "invalid byte was scrubbed");
        },
        other => panic!("unexpected slot {other:?}"),
    }
}

#[test]
fn mac_oui_formats_both_fields() {
    let mut schema = FieldSchema::new();
    let mac = schema.define(
        "test",
        "test.mac",
        FieldKind::Str,
        Container::Set,
        FieldFlags::CNT,
    );
    let oui = schema.define(
        "test",
        "test.oui",
        FieldKind::Str,
        Container::Set,
        FieldFlags::CNT,
    );
    let mut store = FieldStore::new();

    store.add_mac_oui(&schema, mac, oui, &[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);

    match (store.get(mac), store.get(oui)) {
        (
            Some(FieldValue::StrArray(macs)),
            Some(FieldValue::StrArray(ouis)),
        ) => {
            assert_eq!(macs, &vec!["de:ad:be:ef:00:01".to_string()]);
            assert_eq!(ouis, &vec!["de:ad:be".to_string()]);
        },
        other => panic!("unexpected slots {other:?}"),
    }
}

#[test]
fn v4_mapped_ips_emit_as_dotted_quads() {
    let (schema, pos) = schema_with(FieldKind::Ip, Container::Set, FieldFlags::CNT);
    let mut store = FieldStore::new();

    store.add_ip4(&schema, pos, u32::from_be_bytes([10, 1, 2, 3]));
    store.add_ip4(&schema, pos, u32::from_be_bytes([10, 1, 2, 3]));

    let mut doc = serde_json::Map::new();
    store.emit(&schema, &mut doc);
    assert_eq!(doc["test.valueCnt"], 1);
    assert_eq!(doc["test.value"][0], "10.1.2.3");
}
