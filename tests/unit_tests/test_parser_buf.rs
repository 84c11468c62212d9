// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::parsers::buffer::{MAX_PARSER_BUF, ParserBuf};

#[test]
fn add_del_window_semantics() {
    let mut buf = ParserBuf::new();
    buf.add(0, b"hello ").expect("fits");
    buf.add(0, b"world").expect("fits");
    assert_eq!(buf.data(0), b"hello world");

    buf.del(0, 6);
    assert_eq!(buf.data(0), b"world");

    buf.skip(0, 100);
    assert!(buf.is_empty(0));
}

#[test]
fn directions_are_independent() {
    let mut buf = ParserBuf::new();
    buf.add(0, b"request").expect("fits");
    buf.add(1, b"response").expect("fits");
    assert_eq!(buf.data(0), b"request");
    assert_eq!(buf.data(1), b"response");
    buf.del(0, 7);
    assert_eq!(buf.data(1), b"response");
}

#[test]
fn refuses_to_grow_past_the_cap() {
    let mut buf = ParserBuf::new();
    let chunk = vec![0u8; MAX_PARSER_BUF];
    buf.add(0, &chunk).expect("exactly at cap fits");
    assert!(buf.add(0, b"x").is_err(), "one more byte must refuse");

    // The other direction still has its full budget.
    buf.add(1, &chunk).expect("other direction unaffected");
}

#[test]
fn del_then_add_frees_budget() {
    let mut buf = ParserBuf::new();
    let chunk = vec![0u8; MAX_PARSER_BUF];
    buf.add(0, &chunk).expect("fits");
    buf.del(0, 1024);
    buf.add(0, &[1u8; 1024]).expect("freed budget is reusable");
    assert_eq!(buf.len(0), MAX_PARSER_BUF);
}
