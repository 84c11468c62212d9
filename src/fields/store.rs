// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{any::Any, net::Ipv6Addr};

use serde_json::{Map, Value, json};

use crate::fields::{Container, FieldKind, FieldSchema};

/// Protocol-specific aggregate stored in an object field (e.g. one DNS
/// query-and-answers record). Objects know how to de-duplicate and how to
/// emit themselves; the store stays generic.
pub trait FieldObject: Send {
    /// Hash over the identity key; objects with equal keys merge.
    fn dedup_hash(&self) -> u32;
    fn dedup_eq(&self, other: &dyn FieldObject) -> bool;
    /// JSON document emitted at session-save time.
    fn json(&self) -> Value;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A populated field slot.
pub enum FieldValue {
    Int(i64),
    IntArray(Vec<i64>),
    Str(String),
    StrArray(Vec<String>),
    /// Canonical 16-byte form; v4 addresses are v4-mapped.
    Ip(Ipv6Addr),
    IpArray(Vec<Ipv6Addr>),
    Objects(Vec<Box<dyn FieldObject>>),
}

impl std::fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "Int({v})"),
            FieldValue::IntArray(v) => write!(f, "IntArray({v:?})"),
            FieldValue::Str(v) => write!(f, "Str({v:?})"),
            FieldValue::StrArray(v) => write!(f, "StrArray({v:?})"),
            FieldValue::Ip(v) => write!(f, "Ip({v})"),
            FieldValue::IpArray(v) => write!(f, "IpArray({v:?})"),
            FieldValue::Objects(v) => write!(f, "Objects(len={})", v.len()),
        }
    }
}

/// Sparse per-session field slots, indexed by position id.
#[derive(Debug, Default)]
pub struct FieldStore {
    slots: Vec<Option<FieldValue>>,
}

fn v4_mapped(ip: u32) -> Ipv6Addr {
    std::net::Ipv4Addr::from(ip).to_ipv6_mapped()
}

/// Prints v4-mapped addresses as dotted quads, everything else as v6.
pub fn ip_to_string(ip: &Ipv6Addr) -> String {
    match ip.to_ipv4_mapped() {
        Some(v4) => v4.to_string(),
        None => ip.to_string(),
    }
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, pos: u16) -> &mut Option<FieldValue> {
        let idx = pos as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        &mut self.slots[idx]
    }

    #[inline]
    pub fn get(&self, pos: u16) -> Option<&FieldValue> {
        self.slots.get(pos as usize).and_then(|s| s.as_ref())
    }

    pub fn add_int(&mut self, schema: &FieldSchema, pos: u16, value: i64) -> bool {
        let Some(def) = schema.get(pos) else {
            return false;
        };
        debug_assert_eq!(def.kind, FieldKind::Int);
        let container = def.container;
        match (container, self.slot(pos)) {
            (Container::Single, slot) => {
                *slot = Some(FieldValue::Int(value));
                true
            },
            (_, slot @ None) => {
                *slot = Some(FieldValue::IntArray(vec![value]));
                true
            },
            (Container::Array, Some(FieldValue::IntArray(arr))) => {
                arr.push(value);
                true
            },
            (Container::Set, Some(FieldValue::IntArray(arr))) => {
                if arr.contains(&value) {
                    false
                } else {
                    arr.push(value);
                    true
                }
            },
            _ => false,
        }
    }

    pub fn add_string(&mut self, schema: &FieldSchema, pos: u16, value: &str) -> bool {
        let Some(def) = schema.get(pos) else {
            return false;
        };
        debug_assert_eq!(def.kind, FieldKind::Str);
        let value = if def.force_utf8 && value.as_bytes().iter().any(|&b| b >= 0x80) {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        } else {
            value.to_string()
        };
        let container = def.container;
        match (container, self.slot(pos)) {
            (Container::Single, slot) => {
                *slot = Some(FieldValue::Str(value));
                true
            },
            (_, slot @ None) => {
                *slot = Some(FieldValue::StrArray(vec![value]));
                true
            },
            (Container::Array, Some(FieldValue::StrArray(arr))) => {
                arr.push(value);
                true
            },
            (Container::Set, Some(FieldValue::StrArray(arr))) => {
                if arr.iter().any(|v| v == &value) {
                    false
                } else {
                    arr.push(value);
                    true
                }
            },
            _ => false,
        }
    }

    pub fn add_string_lower(
        &mut self,
        schema: &FieldSchema,
        pos: u16,
        value: &str,
    ) -> bool {
        self.add_string(schema, pos, &value.to_ascii_lowercase())
    }

    /// Raw wire bytes; invalid UTF-8 is scrubbed before storage.
    pub fn add_string_bytes(
        &mut self,
        schema: &FieldSchema,
        pos: u16,
        value: &[u8],
    ) -> bool {
        self.add_string(schema, pos, &String::from_utf8_lossy(value))
    }

    pub fn add_ip4(&mut self, schema: &FieldSchema, pos: u16, ip: u32) -> bool {
        self.add_ip(schema, pos, v4_mapped(ip))
    }

    pub fn add_ip(&mut self, schema: &FieldSchema, pos: u16, ip: Ipv6Addr) -> bool {
        let Some(def) = schema.get(pos) else {
            return false;
        };
        debug_assert_eq!(def.kind, FieldKind::Ip);
        let container = def.container;
        match (container, self.slot(pos)) {
            (Container::Single, slot) => {
                *slot = Some(FieldValue::Ip(ip));
                true
            },
            (_, slot @ None) => {
                *slot = Some(FieldValue::IpArray(vec![ip]));
                true
            },
            (Container::Array, Some(FieldValue::IpArray(arr))) => {
                arr.push(ip);
                true
            },
            (Container::Set, Some(FieldValue::IpArray(arr))) => {
                if arr.contains(&ip) {
                    false
                } else {
                    arr.push(ip);
                    true
                }
            },
            _ => false,
        }
    }

    /// Records a MAC as `aa:bb:cc:dd:ee:ff` plus its 3-byte OUI prefix in a
    /// companion field.
    pub fn add_mac_oui(
        &mut self,
        schema: &FieldSchema,
        mac_pos: u16,
        oui_pos: u16,
        mac: &[u8],
    ) -> bool {
        if mac.len() < 6 {
            return false;
        }
        let mac_str = format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        let oui = format!("{:02x}:{:02x}:{:02x}", mac[0], mac[1], mac[2]);
        let added = self.add_string(schema, mac_pos, &mac_str);
        self.add_string(schema, oui_pos, &oui);
        added
    }

    /// Adds an object, merging with an existing one carrying the same
    /// dedup key. Returns the slot entry for the caller to fill in.
    pub fn add_object(
        &mut self,
        schema: &FieldSchema,
        pos: u16,
        object: Box<dyn FieldObject>,
    ) -> Option<&mut Box<dyn FieldObject>> {
        let def = schema.get(pos)?;
        debug_assert_eq!(def.kind, FieldKind::Object);
        let slot = self.slot(pos);
        if slot.is_none() {
            *slot = Some(FieldValue::Objects(Vec::new()));
        }
        let Some(FieldValue::Objects(objs)) = slot.as_mut() else {
            return None;
        };
        let key = object.dedup_hash();
        if let Some(idx) = objs
            .iter()
            .position(|o| o.dedup_hash() == key && o.dedup_eq(object.as_ref()))
        {
            return objs.get_mut(idx);
        }
        objs.push(object);
        objs.last_mut()
    }

    /// Emits every populated slot into a JSON map, flat dotted keys with
    /// `Cnt` siblings where declared.
    pub fn emit(&self, schema: &FieldSchema, out: &mut Map<String, Value>) {
        for (idx, slot) in self.slots.iter().enumerate() {
            let Some(value) = slot else { continue };
            let Some(def) = schema.get(idx as u16) else {
                continue;
            };
            let exp = def.expression.clone();
            match value {
                FieldValue::Int(v) => {
                    out.insert(exp, json!(v));
                },
                FieldValue::IntArray(arr) => {
                    if def.cnt {
                        out.insert(format!("{exp}Cnt"), json!(arr.len()));
                    }
                    out.insert(exp, json!(arr));
                },
                FieldValue::Str(v) => {
                    out.insert(exp, json!(v));
                },
                FieldValue::StrArray(arr) => {
                    if def.cnt {
                        out.insert(format!("{exp}Cnt"), json!(arr.len()));
                    }
                    out.insert(exp, json!(arr));
                },
                FieldValue::Ip(ip) => {
                    out.insert(exp, json!(ip_to_string(ip)));
                },
                FieldValue::IpArray(arr) => {
                    if def.cnt {
                        out.insert(format!("{exp}Cnt"), json!(arr.len()));
                    }
                    let ips: Vec<String> = arr.iter().map(ip_to_string).collect();
                    out.insert(exp, json!(ips));
                },
                FieldValue::Objects(objs) => {
                    if def.cnt {
                        out.insert(format!("{exp}Cnt"), json!(objs.len()));
                    }
                    let docs: Vec<Value> = objs.iter().map(|o| o.json()).collect();
                    out.insert(exp, json!(docs));
                },
            }
        }
    }
}
