/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Order-preserving binary encoding of keys.
//!
//! Comparing two encoded keys byte-wise gives the same answer as
//! [`compare_two_keys`](crate::key::compare_two_keys) on the decoded keys,
//! which lets a storage backend range-scan and sort keys as plain blobs.
//!
//! Every key starts with a tag byte ordered like the key types. Numbers and
//! dates are followed by eight bytes of a sortable transform of the IEEE 754
//! bits. Strings (as UTF-8) and binary keys escape `00` as `00 FF` and end in
//! `00 00`. Arrays list their encoded elements and end in a single `00`,
//! which sorts below every tag.

use crate::error::{BackendError, BackendResult};
use crate::key::IndexedDBKeyType;

const TAG_ARRAY_END: u8 = 0x00;
const TAG_NUMBER: u8 = 0x10;
const TAG_DATE: u8 = 0x20;
const TAG_STRING: u8 = 0x30;
const TAG_BINARY: u8 = 0x40;
const TAG_ARRAY: u8 = 0x50;

const ESCAPE: u8 = 0xFF;

pub fn encode_key(key: &IndexedDBKeyType) -> Vec<u8> {
    let mut out = Vec::new();
    write_key(key, &mut out);
    out
}

fn write_key(key: &IndexedDBKeyType, out: &mut Vec<u8>) {
    match key {
        IndexedDBKeyType::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&sortable_bits(*n).to_be_bytes());
        },
        IndexedDBKeyType::Date(ms) => {
            out.push(TAG_DATE);
            out.extend_from_slice(&sortable_bits(*ms).to_be_bytes());
        },
        IndexedDBKeyType::String(s) => {
            out.push(TAG_STRING);
            write_escaped(s.as_bytes(), out);
        },
        IndexedDBKeyType::Binary(bytes) => {
            out.push(TAG_BINARY);
            write_escaped(bytes, out);
        },
        IndexedDBKeyType::Array(keys) => {
            out.push(TAG_ARRAY);
            for key in keys {
                write_key(key, out);
            }
            out.push(TAG_ARRAY_END);
        },
    }
}

fn sortable_bits(n: f64) -> u64 {
    // -0 and 0 are the same key.
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn from_sortable_bits(bits: u64) -> f64 {
    if bits >> 63 == 1 {
        f64::from_bits(bits & !(1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

fn write_escaped(bytes: &[u8], out: &mut Vec<u8>) {
    for &byte in bytes {
        out.push(byte);
        if byte == 0 {
            out.push(ESCAPE);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

pub fn decode_key(bytes: &[u8]) -> BackendResult<IndexedDBKeyType> {
    let mut decoder = Decoder { bytes, position: 0 };
    let key = decoder.read_key()?;
    if decoder.position != bytes.len() {
        return Err(corrupt("trailing bytes"));
    }
    Ok(key)
}

fn corrupt(what: &str) -> BackendError {
    BackendError::DbErr(format!("corrupt key encoding: {what}"))
}

struct Decoder<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl Decoder<'_> {
    fn next_byte(&mut self) -> BackendResult<u8> {
        let byte = *self
            .bytes
            .get(self.position)
            .ok_or_else(|| corrupt("unexpected end"))?;
        self.position += 1;
        Ok(byte)
    }

    fn read_f64(&mut self) -> BackendResult<f64> {
        let end = self.position + 8;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or_else(|| corrupt("truncated number"))?;
        let mut raw = [0; 8];
        raw.copy_from_slice(slice);
        self.position = end;
        Ok(from_sortable_bits(u64::from_be_bytes(raw)))
    }

    fn read_escaped(&mut self) -> BackendResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let byte = self.next_byte()?;
            if byte != 0 {
                out.push(byte);
                continue;
            }
            match self.next_byte()? {
                0 => return Ok(out),
                ESCAPE => out.push(0),
                _ => return Err(corrupt("bad escape")),
            }
        }
    }

    fn read_key(&mut self) -> BackendResult<IndexedDBKeyType> {
        let tag = self.next_byte()?;
        self.read_tagged(tag)
    }

    fn read_tagged(&mut self, tag: u8) -> BackendResult<IndexedDBKeyType> {
        match tag {
            TAG_NUMBER => Ok(IndexedDBKeyType::Number(self.read_f64()?)),
            TAG_DATE => Ok(IndexedDBKeyType::Date(self.read_f64()?)),
            TAG_STRING => {
                let bytes = self.read_escaped()?;
                String::from_utf8(bytes)
                    .map(IndexedDBKeyType::String)
                    .map_err(|_| corrupt("invalid utf-8"))
            },
            TAG_BINARY => Ok(IndexedDBKeyType::Binary(self.read_escaped()?)),
            TAG_ARRAY => {
                let mut keys = Vec::new();
                loop {
                    match self.next_byte()? {
                        TAG_ARRAY_END => return Ok(IndexedDBKeyType::Array(keys)),
                        tag => keys.push(self.read_tagged(tag)?),
                    }
                }
            },
            _ => Err(corrupt("unknown tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;
    use crate::key::compare_two_keys;

    fn keys() -> Vec<IndexedDBKeyType> {
        use IndexedDBKeyType::*;
        vec![
            Number(f64::NEG_INFINITY),
            Number(-1e10),
            Number(-1.0),
            Number(-0.0),
            Number(f64::MIN_POSITIVE),
            Number(1.0),
            Number(2.5),
            Number(f64::INFINITY),
            Date(-5.0),
            Date(0.0),
            Date(1e12),
            String("".into()),
            String("\0".into()),
            String("\0\0".into()),
            String("\u{1}".into()),
            String("a".into()),
            String("a\0".into()),
            String("ab".into()),
            String("\u{fffd}".into()),
            Binary(vec![]),
            Binary(vec![0]),
            Binary(vec![0, 0]),
            Binary(vec![0, 255]),
            Binary(vec![255]),
            Array(vec![]),
            Array(vec![Number(1.0)]),
            Array(vec![Number(1.0), Number(0.0)]),
            Array(vec![String("a".into())]),
            Array(vec![String("a".into()), Number(0.0)]),
            Array(vec![String("a\0".into())]),
            Array(vec![Array(vec![])]),
            Array(vec![Array(vec![Number(1.0)])]),
        ]
    }

    #[test]
    fn test_encoding_preserves_key_order() {
        let keys = keys();
        for a in &keys {
            for b in &keys {
                assert_eq!(
                    encode_key(a).cmp(&encode_key(b)),
                    compare_two_keys(a, b),
                    "comparing {a:?} with {b:?}"
                );
            }
        }
    }

    #[test]
    fn test_decoding_restores_keys() {
        for key in keys() {
            let decoded = decode_key(&encode_key(&key)).unwrap();
            assert_eq!(compare_two_keys(&decoded, &key), Ordering::Equal);
        }
    }

    #[test]
    fn test_negative_zero_encodes_like_zero() {
        assert_eq!(
            encode_key(&IndexedDBKeyType::Number(-0.0)),
            encode_key(&IndexedDBKeyType::Number(0.0))
        );
    }

    #[test]
    fn test_corrupt_input_is_rejected() {
        assert!(decode_key(&[]).is_err());
        assert!(decode_key(&[TAG_NUMBER, 1, 2]).is_err());
        assert!(decode_key(&[TAG_STRING, b'a', 0, 7]).is_err());
        assert!(decode_key(&[TAG_ARRAY]).is_err());
        assert!(decode_key(&[0x99]).is_err());
        let mut trailing = encode_key(&IndexedDBKeyType::Number(1.0));
        trailing.push(0);
        assert!(decode_key(&trailing).is_err());
    }
}
