//! Bencode encoding and decoding ([BEP-3]).
//!
//! Bencode is the wire encoding of both KRPC datagrams and torrent metadata,
//! so everything here runs on untrusted input.
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:spam` → "spam" |
//! | List | `l<items>e` | `l4:spami42ee` → ["spam", 42] |
//! | Dictionary | `d<key><value>...e` | `d3:foo3:bare` → {"foo": "bar"} |
//!
//! Decoding is a single forward pass over the buffer. It rejects non-canonical
//! integers, string lengths that run past the input, non-string dictionary
//! keys and nesting deeper than 64 levels; every such failure reports the byte
//! offset where it was found. Dictionary keys may arrive in any order.
//! Encoding always sorts keys.
//!
//! ```
//! use dhtharvest::bencode::{decode, decode_prefix, encode, Value};
//!
//! let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
//! assert_eq!(value.get(b"cow").and_then(Value::as_str), Some("moo"));
//! assert_eq!(encode(&value), b"d3:cow3:moo4:spam4:eggse");
//!
//! // ut_metadata data messages carry raw bytes after the dictionary
//! let (header, used) = decode_prefix(b"d5:piecei0eeRAW").unwrap();
//! assert_eq!(header.int_field("piece").unwrap(), 0);
//! assert_eq!(used, 12);
//!
//! let err = decode(b"l4:spa").unwrap_err();
//! assert_eq!(err.offset(), Some(6));
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_from, decode_prefix};
pub use encode::{encode, encode_into};
pub use error::BencodeError;
pub use value::Value;
