//! Cache Key Module
//!
//! Deterministic, type-aware serialization ("mangling") of lookup key
//! parts into opaque byte keys. Every supported type writes a type tag
//! followed by a fixed-width little-endian (or length-prefixed) payload,
//! so structurally distinct part tuples can never alias and composite
//! keys are stable across call sites.

use std::time::{SystemTime, UNIX_EPOCH};

// Type tags. One per encoding, never reused.
const TAG_BOOL: u8 = 0x01;
const TAG_U8: u8 = 0x02;
const TAG_U16: u8 = 0x03;
const TAG_U32: u8 = 0x04;
const TAG_U64: u8 = 0x05;
const TAG_U128: u8 = 0x06;
const TAG_I8: u8 = 0x07;
const TAG_I16: u8 = 0x08;
const TAG_I32: u8 = 0x09;
const TAG_I64: u8 = 0x0a;
const TAG_I128: u8 = 0x0b;
const TAG_STR: u8 = 0x0c;
const TAG_BYTES: u8 = 0x0d;
const TAG_TIME: u8 = 0x0e;
const TAG_NONE: u8 = 0x0f;
const TAG_SOME: u8 = 0x10;

// == Key ==
/// An opaque, hashable cache key assembled from one or more [`KeyPart`]s.
///
/// The `zero` flag records whether every part carried its type's zero
/// value; the lookup index uses it to skip indexing under all-default
/// keys unless a lookup explicitly allows them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    bytes: Vec<u8>,
    zero: bool,
}

impl Key {
    // == From Parts ==
    /// Builds a key from the given parts, in order.
    ///
    /// An empty part list produces a zero key.
    pub fn from_parts(parts: &[&dyn KeyPart]) -> Self {
        let mut buf = KeyBuf::new();
        for part in parts {
            buf.push(*part);
        }
        buf.finish()
    }

    /// Whether every part of this key was a zero value.
    pub fn is_zero(&self) -> bool {
        self.zero
    }

    /// The mangled byte representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// == Key Buf ==
/// Incremental key builder, used by lookup keyer functions that derive
/// keys from a cached value's fields.
#[derive(Debug, Default)]
pub struct KeyBuf {
    bytes: Vec<u8>,
    nonzero: bool,
}

impl KeyBuf {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one part to the key under construction.
    pub fn push(&mut self, part: &dyn KeyPart) -> &mut Self {
        part.append_to(&mut self.bytes);
        if !part.is_zero() {
            self.nonzero = true;
        }
        self
    }

    /// Finalizes the buffer into a [`Key`].
    pub fn finish(self) -> Key {
        Key {
            bytes: self.bytes,
            zero: !self.nonzero,
        }
    }
}

// == Key Part ==
/// A value that can be mangled into a [`Key`].
///
/// `is_zero` reports whether the value equals its type's zero value
/// (0, empty string, false, None, the Unix epoch).
pub trait KeyPart {
    /// Appends the tagged encoding of `self` to `buf`.
    fn append_to(&self, buf: &mut Vec<u8>);

    /// Whether this value is its type's zero value.
    fn is_zero(&self) -> bool;
}

macro_rules! impl_int_part {
    ($($ty:ty => $tag:expr),* $(,)?) => {
        $(
            impl KeyPart for $ty {
                fn append_to(&self, buf: &mut Vec<u8>) {
                    buf.push($tag);
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

impl_int_part! {
    u8 => TAG_U8,
    u16 => TAG_U16,
    u32 => TAG_U32,
    u64 => TAG_U64,
    u128 => TAG_U128,
    i8 => TAG_I8,
    i16 => TAG_I16,
    i32 => TAG_I32,
    i64 => TAG_I64,
    i128 => TAG_I128,
}

// usize/isize are mangled at full width so 32- and 64-bit builds of the
// same process never disagree on key layout.
impl KeyPart for usize {
    fn append_to(&self, buf: &mut Vec<u8>) {
        (*self as u64).append_to(buf);
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl KeyPart for isize {
    fn append_to(&self, buf: &mut Vec<u8>) {
        (*self as i64).append_to(buf);
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl KeyPart for bool {
    fn append_to(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_BOOL);
        buf.push(*self as u8);
    }

    fn is_zero(&self) -> bool {
        !*self
    }
}

impl KeyPart for str {
    fn append_to(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_STR);
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        buf.extend_from_slice(self.as_bytes());
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl KeyPart for String {
    fn append_to(&self, buf: &mut Vec<u8>) {
        self.as_str().append_to(buf);
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl KeyPart for [u8] {
    fn append_to(&self, buf: &mut Vec<u8>) {
        buf.push(TAG_BYTES);
        buf.extend_from_slice(&(self.len() as u64).to_le_bytes());
        buf.extend_from_slice(self);
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl KeyPart for Vec<u8> {
    fn append_to(&self, buf: &mut Vec<u8>) {
        self.as_slice().append_to(buf);
    }

    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl KeyPart for SystemTime {
    fn append_to(&self, buf: &mut Vec<u8>) {
        let nanos = self
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        buf.push(TAG_TIME);
        buf.extend_from_slice(&nanos.to_le_bytes());
    }

    fn is_zero(&self) -> bool {
        *self == UNIX_EPOCH
    }
}

impl<T: KeyPart> KeyPart for Option<T> {
    fn append_to(&self, buf: &mut Vec<u8>) {
        match self {
            None => buf.push(TAG_NONE),
            Some(inner) => {
                buf.push(TAG_SOME);
                inner.append_to(buf);
            }
        }
    }

    fn is_zero(&self) -> bool {
        self.is_none()
    }
}

impl<T: KeyPart + ?Sized> KeyPart for &T {
    fn append_to(&self, buf: &mut Vec<u8>) {
        (**self).append_to(buf);
    }

    fn is_zero(&self) -> bool {
        (**self).is_zero()
    }
}
