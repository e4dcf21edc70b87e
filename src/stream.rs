//! Byte cursor and versioned-record primitives shared by the metadata
//! decoder and the executable readers.
//!
//! Metadata record shapes changed across Unity releases, so every record is
//! described by a table of field descriptors carrying the version range in
//! which the field exists. Decoding walks the descriptor table once per
//! record; fields outside the effective version keep their zero default.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::fmt;
use std::str;

/// A metadata format version, e.g. `24.2`.
///
/// The on-disk header only stores the major part; the minor part is
/// recovered by the refinement pass in the metadata decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const fn new(major: u16, minor: u16) -> Self {
        Version { major, minor }
    }

    /// Parses `"24"` or `"24.2"`.
    pub fn parse(s: &str) -> Option<Version> {
        let mut parts = s.splitn(2, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(m) => m.parse().ok()?,
            None => 0,
        };
        Some(Version { major, minor })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.minor == 0 {
            write!(f, "{}", self.major)
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

pub const V16: Version = Version::new(16, 0);
pub const V19: Version = Version::new(19, 0);
pub const V20: Version = Version::new(20, 0);
pub const V21: Version = Version::new(21, 0);
pub const V23: Version = Version::new(23, 0);
pub const V24: Version = Version::new(24, 0);
pub const V24_1: Version = Version::new(24, 1);
pub const V24_2: Version = Version::new(24, 2);
pub const V24_3: Version = Version::new(24, 3);
pub const V24_4: Version = Version::new(24, 4);
pub const V24_5: Version = Version::new(24, 5);
pub const V27: Version = Version::new(27, 0);
pub const V27_1: Version = Version::new(27, 1);
pub const V27_2: Version = Version::new(27, 2);
pub const V29: Version = Version::new(29, 0);
pub const V29_1: Version = Version::new(29, 1);
pub const V31: Version = Version::new(31, 0);
/// Upper bound used by fields that never went away.
pub const VMAX: Version = Version::new(u16::MAX, u16::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Bounds-checked cursor over an in-memory byte buffer.
pub struct Stream<'data> {
    data: &'data [u8],
    pos: usize,
    endian: Endian,
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $read:ident, $width:expr) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let bytes = self.take($width)?;
            Ok(match self.endian {
                Endian::Little => LittleEndian::$read(bytes),
                Endian::Big => BigEndian::$read(bytes),
            })
        }
    };
}

impl<'data> Stream<'data> {
    pub fn new(data: &'data [u8]) -> Self {
        Stream::with_endian(data, Endian::Little)
    }

    pub fn with_endian(data: &'data [u8], endian: Endian) -> Self {
        Stream {
            data,
            pos: 0,
            endian,
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::UnexpectedEof(pos));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    /// Takes `len` bytes and advances the cursor.
    pub fn take(&mut self, len: usize) -> Result<&'data [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(Error::UnexpectedEof(self.pos))?;
        if end > self.data.len() {
            return Err(Error::UnexpectedEof(self.pos));
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    read_int!(read_u16, u16, read_u16, 2);
    read_int!(read_i16, i16, read_i16, 2);
    read_int!(read_u32, u32, read_u32, 4);
    read_int!(read_i32, i32, read_i32, 4);
    read_int!(read_u64, u64, read_u64, 8);
    read_int!(read_i64, i64, read_i64, 8);

    /// Reads a machine word of the given pointer width, widened to u64.
    pub fn read_ptr(&mut self, pointer_size: u8) -> Result<u64> {
        match pointer_size {
            4 => Ok(self.read_u32()? as u64),
            8 => self.read_u64(),
            n => Err(Error::MalformedBinary(format!("pointer size {n}"))),
        }
    }

    /// Batch-reads `count` u32 values in one pass.
    pub fn read_u32_vec(&mut self, count: usize) -> Result<Vec<u32>> {
        let len = count.checked_mul(4).ok_or(Error::UnexpectedEof(self.pos))?;
        let bytes = self.take(len)?;
        let mut out = vec![0u32; count];
        match self.endian {
            Endian::Little => LittleEndian::read_u32_into(bytes, &mut out),
            Endian::Big => BigEndian::read_u32_into(bytes, &mut out),
        }
        Ok(out)
    }

    /// Batch-reads `count` i32 values in one pass.
    pub fn read_i32_vec(&mut self, count: usize) -> Result<Vec<i32>> {
        let len = count.checked_mul(4).ok_or(Error::UnexpectedEof(self.pos))?;
        let bytes = self.take(len)?;
        let mut out = vec![0i32; count];
        match self.endian {
            Endian::Little => LittleEndian::read_i32_into(bytes, &mut out),
            Endian::Big => BigEndian::read_i32_into(bytes, &mut out),
        }
        Ok(out)
    }

    /// Batch-reads `count` u64 values in one pass.
    pub fn read_u64_vec(&mut self, count: usize) -> Result<Vec<u64>> {
        let len = count.checked_mul(8).ok_or(Error::UnexpectedEof(self.pos))?;
        let bytes = self.take(len)?;
        let mut out = vec![0u64; count];
        match self.endian {
            Endian::Little => LittleEndian::read_u64_into(bytes, &mut out),
            Endian::Big => BigEndian::read_u64_into(bytes, &mut out),
        }
        Ok(out)
    }

    /// Reads the NUL-terminated UTF-8 string at an absolute offset without
    /// moving the cursor.
    pub fn cstr_at(&self, offset: usize) -> Result<&'data str> {
        if offset > self.data.len() {
            return Err(Error::UnexpectedEof(offset));
        }
        let tail = &self.data[offset..];
        let len = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MalformedString(offset))?;
        str::from_utf8(&tail[..len]).map_err(|_| Error::MalformedString(offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

impl Width {
    pub fn size(self) -> usize {
        match self {
            Width::U8 | Width::I8 => 1,
            Width::U16 | Width::I16 => 2,
            Width::U32 | Width::I32 => 4,
            Width::U64 | Width::I64 => 8,
        }
    }
}

/// One field of a versioned record: width, signedness (via [`Width`]) and
/// the inclusive version range in which the field is present on disk.
#[derive(Debug, Clone, Copy)]
pub struct FieldDesc {
    pub name: &'static str,
    pub width: Width,
    pub since: Version,
    pub until: Version,
}

impl FieldDesc {
    pub fn active(&self, version: Version) -> bool {
        version >= self.since && version <= self.until
    }
}

/// A primitive that can appear as a record field.
pub trait Prim: Sized + Default {
    const WIDTH: Width;
    fn get(s: &mut Stream<'_>) -> Result<Self>;
}

macro_rules! impl_prim {
    ($ty:ty, $width:ident, $read:ident) => {
        impl Prim for $ty {
            const WIDTH: Width = Width::$width;
            fn get(s: &mut Stream<'_>) -> Result<Self> {
                s.$read()
            }
        }
    };
}

impl_prim!(u8, U8, read_u8);
impl_prim!(i8, I8, read_i8);
impl_prim!(u16, U16, read_u16);
impl_prim!(i16, I16, read_i16);
impl_prim!(u32, U32, read_u32);
impl_prim!(i32, I32, read_i32);
impl_prim!(u64, U64, read_u64);
impl_prim!(i64, I64, read_i64);

/// A record decodable against any supported metadata version.
pub trait Record: Sized + Default {
    const NAME: &'static str;
    const FIELDS: &'static [FieldDesc];
    fn read(s: &mut Stream<'_>, version: Version) -> Result<Self>;
}

/// On-disk size of a record at the given version.
pub fn record_size<T: Record>(version: Version) -> usize {
    T::FIELDS
        .iter()
        .filter(|f| f.active(version))
        .map(|f| f.width.size())
        .sum()
}

/// Memoized record sizes keyed by `(record, version)`. Metadata arrays
/// reach the hundreds of thousands of entries, so table decoding computes
/// each layout exactly once and divides.
#[derive(Default)]
pub struct LayoutCache {
    sizes: HashMap<(&'static str, Version), usize>,
}

impl LayoutCache {
    pub fn size_of<T: Record>(&mut self, version: Version) -> usize {
        *self
            .sizes
            .entry((T::NAME, version))
            .or_insert_with(|| record_size::<T>(version))
    }
}

/// Declares versioned records: every field carries its width (through the
/// Rust type) and the inclusive `since, until` version range.
macro_rules! records {
    ($(
        $(#[$smeta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* pub $field:ident : $ty:ty => $since:expr, $until:expr; )*
        }
    )*) => {$(
        $(#[$smeta])*
        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl $crate::stream::Record for $name {
            const NAME: &'static str = stringify!($name);
            const FIELDS: &'static [$crate::stream::FieldDesc] = &[
                $( $crate::stream::FieldDesc {
                    name: stringify!($field),
                    width: <$ty as $crate::stream::Prim>::WIDTH,
                    since: $since,
                    until: $until,
                }, )*
            ];

            fn read(
                s: &mut $crate::stream::Stream<'_>,
                version: $crate::stream::Version,
            ) -> $crate::error::Result<Self> {
                Ok(Self {
                    $( $field: if version >= $since && version <= $until {
                        <$ty as $crate::stream::Prim>::get(s)?
                    } else {
                        <$ty>::default()
                    }, )*
                })
            }
        }
    )*};
}

pub(crate) use records;

#[cfg(test)]
mod tests {
    use super::*;

    records! {
        pub struct Probe {
            pub a: u32 => V16, VMAX;
            pub b: i32 => V16, V24_1;
            pub c: u16 => V24_2, VMAX;
            pub d: u16 => V16, VMAX;
        }
    }

    #[test]
    fn version_ordering_and_display() {
        assert!(V24_2 > V24_1);
        assert!(V24_5 < V27);
        assert!(V29_1 > V29);
        assert_eq!(Version::parse("24.2"), Some(V24_2));
        assert_eq!(Version::parse("29"), Some(V29));
        assert_eq!(V27_1.to_string(), "27.1");
        assert_eq!(V29.to_string(), "29");
    }

    #[test]
    fn reads_all_widths() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut s = Stream::new(&data);
        assert_eq!(s.read_u16().unwrap(), 0x0201);
        assert_eq!(s.read_u32().unwrap(), 0x06050403);
        assert_eq!(s.read_u8().unwrap(), 0x07);
        assert_eq!(s.remaining(), 1);

        let mut be = Stream::with_endian(&data, Endian::Big);
        assert_eq!(be.read_u32().unwrap(), 0x01020304);
    }

    #[test]
    fn take_past_end_is_eof() {
        let mut s = Stream::new(&[0u8; 4]);
        s.skip(2).unwrap();
        assert!(matches!(s.take(3), Err(Error::UnexpectedEof(2))));
    }

    #[test]
    fn batch_read_matches_scalar_read() {
        let mut data = Vec::new();
        for i in 0..32u32 {
            data.extend_from_slice(&(i * 3).to_le_bytes());
        }
        let batch = Stream::new(&data).read_u32_vec(32).unwrap();
        let mut s = Stream::new(&data);
        for &v in &batch {
            assert_eq!(s.read_u32().unwrap(), v);
        }
    }

    #[test]
    fn word_reads_round_trip_as_bytes() {
        let mut data = Vec::new();
        for i in 0..8u64 {
            data.extend_from_slice(&(i | i << 40).to_le_bytes());
        }
        let words = Stream::new(&data).read_u64_vec(8).unwrap();
        let back: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        assert_eq!(back, data);
    }

    #[test]
    fn cstr_at_requires_terminator() {
        let data = b"hi\0there";
        let s = Stream::new(data);
        assert_eq!(s.cstr_at(0).unwrap(), "hi");
        assert!(matches!(s.cstr_at(3), Err(Error::MalformedString(3))));
    }

    #[test]
    fn record_skips_fields_outside_version() {
        let data = [
            0x01, 0x00, 0x00, 0x00, // a
            0x02, 0x00, 0x00, 0x00, // b (only <= 24.1)
            0x03, 0x00, // d
        ];
        let old = Probe::read(&mut Stream::new(&data), V24_1).unwrap();
        assert_eq!((old.a, old.b, old.c, old.d), (1, 2, 0, 3));

        let data = [
            0x01, 0x00, 0x00, 0x00, // a
            0x04, 0x00, // c (>= 24.2)
            0x03, 0x00, // d
        ];
        let new = Probe::read(&mut Stream::new(&data), V27).unwrap();
        assert_eq!((new.a, new.b, new.c, new.d), (1, 0, 4, 3));
    }

    #[test]
    fn record_sizes_follow_field_ranges() {
        assert_eq!(record_size::<Probe>(V16), 10);
        assert_eq!(record_size::<Probe>(V24_1), 10);
        assert_eq!(record_size::<Probe>(V24_2), 8);
        assert_eq!(record_size::<Probe>(V29), 8);

        let mut cache = LayoutCache::default();
        assert_eq!(cache.size_of::<Probe>(V24_2), 8);
        assert_eq!(cache.size_of::<Probe>(V24_2), 8);
    }

    #[test]
    fn record_decode_is_deterministic() {
        let data = [0xAA; 16];
        let one = Probe::read(&mut Stream::new(&data), V29).unwrap();
        let two = Probe::read(&mut Stream::new(&data), V29).unwrap();
        assert_eq!(one, two);
    }
}
