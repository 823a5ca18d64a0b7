//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! PLC data types and the conversion table used to move values between
//! the little-endian PLC representation and host numbers.
//!
//! Every PLC type this crate supports has exactly one entry in the type
//! table, built once on first use. Conversion sites look up the entry by
//! type id and call its decode/encode function instead of matching on the
//! type themselves.

use std::collections::HashMap;
use std::convert::TryFrom;

use anyhow::anyhow;
use lazy_static::lazy_static;


#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdsDataTypeId
{
	Void = 0,
	Int8 = 16,
	UInt8 = 17,
	Int16 = 2,
	UInt16 = 18,
	Int32 = 3,
	UInt32 = 19,
	Int64 = 20,
	UInt64 = 21,
	Real32 = 4,
	Real64 = 5,
	String = 30,
	WString = 31,
	Real80 = 32,
	Bit = 33,
    /// Some sort of structure or object.
	BigType = 65,
	MaxTypes = 67,
}


/// Attempt to convert a u32 value to the proper AdsDataTypeId
impl TryFrom<u32> for AdsDataTypeId {
    type Error = &'static str;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AdsDataTypeId::Void),
            16 => Ok(AdsDataTypeId::Int8),
            17 => Ok(AdsDataTypeId::UInt8),
            2 => Ok(AdsDataTypeId::Int16),
            18 => Ok(AdsDataTypeId::UInt16),
            3 => Ok(AdsDataTypeId::Int32),
            19 => Ok(AdsDataTypeId::UInt32),
            20 => Ok(AdsDataTypeId::Int64),
            21 => Ok(AdsDataTypeId::UInt64),
            4 => Ok(AdsDataTypeId::Real32),
            5 => Ok(AdsDataTypeId::Real64),
            30 => Ok(AdsDataTypeId::String),
            31 => Ok(AdsDataTypeId::WString),
            32 => Ok(AdsDataTypeId::Real80),
            33 => Ok(AdsDataTypeId::Bit),
            65 => Ok(AdsDataTypeId::BigType),
            67 => Ok(AdsDataTypeId::MaxTypes),
            _ => Err("Invalid AdsDataTypeId"),
        }
    }
}



/// A scalar PLC value widened to the largest host representation of its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64)
}

impl Number {
    pub fn as_i64(&self) -> i64 {
        match *self {
            Number::Int(v) => v,
            Number::Float(v) => v as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}


/// Decodes one scalar from the start of a byte slice. None if the slice is short.
pub type DecodeFn = fn(&[u8]) -> Option<Number>;
/// Encodes a scalar into exactly `width` little-endian bytes.
pub type EncodeFn = fn(Number) -> Vec<u8>;


/// One entry of the type table.
#[derive(Debug, Clone, Copy)]
pub struct AdsTypeInfo {
    pub id : AdsDataTypeId,
    /// IEC 61131 name, for log messages.
    pub name : &'static str,
    /// Width of one element in bytes.
    pub width : usize,
    /// Character data. Always handled as an array, whatever its size.
    pub is_string : bool,
    /// Scalar codec. None for types that only exist as arrays (strings).
    pub decode : Option<DecodeFn>,
    pub encode : Option<EncodeFn>
}

impl AdsTypeInfo {

    /// Find the table entry for a raw type id from the PLC.
    pub fn lookup(raw_type : u32) -> Option<&'static AdsTypeInfo> {
        let id = AdsDataTypeId::try_from(raw_type).ok()?;
        return ADS_TYPE_TABLE.get(&id);
    }

    pub fn for_id(id : AdsDataTypeId) -> Option<&'static AdsTypeInfo> {
        return ADS_TYPE_TABLE.get(&id);
    }

    /// True if a symbol of `declared_size` bytes of this type holds more than
    /// one element.
    pub fn is_array(&self, declared_size : usize) -> bool {
        return self.is_string || declared_size > self.width;
    }

    /// Decode the first element of `bytes`.
    pub fn decode_scalar(&self, bytes : &[u8]) -> Option<Number> {
        let decode = self.decode?;
        return decode(bytes);
    }

    /// Encode a scalar for writing. Fails for array-only types.
    pub fn encode_scalar(&self, value : Number) -> Result<Vec<u8>, anyhow::Error> {
        match self.encode {
            Some(encode) => Ok(encode(value)),
            None => Err(anyhow!("PLC type {} cannot be written as a scalar", self.name)),
        }
    }
}


macro_rules! le_decoder {
    ($fn_name:ident, $t:ty, $variant:ident, $wide:ty) => {
        fn $fn_name(bytes : &[u8]) -> Option<Number> {
            let raw = bytes.get(..std::mem::size_of::<$t>())?;
            let value = <$t>::from_le_bytes(raw.try_into().ok()?);
            Some(Number::$variant(value as $wide))
        }
    };
}

macro_rules! le_encoder {
    ($fn_name:ident, $t:ty, $narrow:ident) => {
        fn $fn_name(value : Number) -> Vec<u8> {
            (value.$narrow() as $t).to_le_bytes().to_vec()
        }
    };
}

le_decoder!(decode_i8, i8, Int, i64);
le_decoder!(decode_u8, u8, Int, i64);
le_decoder!(decode_i16, i16, Int, i64);
le_decoder!(decode_u16, u16, Int, i64);
le_decoder!(decode_i32, i32, Int, i64);
le_decoder!(decode_u32, u32, Int, i64);
le_decoder!(decode_i64, i64, Int, i64);
le_decoder!(decode_u64, u64, Int, i64);
le_decoder!(decode_f32, f32, Float, f64);
le_decoder!(decode_f64, f64, Float, f64);

le_encoder!(encode_i8, i8, as_i64);
le_encoder!(encode_u8, u8, as_i64);
le_encoder!(encode_i16, i16, as_i64);
le_encoder!(encode_u16, u16, as_i64);
le_encoder!(encode_i32, i32, as_i64);
le_encoder!(encode_u32, u32, as_i64);
le_encoder!(encode_i64, i64, as_i64);
le_encoder!(encode_u64, u64, as_i64);
le_encoder!(encode_f32, f32, as_f64);
le_encoder!(encode_f64, f64, as_f64);

fn decode_bit(bytes : &[u8]) -> Option<Number> {
    let b = bytes.first()?;
    Some(Number::Int(if *b != 0 { 1 } else { 0 }))
}

fn encode_bit(value : Number) -> Vec<u8> {
    vec![if value.as_f64() != 0.0 { 1 } else { 0 }]
}


fn scalar(id : AdsDataTypeId, name : &'static str, width : usize, decode : DecodeFn, encode : EncodeFn) -> AdsTypeInfo {
    AdsTypeInfo { id, name, width, is_string : false, decode : Some(decode), encode : Some(encode) }
}

lazy_static! {
    /// The conversion table, keyed by type id.
    static ref ADS_TYPE_TABLE : HashMap<AdsDataTypeId, AdsTypeInfo> = {
        let entries = [
            scalar(AdsDataTypeId::Bit, "BOOL", 1, decode_bit, encode_bit),
            scalar(AdsDataTypeId::Int8, "SINT", 1, decode_i8, encode_i8),
            scalar(AdsDataTypeId::UInt8, "USINT", 1, decode_u8, encode_u8),
            scalar(AdsDataTypeId::Int16, "INT", 2, decode_i16, encode_i16),
            scalar(AdsDataTypeId::UInt16, "UINT", 2, decode_u16, encode_u16),
            scalar(AdsDataTypeId::Int32, "DINT", 4, decode_i32, encode_i32),
            scalar(AdsDataTypeId::UInt32, "UDINT", 4, decode_u32, encode_u32),
            scalar(AdsDataTypeId::Int64, "LINT", 8, decode_i64, encode_i64),
            scalar(AdsDataTypeId::UInt64, "ULINT", 8, decode_u64, encode_u64),
            scalar(AdsDataTypeId::Real32, "REAL", 4, decode_f32, encode_f32),
            scalar(AdsDataTypeId::Real64, "LREAL", 8, decode_f64, encode_f64),
            AdsTypeInfo {
                id : AdsDataTypeId::String,
                name : "STRING",
                width : 1,
                is_string : true,
                decode : None,
                encode : None
            },
        ];

        entries.iter().map(|e| (e.id, *e)).collect()
    };
}



/// Fixed-width little-endian array element.
pub trait LeElement : Copy {
    const WIDTH : usize;
    fn read_le(bytes : &[u8]) -> Self;
    fn write_le(self, out : &mut Vec<u8>);
}

macro_rules! impl_le_element {
    ($($t:ty),*) => {
        $(
            impl LeElement for $t {
                const WIDTH : usize = std::mem::size_of::<$t>();

                fn read_le(bytes : &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$t>::from_le_bytes(raw)
                }

                fn write_le(self, out : &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_element!(i8, i16, i32, f32, f64);

/// Split a byte buffer into elements. Trailing bytes that do not fill a whole
/// element are ignored.
pub fn decode_le_slice<T : LeElement>(bytes : &[u8]) -> Vec<T> {
    return bytes.chunks_exact(T::WIDTH).map(T::read_le).collect();
}

pub fn encode_le_slice<T : LeElement>(values : &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::WIDTH);
    for v in values {
        v.write_le(&mut out);
    }
    return out;
}


/// Convert a vector of bytes to a string and trims off suplerflous bytes
/// sent by the PLC.
pub fn vec_to_string(s : &[u8]) -> Result<String, anyhow::Error> {

    let end_index = s.iter().position(|&c| c == 0x00).unwrap_or(s.len());
    match String::from_utf8(s[..end_index].to_vec()) {
        Ok(ret) => return Ok(ret),
        Err(err) => Err(anyhow!("Failed to convert string: {}", err)),
    }
}
