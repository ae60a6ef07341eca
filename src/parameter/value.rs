
use std::convert::TryFrom;

use crate::{
    Error, Result,
    win32::{ERROR_INVALID_DATA, ERROR_UNSUPPORTED_TYPE},
};

/// Storage format of a parameter value, matching the registry value types
/// `REG_BINARY`, `REG_DWORD`, `REG_MULTI_SZ`, `REG_QWORD` and `REG_SZ`.
#[derive(Copy,Clone,Debug,Eq,PartialEq,Hash)]
pub enum ParameterFormat {
    Binary,
    DWord,
    MultiString,
    QWord,
    String,
}

#[derive(Clone,Debug,Eq,PartialEq)]
pub enum ParameterValue {
    String(String),
    MultiString(Vec<String>),
    Binary(Vec<u8>),
    DWord(u32),
    QWord(u64),
}

const DATA_ERR : Error = Error{code:ERROR_INVALID_DATA};
const TYPE_ERR : Error = Error{code:ERROR_UNSUPPORTED_TYPE};

impl ParameterValue {

    pub fn format(&self) -> ParameterFormat {
        match self {
            Self::String(_) => ParameterFormat::String,
            Self::MultiString(_) => ParameterFormat::MultiString,
            Self::Binary(_) => ParameterFormat::Binary,
            Self::DWord(_) => ParameterFormat::DWord,
            Self::QWord(_) => ParameterFormat::QWord,
        }
    }

    pub fn as_string(&self) -> Result<&str> {
        match self {
            Self::String(string) => Ok(string),
            _ => Err(TYPE_ERR)
        }
    }

    /// Encodes the value the way the registry stores it.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::String(string) => encode_wide(string, true),
            Self::MultiString(strings) => {
                let mut bytes: Vec<u8> = strings.iter()
                    .flat_map(|string| encode_wide(string, true))
                    .collect();
                bytes.extend_from_slice(&[0, 0]);
                bytes
            }
            Self::Binary(value) => value.clone(),
            Self::DWord(value) => value.to_le_bytes().to_vec(),
            Self::QWord(value) => value.to_le_bytes().to_vec(),
        }
    }

    pub fn from_bytes(format: ParameterFormat, bytes: &[u8]) -> Result<Self> {
        match format {
            ParameterFormat::String => {
                let mut strings = decode_wide(bytes)?;
                Ok(Self::String(if strings.is_empty() { String::new() } else { strings.swap_remove(0) }))
            }
            ParameterFormat::MultiString => {
                let strings = decode_wide(bytes)?
                    .into_iter()
                    .take_while(|string| !string.is_empty())
                    .collect();
                Ok(Self::MultiString(strings))
            }
            ParameterFormat::Binary => Ok(Self::Binary(bytes.to_vec())),
            ParameterFormat::DWord => {
                let bytes = <[u8; 4]>::try_from(bytes).map_err(|_| DATA_ERR)?;
                Ok(Self::DWord(u32::from_le_bytes(bytes)))
            }
            ParameterFormat::QWord => {
                let bytes = <[u8; 8]>::try_from(bytes).map_err(|_| DATA_ERR)?;
                Ok(Self::QWord(u64::from_le_bytes(bytes)))
            }
        }
    }
}

fn encode_wide(string: &str, terminate: bool) -> Vec<u8> {
    string.encode_utf16()
        .chain(if terminate { Some(0) } else { None })
        .flat_map(u16::to_le_bytes)
        .collect()
}

// splits NUL separated UTF-16LE text, a missing final terminator is tolerated
fn decode_wide(bytes: &[u8]) -> Result<Vec<String>> {
    if bytes.len() % 2 != 0 {
        return Err(DATA_ERR);
    }
    let wide: Vec<u16> = bytes.chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let wide = match wide.split_last() {
        Some((0, rest)) => rest,
        _ => &wide[..],
    };
    if wide.is_empty() {
        return Ok(Vec::new());
    }
    wide.split(|c| *c == 0)
        .map(|part| String::from_utf16(part).map_err(|_| DATA_ERR))
        .collect()
}

macro_rules! u32s {
    ( $( $t:ty ),+ $(,)? ) => { $(

        impl From<$t> for ParameterValue {
            fn from(value: $t) -> Self {
                Self::DWord(value as _)
            }
        }

        impl TryFrom<ParameterValue> for $t {
            type Error = crate::Error;
            fn try_from(value: ParameterValue) -> Result<Self> {
                if let ParameterValue::DWord(value) = value {
                    Ok(value as $t)
                } else {
                    Err(TYPE_ERR)
                }
            }
        }

    )+ }
}

macro_rules! u64s {
    ( $( $t:ty ),+ $(,)? ) => { $(

        impl From<$t> for ParameterValue {
            fn from(value: $t) -> Self {
                Self::QWord(value as _)
            }
        }

        impl TryFrom<ParameterValue> for $t {
            type Error = crate::Error;
            fn try_from(value: ParameterValue) -> Result<Self> {
                if let ParameterValue::QWord(value) = value {
                    Ok(value as $t)
                } else {
                    Err(TYPE_ERR)
                }
            }
        }

    )+ }
}

u32s!{ u8, u16, u32, i8, i16, i32 }
u64s!{ u64, i64 }

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::DWord(if value { 1 } else { 0 })
    }
}

impl TryFrom<ParameterValue> for bool {
    type Error = crate::Error;
    fn try_from(value: ParameterValue) -> Result<Self> {
        match value {
            ParameterValue::DWord(value) => Ok(value != 0),
            ParameterValue::QWord(value) => Ok(value != 0),
            _ => Err(TYPE_ERR)
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl TryFrom<ParameterValue> for String {
    type Error = crate::Error;
    fn try_from(value: ParameterValue) -> Result<Self> {
        if let ParameterValue::String(value) = value {
            Ok(value)
        } else {
            Err(TYPE_ERR)
        }
    }
}

impl From<Vec<String>> for ParameterValue {
    fn from(value: Vec<String>) -> Self {
        Self::MultiString(value)
    }
}

impl From<&[&str]> for ParameterValue {
    fn from(value: &[&str]) -> Self {
        Self::MultiString(value.iter().map(|s| String::from(*s)).collect())
    }
}

impl From<Vec<&str>> for ParameterValue {
    fn from(value: Vec<&str>) -> Self {
        Self::from(&value[..])
    }
}

impl TryFrom<ParameterValue> for Vec<String> {
    type Error = crate::Error;
    fn try_from(value: ParameterValue) -> Result<Self> {
        if let ParameterValue::MultiString(value) = value {
            Ok(value)
        } else {
            Err(TYPE_ERR)
        }
    }
}

impl From<&[u8]> for ParameterValue {
    fn from(value: &[u8]) -> Self {
        Self::Binary(value.into())
    }
}

impl From<Vec<u8>> for ParameterValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl TryFrom<ParameterValue> for Vec<u8> {
    type Error = crate::Error;
    fn try_from(value: ParameterValue) -> Result<Self> {
        if let ParameterValue::Binary(value) = value {
            Ok(value)
        } else {
            Err(TYPE_ERR)
        }
    }
}
