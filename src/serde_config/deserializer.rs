
use std::{convert::TryFrom, slice};

use serde::de::{self, IntoDeserializer, value::SeqDeserializer, Visitor};

use crate::{
    Error, Result,
    parameter::{load_value, ParameterFormat, ParameterHandle, ParameterStore, ParameterValue},
    win32::{ERROR_FILE_NOT_FOUND, ERROR_INVALID_DATA, ERROR_UNSUPPORTED_TYPE},
};

const DATA_ERR : Error = Error{code:ERROR_INVALID_DATA};

/// Reads a flat struct out of a parameter store, one value per field.
pub struct Deserializer<'a> {
    store: &'a dyn ParameterStore,
    handle: ParameterHandle,
    in_struct: bool,
    name: Option<&'static str>,
}

struct StructMapAccess<'a, 'b> {
    des: &'b mut Deserializer<'a>,
    fields: slice::Iter<'static, &'static str>,
}

impl<'a> Deserializer<'a> {

    pub fn new(store: &'a dyn ParameterStore, handle: ParameterHandle) -> Self {
        Self{ store, handle, in_struct: false, name: None }
    }

    fn query(&mut self, format: ParameterFormat) -> Result<ParameterValue> {
        let name = self.name.take().ok_or(DATA_ERR)?;
        tracing::trace!("reading value: {:?}", name);
        load_value(self.store, self.handle, name, format)
    }

    fn read<T: TryFrom<ParameterValue, Error = Error>>(&mut self, format: ParameterFormat) -> Result<T> {
        T::try_from(self.query(format)?)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        match self.store.load(self.handle, name, ParameterFormat::Binary, None) {
            Ok(_) => Ok(true),
            Err(Error{code:ERROR_UNSUPPORTED_TYPE}) => Ok(true),
            Err(Error{code:ERROR_FILE_NOT_FOUND}) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl de::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        tracing::debug!("deserialization failed: {}", msg);
        DATA_ERR
    }

    fn missing_field(field: &'static str) -> Self {
        tracing::debug!("missing parameter: {}", field);
        Error{code:ERROR_FILE_NOT_FOUND}
    }
}

macro_rules! scalars {
    ( $( $method:ident => $visit:ident : $t:ty as $format:ident ),* $(,)? ) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
                visitor.$visit(self.read::<$t>(ParameterFormat::$format)?)
            }
        )*
    };
}

impl<'de, 'a, 'b> de::Deserializer<'de> for &'b mut Deserializer<'a> {

    type Error = Error;

    // takes whatever format the value happens to be stored in
    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let name = self.name.ok_or(DATA_ERR)?;
        let formats = [
            ParameterFormat::String,
            ParameterFormat::DWord,
            ParameterFormat::QWord,
            ParameterFormat::MultiString,
            ParameterFormat::Binary,
        ];
        for format in formats {
            match load_value(self.store, self.handle, name, format) {
                Ok(value) => {
                    self.name = None;
                    return match value {
                        ParameterValue::String(v) => visitor.visit_string(v),
                        ParameterValue::DWord(v) => visitor.visit_u32(v),
                        ParameterValue::QWord(v) => visitor.visit_u64(v),
                        ParameterValue::MultiString(v) => {
                            let seq: SeqDeserializer<_, Error> = v.into_deserializer();
                            de::Deserializer::deserialize_any(seq, visitor)
                        }
                        ParameterValue::Binary(v) => visitor.visit_byte_buf(v),
                    };
                }
                Err(Error{code:ERROR_UNSUPPORTED_TYPE}) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error{code:ERROR_UNSUPPORTED_TYPE})
    }

    scalars!{
        deserialize_bool => visit_bool: bool as DWord,
        deserialize_i8 => visit_i8: i8 as DWord,
        deserialize_i16 => visit_i16: i16 as DWord,
        deserialize_i32 => visit_i32: i32 as DWord,
        deserialize_i64 => visit_i64: i64 as QWord,
        deserialize_u8 => visit_u8: u8 as DWord,
        deserialize_u16 => visit_u16: u16 as DWord,
        deserialize_u32 => visit_u32: u32 as DWord,
        deserialize_u64 => visit_u64: u64 as QWord,
        deserialize_char => visit_string: String as String,
        deserialize_str => visit_string: String as String,
        deserialize_string => visit_string: String as String,
        deserialize_bytes => visit_byte_buf: Vec<u8> as Binary,
        deserialize_byte_buf => visit_byte_buf: Vec<u8> as Binary,
    }

    fn deserialize_f32<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> { Err(DATA_ERR) }
    fn deserialize_f64<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> { Err(DATA_ERR) }

    // absent fields never get this far, serde fills them in as `None`
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_some(self)
    }

    fn deserialize_unit<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> { Err(DATA_ERR) }

    fn deserialize_unit_struct<V: Visitor<'de>>(self, _name: &'static str, _visitor: V) -> Result<V::Value> {
        Err(DATA_ERR)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        let strings = self.read::<Vec<String>>(ParameterFormat::MultiString)?;
        let seq: SeqDeserializer<_, Error> = strings.into_deserializer();
        de::Deserializer::deserialize_any(seq, visitor)
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, _visitor: V) -> Result<V::Value> {
        Err(DATA_ERR)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(self, _name: &'static str, _len: usize, _visitor: V) -> Result<V::Value> {
        Err(DATA_ERR)
    }

    fn deserialize_map<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(DATA_ERR)
    }

    fn deserialize_struct<V: Visitor<'de>>(self, _name: &'static str, fields: &'static [&'static str], visitor: V) -> Result<V::Value> {
        if self.in_struct {
            return Err(DATA_ERR);
        }
        self.in_struct = true;
        visitor.visit_map(StructMapAccess{ des: self, fields: fields.iter() })
    }

    // unit variants are stored by name
    fn deserialize_enum<V: Visitor<'de>>(self, _name: &'static str, _variants: &'static [&'static str], visitor: V) -> Result<V::Value> {
        let variant = self.read::<String>(ParameterFormat::String)?;
        visitor.visit_enum(IntoDeserializer::<'de, Error>::into_deserializer(variant))
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, _visitor: V) -> Result<V::Value> {
        Err(DATA_ERR)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.name = None;
        visitor.visit_unit()
    }
}

impl<'de, 'a, 'b> de::MapAccess<'de> for StructMapAccess<'a, 'b> {

    type Error = Error;

    // only fields with a stored value are offered, so serde defaults cover the rest
    fn next_key_seed<K: de::DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        for &field in self.fields.by_ref() {
            if self.des.exists(field)? {
                self.des.name = Some(field);
                return seed.deserialize(IntoDeserializer::<'de, Error>::into_deserializer(field)).map(Some);
            }
            tracing::trace!("no value for: {:?}", field);
        }
        Ok(None)
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        seed.deserialize(&mut*self.des)
    }
}
