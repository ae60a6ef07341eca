
use serde::ser::{self, Impossible};

use crate::{Error, Result, ParameterValue, win32::ERROR_INVALID_DATA};

const DATA_ERR : Error = Error{code:ERROR_INVALID_DATA};

/// Flattens a struct into one named parameter value per field.
#[derive(Default)]
pub struct Serializer {
    in_struct: bool,
    name: Option<String>,
    values: Vec<(String, ParameterValue)>,
}

pub struct SeqSerializer<'a>(&'a mut Serializer, Vec<String>);

impl Serializer {

    pub fn new() -> Self { Self::default() }

    pub fn into_values(self) -> Vec<(String, ParameterValue)> {
        self.values
    }

    fn push(&mut self, name: &str) {
        tracing::trace!("push: {:?}", name);
        self.name = Some(name.into());
    }

    fn write(&mut self, value: impl Into<ParameterValue>) -> Result<()> {
        let name = self.name.take().ok_or(DATA_ERR)?;
        let value = value.into();
        tracing::trace!("set value: {:?}={:?}", name, value);
        self.values.push((name, value));
        Ok(())
    }
}

impl ser::Error for Error {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        tracing::debug!("serialization failed: {}", msg);
        DATA_ERR
    }
}

impl<'a> ser::Serializer for &'a mut Serializer {

    // error handling

    type Ok = ();
    type Error = Error;

    // subtype serializers

    type SerializeSeq = SeqSerializer<'a>;
    type SerializeTuple = Impossible<(), Error>;
    type SerializeTupleStruct = Impossible<(), Error>;
    type SerializeTupleVariant = Impossible<(), Error>;
    type SerializeMap = Impossible<(), Error>;
    type SerializeStruct = Self;
    type SerializeStructVariant = Impossible<(), Error>;

    // basic types...

    fn serialize_bool(self, v: bool) -> Result<()> { self.write(v) }
    fn serialize_i8(self, v: i8) -> Result<()> { self.write(v) }
    fn serialize_i16(self, v: i16) -> Result<()> { self.write(v) }
    fn serialize_i32(self, v: i32) -> Result<()> { self.write(v) }
    fn serialize_i64(self, v: i64) -> Result<()> { self.write(v) }
    fn serialize_u8(self, v: u8) -> Result<()> { self.write(v) }
    fn serialize_u16(self, v: u16) -> Result<()> { self.write(v) }
    fn serialize_u32(self, v: u32) -> Result<()> { self.write(v) }
    fn serialize_u64(self, v: u64) -> Result<()> { self.write(v) }

    fn serialize_f32(self, _: f32) -> Result<()> { Err(DATA_ERR) }
    fn serialize_f64(self, _: f64) -> Result<()> { Err(DATA_ERR) }

    fn serialize_char(self, v: char) -> Result<()> { self.write(v.to_string()) }
    fn serialize_str(self, v: &str) -> Result<()> { self.write(v) }
    fn serialize_bytes(self, v: &[u8]) -> Result<()> { self.write(v) }

    // an absent value is simply not written
    fn serialize_none(self) -> Result<()> {
        self.name = None;
        Ok(())
    }

    fn serialize_some<T: ?Sized + ser::Serialize> (self, value: &T) -> Result<()> { value.serialize(self) }

    fn serialize_unit(self) -> Result<()> { Err(DATA_ERR) }
    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> { Err(DATA_ERR) }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<()> {
        self.write(variant)
    }

    fn serialize_newtype_struct<T>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(&mut*self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        Err(DATA_ERR)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq> {
        if self.name.is_none() {
            return Err(DATA_ERR);
        }
        Ok(SeqSerializer(&mut*self, Vec::new()))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple> {
        Err(DATA_ERR)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct> {
        Err(DATA_ERR)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant> {
        Err(DATA_ERR)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap> {
        Err(DATA_ERR)
    }

    // only the outermost struct has a place to go
    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct> {
        if self.in_struct || self.name.is_some() {
            return Err(DATA_ERR);
        }
        self.in_struct = true;
        Ok(&mut*self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant> {
        Err(DATA_ERR)
    }
}

// sequences of strings become multi-strings
impl<'a> ser::SerializeSeq for SeqSerializer<'a> {

    type Ok = ();
    type Error = Error;

    fn serialize_element<T>(&mut self, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        let mut element = Serializer{ in_struct: true, name: Some(String::new()), values: Vec::new() };
        value.serialize(&mut element)?;
        match element.values.pop() {
            Some((_, ParameterValue::String(string))) => {
                self.1.push(string);
                Ok(())
            }
            _ => Err(DATA_ERR),
        }
    }

    fn end(self) -> Result<()> {
        self.0.write(self.1)
    }
}

impl<'a> ser::SerializeStruct for &'a mut Serializer {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, key: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        self.push(key);
        value.serialize(&mut**self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}
