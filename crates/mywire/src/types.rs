//! MySQL column metadata and text-protocol value conversion.
//!
//! This module provides:
//! - MySQL field type codes and column flags
//! - Column definitions parsed from field-descriptor packets
//! - The converter registry mapping type codes to decode functions
//!
//! # Text protocol decoding
//!
//! Every cell arrives as a length-encoded byte string. Before a converter
//! sees it, the bytes are turned into a [`Cell`]:
//! - JSON columns are decoded with the connection encoding
//! - character/blob/bit/geometry columns are raw bytes when their charset
//!   is `binary` (63), text in the connection encoding otherwise
//! - every other type (numbers, dates, times) is ASCII text

#![allow(clippy::cast_possible_truncation)]

use std::borrow::Cow;
use std::collections::HashMap;

use mywire_core::{Error, Result, Value};

use crate::charset::{BINARY_COLLATION, Encoding};
use crate::protocol::PacketReader;

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type from a byte.
    ///
    /// Unknown codes are treated as strings.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    /// Types whose bytes are raw binary under the `binary` charset and text
    /// otherwise.
    pub const fn is_text_type(self) -> bool {
        matches!(
            self,
            FieldType::Bit
                | FieldType::Blob
                | FieldType::LongBlob
                | FieldType::MediumBlob
                | FieldType::String
                | FieldType::TinyBlob
                | FieldType::VarString
                | FieldType::VarChar
                | FieldType::Geometry
        )
    }

    /// Get the type name as a string.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// Column definition from a field-descriptor packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Collation id of the column
    pub charset: u16,
    /// Column length
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a field-descriptor packet. Names are decoded with `encoding`.
    #[allow(clippy::result_large_err)]
    pub fn parse(data: &[u8], encoding: Encoding) -> Result<Self> {
        let mut reader = PacketReader::new(data);
        let missing = |field: &str| Error::protocol(format!("Field descriptor missing {}", field));
        let name = |reader: &mut PacketReader<'_>, field: &str| {
            reader
                .read_lenenc_bytes()
                .map(|b| encoding.decode(b).into_owned())
                .ok_or_else(|| missing(field))
        };

        let catalog = name(&mut reader, "catalog")?;
        let schema = name(&mut reader, "schema")?;
        let table = name(&mut reader, "table")?;
        let org_table = name(&mut reader, "org_table")?;
        let column_name = name(&mut reader, "name")?;
        let org_name = name(&mut reader, "org_name")?;

        // Length of the fixed-size block (0x0c)
        reader.read_lenenc_int().ok_or_else(|| missing("fixed length"))?;

        let charset = reader.read_u16_le().ok_or_else(|| missing("charset"))?;
        let column_length = reader.read_u32_le().ok_or_else(|| missing("length"))?;
        let column_type = FieldType::from_u8(reader.read_u8().ok_or_else(|| missing("type"))?);
        let flags = reader.read_u16_le().ok_or_else(|| missing("flags"))?;
        let decimals = reader.read_u8().ok_or_else(|| missing("decimals"))?;

        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name: column_name,
            org_name,
            charset,
            column_length,
            column_type,
            flags,
            decimals,
        })
    }

    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub const fn is_auto_increment(&self) -> bool {
        self.flags & column_flags::AUTO_INCREMENT != 0
    }

    /// Does this column carry `binary` charset data?
    pub const fn is_binary_charset(&self) -> bool {
        self.charset == BINARY_COLLATION
    }

    /// Prepare raw cell bytes for this column's converter.
    pub fn cell<'a>(&self, raw: &'a [u8], encoding: Encoding) -> Cell<'a> {
        if self.column_type == FieldType::Json {
            Cell::Text(encoding.decode(raw))
        } else if self.column_type.is_text_type() {
            if self.is_binary_charset() {
                Cell::Binary(raw)
            } else {
                Cell::Text(encoding.decode(raw))
            }
        } else {
            Cell::Text(Encoding::Ascii.decode(raw))
        }
    }
}

/// One non-NULL text-protocol cell, already decoded where applicable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell<'a> {
    Text(Cow<'a, str>),
    Binary(&'a [u8]),
}

/// A decode function for one type code.
pub type Converter = fn(&ColumnDef, Cell<'_>) -> Value;

/// Maps type codes to converters. Types without an entry use the fallback,
/// which yields `Text` or `Bytes`.
#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    by_type: HashMap<FieldType, Converter>,
}

impl ConverterRegistry {
    /// A registry with no type-specific converters.
    pub fn empty() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// Register (or replace) the converter for a type code.
    pub fn register(&mut self, field_type: FieldType, converter: Converter) -> &mut Self {
        self.by_type.insert(field_type, converter);
        self
    }

    pub fn get(&self, field_type: FieldType) -> Converter {
        self.by_type
            .get(&field_type)
            .copied()
            .unwrap_or(convert_passthrough)
    }

    /// Decode one cell; `None` is SQL NULL.
    pub fn convert(&self, column: &ColumnDef, raw: Option<&[u8]>, encoding: Encoding) -> Value {
        match raw {
            None => Value::Null,
            Some(raw) => (self.get(column.column_type))(column, column.cell(raw, encoding)),
        }
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for ty in [
            FieldType::Tiny,
            FieldType::Short,
            FieldType::Long,
            FieldType::Int24,
            FieldType::LongLong,
            FieldType::Year,
        ] {
            registry.register(ty, convert_integer);
        }
        registry
            .register(FieldType::Float, convert_float)
            .register(FieldType::Double, convert_float)
            .register(FieldType::Decimal, convert_decimal)
            .register(FieldType::NewDecimal, convert_decimal)
            .register(FieldType::Json, convert_json)
            .register(FieldType::Null, |_, _| Value::Null);
        registry
    }
}

/// Text becomes `Text`, binary becomes `Bytes`.
pub fn convert_passthrough(_column: &ColumnDef, cell: Cell<'_>) -> Value {
    match cell {
        Cell::Text(text) => Value::Text(text.into_owned()),
        Cell::Binary(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

/// Integers, widened by one size when the column is unsigned.
pub fn convert_integer(column: &ColumnDef, cell: Cell<'_>) -> Value {
    let Cell::Text(text) = &cell else {
        return convert_passthrough(column, cell);
    };
    let unsigned = column.is_unsigned();
    let parsed = match column.column_type {
        FieldType::Tiny if unsigned => text.parse::<u8>().ok().map(|v| Value::SmallInt(i16::from(v))),
        FieldType::Tiny => text.parse::<i8>().ok().map(Value::TinyInt),
        FieldType::Short | FieldType::Year if unsigned => {
            text.parse::<u16>().ok().map(|v| Value::Int(i32::from(v)))
        }
        FieldType::Short | FieldType::Year => text.parse::<i16>().ok().map(Value::SmallInt),
        FieldType::Long | FieldType::Int24 if unsigned => {
            text.parse::<u32>().ok().map(|v| Value::BigInt(i64::from(v)))
        }
        FieldType::Long | FieldType::Int24 => text.parse::<i32>().ok().map(Value::Int),
        _ if unsigned => text.parse::<u64>().ok().map(Value::UnsignedBigInt),
        _ => text.parse::<i64>().ok().map(Value::BigInt),
    };
    parsed.unwrap_or_else(|| convert_passthrough(column, cell))
}

pub fn convert_float(column: &ColumnDef, cell: Cell<'_>) -> Value {
    let parsed = match (&cell, column.column_type) {
        (Cell::Text(text), FieldType::Float) => text.parse::<f32>().ok().map(Value::Float),
        (Cell::Text(text), _) => text.parse::<f64>().ok().map(Value::Double),
        (Cell::Binary(_), _) => None,
    };
    parsed.unwrap_or_else(|| convert_passthrough(column, cell))
}

/// Decimals stay textual to preserve precision.
pub fn convert_decimal(column: &ColumnDef, cell: Cell<'_>) -> Value {
    match cell {
        Cell::Text(text) => Value::Decimal(text.into_owned()),
        binary @ Cell::Binary(_) => convert_passthrough(column, binary),
    }
}

/// JSON documents; unparsable text is kept as `Text`.
pub fn convert_json(column: &ColumnDef, cell: Cell<'_>) -> Value {
    match &cell {
        Cell::Text(text) => serde_json::from_str(text)
            .map_or_else(|_| convert_passthrough(column, cell.clone()), Value::Json),
        Cell::Binary(_) => convert_passthrough(column, cell),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketWriter;

    fn column(name: &str, ty: FieldType, charset: u16, flags: u16) -> ColumnDef {
        ColumnDef {
            catalog: "def".to_string(),
            schema: "app".to_string(),
            table: "t".to_string(),
            org_table: "t".to_string(),
            name: name.to_string(),
            org_name: name.to_string(),
            charset,
            column_length: 11,
            column_type: ty,
            flags,
            decimals: 0,
        }
    }

    #[test]
    fn test_field_type_from_u8() {
        assert_eq!(FieldType::from_u8(0x03), FieldType::Long);
        assert_eq!(FieldType::from_u8(0xF5), FieldType::Json);
        assert_eq!(FieldType::from_u8(0x42), FieldType::String);
        assert_eq!(FieldType::Blob.name(), "BLOB");
    }

    #[test]
    fn test_parse_column_definition() {
        let mut writer = PacketWriter::new();
        for part in ["def", "app", "users", "users", "id", "id"] {
            writer.write_lenenc_string(part);
        }
        writer.write_lenenc_int(0x0c);
        writer.write_u16_le(63);
        writer.write_u32_le(11);
        writer.write_u8(FieldType::Long as u8);
        writer.write_u16_le(column_flags::NOT_NULL | column_flags::PRIMARY_KEY | column_flags::UNSIGNED);
        writer.write_u8(0);
        writer.write_zeros(2);

        let col = ColumnDef::parse(writer.as_bytes(), Encoding::Utf8).unwrap();
        assert_eq!(col.name, "id");
        assert_eq!(col.table, "users");
        assert_eq!(col.column_type, FieldType::Long);
        assert!(col.is_primary_key());
        assert!(col.is_not_null());
        assert!(col.is_unsigned());
        assert!(!col.is_auto_increment());
        assert!(col.is_binary_charset());
    }

    #[test]
    fn test_parse_truncated_column_definition() {
        let err = ColumnDef::parse(b"\x03def\x03app", Encoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_cell_text_vs_binary_decision() {
        let blob_bin = column("b", FieldType::Blob, 63, 0);
        let blob_text = column("t", FieldType::Blob, 45, 0);
        let num = column("n", FieldType::Long, 63, 0);
        let json = column("j", FieldType::Json, 63, 0);

        assert_eq!(blob_bin.cell(b"\x00\x01", Encoding::Utf8), Cell::Binary(b"\x00\x01"));
        assert_eq!(
            blob_text.cell("é".as_bytes(), Encoding::Utf8),
            Cell::Text(Cow::Borrowed("é"))
        );
        assert_eq!(num.cell(b"42", Encoding::Latin1), Cell::Text(Cow::Borrowed("42")));
        assert_eq!(json.cell(b"{}", Encoding::Utf8), Cell::Text(Cow::Borrowed("{}")));
    }

    #[test]
    fn test_default_integer_conversion() {
        let registry = ConverterRegistry::default();
        let signed = column("a", FieldType::Long, 63, 0);
        let unsigned = column("b", FieldType::LongLong, 63, column_flags::UNSIGNED);
        let tiny_unsigned = column("c", FieldType::Tiny, 63, column_flags::UNSIGNED);

        assert_eq!(registry.convert(&signed, Some(b"-7"), Encoding::Utf8), Value::Int(-7));
        assert_eq!(
            registry.convert(&unsigned, Some(b"18446744073709551615"), Encoding::Utf8),
            Value::UnsignedBigInt(u64::MAX)
        );
        assert_eq!(
            registry.convert(&tiny_unsigned, Some(b"255"), Encoding::Utf8),
            Value::SmallInt(255)
        );
        assert_eq!(registry.convert(&signed, None, Encoding::Utf8), Value::Null);
    }

    #[test]
    fn test_default_other_conversions() {
        let registry = ConverterRegistry::default();
        let dbl = column("d", FieldType::Double, 63, 0);
        let dec = column("m", FieldType::NewDecimal, 63, 0);
        let json = column("j", FieldType::Json, 63, 0);
        let date = column("dt", FieldType::Date, 63, 0);
        let name = column("s", FieldType::VarString, 45, 0);

        assert_eq!(registry.convert(&dbl, Some(b"1.5"), Encoding::Utf8), Value::Double(1.5));
        assert_eq!(
            registry.convert(&dec, Some(b"10.25"), Encoding::Utf8),
            Value::Decimal("10.25".to_string())
        );
        assert_eq!(
            registry.convert(&json, Some(br#"{"a":1}"#), Encoding::Utf8),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            registry.convert(&json, Some(b"{oops"), Encoding::Utf8),
            Value::Text("{oops".to_string())
        );
        assert_eq!(
            registry.convert(&date, Some(b"2024-01-31"), Encoding::Utf8),
            Value::Text("2024-01-31".to_string())
        );
        assert_eq!(
            registry.convert(&name, Some(b"alice"), Encoding::Utf8),
            Value::Text("alice".to_string())
        );
    }

    #[test]
    fn test_custom_converter_overrides_default() {
        fn shout(_: &ColumnDef, cell: Cell<'_>) -> Value {
            match cell {
                Cell::Text(t) => Value::Text(t.to_uppercase()),
                Cell::Binary(b) => Value::Bytes(b.to_vec()),
            }
        }

        let mut registry = ConverterRegistry::default();
        registry.register(FieldType::VarString, shout);
        let name = column("s", FieldType::VarString, 45, 0);
        assert_eq!(
            registry.convert(&name, Some(b"bob"), Encoding::Utf8),
            Value::Text("BOB".to_string())
        );

        let bare = ConverterRegistry::empty();
        let num = column("n", FieldType::Long, 63, 0);
        assert_eq!(
            bare.convert(&num, Some(b"5"), Encoding::Utf8),
            Value::Text("5".to_string())
        );
    }
}
