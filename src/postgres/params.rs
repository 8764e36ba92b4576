use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio_postgres::types::{FromSql, Format, IsNull, ToSql, Type, to_sql_checked};
use tokio_util::bytes;

use crate::error::PgBackendError;
use crate::types::{SqlType, SqlValue};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// An outbound parameter as it goes on the wire.
#[derive(Debug, Clone)]
pub struct WireParam {
    /// Declared parameter type; `UNKNOWN` lets the server infer it from context.
    pub ty: Type,
    /// Encoded payload, `None` for SQL NULL.
    pub bytes: Option<Vec<u8>>,
    /// Always [`Format::Text`].
    pub format: Format,
}

/// Encode a value as a text-format wire parameter.
#[must_use]
pub fn encode(value: &SqlValue) -> WireParam {
    WireParam {
        ty: wire_type(value),
        bytes: text_form(value).map(String::into_bytes),
        format: Format::Text,
    }
}

/// The wire type a value is declared with when sent as a parameter.
#[must_use]
pub fn wire_type(value: &SqlValue) -> Type {
    value.sql_type().map_or(Type::UNKNOWN, param_type)
}

/// The wire type used for parameters of a semantic type.
#[must_use]
pub fn param_type(ty: SqlType) -> Type {
    match ty {
        SqlType::RowId | SqlType::Int => Type::INT8,
        SqlType::Float => Type::FLOAT8,
        SqlType::Text => Type::TEXT,
        SqlType::Bool => Type::BOOL,
        SqlType::Date => Type::DATE,
        SqlType::Time => Type::TIME,
        SqlType::DateTime => Type::TIMESTAMP,
        SqlType::Blob => Type::BYTEA,
    }
}

fn text_form(value: &SqlValue) -> Option<String> {
    Some(match value {
        SqlValue::Int(i) | SqlValue::RowId(i) => i.to_string(),
        SqlValue::Float(f) => float_text(*f),
        SqlValue::Text(s) => s.clone(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        SqlValue::Time(t) => t.format(TIME_FORMAT).to_string(),
        SqlValue::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        SqlValue::Blob(bytes) => {
            let mut out = String::with_capacity(2 + bytes.len() * 2);
            out.push_str("\\x");
            for b in bytes {
                out.push_str(&format!("{b:02x}"));
            }
            out
        }
        SqlValue::Null => return None,
    })
}

fn float_text(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        // Debug prints the shortest representation that parses back to the same f64
        format!("{f:?}")
    }
}

/// Decoder selected once per result column from the column's type OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CellKind {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Bool,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Bytea,
}

impl CellKind {
    pub(crate) fn for_type(ty: &Type) -> Result<CellKind, PgBackendError> {
        Ok(match *ty {
            Type::INT2 => CellKind::Int2,
            Type::INT4 => CellKind::Int4,
            Type::INT8 => CellKind::Int8,
            Type::FLOAT4 => CellKind::Float4,
            Type::FLOAT8 => CellKind::Float8,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                CellKind::Text
            }
            Type::BOOL => CellKind::Bool,
            Type::DATE => CellKind::Date,
            Type::TIME => CellKind::Time,
            Type::TIMESTAMP => CellKind::Timestamp,
            Type::TIMESTAMPTZ => CellKind::TimestampTz,
            Type::BYTEA => CellKind::Bytea,
            _ => {
                return Err(PgBackendError::UnsupportedType {
                    type_name: ty.name().to_string(),
                    oid: ty.oid(),
                });
            }
        })
    }
}

/// Decode one result cell. `None` is SQL NULL and decodes to [`SqlValue::Null`] whatever the
/// column type.
///
/// # Errors
/// Returns `UnsupportedType` for a type OID without a decoder and `DecodeError` when the
/// payload is malformed for its type.
pub fn decode(ty: &Type, raw: Option<&[u8]>, format: Format) -> Result<SqlValue, PgBackendError> {
    let Some(raw) = raw else {
        return Ok(SqlValue::Null);
    };
    let kind = CellKind::for_type(ty)?;
    match format {
        Format::Text => decode_text(kind, ty, raw),
        Format::Binary => decode_binary(kind, ty, raw),
    }
}

pub(crate) fn decode_text(kind: CellKind, ty: &Type, raw: &[u8]) -> Result<SqlValue, PgBackendError> {
    let text = std::str::from_utf8(raw).map_err(|e| decode_error(ty, e))?;
    Ok(match kind {
        CellKind::Int2 | CellKind::Int4 | CellKind::Int8 => {
            SqlValue::Int(text.parse::<i64>().map_err(|e| decode_error(ty, e))?)
        }
        CellKind::Float4 | CellKind::Float8 => SqlValue::Float(parse_float(ty, text)?),
        CellKind::Text => SqlValue::Text(text.to_string()),
        CellKind::Bool => SqlValue::Bool(parse_bool(ty, text)?),
        CellKind::Date => SqlValue::Date(
            NaiveDate::parse_from_str(text, DATE_FORMAT).map_err(|e| decode_error(ty, e))?,
        ),
        CellKind::Time => SqlValue::Time(
            NaiveTime::parse_from_str(text, TIME_FORMAT).map_err(|e| decode_error(ty, e))?,
        ),
        CellKind::Timestamp => SqlValue::Timestamp(
            NaiveDateTime::parse_from_str(&text.replacen('T', " ", 1), TIMESTAMP_FORMAT)
                .map_err(|e| decode_error(ty, e))?,
        ),
        CellKind::TimestampTz => SqlValue::Timestamp(
            DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                .map_err(|e| decode_error(ty, e))?
                .naive_utc(),
        ),
        CellKind::Bytea => SqlValue::Blob(parse_bytea(ty, text)?),
    })
}

pub(crate) fn decode_binary(
    kind: CellKind,
    ty: &Type,
    raw: &[u8],
) -> Result<SqlValue, PgBackendError> {
    let err = |e: Box<dyn Error + Sync + Send>| decode_error(ty, e);
    Ok(match kind {
        CellKind::Int2 => SqlValue::Int(i64::from(i16::from_sql(ty, raw).map_err(err)?)),
        CellKind::Int4 => SqlValue::Int(i64::from(i32::from_sql(ty, raw).map_err(err)?)),
        CellKind::Int8 => SqlValue::Int(i64::from_sql(ty, raw).map_err(err)?),
        CellKind::Float4 => SqlValue::Float(f64::from(f32::from_sql(ty, raw).map_err(err)?)),
        CellKind::Float8 => SqlValue::Float(f64::from_sql(ty, raw).map_err(err)?),
        CellKind::Text => SqlValue::Text(<&str>::from_sql(ty, raw).map_err(err)?.to_string()),
        CellKind::Bool => SqlValue::Bool(bool::from_sql(ty, raw).map_err(err)?),
        CellKind::Date => SqlValue::Date(NaiveDate::from_sql(ty, raw).map_err(err)?),
        CellKind::Time => SqlValue::Time(NaiveTime::from_sql(ty, raw).map_err(err)?),
        CellKind::Timestamp => SqlValue::Timestamp(NaiveDateTime::from_sql(ty, raw).map_err(err)?),
        CellKind::TimestampTz => {
            SqlValue::Timestamp(DateTime::<Utc>::from_sql(ty, raw).map_err(err)?.naive_utc())
        }
        CellKind::Bytea => SqlValue::Blob(<&[u8]>::from_sql(ty, raw).map_err(err)?.to_vec()),
    })
}

fn decode_error(ty: &Type, err: impl std::fmt::Display) -> PgBackendError {
    PgBackendError::DecodeError {
        type_name: ty.name().to_string(),
        message: err.to_string(),
    }
}

fn parse_float(ty: &Type, text: &str) -> Result<f64, PgBackendError> {
    match text {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => text.parse::<f64>().map_err(|e| decode_error(ty, e)),
    }
}

fn parse_bool(ty: &Type, text: &str) -> Result<bool, PgBackendError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        other => Err(decode_error(ty, format!("'{other}' is not a boolean"))),
    }
}

/// Accepts both the `hex` (`\x0a0b`) and legacy `escape` bytea output formats.
fn parse_bytea(ty: &Type, text: &str) -> Result<Vec<u8>, PgBackendError> {
    if let Some(hex) = text.strip_prefix("\\x") {
        if hex.len() % 2 != 0 {
            return Err(decode_error(ty, "odd number of hex digits"));
        }
        return hex
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                    .ok_or_else(|| decode_error(ty, "invalid hex digit"))
            })
            .collect();
    }

    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b'\\' {
            out.push(bytes[idx]);
            idx += 1;
        } else if bytes.get(idx + 1) == Some(&b'\\') {
            out.push(b'\\');
            idx += 2;
        } else {
            let octal = text
                .get(idx + 1..idx + 4)
                .ok_or_else(|| decode_error(ty, "truncated escape sequence"))?;
            out.push(u8::from_str_radix(octal, 8).map_err(|e| decode_error(ty, e))?);
            idx += 4;
        }
    }
    Ok(out)
}

/// Container for Postgres parameters with lifetime tracking
pub struct Params<'a> {
    references: Vec<&'a (dyn ToSql + Sync)>,
}

impl<'a> Params<'a> {
    /// Borrow a slice of values as driver parameters.
    #[must_use]
    pub fn convert(params: &'a [SqlValue]) -> Params<'a> {
        let references: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        Params { references }
    }

    /// Get a reference to the underlying parameter array
    #[must_use]
    pub fn as_refs(&self) -> &[&(dyn ToSql + Sync)] {
        &self.references
    }
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut bytes::BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match text_form(self) {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // text format: the server parses the payload for whatever type it inferred
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: &SqlValue) -> SqlValue {
        let wire = encode(value);
        assert!(matches!(wire.format, Format::Text));
        decode(&wire.ty, wire.bytes.as_deref(), wire.format).expect("decode")
    }

    #[test]
    fn integers_round_trip_at_boundaries() {
        for i in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert_eq!(round_trip(&SqlValue::Int(i)), SqlValue::Int(i));
        }
    }

    #[test]
    fn row_id_is_encoded_like_an_integer() {
        let a = encode(&SqlValue::RowId(42));
        let b = encode(&SqlValue::Int(42));
        assert_eq!(a.ty, b.ty);
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(round_trip(&SqlValue::RowId(42)), SqlValue::Int(42));
    }

    #[test]
    fn floats_round_trip_exactly() {
        for f in [0.1, -2.5e-300, 1.0e300, f64::MIN_POSITIVE, f64::MAX, 3.0] {
            assert_eq!(round_trip(&SqlValue::Float(f)), SqlValue::Float(f));
        }
        assert_eq!(round_trip(&SqlValue::Float(f64::INFINITY)), SqlValue::Float(f64::INFINITY));
        assert_eq!(
            encode(&SqlValue::Float(f64::NEG_INFINITY)).bytes.as_deref(),
            Some(&b"-Infinity"[..])
        );
        assert!(round_trip(&SqlValue::Float(f64::NAN)).as_float().is_some_and(f64::is_nan));
    }

    #[test]
    fn text_with_multibyte_characters() {
        let v = SqlValue::Text("zażółć gęślą jaźń ✓ 漢字".into());
        assert_eq!(round_trip(&v), v);
    }

    #[test]
    fn blob_with_embedded_zero_bytes() {
        let v = SqlValue::Blob(vec![0, 1, 0, 255, 0x5c, 0]);
        assert_eq!(encode(&v).bytes.as_deref(), Some(&b"\\x000100ff5c00"[..]));
        assert_eq!(round_trip(&v), v);
        assert_eq!(round_trip(&SqlValue::Blob(vec![])), SqlValue::Blob(vec![]));
    }

    #[test]
    fn temporal_values_round_trip() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_micro_opt(23, 59, 58, 123_456).unwrap();
        for v in [
            SqlValue::Date(date),
            SqlValue::Time(time),
            SqlValue::Timestamp(date.and_time(time)),
            SqlValue::Timestamp(date.and_hms_opt(0, 0, 0).unwrap()),
        ] {
            assert_eq!(round_trip(&v), v);
        }
    }

    #[test]
    fn bool_and_null_round_trip() {
        assert_eq!(round_trip(&SqlValue::Bool(true)), SqlValue::Bool(true));
        assert_eq!(round_trip(&SqlValue::Bool(false)), SqlValue::Bool(false));
        let wire = encode(&SqlValue::Null);
        assert_eq!(wire.ty, Type::UNKNOWN);
        assert!(wire.bytes.is_none());
        assert_eq!(round_trip(&SqlValue::Null), SqlValue::Null);
    }

    #[test]
    fn bool_tokens_are_case_insensitive() {
        for token in ["t", "TRUE", "Yes", "on", "1"] {
            assert_eq!(
                decode(&Type::BOOL, Some(token.as_bytes()), Format::Text).unwrap(),
                SqlValue::Bool(true)
            );
        }
        for token in ["F", "false", "NO", "Off", "0"] {
            assert_eq!(
                decode(&Type::BOOL, Some(token.as_bytes()), Format::Text).unwrap(),
                SqlValue::Bool(false)
            );
        }
        assert!(matches!(
            decode(&Type::BOOL, Some(&b"maybe"[..]), Format::Text),
            Err(PgBackendError::DecodeError { .. })
        ));
    }

    #[test]
    fn null_decodes_for_any_type() {
        assert_eq!(decode(&Type::JSONB, None, Format::Text).unwrap(), SqlValue::Null);
        assert_eq!(decode(&Type::INT8, None, Format::Binary).unwrap(), SqlValue::Null);
    }

    #[test]
    fn unknown_oid_is_rejected() {
        let err = decode(&Type::JSONB, Some(&b"{}"[..]), Format::Text).unwrap_err();
        match err {
            PgBackendError::UnsupportedType { type_name, oid } => {
                assert_eq!(type_name, "jsonb");
                assert_eq!(oid, Type::JSONB.oid());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parameters_bind_to_any_server_type() {
        assert!(<SqlValue as ToSql>::accepts(&Type::JSONB));
        assert!(<SqlValue as ToSql>::accepts(&Type::INT4));
        let mut buf = bytes::BytesMut::new();
        let is_null = SqlValue::Null
            .to_sql_checked(&Type::JSONB, &mut buf)
            .unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[test]
    fn text_integers_are_strict_base_ten() {
        assert_eq!(
            decode(&Type::INT4, Some(&b"-17"[..]), Format::Text).unwrap(),
            SqlValue::Int(-17)
        );
        assert!(decode(&Type::INT8, Some(&b"1,000"[..]), Format::Text).is_err());
        assert!(decode(&Type::INT8, Some(&b"0x10"[..]), Format::Text).is_err());
    }

    #[test]
    fn escape_format_bytea() {
        assert_eq!(
            decode(&Type::BYTEA, Some(&br"a\000\\b"[..]), Format::Text).unwrap(),
            SqlValue::Blob(vec![b'a', 0, b'\\', b'b'])
        );
    }

    #[test]
    fn binary_cells_use_driver_decoders() {
        assert_eq!(
            decode(&Type::INT4, Some(7i32.to_be_bytes().as_slice()), Format::Binary).unwrap(),
            SqlValue::Int(7)
        );
        assert_eq!(
            decode(&Type::FLOAT8, Some(1.5f64.to_be_bytes().as_slice()), Format::Binary).unwrap(),
            SqlValue::Float(1.5)
        );
        assert_eq!(
            decode(&Type::TEXT, Some("héllo".as_bytes()), Format::Binary).unwrap(),
            SqlValue::Text("héllo".into())
        );
        assert_eq!(
            decode(&Type::BOOL, Some(&[1u8][..]), Format::Binary).unwrap(),
            SqlValue::Bool(true)
        );
    }

    #[test]
    fn to_sql_writes_text_payload() {
        let mut buf = bytes::BytesMut::new();
        let is_null = SqlValue::Int(12).to_sql(&Type::INT8, &mut buf).unwrap();
        assert!(matches!(is_null, IsNull::No));
        assert_eq!(&buf[..], b"12");
        assert!(matches!(SqlValue::Int(12).encode_format(&Type::INT8), Format::Text));
        assert!(matches!(
            SqlValue::Null.to_sql(&Type::TEXT, &mut buf).unwrap(),
            IsNull::Yes
        ));
    }
}
