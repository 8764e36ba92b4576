use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Column, Row};

use super::params::{CellKind, decode_binary};
use crate::error::PgBackendError;
use crate::results::ResultSet;
use crate::types::SqlValue;

/// Raw bytes of one cell, exactly as the driver received them.
struct RawCell<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawCell<'a> {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawCell(Some(raw)))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawCell(None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Per-column decoder, resolved once per result. An unsupported type only fails when a
/// non-NULL cell actually needs decoding.
struct ColumnDecoder {
    ty: Type,
    kind: Result<CellKind, PgBackendError>,
}

impl ColumnDecoder {
    fn new(column: &Column) -> Self {
        let ty = column.type_().clone();
        let kind = CellKind::for_type(&ty);
        ColumnDecoder { ty, kind }
    }

    fn decode(&self, raw: Option<&[u8]>) -> Result<SqlValue, PgBackendError> {
        let Some(raw) = raw else {
            return Ok(SqlValue::Null);
        };
        match &self.kind {
            Ok(kind) => decode_binary(*kind, &self.ty, raw),
            Err(_) => Err(PgBackendError::UnsupportedType {
                type_name: self.ty.name().to_string(),
                oid: self.ty.oid(),
            }),
        }
    }
}

/// Build a result set from rows returned over the extended protocol, using the statement's
/// column metadata for names and types.
///
/// # Errors
/// Returns `UnsupportedType` or `DecodeError` for cells that cannot be decoded.
pub fn build_result_set(columns: &[Column], rows: &[Row]) -> Result<ResultSet, PgBackendError> {
    let column_names = columns.iter().map(|c| c.name().to_string()).collect();
    let decoders: Vec<ColumnDecoder> = columns.iter().map(ColumnDecoder::new).collect();

    let mut result_set = ResultSet::with_columns(column_names, rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(decoders.len());
        for (idx, decoder) in decoders.iter().enumerate() {
            let cell: RawCell<'_> = row.try_get(idx).map_err(|e| PgBackendError::DecodeError {
                type_name: decoder.ty.name().to_string(),
                message: e.to_string(),
            })?;
            values.push(decoder.decode(cell.0)?);
        }
        result_set.add_row_values(values);
    }

    Ok(result_set)
}
