use arrow2::datatypes::{DataType, Field, Schema};

/// Name of the monotone event-time column every raw file is expected to
/// carry (spec.md §3).
pub const TS_EVENT_COLUMN: &str = "ts_event";

/// Name of the injected dense ordering column.
pub const SEQ_COLUMN: &str = "seq";

/// Returns the index of `ts_event` in `schema`, if present.
pub fn ts_event_index(schema: &Schema) -> Option<usize> {
    schema.fields.iter().position(|f| f.name == TS_EVENT_COLUMN)
}

/// Inserts a non-nullable `seq: Int64` field immediately after `ts_event`,
/// matching the merger's output layout (spec.md §3: "An injected 64-bit
/// `seq` column is written immediately after `ts_event`").
pub fn schema_with_seq(base: &Schema) -> Schema {
    let mut fields = Vec::with_capacity(base.fields.len() + 1);
    for field in &base.fields {
        fields.push(field.clone());
        if field.name == TS_EVENT_COLUMN {
            fields.push(Field::new(SEQ_COLUMN, DataType::Int64, false));
        }
    }
    Schema::from(fields)
}

/// Replaces every dictionary-encoded field with a field of its value type,
/// for use when the merger has fallen back to decoding dictionaries at read
/// time (spec.md §4.6 encoding-conflict fallback).
pub fn decoded_schema(base: &Schema) -> Schema {
    let fields = base
        .fields
        .iter()
        .map(|field| match &field.data_type {
            DataType::Dictionary(_, value_type, _) => {
                Field::new(&field.name, value_type.as_ref().clone(), field.is_nullable)
            }
            other => Field::new(&field.name, other.clone(), field.is_nullable),
        })
        .collect::<Vec<_>>();
    Schema::from(fields)
}
