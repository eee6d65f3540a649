use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// One table per collection; `kb_id` is the partition column.
pub fn build_chunk_schema(dimension: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("chunk_id", DataType::Utf8, false),
		Field::new("kb_id", DataType::Utf8, false),
		Field::new("doc_id", DataType::Utf8, false),
		Field::new("content", DataType::Utf8, false),
		Field::new("metadata", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dimension), true),
	]))
}

pub fn vector_dimension(schema: &Schema) -> Option<usize> {
	match schema.field_with_name("vector").ok()?.data_type() {
		DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
		_ => None,
	}
}
