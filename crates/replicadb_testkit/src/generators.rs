//! Property-based test generators using proptest.
//!
//! Provides strategies for schemas, records that fully populate a schema,
//! and flatten options that are valid for a schema.

use proptest::prelude::*;
use replicadb_core::flatten::{resolve_auto, FlattenOptions};
use replicadb_core::path;
use replicadb_core::schema::{CollectionSchema, Field, FieldMap, LeafField};
use replicadb_storage::ColumnType;
use replicadb_sync_protocol::Record;
use serde_json::{json, Value};

/// Strategy for generating valid field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex")
}

/// Strategy for generating leaf column types.
pub fn column_type_strategy() -> impl Strategy<Value = ColumnType> {
    prop_oneof![
        Just(ColumnType::String),
        Just(ColumnType::Number),
        Just(ColumnType::Integer),
        Just(ColumnType::Boolean),
        Just(ColumnType::Date),
        Just(ColumnType::Json),
    ]
}

/// Strategy for generating field trees up to three levels deep.
pub fn field_strategy() -> impl Strategy<Value = Field> {
    let leaf = column_type_strategy().prop_map(Field::leaf);
    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            prop::collection::btree_map(field_name_strategy(), inner.clone(), 1..4)
                .prop_map(Field::Object),
            inner.prop_map(Field::array),
        ]
    })
}

/// Strategy for generating a collection schema with an `id` primary key.
pub fn collection_schema_strategy() -> impl Strategy<Value = CollectionSchema> {
    (
        column_type_strategy().prop_filter("primary keys are scalar", |t| {
            !matches!(t, ColumnType::Json | ColumnType::Boolean)
        }),
        prop::collection::btree_map(field_name_strategy(), field_strategy(), 0..5),
    )
        .prop_map(|(key_type, mut fields)| {
            fields.remove("id");
            fields.insert(
                "id".to_string(),
                Field::Leaf(LeafField::new(key_type).primary_key()),
            );
            CollectionSchema::new("items", fields)
        })
}

fn leaf_value_strategy(column_type: ColumnType) -> BoxedStrategy<Value> {
    match column_type {
        ColumnType::Integer => any::<i32>().prop_map(Value::from).boxed(),
        ColumnType::Number => (-1.0e6..1.0e6f64).prop_map(Value::from).boxed(),
        ColumnType::Boolean => any::<bool>().prop_map(Value::from).boxed(),
        ColumnType::Json => prop_oneof![
            Just(json!({"k": 1})),
            Just(json!([1, 2])),
            Just(json!("text")),
        ]
        .boxed(),
        _ => field_name_strategy().prop_map(Value::from).boxed(),
    }
}

fn value_strategy(field: &Field) -> BoxedStrategy<Value> {
    match field {
        Field::Leaf(leaf) => leaf_value_strategy(leaf.column_type),
        Field::Object(fields) => object_strategy(fields).prop_map(Value::Object).boxed(),
        Field::Array(element) => prop::collection::vec(value_strategy(element), 1..3)
            .prop_map(Value::Array)
            .boxed(),
    }
}

fn object_strategy(fields: &FieldMap) -> BoxedStrategy<Record> {
    let parts: Vec<BoxedStrategy<(String, Value)>> = fields
        .iter()
        .map(|(name, field)| {
            let name = name.clone();
            value_strategy(field)
                .prop_map(move |value| (name.clone(), value))
                .boxed()
        })
        .collect();
    parts
        .prop_map(|pairs| pairs.into_iter().collect::<Record>())
        .boxed()
}

/// Strategy for records that set every field of `schema`.
///
/// Arrays always hold at least one element and no value is null, so every
/// promoted path of the schema produces at least one row.
pub fn record_strategy(schema: &CollectionSchema) -> BoxedStrategy<Record> {
    object_strategy(&schema.fields)
}

/// Strategy for flatten options valid for `schema`.
///
/// Picks a subset of the arrays auto mode would promote, closed under
/// ancestors, and the inlined paths that do not cross an unpromoted array.
pub fn flatten_options_strategy(schema: &CollectionSchema) -> BoxedStrategy<FlattenOptions> {
    let auto = match resolve_auto(schema) {
        Ok(options) => options,
        Err(_) => return Just(FlattenOptions::default()).boxed(),
    };
    let models = auto.as_models().to_vec();
    let fields = auto.as_fields().to_vec();

    (
        prop::collection::vec(any::<bool>(), models.len()),
        prop::collection::vec(any::<bool>(), fields.len()),
    )
        .prop_map(move |(model_mask, field_mask)| {
            let mut chosen: Vec<String> = models
                .iter()
                .zip(&model_mask)
                .filter(|(_, keep)| **keep)
                .map(|(m, _)| m.clone())
                .collect();
            for model in chosen.clone() {
                for ancestor in models.iter().filter(|a| path::is_under(&model, a)) {
                    if !chosen.contains(ancestor) {
                        chosen.push(ancestor.clone());
                    }
                }
            }

            let inlined: Vec<String> = fields
                .iter()
                .zip(&field_mask)
                .filter(|(f, keep)| {
                    **keep
                        && models
                            .iter()
                            .filter(|m| path::is_under(f, m))
                            .all(|m| chosen.contains(m))
                })
                .map(|(f, _)| f.clone())
                .collect();

            FlattenOptions::new(chosen, inlined)
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_schemas_validate(schema in collection_schema_strategy()) {
            prop_assert!(schema.validate().is_ok());
        }

        #[test]
        fn generated_records_set_the_primary_key(
            (_schema, record) in collection_schema_strategy()
                .prop_flat_map(|s| { let r = record_strategy(&s); (Just(s), r) })
        ) {
            prop_assert!(record.get("id").is_some_and(|v| !v.is_null()));
        }
    }
}
