//! Benchmark utilities.

use replicadb_sync_protocol::{Entry, Record};
use serde_json::{json, Value};

/// A `users` record with `tags` tags and `orders` orders of three lines each.
pub fn user_record(id: i64, tags: usize, orders: usize) -> Record {
    let value = json!({
        "id": id,
        "name": format!("user {id}"),
        "email": format!("user{id}@example.com"),
        "address": {"city": "Oslo", "geo": {"lat": 59.91, "lng": 10.75}},
        "tags": (0..tags).map(|t| Value::from(format!("tag-{t}"))).collect::<Vec<_>>(),
        "orders": (0..orders)
            .map(|o| json!({"sku": format!("sku-{o}"), "qty": o, "lines": [1, 2, 3]}))
            .collect::<Vec<_>>(),
    });
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// A page of `users` entries with ids starting at `first_id`.
pub fn user_entries(first_id: i64, count: usize, tags: usize, orders: usize) -> Vec<Entry> {
    (0..count as i64)
        .map(|i| Entry::new("users", user_record(first_id + i, tags, orders)))
        .collect()
}
