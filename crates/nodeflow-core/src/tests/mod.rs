use serde_json::Value;

use crate::context::SharedStore;

mod flow;

/// Append `entry` to the list stored under `key`.
fn push(ctx: &SharedStore, key: &str, entry: impl Into<Value>) {
    let entry = entry.into();
    ctx.update(key, |current| {
        let mut list = current.and_then(Value::as_array).cloned().unwrap_or_default();
        list.push(entry);
        Value::Array(list)
    });
}

fn strings(ctx: &SharedStore, key: &str) -> Vec<String> {
    ctx.get(key).unwrap().unwrap_or_default()
}
