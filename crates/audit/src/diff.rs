//! Shallow snapshot diffing.

use serde_json::Value as JsonValue;

use crate::entry::FieldChange;

/// Diff two entity snapshots field by field (top level only).
///
/// Non-object snapshots (or a missing side) diff as a single `_root` change.
/// Field order is stable: before-side fields first in their original order,
/// then fields that only exist on the after side.
pub fn diff_snapshots(before: Option<&JsonValue>, after: Option<&JsonValue>) -> Vec<FieldChange> {
    match (before, after) {
        (Some(JsonValue::Object(b)), Some(JsonValue::Object(a))) => {
            let mut changes = Vec::new();
            for (field, old) in b {
                let new = a.get(field);
                if new != Some(old) {
                    changes.push(FieldChange {
                        field: field.clone(),
                        before: Some(old.clone()),
                        after: new.cloned(),
                    });
                }
            }
            for (field, new) in a {
                if !b.contains_key(field) {
                    changes.push(FieldChange {
                        field: field.clone(),
                        before: None,
                        after: Some(new.clone()),
                    });
                }
            }
            changes
        }
        (None, Some(JsonValue::Object(a))) => a
            .iter()
            .map(|(field, new)| FieldChange {
                field: field.clone(),
                before: None,
                after: Some(new.clone()),
            })
            .collect(),
        (Some(JsonValue::Object(b)), None) => b
            .iter()
            .map(|(field, old)| FieldChange {
                field: field.clone(),
                before: Some(old.clone()),
                after: None,
            })
            .collect(),
        (None, None) => Vec::new(),
        (b, a) => {
            if b == a {
                Vec::new()
            } else {
                vec![FieldChange {
                    field: "_root".to_owned(),
                    before: b.cloned(),
                    after: a.cloned(),
                }]
            }
        }
    }
}
