//! Classification of raw before/after record states into change events.

use std::fmt;

use serde_json::Value;

use crate::message::Message;

/// What happened to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Record appeared (insert, or initial snapshot row).
    Add,
    /// Record changed in place.
    Edit,
    /// Record disappeared.
    Remove,
}

impl Operation {
    /// Wire spelling used in event names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Edit => "edit",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified change to one record of one entity kind.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// Entity kind, e.g. `"channel"`.
    pub entity_kind: String,
    /// Add, edit or remove.
    pub operation: Operation,
    /// The record state the client should see: the new value for add/edit,
    /// the old value for remove.
    pub payload: Value,
}

impl ChangeEvent {
    /// Classify a raw `(old, new)` pair.
    ///
    /// | old | new | result |
    /// |-----|-----|--------|
    /// | none | some | add(new) |
    /// | some | none | remove(old) |
    /// | some | some | edit(new) |
    /// | none | none | `None` |
    pub fn classify(entity_kind: &str, old: Option<Value>, new: Option<Value>) -> Option<Self> {
        let (operation, payload) = match (old, new) {
            (None, Some(new)) => (Operation::Add, new),
            (Some(old), None) => (Operation::Remove, old),
            (Some(_), Some(new)) => (Operation::Edit, new),
            (None, None) => return None,
        };
        Some(Self {
            entity_kind: entity_kind.to_owned(),
            operation,
            payload,
        })
    }

    /// Event name as seen by clients: `"<entity_kind> <operation>"`.
    pub fn event_name(&self) -> String {
        format!("{} {}", self.entity_kind, self.operation)
    }

    /// Wrap into an outbound envelope.
    pub fn into_message(self) -> Message {
        let name = self.event_name();
        Message::new(name, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn insert_is_add_of_new_value() {
        let ev = ChangeEvent::classify("channel", None, Some(json!({"id": "c1"}))).unwrap();
        assert_eq!(ev.operation, Operation::Add);
        assert_eq!(ev.payload["id"], "c1");
        assert_eq!(ev.event_name(), "channel add");
    }

    #[test]
    fn delete_is_remove_of_old_value() {
        let ev = ChangeEvent::classify("user", Some(json!({"id": "u1"})), None).unwrap();
        assert_eq!(ev.operation, Operation::Remove);
        assert_eq!(ev.payload["id"], "u1");
        assert_eq!(ev.event_name(), "user remove");
    }

    #[test]
    fn update_is_edit_of_new_value() {
        let ev = ChangeEvent::classify(
            "user",
            Some(json!({"id": "u1", "name": "old"})),
            Some(json!({"id": "u1", "name": "new"})),
        )
        .unwrap();
        assert_eq!(ev.operation, Operation::Edit);
        assert_eq!(ev.payload["name"], "new");
    }

    #[test]
    fn both_absent_is_skipped() {
        assert!(ChangeEvent::classify("channel", None, None).is_none());
    }

    #[test]
    fn into_message_uses_event_name() {
        let msg = ChangeEvent::classify("message", None, Some(json!({"body": "hi"})))
            .unwrap()
            .into_message();
        assert_eq!(msg.name, "message add");
        assert_eq!(msg.data["body"], "hi");
    }

    fn record() -> impl Strategy<Value = Option<Value>> {
        proptest::option::of(any::<i64>().prop_map(|n| json!({ "n": n })))
    }

    proptest! {
        #[test]
        fn classification_is_total(old in record(), new in record()) {
            let result = ChangeEvent::classify("k", old.clone(), new.clone());
            match (old, new) {
                (None, None) => prop_assert!(result.is_none()),
                (None, Some(n)) => {
                    let ev = result.unwrap();
                    prop_assert_eq!(ev.operation, Operation::Add);
                    prop_assert_eq!(ev.payload, n);
                }
                (Some(o), None) => {
                    let ev = result.unwrap();
                    prop_assert_eq!(ev.operation, Operation::Remove);
                    prop_assert_eq!(ev.payload, o);
                }
                (Some(_), Some(n)) => {
                    let ev = result.unwrap();
                    prop_assert_eq!(ev.operation, Operation::Edit);
                    prop_assert_eq!(ev.payload, n);
                }
            }
        }
    }
}
