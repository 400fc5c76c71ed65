//! Change stream types.

use futures::stream::BoxStream;
use serde_json::Value;

use crate::errors::StoreError;

/// One raw change: the record state before and after.
///
/// Insert = `(None, Some)`, update = `(Some, Some)`, delete = `(Some, None)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    /// State before the change.
    pub old_value: Option<Value>,
    /// State after the change.
    pub new_value: Option<Value>,
}

impl Change {
    /// Change for a record that appeared.
    pub fn added(record: Value) -> Self {
        Self {
            old_value: None,
            new_value: Some(record),
        }
    }

    /// Restrict both sides of the change to records matching `filter`.
    ///
    /// A record that moves out of the filter becomes a removal, one that
    /// moves in becomes an addition. Returns `None` when neither side
    /// matches.
    pub fn restrict(self, filter: Option<&FieldFilter>) -> Option<Self> {
        let Some(filter) = filter else {
            return Some(self);
        };
        let old_value = self.old_value.filter(|v| filter.matches(v));
        let new_value = self.new_value.filter(|v| filter.matches(v));
        if old_value.is_none() && new_value.is_none() {
            return None;
        }
        Some(Self {
            old_value,
            new_value,
        })
    }
}

/// Equality filter on one top-level record field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    /// Field name, e.g. `"channelId"`.
    pub field: String,
    /// Value the field must equal.
    pub value: Value,
}

impl FieldFilter {
    /// Build a filter `field == value`.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether `record` satisfies the filter.
    pub fn matches(&self, record: &Value) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// Ordering of the initial snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    /// Field name to sort on.
    pub field: String,
    /// Sort descending instead of ascending.
    pub descending: bool,
}

impl OrderBy {
    /// Descending order on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Options for opening a change stream.
#[derive(Clone, Debug, Default)]
pub struct ChangeOptions {
    /// Emit every existing matching record as an addition before live changes.
    pub include_initial: bool,
    /// Only report records matching this filter.
    pub filter: Option<FieldFilter>,
    /// Order of the initial snapshot. Insertion order when `None`.
    pub order_by: Option<OrderBy>,
}

impl ChangeOptions {
    /// Snapshot first, then live changes.
    pub fn with_initial() -> Self {
        Self {
            include_initial: true,
            ..Self::default()
        }
    }

    /// Set the filter.
    #[must_use]
    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the snapshot order.
    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }
}

/// A live stream of raw changes. Dropping it releases the subscription.
pub type ChangeStream = BoxStream<'static, Result<Change, StoreError>>;
