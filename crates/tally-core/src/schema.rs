//! # Schema Translation
//!
//! Bidirectional mapping between the local record shape (camelCase fields
//! plus sync attributes) and the remote row shape (flat lower_snake columns
//! plus remote bookkeeping).
//!
//! ## Translation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Schema Translation                              │
//! │                                                                         │
//! │  LOCAL Record                          REMOTE row                      │
//! │  ────────────                          ──────────                      │
//! │  id: "7"            ── to_remote ──►   local_id: "7"                   │
//! │  remoteId: "r-9"                       id: "r-9"   (only if known)     │
//! │  costPrice: 4.2                        cost_price: 4.2                 │
//! │  syncStatus / version / lastModified   (never sent)                    │
//! │                                                                         │
//! │  Record             ◄── from_remote ── updated_at  → lastModified      │
//! │  syncStatus=synced                     version     → version (def. 1)  │
//! │                                        is_deleted  → deleted flag      │
//! │                                        created_at, store_id (dropped)  │
//! │                                                                         │
//! │  supplierNote       ◄─── unmapped ───► supplierNote  (passed through)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The per-table field tables are static data selected by [`TableKind`].
//! Fields outside a table's map pass through under their own name; only
//! bookkeeping keys are stripped. Missing fields are simply omitted: this is
//! a shape contract, not a validator.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{Record, RemotePayload, SyncStatus, TableKind};

// =============================================================================
// Remote Bookkeeping Columns
// =============================================================================

/// Remote primary key.
pub const REMOTE_ID: &str = "id";
/// Cross-reference to the local id, echoed back by the remote.
pub const REMOTE_LOCAL_ID: &str = "local_id";
pub const REMOTE_CREATED_AT: &str = "created_at";
pub const REMOTE_UPDATED_AT: &str = "updated_at";
/// Soft-delete marker.
pub const REMOTE_IS_DELETED: &str = "is_deleted";
/// Tenant/store identifier.
pub const REMOTE_STORE_ID: &str = "store_id";
pub const REMOTE_VERSION: &str = "version";

/// Remote columns never copied into a local record body.
const REMOTE_BOOKKEEPING: &[&str] = &[
    REMOTE_ID,
    REMOTE_LOCAL_ID,
    REMOTE_CREATED_AT,
    REMOTE_UPDATED_AT,
    REMOTE_IS_DELETED,
    REMOTE_STORE_ID,
    REMOTE_VERSION,
];

/// Local sync attributes never sent in a remote body.
const LOCAL_BOOKKEEPING: &[&str] = &["id", "syncStatus", "lastModified", "remoteId", "version"];

const TRANSACTION_CODE: &str = "transaction_code";
const TRANSACTION_DATE: &str = "transaction_date";
const LOCAL_DATE: &str = "date";

// =============================================================================
// Per-Table Field Maps
// =============================================================================

/// Translation rules for one logical table.
#[derive(Debug)]
pub struct FieldMap {
    /// Remote table (REST resource) name.
    pub remote_table: &'static str,

    /// `(local name, remote name)` pairs.
    pub fields: &'static [(&'static str, &'static str)],

    /// Remote columns that must be sent as `0` rather than omitted or null.
    pub zero_defaults: &'static [&'static str],
}

static PRODUCTS: FieldMap = FieldMap {
    remote_table: "products",
    fields: &[
        ("name", "name"),
        ("sku", "sku"),
        ("barcode", "barcode"),
        ("category", "category"),
        ("description", "description"),
        ("unit", "unit"),
        ("price", "price"),
        ("costPrice", "cost_price"),
        ("stockQuantity", "stock_quantity"),
        ("reorderLevel", "reorder_level"),
        ("isActive", "is_active"),
        ("imageUrl", "image_url"),
    ],
    zero_defaults: &[],
};

static INVENTORY: FieldMap = FieldMap {
    remote_table: "inventory",
    fields: &[
        ("productId", "product_id"),
        ("batchNumber", "batch_number"),
        ("quantity", "quantity"),
        ("costPerUnit", "cost_per_unit"),
        ("supplier", "supplier"),
        ("receivedDate", "received_date"),
        ("expiryDate", "expiry_date"),
        ("location", "location"),
        ("notes", "notes"),
    ],
    zero_defaults: &[],
};

static DISPLAY: FieldMap = FieldMap {
    remote_table: "display_batches",
    fields: &[
        ("productId", "product_id"),
        ("inventoryId", "inventory_id"),
        ("quantityDisplayed", "quantity_displayed"),
        ("quantitySold", "quantity_sold"),
        ("quantityReturned", "quantity_returned"),
        ("quantityDamaged", "quantity_damaged"),
        ("displayDate", "display_date"),
        ("status", "status"),
        ("notes", "notes"),
    ],
    zero_defaults: &[
        "quantity_displayed",
        "quantity_sold",
        "quantity_returned",
        "quantity_damaged",
    ],
};

static TRANSACTIONS: FieldMap = FieldMap {
    remote_table: "transactions",
    fields: &[
        ("items", "items"),
        ("subtotal", "subtotal"),
        ("discount", "discount"),
        ("tax", "tax"),
        ("total", "total"),
        ("paymentMethod", "payment_method"),
        ("amountPaid", "amount_paid"),
        ("changeDue", "change_due"),
        ("customerName", "customer_name"),
        ("cashierName", "cashier_name"),
        ("status", "status"),
        ("notes", "notes"),
    ],
    zero_defaults: &[],
};

static SETTINGS: FieldMap = FieldMap {
    remote_table: "settings",
    fields: &[("key", "key"), ("value", "value")],
    zero_defaults: &[],
};

impl FieldMap {
    /// Remote column for a mapped local field.
    pub fn remote_name(&self, local: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|(l, _)| *l == local)
            .map(|&(_, remote)| remote)
    }

    /// Local field for a mapped remote column.
    pub fn local_name(&self, remote: &str) -> Option<&'static str> {
        self.fields
            .iter()
            .find(|(_, r)| *r == remote)
            .map(|&(local, _)| local)
    }
}

impl TableKind {
    /// Returns the static translation rules for this table.
    pub fn field_map(&self) -> &'static FieldMap {
        match self {
            TableKind::Products => &PRODUCTS,
            TableKind::Inventory => &INVENTORY,
            TableKind::Display => &DISPLAY,
            TableKind::Transactions => &TRANSACTIONS,
            TableKind::Settings => &SETTINGS,
        }
    }

    /// Remote table (REST resource) name.
    pub fn remote_table(&self) -> &'static str {
        self.field_map().remote_table
    }
}

// =============================================================================
// Incoming Record
// =============================================================================

/// A remote row translated into local shape, before the reconciler has
/// decided which local record (if any) it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRecord {
    /// Local id supplied by the remote (`local_id`, or the transaction code).
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub version: i64,
    /// Remote soft-delete marker.
    pub deleted: bool,
    pub fields: Map<String, Value>,
}

impl IncomingRecord {
    /// Materialises a synced local record under the given id.
    pub fn into_record(self, id: impl Into<String>) -> Record {
        Record {
            id: id.into(),
            remote_id: self.remote_id,
            sync_status: SyncStatus::Synced,
            last_modified: self.last_modified,
            version: self.version,
            fields: self.fields,
        }
    }

    /// Materialises under the remote-supplied local id, if any.
    pub fn into_correlated_record(self) -> Option<Record> {
        let id = self.local_id.clone()?;
        Some(self.into_record(id))
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Translates a local record into the remote row shape.
///
/// The remote primary key is included only when `remoteId` is known, which
/// tells the remote client to update rather than insert.
pub fn to_remote(table: TableKind, record: &Record) -> RemotePayload {
    let schema = table.field_map();
    let mut out = Map::new();

    for (name, value) in &record.fields {
        if schema.remote_name(name).is_some()
            || is_bookkeeping(name)
            || (table == TableKind::Transactions && name == LOCAL_DATE)
        {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    for &(local, remote) in schema.fields {
        if let Some(value) = record.fields.get(local) {
            out.insert(remote.to_string(), value.clone());
        }
    }
    apply_zero_defaults(schema, &mut out);

    if table == TableKind::Transactions {
        if !is_numeric_id(&record.id) {
            out.insert(TRANSACTION_CODE.to_string(), Value::String(record.id.clone()));
        }
        if let Some(date) = record.fields.get(LOCAL_DATE) {
            out.insert(TRANSACTION_DATE.to_string(), date.clone());
        }
    }

    out.insert(REMOTE_LOCAL_ID.to_string(), Value::String(record.id.clone()));
    if let Some(remote_id) = &record.remote_id {
        out.insert(REMOTE_ID.to_string(), Value::String(remote_id.clone()));
    }

    out
}

/// Translates a remote row into local shape.
pub fn from_remote(table: TableKind, payload: &RemotePayload) -> IncomingRecord {
    let schema = table.field_map();

    let mut fields = Map::new();
    for (name, value) in payload {
        if schema.local_name(name).is_some()
            || is_bookkeeping(name)
            || (table == TableKind::Transactions
                && (name == TRANSACTION_CODE || name == TRANSACTION_DATE))
        {
            continue;
        }
        fields.insert(name.clone(), value.clone());
    }
    for &(local, remote_name) in schema.fields {
        if let Some(value) = payload.get(remote_name) {
            fields.insert(local.to_string(), value.clone());
        }
    }

    let correlation = id_string(payload.get(REMOTE_LOCAL_ID));
    let local_id = if table == TableKind::Transactions {
        if let Some(date) = payload.get(TRANSACTION_DATE) {
            fields.insert(LOCAL_DATE.to_string(), date.clone());
        }
        id_string(payload.get(TRANSACTION_CODE)).or(correlation)
    } else {
        correlation
    };

    IncomingRecord {
        local_id,
        remote_id: id_string(payload.get(REMOTE_ID)),
        last_modified: payload
            .get(REMOTE_UPDATED_AT)
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        version: payload
            .get(REMOTE_VERSION)
            .and_then(Value::as_i64)
            .unwrap_or(1),
        deleted: payload
            .get(REMOTE_IS_DELETED)
            .and_then(Value::as_bool)
            .unwrap_or(false),
        fields,
    }
}

/// Reads an identifier that may arrive as a string or a number.
pub fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_bookkeeping(name: &str) -> bool {
    LOCAL_BOOKKEEPING.contains(&name) || REMOTE_BOOKKEEPING.contains(&name)
}

fn apply_zero_defaults(schema: &FieldMap, row: &mut RemotePayload) {
    for &column in schema.zero_defaults {
        match row.get(column) {
            None | Some(Value::Null) => {
                row.insert(column.to_string(), Value::from(0));
            }
            Some(_) => {}
        }
    }
}

fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_digit())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> RemotePayload {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_to_remote_renames_and_strips_bookkeeping() {
        let mut record = Record::new("7")
            .with_field("name", "Feed")
            .with_field("costPrice", 4.2)
            .with_field("isActive", true);
        record.version = 3;
        record.last_modified = Some(Utc::now());

        let out = to_remote(TableKind::Products, &record);

        assert_eq!(out["name"], "Feed");
        assert_eq!(out["cost_price"], 4.2);
        assert_eq!(out["is_active"], true);
        assert_eq!(out["local_id"], "7");
        assert!(!out.contains_key("id"), "insert must not carry a primary key");
        for key in ["syncStatus", "lastModified", "version", "remoteId", "costPrice"] {
            assert!(!out.contains_key(key), "{key} leaked to remote");
        }
    }

    #[test]
    fn test_to_remote_includes_primary_key_when_known() {
        let mut record = Record::new("7").with_field("name", "Feed");
        record.remote_id = Some("42".into());

        let out = to_remote(TableKind::Products, &record);
        assert_eq!(out["id"], "42");
    }

    #[test]
    fn test_unmapped_fields_pass_through() {
        let record = Record::new("1")
            .with_field("name", "Feed")
            .with_field("supplierNote", "call before noon")
            .with_field("syncStatus", "pending");
        let out = to_remote(TableKind::Products, &record);
        assert_eq!(out["supplierNote"], "call before noon");
        assert!(!out.contains_key("syncStatus"));

        let incoming = from_remote(
            TableKind::Products,
            &payload(json!({ "id": "r-1", "name": "Feed", "brand": "Acme", "store_id": "s" })),
        );
        assert_eq!(incoming.fields["brand"], "Acme");
        assert_eq!(incoming.fields["name"], "Feed");
        assert!(!incoming.fields.contains_key("store_id"));
    }

    #[test]
    fn test_mapped_name_wins_over_raw_column() {
        let record = Record::new("1")
            .with_field("costPrice", 4.0)
            .with_field("cost_price", 9.0);
        let out = to_remote(TableKind::Products, &record);
        assert_eq!(out["cost_price"], 4.0);
    }

    #[test]
    fn test_transaction_code_and_date() {
        let record = Record::new("TX-20240101-0001")
            .with_field("total", 150)
            .with_field("date", "2024-01-01T09:30:00Z");

        let out = to_remote(TableKind::Transactions, &record);
        assert_eq!(out["transaction_code"], "TX-20240101-0001");
        assert_eq!(out["transaction_date"], "2024-01-01T09:30:00Z");
        assert!(!out.contains_key("date"));

        let numeric = Record::new("15").with_field("total", 1);
        let out = to_remote(TableKind::Transactions, &numeric);
        assert!(!out.contains_key("transaction_code"));
        assert_eq!(out["local_id"], "15");
    }

    #[test]
    fn test_display_quantities_default_to_zero() {
        let record = Record::new("3")
            .with_field("quantityDisplayed", 10)
            .with_field("quantitySold", Value::Null);

        let out = to_remote(TableKind::Display, &record);
        assert_eq!(out["quantity_displayed"], 10);
        assert_eq!(out["quantity_sold"], 0);
        assert_eq!(out["quantity_returned"], 0);
        assert_eq!(out["quantity_damaged"], 0);
    }

    #[test]
    fn test_zero_default_is_display_only() {
        let record = Record::new("3").with_field("name", "Hay");
        let out = to_remote(TableKind::Products, &record);
        assert!(!out.contains_key("price"));
        assert!(!out.contains_key("stock_quantity"));

        let out = to_remote(TableKind::Inventory, &Record::new("4"));
        assert!(!out.contains_key("quantity"));
    }

    #[test]
    fn test_from_remote_sets_bookkeeping() {
        let incoming = from_remote(
            TableKind::Products,
            &payload(json!({
                "id": 42,
                "local_id": "7",
                "name": "Feed Premium",
                "cost_price": 5.0,
                "store_id": "store-1",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-02-01T10:00:00.123456+00:00",
                "is_deleted": false,
                "version": 2
            })),
        );

        assert_eq!(incoming.local_id.as_deref(), Some("7"));
        assert_eq!(incoming.remote_id.as_deref(), Some("42"));
        assert_eq!(incoming.version, 2);
        assert!(!incoming.deleted);
        assert!(incoming.last_modified.is_some());
        assert_eq!(incoming.fields["name"], "Feed Premium");
        assert_eq!(incoming.fields["costPrice"], 5.0);
        for key in ["store_id", "created_at", "updated_at", "is_deleted", "version", "id", "local_id"] {
            assert!(!incoming.fields.contains_key(key), "{key} leaked into fields");
        }

        let record = incoming.into_record("7");
        assert_eq!(record.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_from_remote_does_not_invent_display_quantities() {
        let incoming = from_remote(
            TableKind::Display,
            &payload(json!({ "id": "d1", "quantity_displayed": 5 })),
        );
        assert_eq!(incoming.fields["quantityDisplayed"], 5);
        for key in ["quantitySold", "quantityReturned", "quantityDamaged"] {
            assert!(!incoming.fields.contains_key(key), "{key} was defaulted on pull");
        }
    }

    #[test]
    fn test_from_remote_version_defaults_to_one() {
        let incoming = from_remote(TableKind::Inventory, &payload(json!({ "id": "a" })));
        assert_eq!(incoming.version, 1);
        assert!(incoming.local_id.is_none());
        assert!(incoming.last_modified.is_none());
    }

    #[test]
    fn test_from_remote_transaction_uses_code() {
        let incoming = from_remote(
            TableKind::Transactions,
            &payload(json!({
                "id": "uuid-1",
                "local_id": "99",
                "transaction_code": "TX-1",
                "transaction_date": "2024-03-03T12:00:00Z",
                "payment_method": "cash"
            })),
        );
        assert_eq!(incoming.local_id.as_deref(), Some("TX-1"));
        assert_eq!(incoming.fields["date"], "2024-03-03T12:00:00Z");
        assert_eq!(incoming.fields["paymentMethod"], "cash");
        assert!(!incoming.fields.contains_key("transaction_code"));
    }

    #[test]
    fn test_from_remote_soft_delete_flag() {
        let incoming = from_remote(
            TableKind::Products,
            &payload(json!({ "id": "1", "is_deleted": true })),
        );
        assert!(incoming.deleted);
    }

    #[test]
    fn test_round_trip_preserves_user_fields() {
        let rows = [
            (
                TableKind::Products,
                json!({"id": "p1", "local_id": "7", "name": "Feed", "price": 12.5,
                       "cost_price": null, "is_active": true, "version": 4,
                       "updated_at": "2024-01-01T00:00:00Z", "store_id": "s"}),
            ),
            (
                TableKind::Inventory,
                json!({"id": 10, "product_id": "7", "quantity": 40, "expiry_date": "2025-01-01",
                       "shelf": "B2"}),
            ),
            (
                TableKind::Display,
                json!({"id": "d1", "local_id": "3", "quantity_displayed": 5, "quantity_sold": 1,
                       "quantity_returned": 0, "quantity_damaged": 0, "status": "active"}),
            ),
            (
                TableKind::Transactions,
                json!({"id": "t1", "transaction_code": "TX-9", "transaction_date": "2024-01-02",
                       "items": [{"productId": "7", "qty": 2}], "total": 25}),
            ),
            (
                TableKind::Settings,
                json!({"id": "s1", "local_id": "tax_rate", "key": "tax_rate", "value": "0.12"}),
            ),
        ];

        for (table, row) in rows {
            let first = from_remote(table, &payload(row));
            let id = first.local_id.clone().unwrap_or_else(|| "fresh".to_string());
            let record = first.clone().into_record(id);

            let second = from_remote(table, &to_remote(table, &record));
            assert_eq!(second.fields, first.fields, "round trip drifted for {table}");
            assert_eq!(second.remote_id, first.remote_id);
        }
    }

    #[test]
    fn test_id_string_accepts_numbers_and_strings() {
        assert_eq!(id_string(Some(&json!(7))), Some("7".to_string()));
        assert_eq!(id_string(Some(&json!("7"))), Some("7".to_string()));
        assert_eq!(id_string(Some(&json!(""))), None);
        assert_eq!(id_string(Some(&Value::Null)), None);
        assert_eq!(id_string(None), None);
    }
}
