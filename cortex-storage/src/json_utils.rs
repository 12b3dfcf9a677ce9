//! Shared helper for the one SurrealDB quirk every table in this crate and
//! `router`'s store run into: `id` is a reserved field that SurrealDB
//! rewrites into a `Thing` (table:key) on write, not a plain string or UUID.
//! `CortexId` needs to round-trip through storage untouched, so every
//! `content`/`create` call stashes it under `cortex_id` first and every read
//! path restores it before deserializing back into the domain type.

use serde_json::Value;

/// Move `json[from]` to `json[to]`, if `json` is an object and `from` is
/// present. No-op (returns `false`) otherwise.
pub fn rename_id_field(json: &mut Value, from: &str, to: &str) -> bool {
    if let Some(obj) = json.as_object_mut() {
        if let Some(id_val) = obj.remove(from) {
            obj.insert(to.to_string(), id_val);
            return true;
        }
    }
    false
}

/// Reverse of [`prepare_for_db`], applied after reading a row back out.
pub fn restore_id_field(json: &mut Value) -> bool {
    rename_id_field(json, "cortex_id", "id")
}

/// Applied to a domain type's serialized form just before it's written, so
/// its `id` field doesn't collide with SurrealDB's own.
pub fn prepare_for_db(json: &mut Value) -> bool {
    rename_id_field(json, "id", "cortex_id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prepare_for_db_moves_id_out_of_the_way() {
        let mut row = json!({ "id": "op-123", "description": "research weather" });
        assert!(prepare_for_db(&mut row));
        assert_eq!(row["cortex_id"], "op-123");
        assert!(row.get("id").is_none());
    }

    #[test]
    fn prepare_for_db_is_a_noop_without_an_id_field() {
        let mut row = json!({ "description": "research weather" });
        assert!(!prepare_for_db(&mut row));
        assert!(row.get("cortex_id").is_none());
    }

    #[test]
    fn rename_id_field_ignores_non_object_values() {
        let mut not_an_object = json!(["op-123"]);
        assert!(!rename_id_field(&mut not_an_object, "id", "cortex_id"));
    }

    #[test]
    fn a_row_round_trips_through_prepare_and_restore() {
        let mut row = json!({ "id": "op-123", "status": "completed" });
        assert!(prepare_for_db(&mut row));
        assert!(restore_id_field(&mut row));
        assert_eq!(row["id"], "op-123");
        assert!(row.get("cortex_id").is_none());
        assert_eq!(row["status"], "completed");
    }
}
