use crate::calendar::{ResolveCaps, HOLIDAY_DAY_CAP, TERM_DAY_CAP};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::replicate::{ReplicationMode, MAX_REPLICATION_COUNT};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Ordering,
    Kitchen,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "ordering" => Some(Self::Ordering),
            "kitchen" => Some(Self::Kitchen),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Ordering => "setup.ordering",
            Self::Kitchen => "setup.kitchen",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Ordering => json!({
            "defaultCopyDays": 3,
            "defaultRepeatWeeks": 3,
            "maxReplicationCount": MAX_REPLICATION_COUNT,
            "termDayCap": TERM_DAY_CAP,
            "holidayDayCap": HOLIDAY_DAY_CAP
        }),
        SetupSection::Kitchen => json!({
            "includeEmptyGroups": false,
            "sortBy": "group"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Ordering => match k.as_str() {
                "defaultCopyDays" | "defaultRepeatWeeks" | "maxReplicationCount" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_REPLICATION_COUNT)?),
                    );
                }
                "termDayCap" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, TERM_DAY_CAP as i64)?),
                    );
                }
                "holidayDayCap" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, HOLIDAY_DAY_CAP as i64)?),
                    );
                }
                _ => return Err(format!("unknown ordering field: {}", k)),
            },
            SetupSection::Kitchen => match k.as_str() {
                "includeEmptyGroups" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "sortBy" => {
                    let s = parse_string_max(v, k, 16)?.to_ascii_lowercase();
                    if s != "group" && s != "count" {
                        return Err("sortBy must be one of: group, count".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown kitchen field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(
    conn: &rusqlite::Connection,
    section: SetupSection,
) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed stored values fall back to defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), %msg, "ignoring stored setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

fn field_i64(obj: &Value, key: &str, fallback: i64) -> i64 {
    obj.get(key).and_then(|v| v.as_i64()).unwrap_or(fallback)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingSettings {
    pub default_copy_days: i64,
    pub default_repeat_weeks: i64,
    pub max_replication_count: i64,
    pub term_day_cap: usize,
    pub holiday_day_cap: usize,
}

impl OrderingSettings {
    pub fn caps(&self) -> ResolveCaps {
        ResolveCaps {
            term_days: self.term_day_cap,
            holiday_days: self.holiday_day_cap,
        }
    }

    /// Count used when a request leaves `n` out, never above the workspace limit.
    pub fn default_count(&self, mode: ReplicationMode) -> i64 {
        let preferred = match mode {
            ReplicationMode::NextDays => self.default_copy_days,
            ReplicationMode::SameWeekday => self.default_repeat_weeks,
        };
        preferred.min(self.max_replication_count)
    }
}

pub fn ordering_settings(conn: &rusqlite::Connection) -> anyhow::Result<OrderingSettings> {
    let v = load_section(conn, SetupSection::Ordering)?;
    Ok(OrderingSettings {
        default_copy_days: field_i64(&v, "defaultCopyDays", 3),
        default_repeat_weeks: field_i64(&v, "defaultRepeatWeeks", 3),
        max_replication_count: field_i64(&v, "maxReplicationCount", MAX_REPLICATION_COUNT),
        term_day_cap: field_i64(&v, "termDayCap", TERM_DAY_CAP as i64).max(1) as usize,
        holiday_day_cap: field_i64(&v, "holidayDayCap", HOLIDAY_DAY_CAP as i64).max(1) as usize,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KitchenSort {
    Group,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KitchenSettings {
    pub include_empty_groups: bool,
    pub sort_by: KitchenSort,
}

pub fn kitchen_settings(conn: &rusqlite::Connection) -> anyhow::Result<KitchenSettings> {
    let v = load_section(conn, SetupSection::Kitchen)?;
    let sort_by = match v.get("sortBy").and_then(|s| s.as_str()) {
        Some("count") => KitchenSort::Count,
        _ => KitchenSort::Group,
    };
    Ok(KitchenSettings {
        include_empty_groups: v
            .get("includeEmptyGroups")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
        sort_by,
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let ordering = match load_section(conn, SetupSection::Ordering) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let kitchen = match load_section(conn, SetupSection::Kitchen) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "ordering": ordering,
            "kitchen": kitchen
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let admin = crate::ipc::helpers::identity(req)
        .and_then(|who| crate::access::require_admin(&who).map_err(Into::into));
    if let Err(e) = admin {
        return e.response(&req.id);
    }
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().expect("memory db");
        db::apply_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn defaults_without_stored_values() {
        let conn = memory();
        let s = ordering_settings(&conn).expect("ordering");
        assert_eq!(s.default_count(ReplicationMode::NextDays), 3);
        assert_eq!(s.caps(), ResolveCaps::default());
        let k = kitchen_settings(&conn).expect("kitchen");
        assert_eq!(k.sort_by, KitchenSort::Group);
        assert!(!k.include_empty_groups);
    }

    #[test]
    fn patch_rejects_unknown_and_out_of_range() {
        let mut cur = default_section(SetupSection::Ordering);
        let bad = json!({ "maxReplicationCount": 11 });
        assert!(merge_section_patch(SetupSection::Ordering, &mut cur, bad.as_object().expect("obj")).is_err());
        let unknown = json!({ "colour": "red" });
        assert!(merge_section_patch(SetupSection::Ordering, &mut cur, unknown.as_object().expect("obj")).is_err());
        let good = json!({ "defaultRepeatWeeks": 5 });
        merge_section_patch(SetupSection::Ordering, &mut cur, good.as_object().expect("obj")).expect("merge");
        assert_eq!(cur["defaultRepeatWeeks"], json!(5));
    }

    #[test]
    fn stored_values_feed_typed_settings() {
        let conn = memory();
        db::settings_set_json(
            &conn,
            "setup.ordering",
            &json!({ "defaultCopyDays": 7, "termDayCap": 30 }),
        )
        .expect("store");
        let s = ordering_settings(&conn).expect("ordering");
        assert_eq!(s.default_copy_days, 7);
        assert_eq!(s.caps().term_days, 30);
        assert_eq!(s.caps().holiday_days, HOLIDAY_DAY_CAP);
    }

    #[test]
    fn default_count_is_capped_by_max_replication() {
        let conn = memory();
        db::settings_set_json(
            &conn,
            "setup.ordering",
            &json!({ "defaultCopyDays": 6, "defaultRepeatWeeks": 2, "maxReplicationCount": 4 }),
        )
        .expect("store");
        let s = ordering_settings(&conn).expect("ordering");
        assert_eq!(s.default_count(ReplicationMode::NextDays), 4);
        assert_eq!(s.default_count(ReplicationMode::SameWeekday), 2);
    }
}
