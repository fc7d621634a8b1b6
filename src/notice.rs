//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `load_failed_notice`.
//! Role: Shared contract helper for CLI diagnostics such as maps that failed to load.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use serde_json::{Map, Value, json};

use crate::core::loader::LoadError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub map: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("map".to_string(), json!(notice.map));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

/// Notice for a map that `load` could not bring into the context.
pub fn load_failed_notice(err: &LoadError, cmd: &str, time: String) -> Notice {
    let source = err.storage_error();
    let mut details = Map::new();
    details.insert("kind".to_string(), json!(format!("{:?}", source.kind())));
    if let Some(message) = source.message() {
        details.insert("cause".to_string(), json!(message));
    }
    if let Some(path) = source.path() {
        details.insert("path".to_string(), json!(path.display().to_string()));
    }

    Notice {
        kind: "load_failed".to_string(),
        time,
        cmd: cmd.to_string(),
        map: err.map().to_string(),
        message: err.operation().to_string(),
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::{Notice, load_failed_notice, notice_json};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::loader::LoadError;
    use serde_json::{Map, Value};

    #[test]
    fn notice_json_has_required_fields() {
        let mut details = Map::new();
        details.insert("kind".to_string(), Value::from("NotFound"));

        let notice = Notice {
            kind: "load_failed".to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            cmd: "load".to_string(),
            map: "elevation in PERMANENT".to_string(),
            message: "can't read color table".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("load_failed"));
        assert_eq!(
            obj.get("time").and_then(|v| v.as_str()),
            Some("2026-02-01T00:00:00Z")
        );
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("load"));
        assert_eq!(
            obj.get("map").and_then(|v| v.as_str()),
            Some("elevation in PERMANENT")
        );
        assert_eq!(
            obj.get("message").and_then(|v| v.as_str()),
            Some("can't read color table")
        );
        assert!(obj.get("details").and_then(|v| v.as_object()).is_some());
    }

    #[test]
    fn load_failed_notice_carries_storage_details() {
        let err = LoadError::RasterUnopenable {
            map: "soils in user1".to_string(),
            source: Error::new(ErrorKind::Busy)
                .with_message("locked")
                .with_path("/loc/user1/cell/soils"),
        };
        let notice = load_failed_notice(&err, "load", "t".to_string());
        assert_eq!(notice.map, "soils in user1");
        assert_eq!(notice.message, "can't open raster map");
        assert_eq!(notice.details["kind"], "Busy");
        assert_eq!(notice.details["cause"], "locked");
        assert_eq!(notice.details["path"], "/loc/user1/cell/soils");
    }
}
