//! Settings Reload Watcher (C11): diffs two [`Config`] snapshots and emits
//! one structured `settings_reload` log line restricted to the keys that
//! actually changed. Emits nothing when the snapshots are equal — reloading
//! an unchanged file must be silent (spec.md §4.9).

use crate::config::Config;
use crate::logutil::StructuredLogSink;
use serde_json::{json, Value};

/// Compares the top-level sections of two configs and returns a
/// `{old, new}` object per changed section, keyed by section name. An
/// unchanged section is omitted entirely rather than echoed back.
pub fn diff(previous: &Config, current: &Config) -> Value {
    let mut changes = serde_json::Map::new();

    macro_rules! section {
        ($name:literal, $field:ident) => {
            if previous.$field != current.$field {
                changes.insert(
                    $name.to_string(),
                    json!({
                        "old": serde_json::to_value(&previous.$field).unwrap_or(Value::Null),
                        "new": serde_json::to_value(&current.$field).unwrap_or(Value::Null),
                    }),
                );
            }
        };
    }

    section!("scheduler", scheduler);
    section!("cooldown", cooldown);
    section!("quotas", quotas);
    section!("dedupe", dedupe);
    section!("retry", retry);
    section!("metrics_export", metrics_export);
    section!("jobs", jobs);
    section!("providers", providers);
    section!("weather", weather);
    section!("news", news);
    section!("logging", logging);

    Value::Object(changes)
}

/// Applies the reload: if `previous` and `current` differ, writes one
/// `settings_reload` event to `audit_log` and returns `true`. A no-diff
/// reload returns `false` and writes nothing (P5: reload idempotence).
pub fn apply(previous: &Config, current: &Config, audit_log: &StructuredLogSink) -> bool {
    let changed = diff(previous, current);
    let Some(obj) = changed.as_object() else {
        return false;
    };
    if obj.is_empty() {
        return false;
    }

    let line = json!({
        "event": "settings_reload",
        "previous": serde_json::to_value(previous).unwrap_or(Value::Null),
        "current": serde_json::to_value(current).unwrap_or(Value::Null),
        "diff": changed,
    });
    audit_log.write_line(&line.to_string());
    true
}
