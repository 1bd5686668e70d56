//! Template resolution for node settings.
//!
//! Every string field of a settings shape may be a template. Resolution
//! walks the serialized settings value:
//!
//! - a string that is exactly one placeholder is evaluated to a typed
//!   value, so `"$var{timeout:int}"` lands as a number;
//! - prose fields (model prompts and instructions) render leniently,
//!   embedding error markers instead of failing the node;
//! - every other string renders strictly.

use serde_json::{Map, Value};

use trellis_core::definition::NodeSettings;
use trellis_core::error::Result;
use trellis_expr::{
    evaluate, is_single_placeholder, render_with, render_strict, HierarchyLookup, RenderOptions,
    Scope,
};

/// Fields rendered leniently, by top-level key within the settings map.
const PROSE_FIELDS: &[&str] = &["prompt", "system_instructions"];

/// Shallow-merge an input override into a settings map. Only top-level
/// keys of the inner settings object are replaced; `kind` is fixed.
pub fn merge_override(settings: &mut Value, overrides: &Value) {
    let (Some(target), Some(patch)) = (
        settings.get_mut("settings").and_then(Value::as_object_mut),
        overrides.as_object(),
    ) else {
        return;
    };
    for (k, v) in patch {
        target.insert(k.clone(), v.clone());
    }
}

/// Resolve every templated field of a node's settings against the
/// node's effective scope. Returns the concrete settings handed to the
/// executor.
pub fn resolve_settings(
    settings: Value,
    scope: &Scope,
    lookup: &dyn HierarchyLookup,
) -> Result<NodeSettings> {
    let mut value = settings;

    let max_prompt_words = value
        .get("settings")
        .and_then(|s| s.get("max_prompt_words"))
        .and_then(Value::as_u64)
        .map(|n| n as usize);

    if let Some(inner) = value.get_mut("settings").and_then(Value::as_object_mut) {
        resolve_map(inner, scope, lookup, max_prompt_words)?;
    }

    Ok(serde_json::from_value(value)?)
}

fn resolve_map(
    map: &mut Map<String, Value>,
    scope: &Scope,
    lookup: &dyn HierarchyLookup,
    max_prompt_words: Option<usize>,
) -> Result<()> {
    for (key, value) in map.iter_mut() {
        let lenient = PROSE_FIELDS.contains(&key.as_str());
        let limit = if key == "prompt" { max_prompt_words } else { None };
        resolve_value(value, scope, lookup, lenient, limit)?;
    }
    Ok(())
}

fn resolve_value(
    value: &mut Value,
    scope: &Scope,
    lookup: &dyn HierarchyLookup,
    lenient: bool,
    word_limit: Option<usize>,
) -> Result<()> {
    match value {
        Value::String(s) => {
            if lenient {
                let opts = RenderOptions {
                    max_words: word_limit,
                };
                *value = Value::String(render_with(s, scope, lookup, &opts));
            } else if is_single_placeholder(s) {
                *value = evaluate(s, scope, lookup)?;
            } else if s.contains('$') {
                *value = Value::String(render_strict(s, scope, lookup)?);
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                resolve_value(item, scope, lookup, lenient, None)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                resolve_value(v, scope, lookup, lenient, None)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_core::definition::{CommandSettings, ModelSettings};
    use trellis_expr::NoLookup;

    fn scope(v: Value) -> Scope {
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("scope must be a map"),
        }
    }

    fn raw(settings: NodeSettings) -> Value {
        serde_json::to_value(settings).unwrap()
    }

    #[test]
    fn resolves_command_template_strictly() {
        let s = scope(json!({"target": "src"}));
        let settings = raw(NodeSettings::Command(CommandSettings {
            command: "ls $var{target}".to_string(),
            working_dir: None,
            env: Default::default(),
            timeout_secs: 60,
            fail_on_nonzero: true,
        }));
        let resolved = resolve_settings(settings, &s, &NoLookup).unwrap();
        match resolved {
            NodeSettings::Command(c) => assert_eq!(c.command, "ls src"),
            other => panic!("unexpected settings: {:?}", other),
        }
    }

    #[test]
    fn strict_field_failure_is_an_error() {
        let settings = raw(NodeSettings::Command(CommandSettings {
            command: "ls $var{missing}".to_string(),
            working_dir: None,
            env: Default::default(),
            timeout_secs: 60,
            fail_on_nonzero: true,
        }));
        assert!(resolve_settings(settings, &Scope::new(), &NoLookup).is_err());
    }

    #[test]
    fn prose_fields_render_leniently_with_word_cap() {
        let s = scope(json!({"topic": "rust"}));
        let settings = raw(NodeSettings::Model(ModelSettings {
            model: "m1".to_string(),
            prompt: "Summarize $var{topic} and also $var{missing} words beyond the cap".to_string(),
            system_instructions: None,
            max_prompt_words: Some(4),
            options: None,
        }));
        let resolved = resolve_settings(settings, &s, &NoLookup).unwrap();
        match resolved {
            NodeSettings::Model(m) => {
                // Lenient render embeds a marker, cap keeps four words.
                assert!(m.prompt.starts_with("Summarize rust and [template"));
            }
            other => panic!("unexpected settings: {:?}", other),
        }
    }

    #[test]
    fn single_placeholder_substitutes_typed_value() {
        let s = scope(json!({"secs": 5}));
        let mut settings = raw(NodeSettings::Command(CommandSettings {
            command: "sleep 1".to_string(),
            working_dir: None,
            env: Default::default(),
            timeout_secs: 60,
            fail_on_nonzero: true,
        }));
        settings["settings"]["timeout_secs"] = json!("$expr{secs}");
        let resolved = resolve_settings(settings, &s, &NoLookup).unwrap();
        match resolved {
            NodeSettings::Command(c) => assert_eq!(c.timeout_secs, 5),
            other => panic!("unexpected settings: {:?}", other),
        }
    }

    #[test]
    fn override_replaces_top_level_settings_keys() {
        let mut settings = raw(NodeSettings::Command(CommandSettings {
            command: "echo base".to_string(),
            working_dir: None,
            env: Default::default(),
            timeout_secs: 60,
            fail_on_nonzero: true,
        }));
        merge_override(&mut settings, &json!({"command": "echo override"}));
        assert_eq!(settings["settings"]["command"], "echo override");
        assert_eq!(settings["settings"]["timeout_secs"], 60);
    }
}
