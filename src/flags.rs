// src/flags.rs
// Command-line flag generation from a declarative settings schema

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

/// Placeholder substituted with the configured value
pub const PLACEHOLDER: &str = "%s";

/// User configuration: setting id -> value
pub type SettingsMap = BTreeMap<String, String>;

/// One entry of a client's settings schema
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Flag template; `%s` is replaced by the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<SettingOptions>,
    /// UI hint only (`directory`, ...)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Permissible values of a setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingOptions {
    /// Flat list of values sharing the setting's `flag` template
    Simple(Vec<String>),
    /// Per-value flags
    Full(Vec<SettingOption>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
}

impl SettingSpec {
    /// Setting with a single flag template
    pub fn flag(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flag: Some(template.into()),
            ..Default::default()
        }
    }

    /// Setting with a flat option list sharing one template
    pub fn simple_options(
        id: impl Into<String>,
        values: &[&str],
        template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            flag: Some(template.into()),
            options: Some(SettingOptions::Simple(
                values.iter().map(|v| v.to_string()).collect(),
            )),
            ..Default::default()
        }
    }

    /// Setting with a `{value, flag}` option table
    pub fn choices(id: impl Into<String>, options: Vec<SettingOption>) -> Self {
        Self {
            id: id.into(),
            options: Some(SettingOptions::Full(options)),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

impl SettingOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: Some(label.into()),
            flag: Some(flag.into()),
        }
    }
}

/// Generate argv tokens for `config` against `schema`.
///
/// Settings are visited in schema order. A setting with neither a
/// configured value nor a default contributes nothing. Output keeps
/// duplicates and is deterministic for identical inputs.
pub fn generate_flags(config: &SettingsMap, schema: &[SettingSpec]) -> Result<Vec<String>> {
    let mut flags = Vec::new();

    for spec in schema {
        let Some(value) = config.get(&spec.id).or(spec.default.as_ref()) else {
            continue;
        };

        let template = match &spec.options {
            None => spec.flag.as_deref().ok_or_else(|| {
                GridError::Schema(format!("missing flag key for field {}", spec.id))
            })?,
            Some(SettingOptions::Simple(_)) => spec.flag.as_deref().ok_or_else(|| {
                GridError::Schema(format!("missing flag key for option {}", value))
            })?,
            Some(SettingOptions::Full(options)) => {
                let Some(option) = options.iter().find(|o| &o.value == value) else {
                    continue;
                };
                option.flag.as_deref().ok_or_else(|| {
                    GridError::Schema(format!("missing flag key for option {}", value))
                })?
            }
        };

        flags.extend(expand_template(template, value));
    }

    Ok(flags)
}

/// Defaults declared by the schema, keyed by setting id
pub fn default_settings(schema: &[SettingSpec]) -> SettingsMap {
    schema
        .iter()
        .filter_map(|spec| Some((spec.id.clone(), spec.default.clone()?)))
        .collect()
}

/// User values layered over schema defaults
pub fn merge_with_defaults(user: &SettingsMap, schema: &[SettingSpec]) -> SettingsMap {
    let mut merged = default_settings(schema);
    for (key, value) in user {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Split a template into argv tokens and substitute the value.
///
/// Substitution happens per token so a value with spaces stays one token.
/// An empty value for a template that needs one yields no tokens.
fn expand_template(template: &str, value: &str) -> Vec<String> {
    let tokens = tokenize(template);
    if value.is_empty() && tokens.iter().any(|t| t.contains(PLACEHOLDER)) {
        return Vec::new();
    }
    tokens
        .into_iter()
        .map(|token| token.replace(PLACEHOLDER, value))
        .filter(|token| !token.is_empty())
        .collect()
}

/// Whitespace split that keeps quoted runs together (quotes removed)
fn tokenize(template: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut in_token = false;

    for c in template.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: serde_json::Value) -> Vec<SettingSpec> {
        serde_json::from_value(value).unwrap()
    }

    fn config(pairs: &[(&str, &str)]) -> SettingsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_settings() {
        let flags = generate_flags(&SettingsMap::new(), &[]).unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_basic_field() {
        let settings = schema(json!([{ "id": "network", "flag": "--rinkeby" }]));
        let flags = generate_flags(&config(&[("network", "")]), &settings).unwrap();
        assert_eq!(flags, vec!["--rinkeby"]);
    }

    #[test]
    fn test_several_boolean_fields() {
        let settings = schema(json!([
            { "id": "network", "flag": "--rinkeby" },
            { "id": "debug", "flag": "--debug" },
            { "id": "nodiscovery", "flag": "--no-discovery" }
        ]));
        let input = config(&[("network", ""), ("debug", ""), ("nodiscovery", "")]);
        let flags = generate_flags(&input, &settings).unwrap();
        assert_eq!(flags, vec!["--rinkeby", "--debug", "--no-discovery"]);
    }

    #[test]
    fn test_text_values() {
        let settings = schema(json!([
            { "id": "cache", "flag": "--cache %s" },
            { "id": "syncmode", "flag": "--syncmode %s" }
        ]));
        let input = config(&[("cache", "1024"), ("syncmode", "light")]);
        let flags = generate_flags(&input, &settings).unwrap();
        assert_eq!(flags, vec!["--cache", "1024", "--syncmode", "light"]);
    }

    #[test]
    fn test_simple_options() {
        let settings = schema(json!([
            { "id": "syncmode", "options": ["fast", "full", "light"], "flag": "--syncmode %s" }
        ]));
        let flags = generate_flags(&config(&[("syncmode", "light")]), &settings).unwrap();
        assert_eq!(flags, vec!["--syncmode", "light"]);
    }

    #[test]
    fn test_full_options() {
        let settings = schema(json!([{
            "id": "network",
            "default": "main",
            "options": [
                { "value": "ropsten", "flag": "--testnet" },
                { "value": "rinkeby", "flag": "--rinkeby" }
            ]
        }]));
        let flags = generate_flags(&config(&[("network", "rinkeby")]), &settings).unwrap();
        assert_eq!(flags, vec!["--rinkeby"]);
    }

    #[test]
    fn test_value_with_full_options() {
        let settings = schema(json!([{
            "id": "syncmode",
            "options": [
                { "value": "fast", "flag": "--syncmode %s" },
                { "value": "light", "flag": "--syncmode %s --maxpeers=100" }
            ]
        }]));
        let flags = generate_flags(&config(&[("syncmode", "light")]), &settings).unwrap();
        assert_eq!(flags, vec!["--syncmode", "light", "--maxpeers=100"]);
    }

    #[test]
    fn test_unknown_option_contributes_nothing() {
        let settings = schema(json!([{
            "id": "network",
            "options": [{ "value": "rinkeby", "flag": "--rinkeby" }]
        }]));
        let flags = generate_flags(&config(&[("network", "kovan")]), &settings).unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_empty_option_flag_is_noop() {
        let settings = schema(json!([{
            "id": "network",
            "options": [{ "value": "main", "flag": "" }]
        }]));
        let flags = generate_flags(&config(&[("network", "main")]), &settings).unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_compound_flag_split() {
        let settings = vec![SettingSpec::choices(
            "rpc",
            vec![SettingOption::new("on", "On", "--rpc --rpccorsdomain=*")],
        )];
        let flags = generate_flags(&config(&[("rpc", "on")]), &settings).unwrap();
        assert_eq!(flags, vec!["--rpc", "--rpccorsdomain=*"]);
    }

    #[test]
    fn test_value_with_spaces_stays_one_token() {
        let settings = vec![SettingSpec::flag("dataDir", "--datadir %s")];
        let flags =
            generate_flags(&config(&[("dataDir", "/home/me/My Chain")]), &settings).unwrap();
        assert_eq!(flags, vec!["--datadir", "/home/me/My Chain"]);
    }

    #[test]
    fn test_quoted_template_token() {
        let settings = vec![SettingSpec::flag("extra", r#"--ident "my node" --v"#)];
        let flags = generate_flags(&config(&[("extra", "")]), &settings).unwrap();
        assert_eq!(flags, vec!["--ident", "my node", "--v"]);
    }

    #[test]
    fn test_duplicates_preserved() {
        let settings = vec![
            SettingSpec::flag("a", "--rpc"),
            SettingSpec::flag("b", "--rpc"),
        ];
        let flags = generate_flags(&config(&[("a", ""), ("b", "")]), &settings).unwrap();
        assert_eq!(flags, vec!["--rpc", "--rpc"]);
    }

    #[test]
    fn test_default_applied_when_unset() {
        let settings = vec![SettingSpec::flag("syncMode", "--syncmode %s").with_default("light")];
        let flags = generate_flags(&SettingsMap::new(), &settings).unwrap();
        assert_eq!(flags, vec!["--syncmode", "light"]);
    }

    #[test]
    fn test_unset_without_default_is_skipped() {
        let settings = vec![SettingSpec::flag("cache", "--cache %s")];
        let flags = generate_flags(&SettingsMap::new(), &settings).unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let settings = schema(json!([
            { "id": "cache", "flag": "--cache %s" },
            { "id": "rpc", "options": [{ "value": "on", "flag": "--rpc --rpcport=8545" }] }
        ]));
        let input = config(&[("cache", "512"), ("rpc", "on")]);
        assert_eq!(
            generate_flags(&input, &settings).unwrap(),
            generate_flags(&input, &settings).unwrap()
        );
    }

    #[test]
    fn test_missing_flag_for_field() {
        let settings = schema(json!([{ "id": "network" }]));
        let err = generate_flags(&config(&[("network", "main")]), &settings).unwrap_err();
        assert!(matches!(err, GridError::Schema(_)));
        assert!(err.to_string().contains("missing flag key for field network"));
    }

    #[test]
    fn test_missing_flag_for_simple_options() {
        let settings = schema(json!([{ "id": "sync", "options": ["light", "fast", "full"] }]));
        let err = generate_flags(&config(&[("sync", "fast")]), &settings).unwrap_err();
        assert!(err.to_string().contains("missing flag key for option fast"));
    }

    #[test]
    fn test_missing_flag_for_full_options() {
        let settings = schema(json!([{
            "id": "network",
            "options": [{ "value": "main", "label": "Main" }]
        }]));
        let err = generate_flags(&config(&[("network", "main")]), &settings).unwrap_err();
        assert!(err.to_string().contains("missing flag key for option main"));
    }

    #[test]
    fn test_merge_with_defaults() {
        let settings = vec![
            SettingSpec::flag("syncMode", "--syncmode %s").with_default("light"),
            SettingSpec::flag("cache", "--cache %s").with_default("512"),
            SettingSpec::flag("datadir", "--datadir %s"),
        ];
        let merged = merge_with_defaults(&config(&[("cache", "2048")]), &settings);
        assert_eq!(merged.get("syncMode").map(String::as_str), Some("light"));
        assert_eq!(merged.get("cache").map(String::as_str), Some("2048"));
        assert!(!merged.contains_key("datadir"));
    }
}
