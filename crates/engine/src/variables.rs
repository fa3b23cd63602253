//! # Variable Resolution
//!
//! Merges the workspace and collection variable layers and substitutes
//! `{{ name }}` placeholders into a request template.
//!
//! ## Substitution rules
//!
//! - Placeholders are written `{{name}}` or `{{ name }}`. Names may not contain
//!   whitespace or braces.
//! - Unbound placeholders are left verbatim; resolution never fails.
//! - A bound value may itself reference other bound variables. Those
//!   references are expanded before substitution, so the text inserted into a
//!   request never contains a placeholder that a later pass could resolve.
//!   Variables that reference themselves (directly or through others) are
//!   treated as unresolvable and their placeholders stay verbatim.
//! - Substitution into the request is a single pass: inserted text is never
//!   re-scanned.
//! - Inserted text can still combine with neighbouring braces into a new
//!   placeholder (`{"a": "{"}` applied to `{{a}}{b}}` yields `{{b}}`). A field
//!   whose substituted form would change again on another pass is left
//!   unresolved as a whole, so [`apply_variables`] is idempotent.
//!
//! ```rust
//! use courier_engine::variables::{apply_variables, merge};
//! use courier_types::{RequestTemplate, VariablePrecedence, Variables};
//! use serde_json::json;
//!
//! let mut workspace = Variables::new();
//! workspace.insert("base".into(), json!("https://api.x"));
//! let merged = merge(&workspace, &Variables::new(), VariablePrecedence::default());
//!
//! let request = RequestTemplate { url: "{{base}}/ping".into(), ..Default::default() };
//! assert_eq!(apply_variables(&request, &merged).url, "https://api.x/ping");
//! ```

use std::collections::{HashMap, HashSet};

use courier_types::{
    EnvironmentPatch, KeyValue, RequestBody, RequestTemplate, VariableLayer, VariablePrecedence, VariableScope, Variables,
};
use serde_json::Value;
use tracing::debug;

const PLACEHOLDER_OPEN: &str = "{{";
const PLACEHOLDER_CLOSE: &str = "}}";

/// Overlay the two layers into one flat mapping.
///
/// With the default precedence collection entries override workspace entries
/// of the same key; keys absent from the winning layer pass through unchanged.
pub fn merge(workspace: &Variables, collection: &Variables, precedence: VariablePrecedence) -> Variables {
    let (base, overlay) = match precedence {
        VariablePrecedence::CollectionOverWorkspace => (workspace, collection),
        VariablePrecedence::WorkspaceOverCollection => (collection, workspace),
    };
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// [`merge`] applied to a [`VariableScope`].
pub fn merge_scope(scope: &VariableScope, precedence: VariablePrecedence) -> Variables {
    merge(&scope.workspace, &scope.collection, precedence)
}

/// Layer whose binding for `key` is visible in the merged view. Keys bound in
/// neither layer default to the workspace.
pub fn winning_layer(scope: &VariableScope, key: &str, precedence: VariablePrecedence) -> VariableLayer {
    let (high, low) = match precedence {
        VariablePrecedence::CollectionOverWorkspace => (VariableLayer::Collection, VariableLayer::Workspace),
        VariablePrecedence::WorkspaceOverCollection => (VariableLayer::Workspace, VariableLayer::Collection),
    };
    if scope.layer(high).contains_key(key) {
        high
    } else if scope.layer(low).contains_key(key) {
        low
    } else {
        VariableLayer::Workspace
    }
}

/// Layer a script's environment patch on top of the scope.
///
/// Scoped entries land in their named layer. Unscoped entries update the
/// layer that currently wins for their key, so the merged view reflects them.
pub fn apply_environment_patch(scope: &mut VariableScope, patch: EnvironmentPatch, precedence: VariablePrecedence) {
    let EnvironmentPatch {
        workspace,
        collection,
        variables,
    } = patch;
    scope.workspace.extend(workspace);
    scope.collection.extend(collection);
    for (key, value) in variables {
        let layer = winning_layer(scope, &key, precedence);
        debug!(variable = %key, ?layer, "script updated variable");
        scope.layer_mut(layer).insert(key, value);
    }
}

/// Substitute bound variables into every string field of the request: url,
/// header and query rows, body, and auth parameters. Script sources and the
/// request identity are left untouched.
pub fn apply_variables(request: &RequestTemplate, variables: &Variables) -> RequestTemplate {
    let bindings = ResolvedBindings::new(variables);
    let mut resolved = request.clone();

    resolved.url = bindings.substitute(&resolved.url);
    substitute_rows(&mut resolved.headers, &bindings);
    substitute_rows(&mut resolved.query, &bindings);
    if let Some(body) = resolved.body.as_mut() {
        match body {
            RequestBody::Raw { text, .. } => *text = bindings.substitute(text),
            RequestBody::Json { value } => *value = bindings.substitute_json(value),
            RequestBody::UrlEncoded { fields } => substitute_rows(fields, &bindings),
        }
    }
    for value in resolved.auth.params.values_mut() {
        *value = bindings.substitute(value);
    }

    resolved
}

fn substitute_rows(rows: &mut [KeyValue], bindings: &ResolvedBindings) {
    for row in rows {
        row.key = bindings.substitute(&row.key);
        row.value = bindings.substitute(&row.value);
    }
}

/// Variables with nested references already expanded.
///
/// Only names that can be substituted safely are present; unbound and cyclic
/// names are absent and therefore stay verbatim.
struct ResolvedBindings {
    expanded: HashMap<String, String>,
}

impl ResolvedBindings {
    fn new(variables: &Variables) -> Self {
        let references: HashMap<&str, Vec<String>> = variables
            .iter()
            .map(|(name, value)| {
                let bound_references = placeholder_names(&render_value(value))
                    .into_iter()
                    .filter(|reference| variables.contains_key(reference))
                    .collect();
                (name.as_str(), bound_references)
            })
            .collect();

        let cyclic: HashSet<String> = variables
            .keys()
            .filter(|name| reaches_itself(name, &references))
            .cloned()
            .collect();
        if !cyclic.is_empty() {
            debug!(names = ?cyclic, "variables reference themselves; leaving them unresolved");
        }

        let mut expanded = HashMap::new();
        for name in variables.keys() {
            if !cyclic.contains(name) {
                expand_name(name, variables, &references, &cyclic, &mut expanded);
            }
        }
        Self { expanded }
    }

    fn substitute(&self, input: &str) -> String {
        let lookup = |name: &str| self.expanded.get(name).cloned();
        match substitute_stable(input, lookup) {
            Some(output) => output,
            None => {
                debug!(input, "substitution forms new placeholders; leaving field unresolved");
                input.to_string()
            }
        }
    }

    fn substitute_json(&self, value: &Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.substitute(text)),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.substitute_json(item)).collect()),
            Value::Object(map) => {
                let mut substituted = serde_json::Map::new();
                for (key, item) in map {
                    substituted.insert(key.clone(), self.substitute_json(item));
                }
                Value::Object(substituted)
            }
            _ => value.clone(),
        }
    }
}

fn expand_name(
    name: &str,
    variables: &Variables,
    references: &HashMap<&str, Vec<String>>,
    cyclic: &HashSet<String>,
    expanded: &mut HashMap<String, String>,
) {
    if expanded.contains_key(name) {
        return;
    }
    // Non-cyclic names can only reach other non-cyclic names through finite chains.
    for reference in references.get(name).into_iter().flatten() {
        if !cyclic.contains(reference) {
            expand_name(reference, variables, references, cyclic, expanded);
        }
    }
    let raw = variables.get(name).map(render_value).unwrap_or_default();
    let value = substitute_stable(&raw, |reference| expanded.get(reference).cloned()).unwrap_or(raw);
    expanded.insert(name.to_string(), value);
}

/// One substitution pass, or `None` when a second pass would change the result.
fn substitute_stable(input: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    let once = replace_placeholders(input, &lookup);
    let twice = replace_placeholders(&once, &lookup);
    (once == twice).then_some(once)
}

fn reaches_itself(start: &str, references: &HashMap<&str, Vec<String>>) -> bool {
    let mut stack: Vec<&str> = references.get(start).into_iter().flatten().map(String::as_str).collect();
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == start {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        stack.extend(references.get(current).into_iter().flatten().map(String::as_str));
    }
    false
}

/// Single left-to-right pass replacing placeholders the lookup can resolve.
/// Replacement text is appended to the output and never scanned again.
fn replace_placeholders(input: &str, mut lookup: impl FnMut(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(start) = remaining.find(PLACEHOLDER_OPEN) {
        let (before, from_open) = remaining.split_at(start);
        output.push_str(before);

        let Some(close) = from_open.find(PLACEHOLDER_CLOSE) else {
            output.push_str(from_open);
            return output;
        };
        let name = from_open[PLACEHOLDER_OPEN.len()..close].trim();
        if !is_placeholder_name(name) {
            // Not a placeholder here; emit one brace and rescan from the next char.
            output.push('{');
            remaining = &from_open[1..];
            continue;
        }

        let token = &from_open[..close + PLACEHOLDER_CLOSE.len()];
        match lookup(name) {
            Some(value) => output.push_str(&value),
            None => output.push_str(token),
        }
        remaining = &from_open[token.len()..];
    }

    output.push_str(remaining);
    output
}

/// Names of every placeholder in `input`, in order of appearance.
fn placeholder_names(input: &str) -> Vec<String> {
    let mut names = Vec::new();
    let _ = replace_placeholders(input, |name| {
        names.push(name.to_string());
        None
    });
    names
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|ch| ch.is_whitespace() || ch == '{' || ch == '}')
}

/// String form of a bound value as inserted into request text.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{AuthDescriptor, AuthKind};
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Variables {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    fn request_with_url(url: &str) -> RequestTemplate {
        RequestTemplate {
            url: url.into(),
            ..Default::default()
        }
    }

    #[test]
    fn collection_overrides_workspace_by_default() {
        let workspace = vars(&[("base", json!("https://api.x")), ("token", json!("w"))]);
        let collection = vars(&[("base", json!("https://api.c"))]);

        let merged = merge(&workspace, &collection, VariablePrecedence::default());
        assert_eq!(merged["base"], "https://api.c");
        assert_eq!(merged["token"], "w");
    }

    #[test]
    fn precedence_can_be_flipped() {
        let workspace = vars(&[("base", json!("https://api.x"))]);
        let collection = vars(&[("base", json!("https://api.c")), ("only", json!(1))]);

        let merged = merge(&workspace, &collection, VariablePrecedence::WorkspaceOverCollection);
        assert_eq!(merged["base"], "https://api.x");
        assert_eq!(merged["only"], 1);
    }

    #[test]
    fn resolves_url_placeholder() {
        let merged = vars(&[("base", json!("https://api.x"))]);
        let resolved = apply_variables(&request_with_url("{{base}}/ping"), &merged);
        assert_eq!(resolved.url, "https://api.x/ping");
    }

    #[test]
    fn tolerates_whitespace_inside_braces() {
        let merged = vars(&[("id", json!(42))]);
        let resolved = apply_variables(&request_with_url("/users/{{ id }}"), &merged);
        assert_eq!(resolved.url, "/users/42");
    }

    #[test]
    fn unresolved_placeholders_stay_verbatim() {
        let resolved = apply_variables(&request_with_url("{{base}}/{{ missing }}"), &Variables::new());
        assert_eq!(resolved.url, "{{base}}/{{ missing }}");
    }

    #[test]
    fn substitutes_every_string_field() {
        let merged = vars(&[("token", json!("t0k")), ("name", json!("ada")), ("flag", json!(true))]);
        let request = RequestTemplate {
            url: "https://api.x".into(),
            headers: vec![KeyValue::new("X-{{name}}", "{{token}}")],
            query: vec![KeyValue::new("verbose", "{{flag}}")],
            body: Some(RequestBody::Json {
                value: json!({"user": {"name": "{{name}}", "tags": ["{{flag}}", 3]}}),
            }),
            auth: AuthDescriptor {
                kind: AuthKind::Bearer,
                params: [("token".to_string(), "{{token}}".to_string())].into_iter().collect(),
            },
            ..Default::default()
        };

        let resolved = apply_variables(&request, &merged);
        assert_eq!(resolved.headers[0], KeyValue::new("X-ada", "t0k"));
        assert_eq!(resolved.query[0].value, "true");
        assert_eq!(
            resolved.body,
            Some(RequestBody::Json {
                value: json!({"user": {"name": "ada", "tags": ["true", 3]}})
            })
        );
        assert_eq!(resolved.auth.params["token"], "t0k");
    }

    #[test]
    fn does_not_mutate_the_template() {
        let request = request_with_url("{{base}}");
        let _ = apply_variables(&request, &vars(&[("base", json!("x"))]));
        assert_eq!(request.url, "{{base}}");
    }

    #[test]
    fn nested_references_are_expanded_once() {
        let merged = vars(&[("host", json!("api.x")), ("base", json!("https://{{host}}"))]);
        let resolved = apply_variables(&request_with_url("{{base}}/ping"), &merged);
        assert_eq!(resolved.url, "https://api.x/ping");
    }

    #[test]
    fn cyclic_references_stay_verbatim() {
        let merged = vars(&[("a", json!("x{{b}}")), ("b", json!("{{a}}")), ("c", json!("c-{{a}}"))]);
        let resolved = apply_variables(&request_with_url("{{a}}|{{c}}"), &merged);
        assert_eq!(resolved.url, "{{a}}|c-{{a}}");
    }

    #[test]
    fn applying_twice_equals_applying_once() {
        let cases = vec![
            (vars(&[("base", json!("https://api.x"))]), "{{base}}/ping"),
            (vars(&[("a", json!("{{b}}")), ("b", json!("z"))]), "{{a}}-{{b}}"),
            (vars(&[("a", json!("{{a}}"))]), "{{a}}"),
            (vars(&[("a", json!("x{{a}}")), ("c", json!("{{a}}"))]), "{{c}}{{a}}"),
            (vars(&[("a", json!("{{missing}}"))]), "{{a}}/{{ missing }}"),
            (vars(&[("open", json!("{"))]), "{{{open}}}"),
            (vars(&[("a", json!("{")), ("b", json!("B"))]), "{{a}}{b}}"),
            (vars(&[("a", json!("{{")), ("b", json!("B"))]), "x{{a}}b}}"),
            (vars(&[("a", json!("{")), ("b", json!("B")), ("c", json!("{{a}}{b}}"))]), "{{c}}"),
            (Variables::new(), "{{ unbound }}"),
        ];

        for (merged, url) in cases {
            let request = RequestTemplate {
                url: url.into(),
                headers: vec![KeyValue::new("h", url)],
                body: Some(RequestBody::Raw {
                    content_type: None,
                    text: url.into(),
                }),
                ..Default::default()
            };
            let once = apply_variables(&request, &merged);
            let twice = apply_variables(&once, &merged);
            assert_eq!(once, twice, "not idempotent for {url}");
        }
    }

    #[test]
    fn placeholder_formed_across_a_substitution_stays_unresolved() {
        let merged = vars(&[("a", json!("{")), ("b", json!("B"))]);
        let resolved = apply_variables(&request_with_url("{{a}}{b}}"), &merged);
        assert_eq!(resolved.url, "{{a}}{b}}");

        // Other fields still resolve.
        let request = RequestTemplate {
            headers: vec![KeyValue::new("x-b", "{{b}}")],
            ..request_with_url("{{a}}{b}}")
        };
        assert_eq!(apply_variables(&request, &merged).headers[0].value, "B");
    }

    #[test]
    fn brace_runs_are_scanned_like_placeholders() {
        let merged = vars(&[("a", json!("x"))]);
        assert_eq!(apply_variables(&request_with_url("{{{a}}}"), &merged).url, "{x}");
        assert_eq!(apply_variables(&request_with_url("{{a"), &merged).url, "{{a");
    }

    #[test]
    fn unscoped_patch_updates_the_winning_layer() {
        let mut scope = VariableScope::new(
            vars(&[("base", json!("https://api.x")), ("shared", json!("w"))]),
            vars(&[("shared", json!("c"))]),
        );
        let patch = EnvironmentPatch::unscoped(vars(&[
            ("base", json!("https://api.y")),
            ("shared", json!("patched")),
            ("fresh", json!(1)),
        ]));

        apply_environment_patch(&mut scope, patch, VariablePrecedence::default());

        assert_eq!(scope.workspace["base"], "https://api.y");
        assert_eq!(scope.workspace["shared"], "w");
        assert_eq!(scope.collection["shared"], "patched");
        assert_eq!(scope.workspace["fresh"], 1);
        let merged = merge_scope(&scope, VariablePrecedence::default());
        assert_eq!(merged["shared"], "patched");
    }

    #[test]
    fn scoped_patch_targets_its_layer() {
        let mut scope = VariableScope::default();
        let patch = EnvironmentPatch {
            collection: vars(&[("token", json!("abc"))]),
            ..Default::default()
        };
        apply_environment_patch(&mut scope, patch, VariablePrecedence::default());
        assert!(scope.workspace.is_empty());
        assert_eq!(scope.collection["token"], "abc");
    }
}
