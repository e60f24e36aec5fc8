//! Placeholder substitution for templated responses (spec §4.3). A
//! placeholder is `{{request.<field>}}`, where `<field>` is `method`,
//! `path`, a query/header name via `query.<name>`/`header.<name>`, or a
//! JSON-path into the body via `body.<path>`. Unresolvable placeholders
//! are left verbatim rather than erroring — the request was already
//! validated as well-formed at registration time (spec §4.2), so a
//! missing value at render time is a data mismatch, not a request
//! fault.

use serde_json::Value;

use crate::model::Request;

pub fn render(body: &Value, req: &Request) -> Value {
    match body {
        Value::String(s) => Value::String(render_str(s, req)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, req)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), render(v, req))).collect())
        }
        other => other.clone(),
    }
}

fn render_str(template: &str, req: &Request) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let field = after[..end].trim();
        out.push_str(&resolve(field, req).unwrap_or_else(|| format!("{{{{{field}}}}}")));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn resolve(field: &str, req: &Request) -> Option<String> {
    let field = field.strip_prefix("request.")?;
    if field == "method" {
        return Some(req.method.clone());
    }
    if field == "path" {
        return Some(req.path.clone());
    }
    if let Some(name) = field.strip_prefix("query.") {
        return req.query.get(name)?.first().cloned();
    }
    if let Some(name) = field.strip_prefix("header.") {
        return req.headers.get(&name.to_ascii_lowercase())?.first().cloned();
    }
    if let Some(path) = field.strip_prefix("body.") {
        let json = req.body_json.as_ref()?;
        return lookup(json, path).map(stringify);
    }
    None
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
