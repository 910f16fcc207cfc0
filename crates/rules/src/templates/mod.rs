//! Placeholder rendering for rule templates.
//!
//! Strings may contain `{{name}}` placeholders (inner whitespace tolerated).
//! The supported names are derived from the execution instant in the rule's
//! timezone:
//!
//! | name            | example      |
//! |-----------------|--------------|
//! | `current_date`  | `2026-10-15` |
//! | `current_time`  | `09:30`      |
//! | `current_month` | `October`    |
//! | `current_year`  | `2026`       |
//! | `week_number`   | `42` (ISO)   |
//!
//! Unknown placeholders are left verbatim. Rendering never mutates its input.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::schema::RuleTemplate;

/// Placeholder values for one execution instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    values: Vec<(&'static str, String)>,
}

impl TemplateContext {
    /// Compute every placeholder value for `now` as seen in `tz`.
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        let local = now.with_timezone(&tz);
        Self {
            values: vec![
                ("current_date", local.format("%Y-%m-%d").to_string()),
                ("current_time", local.format("%H:%M").to_string()),
                ("current_month", local.format("%B").to_string()),
                ("current_year", local.format("%Y").to_string()),
                ("week_number", local.iso_week().week().to_string()),
            ],
        }
    }

    /// Value for a placeholder name, `None` if unsupported.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Substitute known placeholders in a single string.
pub fn render_str(input: &str, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match ctx.get(after[..end].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + end + 4]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Recursively render every string leaf of `value`.
///
/// Arrays and objects are rebuilt with rendered children; numbers, booleans,
/// and nulls pass through. Object keys are not rendered.
pub fn render(value: &Value, ctx: &TemplateContext) -> Value {
    match value {
        Value::String(s) => Value::String(render_str(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render the user-facing text of a template: title, description, tags, data.
///
/// Hints, priority, and the due offset are copied unchanged.
pub fn render_template(template: &RuleTemplate, ctx: &TemplateContext) -> RuleTemplate {
    RuleTemplate {
        title: render_str(&template.title, ctx),
        description: template.description.as_deref().map(|d| render_str(d, ctx)),
        data: render(&template.data, ctx),
        tags: template.tags.iter().map(|t| render_str(t, ctx)).collect(),
        ..template.clone()
    }
}
