//! Placeholder substitution
//!
//! Rendering is deterministic for a fixed clock and variable set; only the
//! `aiOpener` special reaches the network, and its failure mode is a static
//! fallback rather than an error.

use std::collections::HashMap;

use outreach_core::models::Lead;

use crate::special::{self, SpecialContext, SpecialKey};

/// Rendering behavior knobs.
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Lowercase keys before lookup. On by default.
    pub case_insensitive: bool,
    /// When true, placeholders that resolve to nothing are left verbatim.
    /// When false ("strict" mode), they are replaced with `replacement`.
    pub allow_undefined: bool,
    pub replacement: String,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            case_insensitive: true,
            allow_undefined: true,
            replacement: String::new(),
        }
    }
}

/// Render one template string.
///
/// Resolution order per placeholder: variable, special generator, inline
/// fallback literal. Unresolvable placeholders follow
/// [`TemplateOptions::allow_undefined`].
pub async fn render(
    input: &str,
    variables: &HashMap<String, String>,
    specials: &SpecialContext<'_>,
    options: &TemplateOptions,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("[[") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("]]") else {
            // Unterminated placeholder, emit as-is.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let inner = &after[..end];
        match resolve_placeholder(inner, variables, specials, options).await {
            Some(value) => out.push_str(&value),
            None if options.allow_undefined => out.push_str(&rest[start..start + 2 + end + 2]),
            None => out.push_str(&options.replacement),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}

async fn resolve_placeholder(
    inner: &str,
    variables: &HashMap<String, String>,
    specials: &SpecialContext<'_>,
    options: &TemplateOptions,
) -> Option<String> {
    let (raw_key, fallback) = match inner.split_once("||") {
        Some((key, fallback)) => (key.trim(), Some(fallback.trim())),
        None => (inner.trim(), None),
    };

    let key = if options.case_insensitive {
        raw_key.to_lowercase()
    } else {
        raw_key.to_string()
    };

    if let Some(value) = variables.get(&key) {
        return Some(value.clone());
    }

    if let Some(special) = SpecialKey::parse(raw_key)
        && let Some(value) = special::resolve(special, specials).await
    {
        return Some(value);
    }

    fallback.map(str::to_string)
}

/// Flatten a lead into the template variable namespace.
///
/// Keys are lowercase; each textual field also gets a title-cased `t`-prefixed
/// variant (`tfirstname`, `tcompanyname`, ...).
pub fn lead_variables(lead: &Lead) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("id".to_string(), lead.id.to_string());
    vars.insert("email".to_string(), lead.email.clone());

    let full_name = match (&lead.first_name, &lead.last_name) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first.clone()),
        (None, Some(last)) => Some(last.clone()),
        (None, None) => None,
    };

    let textual = [
        ("firstname", &lead.first_name),
        ("lastname", &lead.last_name),
        ("fullname", &full_name),
        ("jobtitle", &lead.job_title),
        ("companyname", &lead.company_name),
        ("industry", &lead.industry),
        ("companysize", &lead.company_size),
        ("country", &lead.country),
        ("state", &lead.state),
        ("address", &lead.address),
        ("source", &lead.source),
    ];
    for (key, value) in textual {
        if let Some(value) = value {
            vars.insert(key.to_string(), value.clone());
            vars.insert(format!("t{key}"), title_case(value));
        }
    }

    if let Some(url) = &lead.linkedin_url {
        vars.insert("linkedinurl".to_string(), url.clone());
    }

    vars
}

/// Merge custom variables (e.g. enrichment data) into the namespace.
/// Scalar JSON values only; keys are lowercased. Existing keys win.
pub fn merge_custom_variables(
    vars: &mut HashMap<String, String>,
    custom: &serde_json::Value,
) {
    let Some(object) = custom.as_object() else {
        return;
    };
    for (key, value) in object {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        vars.entry(key.to_lowercase()).or_insert(rendered);
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
