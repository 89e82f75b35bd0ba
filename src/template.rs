//! `{name}` placeholder rendering for prompt templates.
//!
//! Rendering is plain substitution: every `{key}` whose key is supplied is
//! replaced, anything else (including JSON braces in the template) is left
//! exactly as written.

use std::collections::BTreeMap;

/// Template variables, ordered for deterministic rendering.
pub type TemplateVars = BTreeMap<String, String>;

pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value);
        }
    }
    out
}

/// Placeholder names appearing in a template, in order of first appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find(|c: char| c == '{' || c == '}') {
            Some(end) if after.as_bytes()[end] == b'}' && end > 0 => {
                let name = &after[..end];
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
                rest = &after[end + 1..];
            }
            Some(end) => rest = &after[end..],
            None => break,
        }
    }
    names
}

/// Names the template uses that `vars` does not supply.
pub fn unresolved_variables(template: &str, vars: &TemplateVars) -> Vec<String> {
    extract_variables(template)
        .into_iter()
        .filter(|name| !vars.contains_key(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_keys_everywhere() {
        let out = render_template(
            "Review {item_path}. Again: {item_path}. Write {output_file}.",
            &vars(&[("item_path", "src/a.py"), ("output_file", "r/a.xml")]),
        );
        assert_eq!(out, "Review src/a.py. Again: src/a.py. Write r/a.xml.");
    }

    #[test]
    fn leaves_unknown_placeholders_and_json() {
        let out = render_template(
            "{\"score\": 1} {missing} {issue_count}",
            &vars(&[("issue_count", "2")]),
        );
        assert_eq!(out, "{\"score\": 1} {missing} 2");
    }

    #[test]
    fn extracts_variable_names() {
        let names = extract_variables("{a} and {b} and {a} and {{c}} and {");
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn reports_unresolved() {
        let missing = unresolved_variables("{a} {b}", &vars(&[("a", "1")]));
        assert_eq!(missing, vec!["b"]);
    }
}
