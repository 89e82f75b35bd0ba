//! Global context document.
//!
//! An optional markdown scratch sheet shared across item runs. The backend is
//! asked to append cross-cutting patterns to it; every item prompt receives
//! its current contents.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{Config, GlobalContextConfig};
use crate::extract::title_case;
use crate::template::{render_template, TemplateVars};

pub const NO_GLOBAL_CONTEXT: &str = "No global context available.";

const DEFAULT_TEMPLATE: &str = "# {project_name} - Project Context & Patterns

## Project Overview
This scratchsheet tracks project-wide patterns, conventions, and insights discovered during code review.

{sections}

---
*This scratchsheet is automatically updated during the review process*";

/// Location of the context document, if one is configured. Relative paths
/// resolve under the framework directory.
pub fn context_path(config: &Config, framework_dir: &Path) -> Option<PathBuf> {
    let gc = config.map.global_context.as_ref()?;
    let file = Path::new(&gc.context_file);
    Some(if file.is_absolute() {
        file.to_path_buf()
    } else {
        framework_dir.join(file)
    })
}

/// Read the context document, creating it from the configured template on
/// first use.
pub fn load_global_context(config: &Config, framework_dir: &Path) -> Result<String> {
    let (Some(gc), Some(path)) = (
        config.map.global_context.as_ref(),
        context_path(config, framework_dir),
    ) else {
        return Ok(NO_GLOBAL_CONTEXT.to_string());
    };

    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, initial_content(&config.project.name, gc))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Initialized global context at {}", path.display());
    }

    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read global context {}", path.display()))
}

fn initial_content(project_name: &str, gc: &GlobalContextConfig) -> String {
    let mut sections = String::new();
    for section in &gc.sections {
        sections.push_str(&format!("### {}\n", section.name));
        if !section.description.is_empty() {
            sections.push_str(&format!("*{}*\n\n", section.description));
        }
        sections.push_str(&format!("- {}\n\n", section.placeholder));
    }

    let mut vars = TemplateVars::new();
    vars.insert("project_name".to_string(), title_case(project_name));
    vars.insert("sections".to_string(), sections.trim().to_string());

    render_template(gc.template.as_deref().unwrap_or(DEFAULT_TEMPLATE), &vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, tests::MINIMAL};
    use tempfile::TempDir;

    fn config_with_context(extra: &str) -> Config {
        parse_config(&format!("{}\n{}", MINIMAL, extra)).unwrap()
    }

    #[test]
    fn unconfigured_context_renders_placeholder_text() {
        let tmp = TempDir::new().unwrap();
        let config = parse_config(MINIMAL).unwrap();
        let text = load_global_context(&config, tmp.path()).unwrap();
        assert_eq!(text, NO_GLOBAL_CONTEXT);
        assert!(context_path(&config, tmp.path()).is_none());
    }

    #[test]
    fn initializes_once_then_reads_existing() {
        let tmp = TempDir::new().unwrap();
        let config = config_with_context(
            r#"
[map.global_context]
context_file = "data/context.md"

[[map.global_context.sections]]
name = "Conventions"
description = "Naming and layout"
"#,
        );

        let text = load_global_context(&config, tmp.path()).unwrap();
        assert!(text.starts_with("# Demo - Project Context & Patterns"));
        assert!(text.contains("### Conventions\n*Naming and layout*\n\n- TBD"));

        let path = tmp.path().join("data/context.md");
        std::fs::write(&path, "edited by the backend").unwrap();
        let again = load_global_context(&config, tmp.path()).unwrap();
        assert_eq!(again, "edited by the backend");
    }
}
