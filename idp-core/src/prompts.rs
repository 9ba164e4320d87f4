//! Prompt Registry (C5): named templates with variable interpolation and
//! conditional blocks.
//!
//! Loading pattern grounded in `loom/src/prompts/load.rs`: defaults are
//! embedded YAML (single source of truth, no duplicated strings in Rust),
//! with an optional `PROMPTS_DIR` override read at `Reload()` time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AgentError;

const EMBEDDED_DEFAULT: &str = include_str!("../prompts/default.yaml");
const DEFAULT_PROMPTS_DIR: &str = "prompts";

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read prompts file {path}: {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse YAML in {path}: {message}")]
    ParseYaml { path: String, message: String },
}

/// A single named template (spec §4.5: `{system_prompt, instruction, variables}`).
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

/// Process-wide named-template cache. `Render` substitutes `{{VAR}}`
/// placeholders and evaluates `{{#if VAR}}...{{else}}...{{/if}}` blocks;
/// `Reload` re-reads from `PROMPTS_DIR` (or re-parses the embedded default).
pub struct PromptRegistry {
    templates: std::sync::RwLock<HashMap<String, PromptTemplate>>,
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRegistry {
    pub fn new() -> Self {
        PromptRegistry {
            templates: std::sync::RwLock::new(parse_yaml(EMBEDDED_DEFAULT, "<embedded>").unwrap_or_default()),
        }
    }

    /// Re-reads templates from `PROMPTS_DIR` (or the embedded default if the
    /// directory is absent or unset), replacing the in-memory cache wholesale.
    pub fn reload(&self) -> Result<(), LoadError> {
        let dir = std::env::var("PROMPTS_DIR").ok().map(PathBuf::from);
        let loaded = match dir.as_deref() {
            Some(dir) if dir.is_dir() => load_dir(dir)?,
            _ => parse_yaml(EMBEDDED_DEFAULT, "<embedded>")?,
        };
        *self.templates.write().expect("prompt registry lock poisoned") = loaded;
        Ok(())
    }

    /// Renders `name` with `vars`, failing with [`AgentError::MissingVariable`]
    /// when a required variable named in the template is absent from `vars`.
    pub fn render(&self, name: &str, vars: &HashMap<String, String>) -> Result<RenderedPrompt, AgentError> {
        let templates = self.templates.read().expect("prompt registry lock poisoned");
        let template = templates
            .get(name)
            .ok_or_else(|| AgentError::NotFound(format!("prompt template '{name}'")))?;
        for required in &template.variables {
            if !vars.contains_key(required) {
                return Err(AgentError::MissingVariable(required.clone()));
            }
        }
        Ok(RenderedPrompt {
            system_prompt: substitute(&template.system_prompt, vars),
            instruction: substitute(&template.instruction, vars),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub system_prompt: String,
    pub instruction: String,
}

fn load_dir(dir: &Path) -> Result<HashMap<String, PromptTemplate>, LoadError> {
    let path = dir.join(DEFAULT_PROMPTS_DIR).join("default.yaml");
    let path = if path.exists() { path } else { dir.join("default.yaml") };
    let content = std::fs::read_to_string(&path).map_err(|e| LoadError::ReadFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_yaml(&content, &path.display().to_string())
}

fn parse_yaml(content: &str, path: &str) -> Result<HashMap<String, PromptTemplate>, LoadError> {
    serde_yaml::from_str(content).map_err(|e| LoadError::ParseYaml {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Substitutes `{{VAR}}` placeholders and evaluates `{{#if VAR}}A{{else}}B{{/if}}`
/// blocks against `vars`, treating an empty string as "falsy" the same way a
/// missing value would be.
fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let after_conditionals = eval_conditionals(template, vars);
    replace_placeholders(&after_conditionals, vars)
}

fn replace_placeholders(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = vars.get(key) {
                    out.push_str(value);
                } else {
                    out.push_str("{{");
                    out.push_str(key);
                    out.push_str("}}");
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn eval_conditionals(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{#if ") {
        out.push_str(&rest[..start]);
        let after_tag = &rest[start + 6..];
        let Some(tag_end) = after_tag.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var_name = after_tag[..tag_end].trim().to_string();
        let body_start = &after_tag[tag_end + 2..];
        let Some(close_idx) = body_start.find("{{/if}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let body = &body_start[..close_idx];
        let (then_branch, else_branch) = match body.find("{{else}}") {
            Some(i) => (&body[..i], &body[i + 8..]),
            None => (body, ""),
        };
        let truthy = vars.get(&var_name).map(|v| !v.is_empty()).unwrap_or(false);
        out.push_str(if truthy { then_branch } else { else_branch });
        rest = &body_start[close_idx + 7..];
    }
    out.push_str(rest);
    out
}
