//! File-based template renderer.
//!
//! Reads a template file and substitutes `{{ key }}` placeholders from the
//! supplied data. Unknown placeholders are an error so a typo in a manifest
//! never reaches the remote service.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::TemplateRenderer;

/// Template renderer backed by files on disk
pub struct FileTemplateRenderer {
    /// Directory relative template ids are resolved against
    base_dir: PathBuf,
}

impl Default for FileTemplateRenderer {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FileTemplateRenderer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl TemplateRenderer for FileTemplateRenderer {
    fn render(&self, template_id: &str, data: &HashMap<String, String>) -> Result<String> {
        let path = self.base_dir.join(template_id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?;

        substitute(&content, data)
            .with_context(|| format!("Failed to render template: {}", path.display()))
    }
}

/// Replace every `{{ key }}` in `content` with its value from `data`
pub fn substitute(content: &str, data: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .with_context(|| format!("Unclosed placeholder near: {}", truncate(&rest[start..])))?;

        let key = after[..end].trim();
        let value = data
            .get(key)
            .with_context(|| format!("No value for template variable '{}'", key))?;
        out.push_str(value);

        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(24) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn data(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_placeholders() {
        let rendered = substitute(
            "Name: {{ app }}-{{env}}\nPort: {{ port }}",
            &data(&[("app", "api"), ("env", "prod"), ("port", "8080")]),
        )
        .unwrap();

        assert_eq!(rendered, "Name: api-prod\nPort: 8080");
    }

    #[test]
    fn test_substitute_rejects_unknown_and_unclosed() {
        assert!(substitute("{{ missing }}", &HashMap::new()).is_err());
        assert!(substitute("{{ open", &data(&[("open", "x")])).is_err());
    }

    #[test]
    fn test_render_reads_relative_to_base_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("stack.yaml"), "Resources: {{ name }}").unwrap();

        let renderer = FileTemplateRenderer::new(temp.path());
        let body = renderer
            .render("stack.yaml", &data(&[("name", "Queue")]))
            .unwrap();
        assert_eq!(body, "Resources: Queue");

        assert!(renderer.render("missing.yaml", &HashMap::new()).is_err());
    }
}
