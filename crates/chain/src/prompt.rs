//! String prompt templates with `{variable}` placeholders.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tangle_core::{Document, Record};

use crate::error::{ChainError, Result};

/// A prompt template over named placeholders.
///
/// Placeholders are written `{name}` where `name` is an identifier of
/// ASCII letters, digits and underscores. Anything else between braces
/// is left alone by `format`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    template: String,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    /// Build a template with an explicit variable list.
    pub fn new(template: impl Into<String>, input_variables: Vec<String>) -> Self {
        Self {
            template: template.into(),
            input_variables,
        }
    }

    /// Build a template, inferring the variable list from `{name}`
    /// placeholders in order of first appearance.
    pub fn from_template(template: impl Into<String>) -> Self {
        let template = template.into();
        let input_variables = extract_variables(&template);
        Self {
            template,
            input_variables,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    /// Substitute every declared variable from `values`.
    pub fn format(&self, values: &Record) -> Result<String> {
        let mut rendered = self.template.clone();
        for name in &self.input_variables {
            let value = values
                .get(name)
                .ok_or_else(|| ChainError::MissingInput(name.clone()))?;
            let placeholder = format!("{{{name}}}");
            rendered = rendered.replace(&placeholder, &value_text(value));
        }
        Ok(rendered)
    }
}

/// Render one document through a template. The document's text binds
/// to `page_content`; its metadata entries bind by key.
pub fn format_document(document: &Document, template: &PromptTemplate) -> Result<String> {
    let mut values = Record::new();
    values.insert(
        "page_content".to_string(),
        Value::String(document.page_content.clone()),
    );
    for (key, value) in &document.metadata {
        values.insert(key.clone(), value.clone());
    }
    template.format(&values)
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn extract_variables(template: &str) -> Vec<String> {
    let mut variables: Vec<String> = Vec::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '{' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
            j += 1;
        }
        if j > i + 1 && j < chars.len() && chars[j] == '}' {
            let name: String = chars[i + 1..j].iter().collect();
            if !variables.contains(&name) {
                variables.push(name);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    variables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_variables_in_order_without_duplicates() {
        let template =
            PromptTemplate::from_template("{question} from {context}, again: {question}");
        assert_eq!(template.input_variables(), ["question", "context"]);
    }

    #[test]
    fn skips_non_identifier_braces() {
        let template = PromptTemplate::from_template("json {{\"a\": 1}} and {input}");
        assert_eq!(template.input_variables(), ["input"]);
    }

    #[test]
    fn format_substitutes_values() {
        let template = PromptTemplate::from_template("Answer {question} using {context}.");
        let mut values = Record::new();
        values.insert("question".into(), Value::String("why".into()));
        values.insert("context".into(), Value::String("notes".into()));

        assert_eq!(
            template.format(&values).unwrap(),
            "Answer why using notes."
        );
    }

    #[test]
    fn format_requires_declared_variables() {
        let template = PromptTemplate::from_template("{missing}");
        let err = template.format(&Record::new()).unwrap_err();
        assert!(matches!(err, ChainError::MissingInput(name) if name == "missing"));
    }

    #[test]
    fn format_renders_non_string_values() {
        let template = PromptTemplate::from_template("score {score}");
        let mut values = Record::new();
        values.insert("score".into(), Value::from(3));
        assert_eq!(template.format(&values).unwrap(), "score 3");
    }

    #[test]
    fn format_document_binds_content_and_metadata() {
        let template = PromptTemplate::from_template("[{source}] {page_content}");
        let mut doc = Document::new("body text");
        doc.metadata
            .insert("source".into(), Value::String("notes.md".into()));

        assert_eq!(
            format_document(&doc, &template).unwrap(),
            "[notes.md] body text"
        );
    }
}
