//! Structured output: format instructions for a schema, and parsing of the model's
//! JSON reply back into a map keyed by the schema's field names.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::{ConfigManager, SchemaField};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in model output: {output}")]
    NoJson { output: String },
    #[error("invalid JSON in model output: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        output: String,
    },
    #[error("model output is JSON but not an object")]
    NotAnObject,
    #[error("model output is missing key `{0}`")]
    MissingKey(String),
}

/// One expected field of the structured output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    pub kind: String,
}

impl From<&SchemaField> for ResponseSchema {
    fn from(f: &SchemaField) -> Self {
        Self {
            name: f.name.clone(),
            description: f.description.clone(),
            kind: f.kind.clone(),
        }
    }
}

/// Parser for one schema.
#[derive(Debug, Clone)]
pub struct StructuredOutputParser {
    schemas: Vec<ResponseSchema>,
}

impl StructuredOutputParser {
    pub fn from_response_schemas(schemas: Vec<ResponseSchema>) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &[ResponseSchema] {
        &self.schemas
    }

    /// Instructions appended to the prompt so the model answers with a fenced JSON object.
    pub fn format_instructions(&self) -> String {
        let fields = self
            .schemas
            .iter()
            .map(|s| format!("\t\"{}\": {}  // {}", s.name, s.kind, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "The output should be a markdown code snippet formatted in the following schema, \
             including the leading and trailing \"```json\" and \"```\":\n\n```json\n{{\n{}\n}}\n```",
            fields
        )
    }

    /// Parse the model's reply. Every schema field must be present.
    pub fn parse(&self, output: &str) -> Result<Map<String, Value>, ParseError> {
        let json = extract_json(output).ok_or_else(|| ParseError::NoJson {
            output: output.to_string(),
        })?;
        let value: Value = serde_json::from_str(json).map_err(|e| ParseError::InvalidJson {
            source: e,
            output: output.to_string(),
        })?;
        let Value::Object(map) = value else {
            return Err(ParseError::NotAnObject);
        };
        if let Some(missing) = self.schemas.iter().find(|s| !map.contains_key(&s.name)) {
            return Err(ParseError::MissingKey(missing.name.clone()));
        }
        Ok(map)
    }
}

/// Find the JSON object in a reply: a ```json fence, a bare ``` fence, or the outermost
/// `{ ... }`.
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let json_start = start + "```json".len();
        if let Some(end) = trimmed[json_start..].find("```") {
            return Some(trimmed[json_start..json_start + end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let content_start = start + 3;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = &trimmed[content_start..content_start + end];
            // Skip a language tag on the fence line.
            if let Some(brace) = block.find('{') {
                return Some(block[brace..].trim());
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// One structured-output parser per configured schema.
pub struct OutputParser {
    parsers: BTreeMap<String, StructuredOutputParser>,
}

impl OutputParser {
    pub fn new(config: &ConfigManager) -> Self {
        let parsers = config
            .schemas()
            .iter()
            .map(|(name, fields)| (name.clone(), Self::create_json_parser(fields)))
            .collect();
        Self { parsers }
    }

    pub fn create_json_parser(fields: &[SchemaField]) -> StructuredOutputParser {
        StructuredOutputParser::from_response_schemas(fields.iter().map(Into::into).collect())
    }

    pub fn get_format_instructions(parser: &StructuredOutputParser) -> String {
        parser.format_instructions()
    }

    pub fn parse_output(
        parser: &StructuredOutputParser,
        output: &str,
    ) -> Result<Map<String, Value>, ParseError> {
        parser.parse(output)
    }

    pub fn get_parser(&self, name: &str) -> Option<&StructuredOutputParser> {
        self.parsers.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parsers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_parser() -> StructuredOutputParser {
        OutputParser::create_json_parser(&[
            SchemaField::new("gift", "Was the item purchased as a gift?"),
            SchemaField::new("delivery_days", "How many days until it arrived?"),
        ])
    }

    #[test]
    fn format_instructions_list_every_field() {
        let text = review_parser().format_instructions();
        assert!(text.contains("```json\n{\n\t\"gift\": string  // Was the item purchased as a gift?"));
        assert!(text.contains("\t\"delivery_days\": string  // How many days until it arrived?\n}\n```"));
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "Sure!\n```json\n{\"gift\": true, \"delivery_days\": 2}\n```\nAnything else?";
        let map = review_parser().parse(reply).unwrap();
        assert_eq!(map["gift"], Value::Bool(true));
        assert_eq!(map["delivery_days"], 2);
    }

    #[test]
    fn parses_bare_fence_and_raw_object() {
        let p = review_parser();
        let bare = "```\n{\"gift\": false, \"delivery_days\": \"3\"}\n```";
        assert_eq!(p.parse(bare).unwrap()["delivery_days"], "3");
        let raw = "Here you go: {\"gift\": false, \"delivery_days\": 1} hope it helps";
        assert_eq!(p.parse(raw).unwrap()["delivery_days"], 1);
    }

    #[test]
    fn missing_key_and_bad_json_are_errors() {
        let p = review_parser();
        assert!(matches!(
            p.parse("{\"gift\": true}"),
            Err(ParseError::MissingKey(k)) if k == "delivery_days"
        ));
        assert!(matches!(p.parse("no json here"), Err(ParseError::NoJson { .. })));
        assert!(matches!(
            p.parse("```json\n{\"gift\": tru\n```"),
            Err(ParseError::InvalidJson { .. })
        ));
    }

    #[test]
    fn output_parser_builds_one_parser_per_schema() {
        let config = ConfigManager::from_yaml_str(
            "schemas:\n  a: [{name: x, description: y}]\n  b: [{name: z, description: w, type: integer}]\n",
        )
        .unwrap();
        let parser = OutputParser::new(&config);
        assert_eq!(parser.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(parser.get_parser("c").is_none());
        let b = parser.get_parser("b").unwrap();
        assert_eq!(b.schemas()[0].kind, "integer");
        assert!(OutputParser::get_format_instructions(b).contains("\"z\": integer  // w"));
    }
}
