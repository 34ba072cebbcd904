//! `{placeholder}` string templates rendered into chat messages.
//!
//! `{name}` is a variable; `{{` and `}}` are literal braces.

use std::collections::HashMap;

use super::PromptError;
use crate::llm::ChatMessage;

/// Values substituted into a template, by placeholder name.
pub type TemplateVars = HashMap<String, String>;

/// Build `TemplateVars` from `(name, value)` pairs.
pub fn vars<'a, I>(pairs: I) -> TemplateVars
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn from_template(source: &str) -> Result<Self, PromptError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, c)) = chars.next() {
            match c {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(PromptError::Malformed {
                                    position,
                                    reason: "nested '{' inside placeholder",
                                })
                            }
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(PromptError::Malformed {
                            position,
                            reason: "unclosed '{'",
                        });
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(PromptError::Malformed {
                            position,
                            reason: "empty placeholder",
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Variable(name.to_string()));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(PromptError::Malformed {
                            position,
                            reason: "single '}' (use '}}' for a literal brace)",
                        });
                    }
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names, in first-seen order.
    pub fn input_variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for seg in &self.segments {
            if let Segment::Variable(name) = seg {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Render to a string. Every placeholder must have a value; extra values are ignored.
    pub fn format(&self, vars: &TemplateVars) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.source.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Variable(name) => {
                    let value = vars
                        .get(name)
                        .ok_or_else(|| PromptError::MissingVariable(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Render into a single human message.
    pub fn format_messages(&self, vars: &TemplateVars) -> Result<Vec<ChatMessage>, PromptError> {
        Ok(vec![ChatMessage::user(self.format(vars)?)])
    }
}
