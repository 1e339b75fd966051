use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::error::TemplateError;

/// A parsed `{name}` template. `{{` and `}}` stand for literal braces.
///
/// Placeholders are checked against an allow-list when the template is
/// parsed, so rendering never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

impl Template {
    pub fn parse(source: &str, allowed: &[&str]) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    text.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(TemplateError::UnbalancedBrace('{', pos));
                    }
                    if !allowed.contains(&name.as_str()) {
                        return Err(TemplateError::UnknownPlaceholder(name));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Placeholder(name));
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    text.push('}');
                }
                '}' => return Err(TemplateError::UnbalancedBrace('}', pos)),
                other => text.push(other),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self { segments })
    }

    pub fn contains_placeholder(&self, name: &str) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Placeholder(p) if p == name))
    }

    /// Substitutes every placeholder. Placeholders without a value render empty.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Placeholder(name) => {
                    if let Some((_, value)) = values.iter().find(|entry| entry.0 == name.as_str()) {
                        output.push_str(value);
                    }
                }
            }
        }
        output
    }
}

/// Notification text sent to each reviewer.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    template: Template,
}

impl MessageTemplate {
    const PLACEHOLDERS: [&'static str; 3] = ["year", "month", "spreadsheet_url"];

    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            template: Template::parse(source, &Self::PLACEHOLDERS)?,
        })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        info!("Loading message template from {}", path.display());
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read message template {}", path.display()))?;
        let template = Self::parse(&source)
            .with_context(|| format!("invalid message template {}", path.display()))?;
        info!("Message template loaded, {} chars", source.chars().count());
        Ok(template)
    }

    pub fn render(&self, year: i32, month: u32, spreadsheet_url: &str) -> String {
        let year = year.to_string();
        let month = month.to_string();
        self.template.render(&[
            ("year", year.as_str()),
            ("month", month.as_str()),
            ("spreadsheet_url", spreadsheet_url),
        ])
    }
}

/// Spreadsheet title pattern, e.g. `Invoice {year_month} {username}`.
#[derive(Debug, Clone)]
pub struct TableNameTemplate {
    template: Template,
}

impl TableNameTemplate {
    const PLACEHOLDERS: [&'static str; 2] = ["year_month", "username"];

    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let template = Template::parse(source, &Self::PLACEHOLDERS)?;
        for required in Self::PLACEHOLDERS {
            if !template.contains_placeholder(required) {
                return Err(TemplateError::MissingPlaceholder(required.to_string()));
            }
        }
        Ok(Self { template })
    }

    pub fn render(&self, year: i32, month: u32, username: &str) -> String {
        let year_month = format!("{year}_{month:02}");
        self.template
            .render(&[("year_month", year_month.as_str()), ("username", username)])
    }
}
