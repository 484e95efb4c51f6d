//! Template collaborator and the built-in block engine
//!
//! A view compiles its template source once and renders named blocks from
//! it. Any engine can be plugged in through [`TemplateEngine`]; the default
//! [`BlockEngine`] understands:
//!
//! ```text
//! <% target: list %>
//! <ul>${items | raw}</ul>
//! <% target: item %>
//! <li title="${user.name}">${user.name | upper}</li>
//! <% target: page %>
//! <h1>${title}</h1><% use: list %>
//! ```
//!
//! `${path}` reads a dotted path from the render data and is escaped with
//! the `html` filter unless another filter is named. Filters come from a
//! [`FilterRegistry`] that is copied into each compiled template, so later
//! registrations do not leak into templates compiled earlier.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

use crate::data::lookup;
use crate::error::{Result, TemplateError};

/// Filter applied to a placeholder's text
pub type Filter = Rc<dyn Fn(&str) -> String>;

/// Filter applied when a placeholder names none
pub const DEFAULT_FILTER: &str = "html";

const MAX_INCLUDE_DEPTH: usize = 16;

/// Named filters available to templates
#[derive(Clone)]
pub struct FilterRegistry {
    filters: BTreeMap<String, Filter>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl FilterRegistry {
    /// Empty registry, not even `html`
    pub fn empty() -> Self {
        Self {
            filters: BTreeMap::new(),
        }
    }

    /// `html`, `raw`, `url`, `upper` and `lower`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("html", escape_html);
        registry.register("raw", str::to_string);
        registry.register("url", encode_url);
        registry.register("upper", str::to_uppercase);
        registry.register("lower", str::to_lowercase);
        registry
    }

    pub fn register(&mut self, name: &str, filter: impl Fn(&str) -> String + 'static) {
        self.filters.insert(name.to_string(), Rc::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.filters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.filters.keys()).finish()
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn encode_url(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Text form of a value inside a template
fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A compiled template holding one or more named blocks
pub trait CompiledTemplate {
    /// Render `block` with `data`
    ///
    /// # Errors
    ///
    /// `TemplateError::UnknownBlock` if no block has that name.
    fn render(&self, block: &str, data: &Value) -> Result<String>;

    fn blocks(&self) -> Vec<String>;
}

/// Turns template source into a [`CompiledTemplate`]
pub trait TemplateEngine {
    fn compile(&self, source: &str, filters: &FilterRegistry) -> Result<Box<dyn CompiledTemplate>>;
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Placeholder { path: String, filters: Vec<String> },
    Include(String),
}

/// `<% target: name %>` blocks with `${path | filter}` placeholders
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockEngine;

impl TemplateEngine for BlockEngine {
    fn compile(&self, source: &str, filters: &FilterRegistry) -> Result<Box<dyn CompiledTemplate>> {
        let mut blocks: BTreeMap<String, Vec<Segment>> = BTreeMap::new();
        let mut current: Option<(String, Vec<Segment>)> = None;
        let mut rest = source;

        loop {
            let (text, command) = match rest.find("<%") {
                Some(open) => {
                    let (text, after_open) = rest.split_at(open);
                    let close = after_open
                        .find("%>")
                        .ok_or_else(|| TemplateError::Syntax("unclosed `<%`".to_string()))?;
                    rest = &after_open[close + 2..];
                    (text, Some(after_open[2..close].trim()))
                }
                None => (std::mem::take(&mut rest), None),
            };

            match current.as_mut() {
                Some((_, segments)) => segments.extend(parse_body(text, filters)?),
                None if !text.trim().is_empty() => {
                    tracing::debug!("ignoring text outside any target");
                }
                None => {}
            }

            let Some(command) = command else {
                break;
            };

            if let Some(name) = command.strip_prefix("target:") {
                if let Some((name, segments)) = current.take() {
                    finish_block(&mut blocks, name, segments)?;
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(TemplateError::Syntax("target without a name".to_string()).into());
                }
                current = Some((name.to_string(), Vec::new()));
            } else if command == "/target" {
                let (name, segments) = current
                    .take()
                    .ok_or_else(|| TemplateError::Syntax("`/target` outside a target".to_string()))?;
                finish_block(&mut blocks, name, segments)?;
            } else if let Some(name) = command.strip_prefix("use:") {
                let (_, segments) = current
                    .as_mut()
                    .ok_or_else(|| TemplateError::Syntax("`use` outside a target".to_string()))?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(TemplateError::Syntax("use without a name".to_string()).into());
                }
                segments.push(Segment::Include(name.to_string()));
            } else {
                return Err(TemplateError::Syntax(format!("unknown command `{}`", command)).into());
            }
        }

        if let Some((name, segments)) = current.take() {
            finish_block(&mut blocks, name, segments)?;
        }

        tracing::debug!(blocks = blocks.len(), "compiled template");
        Ok(Box::new(BlockTemplate {
            blocks,
            filters: filters.clone(),
        }))
    }
}

fn finish_block(
    blocks: &mut BTreeMap<String, Vec<Segment>>,
    name: String,
    segments: Vec<Segment>,
) -> Result<()> {
    if blocks.contains_key(&name) {
        return Err(TemplateError::Syntax(format!("duplicate target `{}`", name)).into());
    }
    blocks.insert(name, segments);
    Ok(())
}

/// Split block text into literal text and placeholders
fn parse_body(body: &str, filters: &FilterRegistry) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find("${") {
        let (text, after_open) = rest.split_at(open);
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }
        let after = &after_open[2..];
        let close = after
            .find('}')
            .ok_or_else(|| TemplateError::Syntax("unclosed `${`".to_string()))?;

        let mut parts = after[..close].split('|').map(str::trim);
        let path = parts.next().unwrap_or_default().to_string();
        if path.is_empty() {
            return Err(TemplateError::Syntax("empty placeholder".to_string()).into());
        }
        let mut named: Vec<String> = parts.map(str::to_string).collect();
        if let Some(unknown) = named.iter().find(|name| !filters.contains(name)) {
            return Err(TemplateError::UnknownFilter(unknown.clone()).into());
        }
        if named.is_empty() {
            named.push(DEFAULT_FILTER.to_string());
        }

        segments.push(Segment::Placeholder {
            path,
            filters: named,
        });
        rest = &after[close + 1..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

/// Output of [`BlockEngine`]
pub struct BlockTemplate {
    blocks: BTreeMap<String, Vec<Segment>>,
    filters: FilterRegistry,
}

impl BlockTemplate {
    fn render_block(&self, block: &str, data: &Value, depth: usize, out: &mut String) -> Result<()> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(TemplateError::Syntax(format!("`use` nested too deeply at `{}`", block)).into());
        }
        let segments = self
            .blocks
            .get(block)
            .ok_or_else(|| TemplateError::UnknownBlock(block.to_string()))?;

        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder { path, filters } => {
                    let value = match data {
                        Value::Object(map) => lookup(map, path),
                        _ => None,
                    };
                    let mut text = value.map(display).unwrap_or_default();
                    for name in filters {
                        let filter = self
                            .filters
                            .get(name)
                            .ok_or_else(|| TemplateError::UnknownFilter(name.clone()))?;
                        text = filter(&text);
                    }
                    out.push_str(&text);
                }
                Segment::Include(name) => self.render_block(name, data, depth + 1, out)?,
            }
        }
        Ok(())
    }
}

impl CompiledTemplate for BlockTemplate {
    fn render(&self, block: &str, data: &Value) -> Result<String> {
        let mut out = String::new();
        self.render_block(block, data, 0, &mut out)?;
        Ok(out)
    }

    fn blocks(&self) -> Vec<String> {
        self.blocks.keys().cloned().collect()
    }
}
