use pulldown_cmark::{CodeBlockKind, Event, Parser as CmarkParser, Tag, TagEnd};

use crate::cache::SourceContent;
use crate::error::{RagindexError, Result};

/// Turns one source's raw content into plain text.
///
/// Empty or whitespace-only output is a valid result meaning "nothing to
/// index"; malformed input is an [`RagindexError::Extraction`].
pub trait Extractor: Send + Sync {
    fn extract(&self, key: &str, content: &SourceContent) -> Result<String>;
}

/// A text format handled by [`ExtractorRegistry`]
pub trait Format: Send + Sync {
    /// Check if this format handles the given file extension
    fn can_extract(&self, extension: &str) -> bool;

    fn extract_text(&self, raw: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Plain text, passed through unchanged
pub struct PlainText;

impl Format for PlainText {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "txt"
    }

    fn extract_text(&self, raw: &str) -> Result<String> {
        Ok(raw.to_string())
    }

    fn name(&self) -> &'static str {
        "plaintext"
    }
}

/// Markdown flattened to text with `pulldown-cmark`
///
/// Headings, paragraphs, list items and code blocks become separate lines.
/// Leading YAML frontmatter is dropped.
pub struct Markdown;

impl Format for Markdown {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "md" || extension == "markdown"
    }

    fn extract_text(&self, raw: &str) -> Result<String> {
        let body = strip_frontmatter(raw);
        let mut out = String::with_capacity(body.len());

        for event in CmarkParser::new(body) {
            match event {
                Event::Text(text) => out.push_str(&text),
                Event::Code(code) => {
                    out.push('`');
                    out.push_str(&code);
                    out.push('`');
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    ensure_line_start(&mut out);
                    if let CodeBlockKind::Fenced(lang) = kind {
                        out.push_str("```");
                        out.push_str(&lang);
                        out.push('\n');
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    ensure_line_start(&mut out);
                    out.push_str("```\n");
                }
                Event::SoftBreak => out.push(' '),
                Event::HardBreak => out.push('\n'),
                Event::Start(Tag::Item) => {
                    ensure_line_start(&mut out);
                    out.push_str("- ");
                }
                Event::End(TagEnd::Heading(_))
                | Event::End(TagEnd::Paragraph)
                | Event::End(TagEnd::Item)
                | Event::End(TagEnd::TableRow)
                | Event::End(TagEnd::TableHead) => ensure_line_start(&mut out),
                Event::End(TagEnd::TableCell) => out.push('\t'),
                _ => {}
            }
        }

        Ok(out.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "markdown"
    }
}

fn ensure_line_start(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

fn strip_frontmatter(content: &str) -> &str {
    if let Some(rest) = content.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            return &rest[end + 5..];
        }
    }
    content
}

/// Extractor that selects a [`Format`] by the key's extension
///
/// If the selected format fails, falls back to plain text so the source can
/// still be ingested. Keys with no registered format are extraction errors.
pub struct ExtractorRegistry {
    formats: Vec<Box<dyn Format>>,
}

impl ExtractorRegistry {
    /// Registry with all built-in formats
    pub fn new() -> Self {
        let mut registry = Self {
            formats: Vec::new(),
        };
        registry.register(Box::new(PlainText));
        registry.register(Box::new(Markdown));
        registry
    }

    pub fn register(&mut self, format: Box<dyn Format>) {
        self.formats.push(format);
    }

    /// Find the format for a lowercase extension
    pub fn find_format(&self, extension: &str) -> Option<&dyn Format> {
        self.formats
            .iter()
            .find(|f| f.can_extract(extension))
            .map(|f| f.as_ref())
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for ExtractorRegistry {
    fn extract(&self, key: &str, content: &SourceContent) -> Result<String> {
        let extension = key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let format = self.find_format(&extension).ok_or_else(|| RagindexError::Extraction {
            key: key.to_string(),
            reason: format!("no extractor for extension '{}'", extension),
        })?;

        let bytes = content.read()?;
        let raw = std::str::from_utf8(&bytes).map_err(|e| RagindexError::Extraction {
            key: key.to_string(),
            reason: format!("content is not valid UTF-8: {}", e),
        })?;

        match format.extract_text(raw) {
            Ok(text) => Ok(text),
            Err(e) => {
                log::warn!(
                    "{} extractor failed for {}, falling back to plain text: {}",
                    format.name(),
                    key,
                    e
                );
                PlainText.extract_text(raw)
            }
        }
    }
}
