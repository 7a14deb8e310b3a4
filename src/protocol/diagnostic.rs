//! Generation diagnostics
//!
//! Diagnostics are data, not errors: a generator records every problem it
//! finds and keeps going, and the whole list travels back with the output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
    pub byte: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub filename: String,
    pub start: Pos,
    pub end: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Range>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: String::new(),
            subject: None,
        }
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: String::new(),
            subject: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn at(mut self, subject: Range) -> Self {
        self.subject = Some(subject);
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.subject {
            Some(r) => write!(
                f,
                "{}:{}:{}: {}: {}",
                r.filename, r.start.line, r.start.column, level, self.summary
            ),
            None => write!(f, "{}: {}", level, self.summary),
        }
    }
}

/// Accumulates diagnostics across every generated unit.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!("diagnostic: {}", diagnostic);
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        for d in other {
            self.push(d);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_without_short_circuit() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::warning("first"));
        diags.push(Diagnostic::error("second"));
        diags.push(Diagnostic::warning("third"));
        assert_eq!(diags.len(), 3);
        assert!(diags.has_errors());
    }

    #[test]
    fn display_includes_location() {
        let d = Diagnostic::error("unsupported block").at(Range {
            filename: "main.pp".to_string(),
            start: Pos { line: 3, column: 1, byte: 20 },
            end: Pos { line: 3, column: 10, byte: 29 },
        });
        assert_eq!(d.to_string(), "main.pp:3:1: error: unsupported block");
    }
}
