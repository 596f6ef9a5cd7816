use crate::span::Span;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Syntax error: {msg}")]
    Syntax { msg: String, span: Span },

    #[error("Resolution error: {msg}")]
    Resolution { msg: String, span: Span },

    #[error("Unsupported construct: {msg}")]
    Unsupported { msg: String, span: Span },

    #[error("Layout conflict: {msg}")]
    LayoutConflict { msg: String, span: Span },

    #[error("Name collision: {msg}")]
    NameCollision { msg: String },

    #[error("Config error: {msg}")]
    Config { msg: String, path: PathBuf },
}

impl CompileError {
    pub fn syntax(msg: impl Into<String>, span: Span) -> Self {
        Self::Syntax { msg: msg.into(), span }
    }

    pub fn resolution(msg: impl Into<String>, span: Span) -> Self {
        Self::Resolution { msg: msg.into(), span }
    }

    pub fn unsupported(msg: impl Into<String>, span: Span) -> Self {
        Self::Unsupported { msg: msg.into(), span }
    }

    pub fn layout_conflict(msg: impl Into<String>, span: Span) -> Self {
        Self::LayoutConflict { msg: msg.into(), span }
    }

    pub fn name_collision(msg: impl Into<String>) -> Self {
        Self::NameCollision { msg: msg.into() }
    }

    pub fn config(msg: impl Into<String>, path: PathBuf) -> Self {
        Self::Config { msg: msg.into(), path }
    }

    /// Unit-scoped errors corrupt shared symbol or layout space and abort the whole unit.
    /// Resolution and unsupported-construct errors only fail the enclosing function.
    pub fn is_unit_scoped(&self) -> bool {
        !matches!(self, Self::Resolution { .. } | Self::Unsupported { .. })
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Syntax { .. } => DiagnosticKind::Syntax,
            Self::Resolution { .. } => DiagnosticKind::Resolution,
            Self::Unsupported { .. } => DiagnosticKind::Unsupported,
            Self::LayoutConflict { .. } => DiagnosticKind::LayoutConflict,
            Self::NameCollision { .. } => DiagnosticKind::NameCollision,
            Self::Config { .. } => DiagnosticKind::Config,
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Syntax { span, .. }
            | Self::Resolution { span, .. }
            | Self::Unsupported { span, .. }
            | Self::LayoutConflict { span, .. } => Some(*span),
            Self::NameCollision { .. } | Self::Config { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Syntax { msg, .. }
            | Self::Resolution { msg, .. }
            | Self::Unsupported { msg, .. }
            | Self::LayoutConflict { msg, .. }
            | Self::NameCollision { msg }
            | Self::Config { msg, .. } => msg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Syntax,
    Resolution,
    Unsupported,
    LayoutConflict,
    NameCollision,
    Config,
}

impl DiagnosticKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Syntax => "syntax error",
            Self::Resolution => "resolution error",
            Self::Unsupported => "unsupported construct",
            Self::LayoutConflict => "layout conflict",
            Self::NameCollision => "name collision",
            Self::Config => "config error",
        }
    }
}

/// One reported problem, attached to the compile result in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<Span>,
    /// Source-level name of the function or class the problem was found in.
    pub scope: Option<String>,
}

impl Diagnostic {
    pub fn from_error(err: &CompileError, scope: Option<&str>) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
            span: err.span(),
            scope: scope.map(str::to_string),
        }
    }

    /// `line:col: kind: message` form used by plain-text output and tests.
    pub fn short(&self, source: &str) -> String {
        match self.span {
            Some(span) => {
                let (line, col) = span.line_col(source);
                format!("{line}:{col}: {}: {}", self.kind.label(), self.message)
            }
            None => format!("{}: {}", self.kind.label(), self.message),
        }
    }
}

/// Ordered diagnostic list for one compilation run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, err: &CompileError, scope: Option<&str>) {
        tracing::warn!(kind = ?err.kind(), scope = scope.unwrap_or("<module>"), "{}", err.message());
        self.items.push(Diagnostic::from_error(err, scope));
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.items)
    }
}

/// Render a CompileError with ariadne for nice terminal output.
pub fn render_error(source: &str, filename: &str, err: &CompileError) -> std::io::Result<()> {
    render_diagnostic(source, filename, &Diagnostic::from_error(err, None))
}

/// Render one diagnostic to stderr.
pub fn render_diagnostic(source: &str, filename: &str, diag: &Diagnostic) -> std::io::Result<()> {
    use ariadne::{Label, Report, ReportKind, Source};

    match diag.span {
        Some(span) => {
            let mut report = Report::build(ReportKind::Error, (), span.start)
                .with_message(format!("{} in {filename}", diag.kind.label()))
                .with_label(Label::new(span.start..span.end).with_message(&diag.message));
            if let Some(scope) = &diag.scope {
                report = report.with_note(format!("while translating `{scope}`"));
            }
            report.finish().eprint(Source::from(source))
        }
        None => {
            eprintln!("error[{}]: {}", diag.kind.label(), diag.message);
            eprintln!("  --> {filename}");
            Ok(())
        }
    }
}

/// Render one diagnostic without colour into a string.
pub fn render_to_string(source: &str, diag: &Diagnostic) -> String {
    use ariadne::{Config, Label, Report, ReportKind, Source};

    let Some(span) = diag.span else {
        return format!("error[{}]: {}", diag.kind.label(), diag.message);
    };
    let mut buf = Vec::new();
    let written = Report::build(ReportKind::Error, (), span.start)
        .with_config(Config::default().with_color(false))
        .with_message(diag.kind.label())
        .with_label(Label::new(span.start..span.end).with_message(&diag.message))
        .finish()
        .write(Source::from(source), &mut buf);
    match written {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(_) => diag.short(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_scoped_errors_are_not_unit_scoped() {
        assert!(!CompileError::resolution("unknown type 'Foo'", Span::new(0, 3)).is_unit_scoped());
        assert!(!CompileError::unsupported("lambda", Span::new(0, 6)).is_unit_scoped());
    }

    #[test]
    fn layout_and_name_errors_are_unit_scoped() {
        assert!(CompileError::layout_conflict("bad override", Span::new(1, 2)).is_unit_scoped());
        assert!(CompileError::name_collision("m_f_native").is_unit_scoped());
        assert!(CompileError::syntax("unexpected token", Span::new(0, 1)).is_unit_scoped());
    }

    #[test]
    fn diagnostics_keep_report_order() {
        let mut diags = Diagnostics::new();
        diags.report(&CompileError::resolution("first", Span::new(0, 1)), Some("f"));
        diags.report(&CompileError::unsupported("second", Span::new(2, 3)), Some("g"));
        let msgs: Vec<_> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(msgs, vec!["first", "second"]);
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn short_form_has_line_and_column() {
        let src = "def f(x: Foo) -> int:\n    return 1\n";
        let err = CompileError::resolution("unknown type 'Foo'", Span::new(9, 12));
        let diag = Diagnostic::from_error(&err, Some("f"));
        assert_eq!(diag.short(src), "1:10: resolution error: unknown type 'Foo'");
    }

    #[test]
    fn json_uses_snake_case_kinds() {
        let mut diags = Diagnostics::new();
        diags.report(&CompileError::layout_conflict("slot 'm'", Span::new(0, 1)), Some("D"));
        let json = diags.to_json().unwrap();
        assert!(json.contains("\"layout_conflict\""));
        assert!(json.contains("\"scope\": \"D\""));
    }

    #[test]
    fn render_to_string_mentions_message() {
        let src = "def f(x: Foo) -> int:\n    return 1\n";
        let err = CompileError::resolution("unknown type 'Foo'", Span::new(9, 12));
        let out = render_to_string(src, &Diagnostic::from_error(&err, None));
        assert!(out.contains("unknown type 'Foo'"));
    }
}
