/// Indented C text buffer.
#[derive(Debug, Default)]
pub struct CWriter {
    buf: String,
    indent: usize,
}

impl CWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer whose text will be appended inside `depth` open blocks.
    pub fn indented(depth: usize) -> Self {
        Self { buf: String::new(), indent: depth }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.buf.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.buf.push_str("    ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        if !self.buf.is_empty() && !self.buf.ends_with("\n\n") {
            self.buf.push('\n');
        }
    }

    /// Write `header {` and indent what follows.
    pub fn open(&mut self, header: impl AsRef<str>) {
        let header = header.as_ref();
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(format!("{header} {{"));
        }
        self.indent += 1;
    }

    pub fn close(&mut self) {
        self.close_with("}");
    }

    /// Dedent and write a closing line such as `} else {` or `};`.
    pub fn close_with(&mut self, text: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
    }

    /// Close a block and reopen at the same depth, e.g. `} else {`.
    pub fn reopen(&mut self, text: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(text);
        self.indent += 1;
    }

    /// Raw text with no indentation, such as a label.
    pub fn raw(&mut self, text: impl AsRef<str>) {
        self.buf.push_str(text.as_ref());
        self.buf.push('\n');
    }

    pub fn append(&mut self, other: CWriter) {
        self.buf.push_str(&other.buf);
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_blocks_indent() {
        let mut w = CWriter::new();
        w.open("if (x)");
        w.line("y = 1;");
        w.reopen("} else {");
        w.line("y = 2;");
        w.close();
        assert_eq!(w.finish(), "if (x) {\n    y = 1;\n} else {\n    y = 2;\n}\n");
    }

    #[test]
    fn blank_lines_do_not_stack() {
        let mut w = CWriter::new();
        w.line("a;");
        w.blank();
        w.blank();
        w.line("b;");
        assert_eq!(w.finish(), "a;\n\nb;\n");
    }
}
