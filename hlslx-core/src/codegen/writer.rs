//! Indented text buffer shared by every generator.

const INDENT: &str = "    ";

#[derive(Debug, Default, Clone)]
pub struct CodeWriter {
    buffer: String,
    indent: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one indented line.
    pub fn line(&mut self, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            self.buffer.push_str(INDENT);
        }
        self.buffer.push_str(text.as_ref());
        self.buffer.push('\n');
    }

    pub fn blank(&mut self) {
        if !self.buffer.is_empty() && !self.buffer.ends_with("\n\n") {
            self.buffer.push('\n');
        }
    }

    /// `header {` followed by an indent.
    pub fn open(&mut self, header: impl AsRef<str>) {
        let header = header.as_ref();
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(format!("{} {{", header));
        }
        self.indent += 1;
    }

    /// Dedent and write `}` plus an optional suffix such as `;`.
    pub fn close(&mut self, suffix: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(format!("}}{}", suffix));
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Append text written by another writer, keeping its own indentation.
    pub fn append(&mut self, other: &CodeWriter) {
        self.buffer.push_str(&other.buffer);
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks_indent() {
        let mut out = CodeWriter::new();
        out.open("void main()");
        out.line("x = 1;");
        out.open("if (x)");
        out.line("discard;");
        out.close("");
        out.close("");
        assert_eq!(
            out.as_str(),
            "void main() {\n    x = 1;\n    if (x) {\n        discard;\n    }\n}\n"
        );
    }

    #[test]
    fn test_blank_never_doubles() {
        let mut out = CodeWriter::new();
        out.blank();
        out.line("a");
        out.blank();
        out.blank();
        out.line("b");
        assert_eq!(out.as_str(), "a\n\nb\n");
    }
}
