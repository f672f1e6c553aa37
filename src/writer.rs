use std::fmt;

/// Output sink used by the interpreter. Implementations track indentation,
/// anchors and line wrapping; every write returns the number of chars emitted.
pub trait TemplateWriter {
    fn push_indentation(&mut self, indent: &str);

    fn pop_indentation(&mut self) -> Option<String>;

    fn push_anchor_point(&mut self);

    fn pop_anchor_point(&mut self);

    fn set_line_width(&mut self, width: Option<usize>);

    fn line_width(&self) -> Option<usize>;

    fn write(&mut self, s: &str) -> Result<usize, fmt::Error>;

    /// Emits `wrap` if the line is full, then writes `s`.
    fn write_with_wrap(&mut self, s: &str, wrap: &str) -> Result<usize, fmt::Error> {
        let n = self.write_wrap(wrap)?;
        Ok(n + self.write(s)?)
    }

    /// Emits `wrap` only when the current line has reached the line width.
    fn write_wrap(&mut self, wrap: &str) -> Result<usize, fmt::Error>;

    fn write_separator(&mut self, s: &str) -> Result<usize, fmt::Error> {
        self.write(s)
    }

    /// Chars written so far.
    fn index(&self) -> usize;

    fn newline(&self) -> &str;
}

/// Writer that indents every line started inside an indented expression and
/// converts each `\n` (or `\r\n`) into its configured newline.
#[derive(Debug)]
pub struct AutoIndentWriter<W> {
    out: W,
    indents: Vec<String>,
    anchors: Vec<usize>,
    newline: String,
    line_width: Option<usize>,
    char_position: usize,
    char_index: usize,
    at_start_of_line: bool,
}

impl<W: fmt::Write> AutoIndentWriter<W> {
    pub fn new(out: W) -> Self {
        Self::with_newline(out, "\n")
    }

    pub fn with_newline(out: W, newline: &str) -> Self {
        Self {
            out,
            indents: Vec::new(),
            anchors: Vec::new(),
            newline: newline.to_string(),
            line_width: None,
            char_position: 0,
            char_index: 0,
            at_start_of_line: true,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_newline(&mut self) -> Result<usize, fmt::Error> {
        self.out.write_str(&self.newline)?;
        let n = self.newline.chars().count();
        self.char_index += n;
        self.char_position = 0;
        Ok(n)
    }

    /// Writes the indentation stack, then pads out to the innermost anchor.
    fn indent(&mut self) -> Result<usize, fmt::Error> {
        let mut n = 0;
        for ind in &self.indents {
            self.out.write_str(ind)?;
            n += ind.chars().count();
        }
        if let Some(&anchor) = self.anchors.last() {
            if anchor > n {
                for _ in n..anchor {
                    self.out.write_char(' ')?;
                }
                n = anchor;
            }
        }
        self.char_position += n;
        self.char_index += n;
        Ok(n)
    }

    fn write_raw(&mut self, s: &str, indent: bool) -> Result<usize, fmt::Error> {
        let mut n = 0;
        for c in s.chars() {
            match c {
                '\r' => continue,
                '\n' => {
                    self.at_start_of_line = true;
                    n += self.write_newline()?;
                }
                _ => {
                    if self.at_start_of_line {
                        if indent {
                            n += self.indent()?;
                        }
                        self.at_start_of_line = false;
                    }
                    self.out.write_char(c)?;
                    n += 1;
                    self.char_position += 1;
                    self.char_index += 1;
                }
            }
        }
        Ok(n)
    }
}

impl<W: fmt::Write> TemplateWriter for AutoIndentWriter<W> {
    fn push_indentation(&mut self, indent: &str) {
        self.indents.push(indent.to_string());
    }

    fn pop_indentation(&mut self) -> Option<String> {
        self.indents.pop()
    }

    fn push_anchor_point(&mut self) {
        self.anchors.push(self.char_position);
    }

    fn pop_anchor_point(&mut self) {
        self.anchors.pop();
    }

    fn set_line_width(&mut self, width: Option<usize>) {
        self.line_width = width;
    }

    fn line_width(&self) -> Option<usize> {
        self.line_width
    }

    fn write(&mut self, s: &str) -> Result<usize, fmt::Error> {
        self.write_raw(s, true)
    }

    fn write_wrap(&mut self, wrap: &str) -> Result<usize, fmt::Error> {
        let width = match self.line_width {
            Some(w) => w,
            None => return Ok(0),
        };
        if self.at_start_of_line || self.char_position < width {
            return Ok(0);
        }
        // split the wrap string at its newline: emit the part before, the
        // newline, the indentation, then the rest
        let mut n = 0;
        for c in wrap.chars() {
            if c == '\n' {
                n += self.write_newline()?;
                n += self.indent()?;
            } else {
                self.out.write_char(c)?;
                n += 1;
                self.char_position += 1;
                self.char_index += 1;
            }
        }
        Ok(n)
    }

    fn index(&self) -> usize {
        self.char_index
    }

    fn newline(&self) -> &str {
        &self.newline
    }
}

/// Writer that ignores indentation; text is emitted as given.
#[derive(Debug)]
pub struct NoIndentWriter<W> {
    inner: AutoIndentWriter<W>,
}

impl<W: fmt::Write> NoIndentWriter<W> {
    pub fn new(out: W) -> Self {
        Self { inner: AutoIndentWriter::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

impl<W: fmt::Write> TemplateWriter for NoIndentWriter<W> {
    fn push_indentation(&mut self, indent: &str) {
        self.inner.push_indentation(indent);
    }

    fn pop_indentation(&mut self) -> Option<String> {
        self.inner.pop_indentation()
    }

    fn push_anchor_point(&mut self) {
        self.inner.push_anchor_point();
    }

    fn pop_anchor_point(&mut self) {
        self.inner.pop_anchor_point();
    }

    fn set_line_width(&mut self, width: Option<usize>) {
        self.inner.set_line_width(width);
    }

    fn line_width(&self) -> Option<usize> {
        self.inner.line_width()
    }

    fn write(&mut self, s: &str) -> Result<usize, fmt::Error> {
        self.inner.write_raw(s, false)
    }

    fn write_wrap(&mut self, wrap: &str) -> Result<usize, fmt::Error> {
        self.inner.write_wrap(wrap)
    }

    fn index(&self) -> usize {
        self.inner.index()
    }

    fn newline(&self) -> &str {
        self.inner.newline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_indents_every_line() {
        let mut w = AutoIndentWriter::new(String::new());
        w.write("begin\n").unwrap();
        w.push_indentation("  ");
        w.write("a\nb\n").unwrap();
        w.pop_indentation();
        w.write("end").unwrap();
        assert_eq!(w.into_inner(), "begin\n  a\n  b\nend");
    }

    #[test]
    fn test_blank_lines_get_no_indent() {
        let mut w = AutoIndentWriter::new(String::new());
        w.push_indentation("    ");
        w.write("a\n\nb").unwrap();
        assert_eq!(w.into_inner(), "    a\n\n    b");
    }

    #[test]
    fn test_newline_normalization() {
        let mut w = AutoIndentWriter::with_newline(String::new(), "\r\n");
        let n = w.write("a\nb\r\nc").unwrap();
        assert_eq!(n, 7);
        assert_eq!(w.into_inner(), "a\r\nb\r\nc");
    }

    #[test]
    fn test_wrap_aligns_to_anchor() {
        let mut w = AutoIndentWriter::new(String::new());
        w.set_line_width(Some(6));
        w.write("x = ").unwrap();
        w.push_anchor_point();
        for v in ["aa", "bb", "cc"] {
            w.write_with_wrap(v, "\n").unwrap();
        }
        w.pop_anchor_point();
        assert_eq!(w.into_inner(), "x = aa\n    bb\n    cc");
    }

    #[test]
    fn test_no_indent_writer() {
        let mut w = NoIndentWriter::new(String::new());
        w.push_indentation("  ");
        w.write("a\nb").unwrap();
        assert_eq!(w.into_inner(), "a\nb");
    }

    proptest! {
        #[test]
        fn prop_index_counts_output_chars(s in "[a-z \\n]{0,40}", indent in " {0,4}") {
            let mut w = AutoIndentWriter::new(String::new());
            w.push_indentation(&indent);
            let n = w.write(&s).unwrap();
            let index = w.index();
            let out = w.into_inner();
            prop_assert_eq!(n, out.chars().count());
            prop_assert_eq!(index, out.chars().count());
        }
    }
}
