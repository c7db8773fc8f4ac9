//! Line-buffer transformations for the comment block at the head of a file.
//!
//! Block detection is textual: a line belongs to a block boundary when it
//! *contains* the configured token. Source syntax is never parsed, so a string
//! literal holding a token on line 1 is treated as a block start.

/// What [`FileContent::strip_leading_block`] found at the head of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockScan {
    /// Line 1 does not contain the start token.
    Absent,
    /// Block spans lines `0..=end_line`.
    Terminated { end_line: usize },
    /// Line 1 contains the start token but no line contains the end token.
    Unterminated,
}

impl BlockScan {
    /// True when the block start was found, whether or not it was terminated.
    pub fn found(&self) -> bool {
        !matches!(self, BlockScan::Absent)
    }
}

/// One file's text as an ordered line buffer, owned by a single update task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileContent {
    lines: Vec<String>,
}

impl FileContent {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Split on `\n`; a trailing `\r` on each line is dropped.
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Locate a block that starts on line 1, without modifying the buffer.
    ///
    /// The end token is searched from line 1 itself, so a single line holding
    /// both tokens is a complete block.
    pub fn scan_leading_block(&self, start_token: &str, end_token: &str) -> BlockScan {
        match self.lines.first() {
            Some(first) if first.contains(start_token) => self
                .lines
                .iter()
                .position(|line| line.contains(end_token))
                .map_or(BlockScan::Unterminated, |end_line| BlockScan::Terminated {
                    end_line,
                }),
            _ => BlockScan::Absent,
        }
    }

    /// Remove the block starting on line 1, including both boundary lines.
    ///
    /// An unterminated block consumes the whole buffer. Callers that must not
    /// lose content check the returned [`BlockScan`] before persisting.
    pub fn strip_leading_block(&mut self, start_token: &str, end_token: &str) -> BlockScan {
        let scan = self.scan_leading_block(start_token, end_token);
        match scan {
            BlockScan::Absent => {}
            BlockScan::Terminated { end_line } => {
                self.lines.drain(..=end_line);
            }
            BlockScan::Unterminated => self.lines.clear(),
        }
        scan
    }

    /// Insert `block_text` ahead of every existing line. No separator line is added.
    pub fn prepend_block(&mut self, block_text: &str) {
        self.lines.insert(0, block_text.to_string());
    }

    /// Serialize the buffer: every entry followed by exactly one `\n`.
    pub fn render(&self) -> String {
        let capacity = self.lines.iter().map(|line| line.len() + 1).sum();
        let mut out = String::with_capacity(capacity);
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Remove a block that starts on line 1; returns the remaining lines and whether
/// a block start was found.
///
/// `["START", "a", "b"]` with an end token that never appears yields an empty
/// sequence.
pub fn strip_leading_block(
    lines: Vec<String>,
    start_token: &str,
    end_token: &str,
) -> (Vec<String>, bool) {
    let mut content = FileContent::new(lines);
    let scan = content.strip_leading_block(start_token, end_token);
    (content.into_lines(), scan.found())
}

/// `[block_text] + lines`.
pub fn prepend_block(lines: Vec<String>, block_text: &str) -> Vec<String> {
    let mut content = FileContent::new(lines);
    content.prepend_block(block_text);
    content.into_lines()
}

/// Strip any existing block, prepend the new one and render the result.
///
/// Returns the rendered text together with the scan result of the strip.
pub fn replace_leading_block(
    text: &str,
    block_text: &str,
    start_token: &str,
    end_token: &str,
) -> (String, BlockScan) {
    let mut content = FileContent::from_text(text);
    let scan = content.strip_leading_block(start_token, end_token);
    content.prepend_block(block_text);
    (content.render(), scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_block_on_line_one_is_untouched() {
        let input = lines(&["package main", "", "func main() {}"]);
        let (out, removed) = strip_leading_block(input.clone(), "/*", "*/");

        assert!(!removed);
        assert_eq!(out, input);
    }

    #[test]
    fn test_block_must_start_on_line_one() {
        let input = lines(&["x", "/*LIC*/", "code"]);
        let (out, removed) = strip_leading_block(input.clone(), "LIC", "LIC");

        assert!(!removed);
        assert_eq!(out, input);
    }

    #[test]
    fn test_blank_first_line_is_not_skipped() {
        let input = lines(&["", "/* LIC */", "code"]);
        let (out, removed) = strip_leading_block(input.clone(), "/*", "*/");

        assert!(!removed);
        assert_eq!(out, input);
    }

    #[test]
    fn test_multi_line_block_removed_with_boundaries() {
        let input = lines(&["/*LIC", "text", "LIC*/", "code"]);
        let (out, removed) = strip_leading_block(input, "/*LIC", "LIC*/");

        assert!(removed);
        assert_eq!(out, lines(&["code"]));
    }

    #[test]
    fn test_single_line_block() {
        let input = lines(&["/* LIC */", "/* not a block */", "code"]);
        let (out, removed) = strip_leading_block(input, "/*", "*/");

        assert!(removed);
        assert_eq!(out, lines(&["/* not a block */", "code"]));
    }

    #[test]
    fn test_only_first_block_removed() {
        let input = lines(&["// START", "// END", "// START", "keep", "// END"]);
        let (out, removed) = strip_leading_block(input, "START", "END");

        assert!(removed);
        assert_eq!(out, lines(&["// START", "keep", "// END"]));
    }

    #[test]
    fn test_unterminated_block_consumes_everything() {
        let input = lines(&["START", "a", "b"]);
        let (out, removed) = strip_leading_block(input, "START", "END");

        assert!(removed);
        assert!(out.is_empty());
    }

    #[test]
    fn test_scan_reports_unterminated_without_mutating() {
        let content = FileContent::new(lines(&["START", "a", "b"]));
        assert_eq!(
            content.scan_leading_block("START", "END"),
            BlockScan::Unterminated
        );
        assert_eq!(content.lines().len(), 3);
    }

    #[test]
    fn test_scan_on_empty_buffer() {
        let content = FileContent::default();
        assert_eq!(content.scan_leading_block("/*", "*/"), BlockScan::Absent);
    }

    #[test]
    fn test_prepend_block_no_separator_added() {
        let out = prepend_block(lines(&["code"]), "/* LIC */");
        assert_eq!(out, lines(&["/* LIC */", "code"]));

        let rendered = FileContent::new(out).render();
        assert_eq!(rendered, "/* LIC */\ncode\n");
    }

    #[test]
    fn test_prepend_block_to_empty_file() {
        let (rendered, scan) = replace_leading_block("", "/* LIC */", "/*", "*/");
        assert_eq!(rendered, "/* LIC */\n");
        assert_eq!(scan, BlockScan::Absent);
    }

    #[test]
    fn test_crlf_input_written_as_lf() {
        let (rendered, _) = replace_leading_block("a\r\nb\r\n", "/* LIC */", "/*", "*/");
        assert_eq!(rendered, "/* LIC */\na\nb\n");
    }

    #[test]
    fn test_replace_swaps_old_block_for_new() {
        let original = "/* OLD\n * 2019\n */\nfn main() {}\n";
        let (rendered, scan) =
            replace_leading_block(original, "/* NEW\n * 2026\n */", "/* ", " */");

        assert_eq!(scan, BlockScan::Terminated { end_line: 2 });
        assert_eq!(rendered, "/* NEW\n * 2026\n */\nfn main() {}\n");
    }

    #[test]
    fn test_replace_is_idempotent() {
        let block = "// DISCLAIMER-START\n// Copyright\n// DISCLAIMER-END";
        let (first, _) =
            replace_leading_block("use std::io;\n", block, "DISCLAIMER-START", "DISCLAIMER-END");
        let (second, scan) =
            replace_leading_block(&first, block, "DISCLAIMER-START", "DISCLAIMER-END");

        assert_eq!(scan, BlockScan::Terminated { end_line: 2 });
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_replace_twice_equals_replace_once(
            body in prop::collection::vec("[a-z0-9 ;{}()]{0,20}", 0..20),
            inner in prop::collection::vec("[a-z ]{0,20}", 0..5),
        ) {
            let mut block = vec!["/* BEGIN".to_string()];
            block.extend(inner);
            block.push("END */".to_string());
            let block = block.join("\n");
            let text = body.join("\n");

            let (once, _) = replace_leading_block(&text, &block, "BEGIN", "END");
            let (twice, scan) = replace_leading_block(&once, &block, "BEGIN", "END");

            prop_assert!(scan.found());
            prop_assert_eq!(once, twice);
        }
    }
}
