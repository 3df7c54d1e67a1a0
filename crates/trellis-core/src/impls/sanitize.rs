//! PlainTextSanitizer - マークアップを落としてプレーンテキストにする

use crate::ports::sanitize::TextSanitizer;

/// Drops anything that looks like a tag, strips control characters other
/// than newline and tab, and trims surrounding whitespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextSanitizer;

impl TextSanitizer for PlainTextSanitizer {
    fn plain_text(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut in_tag = false;
        for c in input.chars() {
            match c {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                _ if in_tag => {}
                '\n' | '\t' => out.push(c),
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
        out.trim().to_string()
    }
}
