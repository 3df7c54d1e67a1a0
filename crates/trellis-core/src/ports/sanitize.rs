//! TextSanitizer port - 自由記述フィールドの無害化

/// Turns untrusted free text into plain text.
///
/// Length limits are enforced by the caller on the sanitized output.
pub trait TextSanitizer: Send + Sync {
    fn plain_text(&self, input: &str) -> String;
}
