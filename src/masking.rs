//! Command masking for log output.
//!
//! A mask rule is a regular expression whose capturing groups mark the
//! parts of a command line that must never reach the logs. Only the group
//! spans are replaced; the text around them (flags, separators) is kept so
//! that the logged command is still useful for debugging.
//!
//! Masking only affects what is logged. The command that is executed is
//! always the original one.

use std::fmt;

use regex::Regex;

use crate::Result;

/// Replacement text for every masked group.
pub const MASK_MARKER: &str = "<*masked*>";

/// A compiled masking rule.
#[derive(Clone)]
pub struct MaskRule {
    regex: Regex,
}

impl MaskRule {
    /// Compile a masking rule.
    ///
    /// Invalid pattern syntax is reported as
    /// [`ExecError::InvalidMaskRule`](crate::ExecError::InvalidMaskRule).
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Number of capturing groups (excluding the implicit whole-match group).
    pub fn group_count(&self) -> usize {
        self.regex.captures_len() - 1
    }

    /// Replace every captured group span in `text` with [`MASK_MARKER`].
    pub fn mask(&self, text: &str) -> String {
        if self.group_count() == 0 {
            return text.to_string();
        }

        let mut masked = String::with_capacity(text.len());
        let mut last = 0;

        let mut spans = Vec::with_capacity(self.group_count());
        for caps in self.regex.captures_iter(text) {
            // Group numbering does not follow text order inside repetitions.
            spans.clear();
            spans.extend(caps.iter().skip(1).flatten().map(|m| m.range()));
            spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

            for span in &spans {
                // Nested groups lie inside a span that is already masked.
                if span.start < last {
                    continue;
                }
                masked.push_str(&text[last..span.start]);
                masked.push_str(MASK_MARKER);
                last = span.end;
            }
        }

        masked.push_str(&text[last..]);
        masked
    }
}

impl fmt::Debug for MaskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MaskRule").field(&self.regex.as_str()).finish()
    }
}

impl std::str::FromStr for MaskRule {
    type Err = crate::ExecError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Build the loggable form of a command.
///
/// Trailing whitespace is stripped once, then the executor-wide rule and the
/// per-call rule are applied in that order. Both are always applied when
/// present.
pub fn mask_command(
    command: &str,
    default_rule: Option<&MaskRule>,
    call_rule: Option<&MaskRule>,
) -> String {
    let mut cmd = command.trim_end().to_string();

    if let Some(rule) = default_rule {
        cmd = rule.mask(&cmd);
    }
    if let Some(rule) = call_rule {
        cmd = rule.mask(&cmd);
    }

    cmd
}
