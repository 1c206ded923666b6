//! Kernel source templating.
//!
//! Kernel sources carry `{{NAME}}` placeholders that are filled in once,
//! before any device compiles the source. Byte arrays render as a
//! comma-separated list of hex literals so the surrounding source decides
//! the array syntax (`{ {{DATA}} }` in OpenCL C, `array<u32, 8>({{DATA}})`
//! in WGSL).

use crate::error::{Error, Result};
use std::fmt::{self, Display, Write as _};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTemplate {
    source: String,
}

impl KernelTemplate {
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Substitute a scalar value for every `{{name}}`.
    pub fn replace<V: Display>(&mut self, name: &str, value: V) -> &mut Self {
        let needle = placeholder(name);
        self.source = self.source.replace(&needle, &value.to_string());
        self
    }

    /// Substitute a byte array, rendered as `0x12, 0x34, ...`.
    pub fn replace_array(&mut self, name: &str, bytes: &[u8]) -> &mut Self {
        let mut rendered = String::with_capacity(bytes.len() * 6);
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                rendered.push_str(", ");
            }
            let _ = write!(rendered, "0x{:02X}", b);
        }
        self.replace(name, rendered)
    }

    /// Substitute a word array, rendered as `0x12345678u, ...`.
    pub fn replace_words(&mut self, name: &str, words: &[u32]) -> &mut Self {
        let rendered = words
            .iter()
            .map(|w| format!("0x{:08X}u", w))
            .collect::<Vec<_>>()
            .join(", ");
        self.replace(name, rendered)
    }

    /// Names of placeholders still present, in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut found = Vec::new();
        let mut rest = self.source.as_str();

        while let Some(open) = rest.find(OPEN) {
            let after = &rest[open + OPEN.len()..];
            match after.find(CLOSE) {
                Some(close) => {
                    let name = &after[..close];
                    if is_placeholder_name(name) && !found.iter().any(|n: &String| n == name) {
                        found.push(name.to_string());
                    }
                    rest = &after[close + CLOSE.len()..];
                }
                None => break,
            }
        }

        found
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Finish substitution. Fails if any placeholder was left unresolved.
    pub fn render(self) -> Result<String> {
        let missing = self.placeholders();
        if !missing.is_empty() {
            return Err(Error::compile(
                "kernel template",
                format!("unresolved placeholders: {}", missing.join(", ")),
            ));
        }
        Ok(self.source)
    }
}

impl Display for KernelTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn placeholder(name: &str) -> String {
    format!("{}{}{}", OPEN, name, CLOSE)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
