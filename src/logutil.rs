//! Logging utilities for sanitizing multi-line user/content strings so logs stay single-line.
//! Escapes control characters that otherwise break log readability.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

/// Appends one `serde_json`-encoded line per structured event to a dedicated
/// ndjson file, the way `init_logging` splits `security`-target records into
/// their own file alongside the human-readable log.
pub struct StructuredLogSink {
    file: Option<Mutex<std::fs::File>>,
}

impl StructuredLogSink {
    /// `path = None` disables the sink; every `write_line` call becomes a
    /// no-op, used when `logging.structured_file` is unset in config.
    pub fn open(path: Option<&str>) -> std::io::Result<Self> {
        let file = match path {
            Some(path) => Some(Mutex::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            )),
            None => None,
        };
        Ok(Self { file })
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Write one pre-serialized JSON line (caller supplies the object, this
    /// just owns the file handle and appends a trailing newline).
    pub fn write_line(&self, line: &str) {
        if let Some(file) = &self.file {
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
        }
    }
}

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long strings (over `max_preview`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 300; // generous for debug; adjust if needed
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                // Represent other control chars as hex \xNN
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
