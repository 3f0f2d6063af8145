//! Line assembly for interactive output
//!
//! Output arrives in arbitrary chunks. Complete lines are released as
//! soon as their terminator arrives; the unterminated tail stays
//! available as a fragment because interactive prompts usually end
//! without a newline.

/// Remove terminal escape sequences (CSI, OSC and two-byte escapes)
pub fn strip_ansi(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\x1b' {
            result.push(ch);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // Parameters, then a final byte in '@'..='~'
                while let Some(c) = chars.next() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                // Terminated by BEL or ST (ESC \)
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }

    result
}

/// Clean one raw line: drop escapes, keep only the text after the last
/// carriage return, trim trailing whitespace.
pub fn clean_line(raw: &str) -> String {
    let stripped = strip_ansi(raw);
    let without_cr = stripped.trim_end_matches('\r');
    let visible = without_cr.rsplit('\r').next().unwrap_or(without_cr);
    visible
        .chars()
        .filter(|c| *c == '\t' || !c.is_control())
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Splits a chunked stream into lines while keeping the trailing fragment
#[derive(Debug, Default, Clone)]
pub struct LineAssembler {
    pending: String,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (blank lines skipped)
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split('\n')
            .map(clean_line)
            .filter(|line| !line.trim().is_empty())
            .collect()
    }

    /// The unterminated tail, cleaned; `None` when blank
    pub fn fragment(&self) -> Option<String> {
        let cleaned = clean_line(&self.pending);
        if cleaned.trim().is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Remove and return the unterminated tail
    pub fn take_fragment(&mut self) -> Option<String> {
        let fragment = self.fragment();
        self.pending.clear();
        fragment
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Decodes UTF-8 across chunk boundaries
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much as possible, holding back an incomplete trailing sequence
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left, lossily
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
