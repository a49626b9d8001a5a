// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sudo password prompt detection on a merged PTY stream.

/// The rolling line buffer is capped at this many bytes; a prompt longer
/// than the cap is not detected.
const MAX_LINE: usize = 256;

/// Scans the merged PTY output byte-by-byte for a sudo password prompt.
///
/// A prompt is a line that starts with `[sudo] password for <user>` or
/// `Password` and ends with `": "`. The scanner fires at most once; later
/// matches are ignored so the password is written to the session exactly one
/// time.
#[derive(Debug)]
pub struct PromptScanner {
    sudo_prefix: String,
    line: Vec<u8>,
    fired: bool,
}

impl PromptScanner {
    /// Create a scanner for prompts addressed to `user`.
    #[must_use]
    pub fn new(user: &str) -> Self {
        Self {
            sudo_prefix: format!("[sudo] password for {user}"),
            line: Vec::with_capacity(MAX_LINE),
            fired: false,
        }
    }

    /// Feed a chunk of PTY output. Returns `true` exactly once, on the first
    /// byte that completes a prompt.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        for &b in chunk {
            match b {
                b'\n' | b'\r' => self.line.clear(),
                _ if self.line.len() < MAX_LINE => self.line.push(b),
                _ => {}
            }
            if !self.fired && self.matches() {
                self.fired = true;
                return true;
            }
        }
        false
    }

    /// Whether the scanner has already fired.
    #[must_use]
    pub fn fired(&self) -> bool {
        self.fired
    }

    fn matches(&self) -> bool {
        let Ok(line) = std::str::from_utf8(&self.line) else {
            return false;
        };
        if !line.ends_with(": ") {
            return false;
        }
        line.starts_with(&self.sudo_prefix) || line.starts_with("Password")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_sudo_prompt() {
        let mut scanner = PromptScanner::new("ops");
        assert!(!scanner.feed(b"some banner\n"));
        assert!(scanner.feed(b"[sudo] password for ops: "));
    }

    #[test]
    fn test_detects_generic_password_prompt() {
        let mut scanner = PromptScanner::new("ops");
        assert!(scanner.feed(b"Password: "));
    }

    #[test]
    fn test_requires_trailing_colon_space() {
        let mut scanner = PromptScanner::new("ops");
        assert!(!scanner.feed(b"[sudo] password for ops:"));
        assert!(scanner.feed(b" "));
    }

    #[test]
    fn test_wrong_user_is_ignored() {
        let mut scanner = PromptScanner::new("ops");
        assert!(!scanner.feed(b"[sudo] password for root: "));
    }

    #[test]
    fn test_fires_only_once() {
        let mut scanner = PromptScanner::new("ops");
        assert!(scanner.feed(b"Password: "));
        assert!(!scanner.feed(b"\nPassword: "));
        assert!(scanner.fired());
    }

    #[test]
    fn test_newline_resets_line() {
        let mut scanner = PromptScanner::new("ops");
        assert!(!scanner.feed(b"garbage Password: junk\n"));
        assert!(scanner.feed(b"Password: "));
    }

    #[test]
    fn test_prompt_split_across_chunks() {
        let mut scanner = PromptScanner::new("ops");
        assert!(!scanner.feed(b"[sudo] password"));
        assert!(scanner.feed(b" for ops: "));
    }

    #[test]
    fn test_overlong_line_silently_fails() {
        let mut scanner = PromptScanner::new("ops");
        let padding = vec![b'x'; MAX_LINE];
        scanner.feed(&padding);
        assert!(!scanner.feed(b"Password: "));
        // A fresh line after a newline still matches.
        assert!(scanner.feed(b"\nPassword: "));
    }
}
