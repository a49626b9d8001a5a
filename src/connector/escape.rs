// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shell-argument escaping for remotely executed commands.

/// Quote a path or argument for interpolation into a shell command line.
///
/// The value is wrapped in single quotes; embedded single quotes are escaped
/// as `'\''`.
#[must_use]
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Wrap a composite command in the canonical elevation envelope:
/// `sudo -E /bin/bash -c "<cmd>"` with inner backslashes and double quotes
/// escaped.
#[must_use]
pub fn sudo_wrap(cmd: &str) -> String {
    let escaped = cmd.replace('\\', "\\\\").replace('"', "\\\"");
    format!("sudo -E /bin/bash -c \"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_path() {
        assert_eq!(shell_quote("/tmp/file"), "'/tmp/file'");
    }

    #[test]
    fn test_quote_embedded_single_quote() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_quote_empty() {
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_sudo_wrap_plain() {
        assert_eq!(
            sudo_wrap("systemctl restart containerd"),
            "sudo -E /bin/bash -c \"systemctl restart containerd\""
        );
    }

    #[test]
    fn test_sudo_wrap_escapes_quotes_and_backslashes() {
        assert_eq!(
            sudo_wrap(r#"echo "a\b""#),
            r#"sudo -E /bin/bash -c "echo \"a\\b\"""#
        );
    }

    #[test]
    fn test_sudo_wrap_composes_with_quoting() {
        let cmd = format!("cat {} | base64 --wrap=0", shell_quote("/etc/o'brien"));
        assert_eq!(
            sudo_wrap(&cmd),
            r#"sudo -E /bin/bash -c "cat '/etc/o'\''brien' | base64 --wrap=0""#
        );
    }
}
