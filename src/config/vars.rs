//! URL variable substitution.
//!
//! Repo URLs may reference `$releasever`, `$basearch` and user-defined
//! variables. User variables come from a vars directory: every file whose
//! name matches `[a-z0-9_]+` contributes one variable whose value is the
//! file's first line. Substitution builds into a growable buffer, so
//! arbitrarily long expansions are safe; unknown variables expand to the
//! empty string.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Variable table used for URL substitution.
#[derive(Clone, Debug, Default)]
pub struct Vars {
    map: HashMap<String, String>,
}

impl Vars {
    /// What: Build the table from built-ins only.
    ///
    /// Inputs:
    /// - `releasever`: Distribution release version.
    /// - `basearch`: Base architecture, e.g. `x86_64`.
    #[must_use]
    pub fn builtin(releasever: &str, basearch: &str) -> Self {
        let mut map = HashMap::new();
        map.insert("releasever".to_string(), releasever.to_string());
        map.insert("basearch".to_string(), basearch.to_string());
        Self { map }
    }

    /// What: Load user variables from a vars directory.
    ///
    /// Inputs:
    /// - `dir`: The vars directory; silently skipped when absent.
    ///
    /// Output:
    /// - `Ok(())`; unreadable individual files are skipped with a debug
    ///   log rather than failing the whole load.
    ///
    /// Details:
    /// - Only file names matching `[a-z0-9_]+` are considered.
    /// - The value is the first line of the file, trailing newline
    ///   stripped.
    /// - User variables never override the built-ins.
    pub fn load_dir(&mut self, dir: &Path) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.is_empty()
                || !name
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
            {
                continue;
            }
            if self.map.contains_key(name) {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(content) => {
                    let value = content.lines().next().unwrap_or("").to_string();
                    self.map.insert(name.to_string(), value);
                }
                Err(e) => {
                    debug!(var = name, error = %e, "skipping unreadable vars file");
                }
            }
        }
        Ok(())
    }

    /// What: Set or override one variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.map.insert(name.into(), value.into());
    }

    /// What: Look up a variable value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// What: Substitute `$name` and `${name}` occurrences in a string.
    ///
    /// Inputs:
    /// - `input`: Typically a base URL or metalink URL.
    ///
    /// Output:
    /// - The expanded string; unknown variables expand to `""`.
    ///
    /// Details:
    /// - Variable names are `[a-z0-9_]+`; a `$` not followed by a valid
    ///   name passes through unchanged.
    /// - An unterminated `${` is a configuration error instead of being
    ///   silently kept.
    pub fn substitute(&self, input: &str) -> Result<String> {
        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'$' {
                // Copy everything up to the next '$' in one slice, so
                // multi-byte characters pass through untouched.
                let start = i;
                while i < bytes.len() && bytes[i] != b'$' {
                    i += 1;
                }
                out.push_str(&input[start..i]);
                continue;
            }
            // Either ${name} or $name.
            if bytes.get(i + 1) == Some(&b'{') {
                let start = i + 2;
                let Some(end) = bytes[start..].iter().position(|&b| b == b'}') else {
                    return Err(Error::Config {
                        path: "<url>".into(),
                        detail: format!("unterminated ${{ in '{input}'"),
                    });
                };
                let name = &input[start..start + end];
                out.push_str(self.get(name).unwrap_or(""));
                i = start + end + 1;
            } else {
                let start = i + 1;
                let len = bytes[start..]
                    .iter()
                    .take_while(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || **b == b'_')
                    .count();
                if len == 0 {
                    out.push('$');
                    i += 1;
                    continue;
                }
                let name = &input[start..start + len];
                out.push_str(self.get(name).unwrap_or(""));
                i = start + len;
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_builtins_and_braces() {
        let vars = Vars::builtin("5.0", "x86_64");
        assert_eq!(
            vars.substitute("https://mirror/os/$releasever/${basearch}/")
                .unwrap(),
            "https://mirror/os/5.0/x86_64/"
        );
    }

    #[test]
    fn unknown_vars_expand_empty() {
        let vars = Vars::builtin("5.0", "x86_64");
        assert_eq!(vars.substitute("a$nosuchvar/b").unwrap(), "a/b");
    }

    #[test]
    fn bare_dollar_passes_through() {
        let vars = Vars::builtin("5.0", "x86_64");
        assert_eq!(vars.substitute("cost$").unwrap(), "cost$");
        assert_eq!(vars.substitute("a$B").unwrap(), "a$B");
    }

    #[test]
    fn unterminated_brace_is_an_error() {
        let vars = Vars::builtin("5.0", "x86_64");
        assert!(vars.substitute("${basearch").is_err());
    }

    #[test]
    fn long_expansion_grows() {
        let mut vars = Vars::builtin("5.0", "x86_64");
        vars.set("long", "x".repeat(4096));
        let out = vars.substitute("$long$long").unwrap();
        assert_eq!(out.len(), 8192);
    }

    #[test]
    fn vars_dir_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("myvar"), "value1\nsecond line\n").unwrap();
        std::fs::write(dir.path().join("Bad-Name"), "nope\n").unwrap();
        std::fs::write(dir.path().join("releasever"), "override\n").unwrap();

        let mut vars = Vars::builtin("5.0", "x86_64");
        vars.load_dir(dir.path()).unwrap();
        assert_eq!(vars.get("myvar"), Some("value1"));
        assert_eq!(vars.get("Bad-Name"), None);
        // Built-ins win over vars-dir files.
        assert_eq!(vars.get("releasever"), Some("5.0"));
    }
}
