//! `.env`-style settings file
//!
//! Lines of the form `NAME=value`. Rewriting keeps every line that is not a
//! managed key exactly as it was (comments, blanks, foreign keys) and
//! appends the managed keys in a fixed order, so applying the same values
//! twice produces a byte-identical file.

use std::collections::BTreeMap;

/// Keys owned by this tool start with this prefix
pub const MANAGED_PREFIX: &str = "AZURE_";

/// Managed keys in the order they are written
pub const MANAGED_KEYS: [&str; 5] = [
    "AZURE_SUBSCRIPTION_ID",
    "AZURE_TENANT_ID",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_DEFAULT_LOCATION",
];

/// Parsed settings file, line-preserving
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    lines: Vec<String>,
}

impl EnvFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Value of `key`; the last assignment wins
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines
            .iter()
            .filter_map(|line| parse_line(line))
            .filter(|(k, _)| k == key)
            .last()
            .map(|(_, v)| v)
    }

    /// All assignments, last one winning
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.lines.iter().filter_map(|line| parse_line(line)).collect()
    }

    /// Drop every managed assignment and append `values` (skipping unset
    /// ones) in the given order
    pub fn rewrite(&self, values: &[(&str, Option<&str>)]) -> Self {
        let mut lines: Vec<String> = self
            .lines
            .iter()
            .filter(|line| match parse_line(line) {
                Some((key, _)) => !key.starts_with(MANAGED_PREFIX),
                None => true,
            })
            .cloned()
            .collect();

        for (key, value) in values {
            if let Some(value) = value {
                lines.push(format!("{}={}", key, quote(value)));
            }
        }

        Self { lines }
    }

    pub fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return unescape(&value[1..value.len() - 1]);
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

/// Double-quoted values carry `\n`, `\r`, `\"` and `\\` escapes
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Values are always written on a single physical line
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.chars().any(|c| c.is_whitespace() || c == '#')
        || value.starts_with('"')
        || value.starts_with('\'');
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "\
# Azure Configuration
AZURE_SUBSCRIPTION_ID=old-sub
FLASK_SECRET_KEY='keep me'

AZURE_CLIENT_SECRET=\"old secret\"
export OTHER_SETTING=1
";

    fn values<'a>() -> Vec<(&'a str, Option<&'a str>)> {
        vec![
            ("AZURE_SUBSCRIPTION_ID", Some("sub-1")),
            ("AZURE_TENANT_ID", Some("tenant-1")),
            ("AZURE_CLIENT_ID", Some("client-1")),
            ("AZURE_CLIENT_SECRET", Some("s3cr3t~value")),
            ("AZURE_DEFAULT_LOCATION", None),
        ]
    }

    #[test]
    fn test_parse_strips_quotes() {
        let file = EnvFile::parse(ORIGINAL);
        assert_eq!(file.get("AZURE_SUBSCRIPTION_ID").as_deref(), Some("old-sub"));
        assert_eq!(file.get("FLASK_SECRET_KEY").as_deref(), Some("keep me"));
        assert_eq!(file.get("AZURE_CLIENT_SECRET").as_deref(), Some("old secret"));
        assert_eq!(file.get("OTHER_SETTING").as_deref(), Some("1"));
        assert_eq!(file.get("MISSING"), None);
    }

    #[test]
    fn test_rewrite_preserves_foreign_lines() {
        let rewritten = EnvFile::parse(ORIGINAL).rewrite(&values()).render();
        assert_eq!(
            rewritten,
            "\
# Azure Configuration
FLASK_SECRET_KEY='keep me'

export OTHER_SETTING=1
AZURE_SUBSCRIPTION_ID=sub-1
AZURE_TENANT_ID=tenant-1
AZURE_CLIENT_ID=client-1
AZURE_CLIENT_SECRET=s3cr3t~value
"
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let once = EnvFile::parse(ORIGINAL).rewrite(&values()).render();
        let twice = EnvFile::parse(&once).rewrite(&values()).render();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_values_needing_quotes_round_trip() {
        let file = EnvFile::default().rewrite(&[("AZURE_CLIENT_SECRET", Some("has space#hash"))]);
        assert_eq!(file.render(), "AZURE_CLIENT_SECRET=\"has space#hash\"\n");
        let parsed = EnvFile::parse(&file.render());
        assert_eq!(parsed.get("AZURE_CLIENT_SECRET").as_deref(), Some("has space#hash"));
    }

    #[test]
    fn test_line_breaks_stay_on_one_line() {
        let values = [("AZURE_CLIENT_SECRET", Some("a\nb\r\nc"))];
        let once = EnvFile::parse("FOO=1\n").rewrite(&values).render();
        assert_eq!(once, "FOO=1\nAZURE_CLIENT_SECRET=\"a\\nb\\r\\nc\"\n");

        let twice = EnvFile::parse(&once).rewrite(&values).render();
        assert_eq!(once, twice);
        assert_eq!(EnvFile::parse(&twice).get("AZURE_CLIENT_SECRET").as_deref(), Some("a\nb\r\nc"));
    }

    #[test]
    fn test_quotes_and_backslashes_round_trip() {
        for value in ["say \"hi\"", "C:\\Program Files\\x", "'leading", "trailing\\"] {
            let rendered = EnvFile::default().rewrite(&[("AZURE_CLIENT_SECRET", Some(value))]).render();
            assert_eq!(rendered.lines().count(), 1);
            assert_eq!(EnvFile::parse(&rendered).get("AZURE_CLIENT_SECRET").as_deref(), Some(value));
        }
    }

    #[test]
    fn test_empty_file() {
        assert_eq!(EnvFile::parse("").render(), "");
        assert!(EnvFile::parse("").entries().is_empty());
    }
}
