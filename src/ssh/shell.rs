// ABOUTME: POSIX shell quoting for values interpolated into remote command lines.
// ABOUTME: Single-quotes everything, escaping embedded single quotes.

/// Quote a value so the remote `/bin/sh` sees it as one literal word.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Render `KEY=value` assignments suitable for `env`.
pub fn env_assignments<'a, I>(vars: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    vars.into_iter()
        .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn plain_words_are_left_alone() {
        assert_eq!(shell_quote("/usr/local/jails"), "/usr/local/jails");
        assert_eq!(shell_quote("10.0.0.2:4000"), "10.0.0.2:4000");
    }

    #[test]
    fn spaces_and_metacharacters_are_quoted() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn single_quotes_are_escaped() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn env_assignments_quote_values_only() {
        let mut vars = BTreeMap::new();
        vars.insert("A".to_string(), "1".to_string());
        vars.insert("SECRET".to_string(), "p@ss word".to_string());
        assert_eq!(env_assignments(&vars), "A=1 SECRET='p@ss word'");
    }
}
