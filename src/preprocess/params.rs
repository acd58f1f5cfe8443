//! Parameter table for `.param` directives.
//!
//! Parameters are `name=expression` pairs harvested from `.param` lines at
//! the top level of a deck. The table substitutes parameter names into
//! directive expressions (notably `.if`/`.elif` conditions) and carries a
//! `last_error` slot recording the most recent substitution failure, which
//! the preprocessor attaches to the offending line as a diagnostic.

use std::collections::HashMap;

/// Mapping from parameter name to its (unevaluated) expression text.
///
/// Lookup is case-insensitive; insertion order is preserved for display.
#[derive(Debug, Clone, Default)]
pub struct ParamTable {
    order: Vec<String>,
    values: HashMap<String, String>,
    /// Message from the last failed extraction or substitution attempt.
    pub last_error: Option<String>,
}

impl ParamTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of parameters defined.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if no parameters are defined.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up a parameter by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Define or redefine a parameter.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let key = name.to_lowercase();
        if !self.values.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.values.insert(key, value.into());
    }

    /// Parameter names in definition order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Harvest `name=value` pairs from the remainder of a `.param` line.
    ///
    /// Pairs are separated by whitespace or commas; values may be quoted or
    /// wrapped in `(...)`/`{...}`, in which case separators inside the
    /// wrapper are kept. On a malformed pair the error is recorded in
    /// `last_error` and returned; pairs before the bad one are kept.
    pub fn extract_params(&mut self, rest: &str) -> Result<(), String> {
        let mut chars = rest.chars().peekable();
        loop {
            while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
                chars.next();
            }
            if chars.peek().is_none() {
                break;
            }

            let mut name = String::new();
            while matches!(chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
                name.push(chars.next().unwrap());
            }
            if name.is_empty() {
                let err = format!("expected parameter name near '{}'", remainder(&mut chars));
                self.last_error = Some(err.clone());
                return Err(err);
            }

            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }
            if chars.next() != Some('=') {
                let err = format!("expected '=' after parameter '{}'", name);
                self.last_error = Some(err.clone());
                return Err(err);
            }
            while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                chars.next();
            }

            let mut value = String::new();
            let mut depth = 0i32;
            let mut quote: Option<char> = None;
            while let Some(&c) = chars.peek() {
                match quote {
                    Some(q) => {
                        chars.next();
                        if c == q {
                            quote = None;
                        } else {
                            value.push(c);
                        }
                        continue;
                    }
                    None => {}
                }
                match c {
                    '\'' | '"' => {
                        quote = Some(c);
                        chars.next();
                    }
                    '(' | '{' => {
                        depth += 1;
                        value.push(c);
                        chars.next();
                    }
                    ')' | '}' => {
                        depth -= 1;
                        value.push(c);
                        chars.next();
                    }
                    c if depth == 0 && (c.is_whitespace() || c == ',') => break,
                    _ => {
                        value.push(c);
                        chars.next();
                    }
                }
            }
            if value.is_empty() {
                let err = format!("empty value for parameter '{}'", name);
                self.last_error = Some(err.clone());
                return Err(err);
            }
            self.set(&name, value);
        }
        Ok(())
    }

    /// Substitute parameter names appearing as whole identifiers in `expr`
    /// with their values, parenthesized. Runs repeated passes so parameters
    /// defined in terms of other parameters resolve, up to a fixed bound.
    pub fn substitute(&self, expr: &str) -> String {
        let mut current = expr.to_string();
        for _ in 0..10 {
            let next = self.substitute_once(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn substitute_once(&self, expr: &str) -> String {
        let mut out = String::with_capacity(expr.len());
        let chars: Vec<char> = expr.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c.is_alphabetic() || c == '_' {
                // A letter directly after a digit or dot is a unit suffix
                // (`1k`, `2.2u`), not an identifier.
                let prev = if i > 0 { chars[i - 1] } else { ' ' };
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                if prev.is_ascii_digit() || prev == '.' {
                    out.push_str(&word);
                    continue;
                }
                match self.get(&word) {
                    Some(value) => {
                        out.push('(');
                        out.push_str(value);
                        out.push(')');
                    }
                    None => out.push_str(&word),
                }
            } else {
                out.push(c);
                i += 1;
            }
        }
        out
    }
}

/// Substitute `$NAME` and `${NAME}` shell-style variables from the process
/// environment. Unknown variables expand to nothing.
pub fn substitute_shell_vars(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() {
            let (name, consumed) = if chars[i + 1] == '{' {
                let mut j = i + 2;
                while j < chars.len() && chars[j] != '}' {
                    j += 1;
                }
                let name: String = chars[i + 2..j].iter().collect();
                (name, j.min(chars.len() - 1) + 1 - i)
            } else {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().collect();
                (name, j - i)
            };
            if !name.is_empty() {
                if let Ok(value) = std::env::var(&name) {
                    out.push_str(&value);
                }
                i += consumed;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn remainder(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    chars.take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple() {
        let mut tab = ParamTable::new();
        tab.extract_params("rload=1k vdd=3.3").unwrap();
        assert_eq!(tab.get("rload"), Some("1k"));
        assert_eq!(tab.get("VDD"), Some("3.3"));
        assert_eq!(tab.len(), 2);
    }

    #[test]
    fn test_extract_commas_and_quotes() {
        let mut tab = ParamTable::new();
        tab.extract_params("a=1, b='2 + 3', c={x*2}").unwrap();
        assert_eq!(tab.get("a"), Some("1"));
        assert_eq!(tab.get("b"), Some("2 + 3"));
        assert_eq!(tab.get("c"), Some("{x*2}"));
    }

    #[test]
    fn test_extract_error_keeps_earlier_pairs() {
        let mut tab = ParamTable::new();
        let err = tab.extract_params("good=1 bad").unwrap_err();
        assert!(err.contains("bad"));
        assert_eq!(tab.get("good"), Some("1"));
        assert_eq!(tab.last_error.as_deref(), Some(err.as_str()));
    }

    #[test]
    fn test_redefinition_replaces() {
        let mut tab = ParamTable::new();
        tab.set("x", "1");
        tab.set("X", "2");
        assert_eq!(tab.get("x"), Some("2"));
        assert_eq!(tab.len(), 1);
    }

    #[test]
    fn test_substitute_whole_identifiers_only() {
        let mut tab = ParamTable::new();
        tab.set("r", "100");
        assert_eq!(tab.substitute("r + rload"), "(100) + rload");
    }

    #[test]
    fn test_substitute_chained_params() {
        let mut tab = ParamTable::new();
        tab.set("a", "b*2");
        tab.set("b", "3");
        assert_eq!(tab.substitute("a"), "((3)*2)");
    }

    #[test]
    fn test_shell_substitution() {
        std::env::set_var("SPICEDECK_TEST_VAR", "lib");
        assert_eq!(
            substitute_shell_vars("$SPICEDECK_TEST_VAR/models.sp"),
            "lib/models.sp"
        );
        assert_eq!(
            substitute_shell_vars("${SPICEDECK_TEST_VAR}64"),
            "lib64"
        );
        assert_eq!(substitute_shell_vars("$SPICEDECK_NO_SUCH/x"), "/x");
    }
}
