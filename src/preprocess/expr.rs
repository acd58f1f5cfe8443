//! Numeric evaluation of directive expressions.
//!
//! `.if`/`.elif` conditions are evaluated after parameter substitution.
//! The grammar is small: real numbers with SPICE unit suffixes, unary
//! `-`/`+`/`!`, the four arithmetic operators, comparisons, and `&&`/`||`
//! with parentheses. Anything that fails to parse evaluates to `None`,
//! which the conditional processor treats as false; a parsed value is true
//! iff nonzero.

/// Evaluate a directive expression; `None` if it does not parse cleanly.
pub fn eval(expr: &str) -> Option<f64> {
    let mut p = Parser {
        chars: expr.chars().collect(),
        pos: 0,
    };
    let value = p.or_expr()?;
    p.skip_ws();
    if p.pos != p.chars.len() {
        return None;
    }
    Some(value)
}

/// Evaluate an expression to a boolean, per the conditional truth rule.
pub fn eval_truthy(expr: &str) -> bool {
    matches!(eval(expr), Some(v) if v != 0.0)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while self.peek().map_or(false, |c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Option<f64> {
        let mut left = self.and_expr()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('|') && self.peek2() == Some('|') {
                self.pos += 2;
                let right = self.and_expr()?;
                left = bool_val(left != 0.0 || right != 0.0);
            } else {
                return Some(left);
            }
        }
    }

    fn and_expr(&mut self) -> Option<f64> {
        let mut left = self.cmp_expr()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('&') && self.peek2() == Some('&') {
                self.pos += 2;
                let right = self.cmp_expr()?;
                left = bool_val(left != 0.0 && right != 0.0);
            } else {
                return Some(left);
            }
        }
    }

    fn cmp_expr(&mut self) -> Option<f64> {
        let left = self.add_expr()?;
        self.skip_ws();
        let op = match (self.peek(), self.peek2()) {
            (Some('='), Some('=')) => "==",
            (Some('!'), Some('=')) => "!=",
            (Some('<'), Some('=')) => "<=",
            (Some('>'), Some('=')) => ">=",
            (Some('<'), _) => "<",
            (Some('>'), _) => ">",
            _ => return Some(left),
        };
        self.pos += op.len();
        let right = self.add_expr()?;
        Some(bool_val(match op {
            "==" => left == right,
            "!=" => left != right,
            "<=" => left <= right,
            ">=" => left >= right,
            "<" => left < right,
            ">" => left > right,
            _ => unreachable!(),
        }))
    }

    fn add_expr(&mut self) -> Option<f64> {
        let mut left = self.mul_expr()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    left += self.mul_expr()?;
                }
                Some('-') => {
                    self.pos += 1;
                    left -= self.mul_expr()?;
                }
                _ => return Some(left),
            }
        }
    }

    fn mul_expr(&mut self) -> Option<f64> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    left *= self.unary()?;
                }
                Some('/') => {
                    self.pos += 1;
                    let right = self.unary()?;
                    left /= right;
                }
                _ => return Some(left),
            }
        }
    }

    fn unary(&mut self) -> Option<f64> {
        self.skip_ws();
        if self.eat('-') {
            return Some(-self.unary()?);
        }
        if self.eat('+') {
            return self.unary();
        }
        // `!` must not swallow the first half of `!=`.
        if self.peek() == Some('!') && self.peek2() != Some('=') {
            self.pos += 1;
            return Some(bool_val(self.unary()? == 0.0));
        }
        self.atom()
    }

    fn atom(&mut self) -> Option<f64> {
        self.skip_ws();
        if self.eat('(') {
            let value = self.or_expr()?;
            self.skip_ws();
            if !self.eat(')') {
                return None;
            }
            return Some(value);
        }
        self.number()
    }

    fn number(&mut self) -> Option<f64> {
        let start = self.pos;
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        // Exponent
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut ahead = self.pos + 1;
            if matches!(self.chars.get(ahead), Some('-') | Some('+')) {
                ahead += 1;
            }
            if self.chars.get(ahead).map_or(false, |c| c.is_ascii_digit()) {
                self.pos = ahead;
                while self.peek().map_or(false, |c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let base: f64 = text.parse().ok()?;
        // Optional SPICE unit suffix
        let multiplier = match self.peek() {
            Some('p') => 1e-12,
            Some('n') => 1e-9,
            Some('u') | Some('µ') => 1e-6,
            Some('m') => 1e-3,
            Some('k') | Some('K') => 1e3,
            Some('M') => 1e6,
            Some('G') => 1e9,
            _ => 1.0,
        };
        if multiplier != 1.0 {
            self.pos += 1;
        }
        Some(base * multiplier)
    }
}

fn bool_val(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_numbers_and_suffixes() {
        assert_eq!(eval("42"), Some(42.0));
        assert_eq!(eval("1e-3"), Some(0.001));
        // Suffix application multiplies, so compare with a tolerance.
        assert_relative_eq!(eval("10k").unwrap(), 10_000.0);
        assert_relative_eq!(eval("100n").unwrap(), 100e-9);
        assert_relative_eq!(eval("2.5M").unwrap(), 2.5e6);
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Some(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Some(9.0));
        assert_eq!(eval("10 / 4"), Some(2.5));
        assert_eq!(eval("-3 + 1"), Some(-2.0));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval("1 < 2"), Some(1.0));
        assert_eq!(eval("2 <= 1"), Some(0.0));
        assert_eq!(eval("1 == 1 && 0 == 0"), Some(1.0));
        assert_eq!(eval("0 || 3 > 2"), Some(1.0));
        assert_eq!(eval("!0"), Some(1.0));
        assert_eq!(eval("1 != 1"), Some(0.0));
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(eval("hello"), None);
        assert_eq!(eval("1 +"), None);
        assert_eq!(eval("(1"), None);
        assert_eq!(eval("1 2"), None);
        assert_eq!(eval(""), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(eval_truthy("1"));
        assert!(eval_truthy("2 > 1"));
        assert!(!eval_truthy("0"));
        assert!(!eval_truthy("not an expression"));
    }
}
