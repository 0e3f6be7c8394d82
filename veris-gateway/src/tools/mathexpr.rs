//! Arithmetic expression evaluation for the `math_eval` tool.
//!
//! Deliberately tiny: integer and float literals, the operators
//! `+ - * / % // **`, unary minus, and parentheses. No identifiers, no
//! calls, no indexing — anything else is `Unsupported expression`. The
//! arithmetic keeps integers integral where the result is exact (`//`, `%`,
//! `**` with a non-negative exponent); `/` always produces a float.

use serde_json::Value;

const UNSUPPORTED: &str = "Unsupported expression";

/// A number mid-evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn into_json(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => Value::from(f),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

/// Evaluate an expression string.
pub fn eval(expression: &str) -> Result<Num, String> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err(UNSUPPORTED.into());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Num),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::DoubleStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::DoubleSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                let mut saw_dot = false;
                let mut saw_exp = false;
                while i < chars.len() {
                    match chars[i] {
                        '0'..='9' => i += 1,
                        '.' if !saw_dot && !saw_exp => {
                            saw_dot = true;
                            i += 1;
                        }
                        'e' | 'E' if !saw_exp && i > start => {
                            saw_exp = true;
                            i += 1;
                            if matches!(chars.get(i), Some('+') | Some('-')) {
                                i += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let num = if saw_dot || saw_exp {
                    Num::Float(text.parse::<f64>().map_err(|_| UNSUPPORTED.to_string())?)
                } else {
                    Num::Int(text.parse::<i64>().map_err(|_| UNSUPPORTED.to_string())?)
                };
                tokens.push(Token::Num(num));
            }
            // Identifiers, calls, attribute access, strings: all refused.
            _ => return Err(UNSUPPORTED.into()),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Num, String> {
        let mut left = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    left = add(left, self.term()?)?;
                }
                Token::Minus => {
                    self.pos += 1;
                    left = sub(left, self.term()?)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // term := unary (('*' | '/' | '//' | '%') unary)*
    fn term(&mut self) -> Result<Num, String> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    left = mul(left, self.unary()?)?;
                }
                Token::Slash => {
                    self.pos += 1;
                    left = div(left, self.unary()?)?;
                }
                Token::DoubleSlash => {
                    self.pos += 1;
                    left = floordiv(left, self.unary()?)?;
                }
                Token::Percent => {
                    self.pos += 1;
                    left = modulo(left, self.unary()?)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // unary := '-' unary | power
    // power := atom ('**' unary)?        (right-associative, so 2**-1 works)
    fn unary(&mut self) -> Result<Num, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return neg(self.unary()?);
        }
        let base = self.atom()?;
        if self.peek() == Some(&Token::DoubleStar) {
            self.pos += 1;
            let exponent = self.unary()?;
            return pow(base, exponent);
        }
        Ok(base)
    }

    // atom := NUMBER | '(' expr ')'
    fn atom(&mut self) -> Result<Num, String> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if self.bump() != Some(Token::RParen) {
                    return Err(UNSUPPORTED.into());
                }
                Ok(value)
            }
            _ => Err(UNSUPPORTED.into()),
        }
    }
}

fn add(a: Num, b: Num) -> Result<Num, String> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_add(y)
            .map(Num::Int)
            .ok_or_else(|| "integer overflow".into()),
        _ => Ok(Num::Float(a.as_f64() + b.as_f64())),
    }
}

fn sub(a: Num, b: Num) -> Result<Num, String> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_sub(y)
            .map(Num::Int)
            .ok_or_else(|| "integer overflow".into()),
        _ => Ok(Num::Float(a.as_f64() - b.as_f64())),
    }
}

fn mul(a: Num, b: Num) -> Result<Num, String> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => x
            .checked_mul(y)
            .map(Num::Int)
            .ok_or_else(|| "integer overflow".into()),
        _ => Ok(Num::Float(a.as_f64() * b.as_f64())),
    }
}

fn neg(a: Num) -> Result<Num, String> {
    match a {
        Num::Int(x) => x
            .checked_neg()
            .map(Num::Int)
            .ok_or_else(|| "integer overflow".into()),
        Num::Float(f) => Ok(Num::Float(-f)),
    }
}

// True division: always a float.
fn div(a: Num, b: Num) -> Result<Num, String> {
    let divisor = b.as_f64();
    if divisor == 0.0 {
        return Err("division by zero".into());
    }
    Ok(Num::Float(a.as_f64() / divisor))
}

// Floor division; integers stay integral.
fn floordiv(a: Num, b: Num) -> Result<Num, String> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err("integer division or modulo by zero".into());
            }
            let q = x / y;
            let r = x % y;
            let floored = if r != 0 && (r < 0) != (y < 0) { q - 1 } else { q };
            Ok(Num::Int(floored))
        }
        _ => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err("division by zero".into());
            }
            Ok(Num::Float((a.as_f64() / divisor).floor()))
        }
    }
}

// Floor modulo: the result takes the divisor's sign.
fn modulo(a: Num, b: Num) -> Result<Num, String> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err("integer division or modulo by zero".into());
            }
            Ok(Num::Int(((x % y) + y) % y))
        }
        _ => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err("division by zero".into());
            }
            let lhs = a.as_f64();
            Ok(Num::Float(lhs - (lhs / divisor).floor() * divisor))
        }
    }
}

fn pow(base: Num, exponent: Num) -> Result<Num, String> {
    match (base, exponent) {
        (Num::Int(b), Num::Int(e)) if e >= 0 => {
            let e = u32::try_from(e).map_err(|_| "integer overflow".to_string())?;
            b.checked_pow(e)
                .map(Num::Int)
                .ok_or_else(|| "integer overflow".into())
        }
        _ => Ok(Num::Float(base.as_f64().powf(exponent.as_f64()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_int(expr: &str) -> i64 {
        match eval(expr).unwrap() {
            Num::Int(i) => i,
            other => panic!("expected int from {expr}, got {other:?}"),
        }
    }

    fn eval_float(expr: &str) -> f64 {
        match eval(expr).unwrap() {
            Num::Float(f) => f,
            other => panic!("expected float from {expr}, got {other:?}"),
        }
    }

    #[test]
    fn precedence_and_parens() {
        assert_eq!(eval_int("1 + 2 * 3"), 7);
        assert_eq!(eval_int("(1 + 2) * 3"), 9);
        assert_eq!(eval_int("10 - 4 - 3"), 3);
    }

    #[test]
    fn unary_minus_binds_below_power() {
        assert_eq!(eval_int("-2**2"), -4);
        assert_eq!(eval_int("(-2)**2"), 4);
        assert_eq!(eval_int("--3"), 3);
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(eval_int("2**3**2"), 512);
        assert_eq!(eval_float("2**-1"), 0.5);
    }

    #[test]
    fn true_division_yields_floats() {
        assert_eq!(eval_float("7 / 2"), 3.5);
        assert_eq!(eval_float("4 / 2"), 2.0);
    }

    #[test]
    fn floor_division_and_modulo_follow_divisor_sign() {
        assert_eq!(eval_int("7 // 2"), 3);
        assert_eq!(eval_int("-7 // 2"), -4);
        assert_eq!(eval_int("7 % 3"), 1);
        assert_eq!(eval_int("-7 % 3"), 2);
        assert_eq!(eval_int("7 % -3"), -2);
    }

    #[test]
    fn float_literals_and_promotion() {
        assert_eq!(eval_float("1.5 + 1"), 2.5);
        assert_eq!(eval_float("1e3"), 1000.0);
        assert_eq!(eval_float("2.5 % 2"), 0.5);
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(eval("1 / 0").unwrap_err(), "division by zero");
        assert_eq!(
            eval("1 // 0").unwrap_err(),
            "integer division or modulo by zero"
        );
        assert_eq!(
            eval("1 % 0").unwrap_err(),
            "integer division or modulo by zero"
        );
    }

    #[test]
    fn identifiers_and_calls_are_unsupported() {
        for expr in [
            "a + 1",
            "abs(1)",
            "__import__",
            "1 .real",
            "x",
            "1 + 'a'",
            "[1]",
            "1,2",
        ] {
            assert_eq!(eval(expr).unwrap_err(), UNSUPPORTED, "{expr}");
        }
    }

    #[test]
    fn malformed_syntax_is_unsupported() {
        for expr in ["", "1 +", "(1", "1)", "* 2", "1 ** ", "1..2"] {
            assert_eq!(eval(expr).unwrap_err(), UNSUPPORTED, "{expr}");
        }
    }

    #[test]
    fn overflow_is_an_error() {
        assert_eq!(eval("9223372036854775807 + 1").unwrap_err(), "integer overflow");
        assert_eq!(eval("2**200").unwrap_err(), "integer overflow");
    }
}
