use super::CustomKernelError;

/// Output extents visible to work-size expressions, in bfyx order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSizeDims {
    pub b: usize,
    pub f: usize,
    pub y: usize,
    pub x: usize,
}

impl WorkSizeDims {
    /// Maps dims onto bfyx; missing trailing dims are 1, extra ones fold into `x`.
    pub fn from_dims(dims: &[usize]) -> Self {
        let at = |idx: usize| dims.get(idx).copied().unwrap_or(1);
        let x = if dims.len() > 4 {
            dims[3..].iter().product()
        } else {
            at(3)
        };
        Self {
            b: at(0),
            f: at(1),
            y: at(2),
            x,
        }
    }

    fn lookup(&self, name: char) -> Option<i64> {
        let value = match name {
            'B' | 'b' => self.b,
            'F' | 'f' => self.f,
            'Y' | 'y' => self.y,
            'X' | 'x' => self.x,
            _ => return None,
        };
        Some(value as i64)
    }
}

/// Evaluates an integer expression over `B F Y X` with `+ - * / %` and
/// parentheses.
pub fn evaluate_work_size(expression: &str, dims: &WorkSizeDims) -> Result<usize, CustomKernelError> {
    let tokens: Vec<char> = expression.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        dims,
        expression,
    };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(parser.error(format!("unexpected '{}'", tokens[parser.pos])));
    }
    usize::try_from(value).map_err(|_| parser.error(format!("negative result {value}")))
}

struct Parser<'a> {
    tokens: &'a [char],
    pos: usize,
    dims: &'a WorkSizeDims,
    expression: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: impl Into<String>) -> CustomKernelError {
        CustomKernelError::WorkSize {
            expression: self.expression.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<i64, CustomKernelError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            let next = if op == '+' {
                value.checked_add(rhs)
            } else {
                value.checked_sub(rhs)
            };
            value = next.ok_or_else(|| self.error("overflow"))?;
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i64, CustomKernelError> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            let next = match op {
                '*' => value.checked_mul(rhs),
                _ if rhs == 0 => return Err(self.error("division by zero")),
                '/' => value.checked_div(rhs),
                _ => value.checked_rem(rhs),
            };
            value = next.ok_or_else(|| self.error("overflow"))?;
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i64, CustomKernelError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some('-') => {
                self.pos += 1;
                self.factor()?
                    .checked_neg()
                    .ok_or_else(|| self.error("overflow"))
            }
            Some(c) if c.is_ascii_digit() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let literal: String = self.tokens[start..self.pos].iter().collect();
                literal
                    .parse::<i64>()
                    .map_err(|err| self.error(format!("bad literal {literal}: {err}")))
            }
            Some(c) => {
                let value = self
                    .dims
                    .lookup(c)
                    .ok_or_else(|| self.error(format!("unknown symbol '{c}'")))?;
                self.pos += 1;
                Ok(value)
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }
}
