//! Sandboxed expression language for user-supplied numeric transforms.
//!
//! Function nodes, distortion curves and custom worklets are written in this
//! language instead of general-purpose code. It has numbers, a fixed set of
//! variables bound by the caller, arithmetic, comparisons, a conditional and a
//! fixed function set. Nothing else is reachable from an expression.
//!
//! ## Grammar
//!
//! ```text
//! expr    ::= or ( '?' expr ':' expr )?
//! or      ::= and ( '||' and )*
//! and     ::= cmp ( '&&' cmp )*
//! cmp     ::= sum ( ( '<' | '<=' | '>' | '>=' | '==' | '!=' ) sum )?
//! sum     ::= term ( ( '+' | '-' ) term )*
//! term    ::= unary ( ( '*' | '/' | '%' ) unary )*
//! unary   ::= ( '-' | '!' ) unary | power
//! power   ::= atom ( '^' unary )?
//! atom    ::= number | name | name '(' expr ( ',' expr )* ')' | '(' expr ')'
//! ```
//!
//! Booleans are numbers: comparisons yield `1.0` or `0.0`, anything non-zero
//! is true.
//!
//! ```
//! use klangnetz::Expression;
//!
//! let e = Expression::compile("x > 0 ? tanh(x * drive) : x", &["x", "drive"]).unwrap();
//! assert_eq!(e.eval(&[-0.5, 4.0]).unwrap(), -0.5);
//! ```

use core::f64::consts::{E, PI, TAU};

use crate::error::{CompileError, EvalFault};

/// Deepest nesting the parser accepts. Each operator in a chain such as
/// `a + b + c` counts as one level.
pub const MAX_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Log10,
    Log2,
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Fract,
    Sign,
    Min,
    Max,
    Pow,
    Clamp,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, &'static str, usize)> {
        let f = match name {
            "sin" => (Func::Sin, "sin", 1),
            "cos" => (Func::Cos, "cos", 1),
            "tan" => (Func::Tan, "tan", 1),
            "asin" => (Func::Asin, "asin", 1),
            "acos" => (Func::Acos, "acos", 1),
            "atan" => (Func::Atan, "atan", 1),
            "atan2" => (Func::Atan2, "atan2", 2),
            "sinh" => (Func::Sinh, "sinh", 1),
            "cosh" => (Func::Cosh, "cosh", 1),
            "tanh" => (Func::Tanh, "tanh", 1),
            "exp" => (Func::Exp, "exp", 1),
            "ln" | "log" => (Func::Ln, "ln", 1),
            "log10" => (Func::Log10, "log10", 1),
            "log2" => (Func::Log2, "log2", 1),
            "sqrt" => (Func::Sqrt, "sqrt", 1),
            "abs" => (Func::Abs, "abs", 1),
            "floor" => (Func::Floor, "floor", 1),
            "ceil" => (Func::Ceil, "ceil", 1),
            "round" => (Func::Round, "round", 1),
            "fract" => (Func::Fract, "fract", 1),
            "sign" => (Func::Sign, "sign", 1),
            "min" => (Func::Min, "min", 2),
            "max" => (Func::Max, "max", 2),
            "pow" => (Func::Pow, "pow", 2),
            "clamp" => (Func::Clamp, "clamp", 3),
            _ => return None,
        };
        Some(f)
    }

    fn apply(self, a: &[f64]) -> f64 {
        match self {
            Func::Sin => a[0].sin(),
            Func::Cos => a[0].cos(),
            Func::Tan => a[0].tan(),
            Func::Asin => a[0].asin(),
            Func::Acos => a[0].acos(),
            Func::Atan => a[0].atan(),
            Func::Atan2 => a[0].atan2(a[1]),
            Func::Sinh => a[0].sinh(),
            Func::Cosh => a[0].cosh(),
            Func::Tanh => a[0].tanh(),
            Func::Exp => a[0].exp(),
            Func::Ln => a[0].ln(),
            Func::Log10 => a[0].log10(),
            Func::Log2 => a[0].log2(),
            Func::Sqrt => a[0].sqrt(),
            Func::Abs => a[0].abs(),
            Func::Floor => a[0].floor(),
            Func::Ceil => a[0].ceil(),
            Func::Round => a[0].round(),
            Func::Fract => a[0].fract(),
            Func::Sign => {
                if a[0] == 0.0 { 0.0 } else { a[0].signum() }
            }
            Func::Min => a[0].min(a[1]),
            Func::Max => a[0].max(a[1]),
            Func::Pow => a[0].powf(a[1]),
            Func::Clamp => {
                let (lo, hi) = if a[1] <= a[2] { (a[1], a[2]) } else { (a[2], a[1]) };
                a[0].max(lo).min(hi)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
enum Node {
    Num(f64),
    Var(usize),
    Neg(Box<Node>),
    Not(Box<Node>),
    Bin(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
    Cond(Box<Node>, Box<Node>, Box<Node>),
}

#[inline]
fn truth(v: bool) -> f64 {
    if v { 1.0 } else { 0.0 }
}

impl Node {
    fn eval(&self, vars: &[f64]) -> f64 {
        match self {
            Node::Num(n) => *n,
            Node::Var(i) => vars.get(*i).copied().unwrap_or(0.0),
            Node::Neg(a) => -a.eval(vars),
            Node::Not(a) => truth(a.eval(vars) == 0.0),
            Node::Bin(op, a, b) => {
                // Short-circuit the logical operators.
                match op {
                    BinOp::And => return truth(a.eval(vars) != 0.0 && b.eval(vars) != 0.0),
                    BinOp::Or => return truth(a.eval(vars) != 0.0 || b.eval(vars) != 0.0),
                    _ => {}
                }
                let (a, b) = (a.eval(vars), b.eval(vars));
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Rem => a % b,
                    BinOp::Pow => a.powf(b),
                    BinOp::Lt => truth(a < b),
                    BinOp::Le => truth(a <= b),
                    BinOp::Gt => truth(a > b),
                    BinOp::Ge => truth(a >= b),
                    BinOp::Eq => truth(a == b),
                    BinOp::Ne => truth(a != b),
                    BinOp::And | BinOp::Or => unreachable!("handled above"),
                }
            }
            Node::Call(f, args) => {
                let mut buf = [0.0; 3];
                for (slot, arg) in buf.iter_mut().zip(args) {
                    *slot = arg.eval(vars);
                }
                f.apply(&buf[..args.len()])
            }
            Node::Cond(c, t, e) => {
                if c.eval(vars) != 0.0 { t.eval(vars) } else { e.eval(vars) }
            }
        }
    }
}

/// A compiled expression bound to a fixed list of variable names.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    vars: Vec<String>,
    root: Node,
}

impl Expression {
    /// Compile `source`, resolving names against `vars`.
    ///
    /// `pi`, `e` and `tau` are constants unless shadowed by a variable.
    pub fn compile(source: &str, vars: &[&str]) -> Result<Self, CompileError> {
        let mut parser = Parser::new(source, vars);
        let root = parser.parse()?;
        Ok(Self {
            source: source.to_owned(),
            vars: vars.iter().map(|v| (*v).to_owned()).collect(),
            root,
        })
    }

    /// The source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The variable names, in binding order.
    pub fn vars(&self) -> &[String] {
        &self.vars
    }

    /// Evaluate with `values` bound positionally to the variables.
    ///
    /// Fails if a variable is missing or the result is not finite.
    pub fn eval(&self, values: &[f64]) -> Result<f64, EvalFault> {
        if values.len() < self.vars.len() {
            return Err(EvalFault::Unbound(self.vars[values.len()].clone()));
        }
        let out = self.root.eval(values);
        if out.is_finite() { Ok(out) } else { Err(EvalFault::NonFinite) }
    }

    /// Evaluate without checks. Missing variables read as zero and non-finite
    /// results are returned as-is. Used on the audio thread.
    #[inline]
    pub fn eval_unchecked(&self, values: &[f64]) -> f64 {
        self.root.eval(values)
    }
}

/// Recursive descent parser, one byte of lookahead. All syntax is ASCII.
struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    vars: &'a [&'a str],
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, vars: &'a [&'a str]) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            vars,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Consume `s` if it is next (after whitespace).
    fn eat(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.input[self.pos..].starts_with(s.as_bytes()) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> CompileError {
        let found = match self.peek() {
            Some(b) => format!("'{}'", b as char),
            None => "end of input".to_owned(),
        };
        CompileError::UnexpectedToken { found, expected, pos: self.pos }
    }

    fn enter(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CompileError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn parse(&mut self) -> Result<Node, CompileError> {
        let node = self.expr()?;
        self.skip_ws();
        match self.peek() {
            None => Ok(node),
            Some(_) => Err(self.unexpected("operator or end of input")),
        }
    }

    /// `expr ::= or ( '?' expr ':' expr )?`
    fn expr(&mut self) -> Result<Node, CompileError> {
        self.enter()?;
        let cond = self.or()?;
        let node = if self.eat("?") {
            let then = self.expr()?;
            if !self.eat(":") {
                return Err(self.unexpected("':'"));
            }
            let otherwise = self.expr()?;
            Node::Cond(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(node)
    }

    // Operator chains build left-deep trees, so every link counts as one
    // level of nesting.

    fn or(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.and()?;
        let mut links = 0;
        while self.eat("||") {
            self.enter()?;
            links += 1;
            let rhs = self.and()?;
            lhs = Node::Bin(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= links;
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.cmp()?;
        let mut links = 0;
        while self.eat("&&") {
            self.enter()?;
            links += 1;
            let rhs = self.cmp()?;
            lhs = Node::Bin(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= links;
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Node, CompileError> {
        let lhs = self.sum()?;
        // Two-byte operators first so `<=` is not read as `<`.
        let op = if self.eat("<=") {
            BinOp::Le
        } else if self.eat(">=") {
            BinOp::Ge
        } else if self.eat("==") {
            BinOp::Eq
        } else if self.eat("!=") {
            BinOp::Ne
        } else if self.eat("<") {
            BinOp::Lt
        } else if self.eat(">") {
            BinOp::Gt
        } else {
            return Ok(lhs);
        };
        let rhs = self.sum()?;
        Ok(Node::Bin(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.term()?;
        let mut links = 0;
        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                break;
            };
            self.enter()?;
            links += 1;
            let rhs = self.term()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= links;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Node, CompileError> {
        let mut lhs = self.unary()?;
        let mut links = 0;
        loop {
            let op = if self.eat("*") {
                BinOp::Mul
            } else if self.eat("/") {
                BinOp::Div
            } else if self.eat("%") {
                BinOp::Rem
            } else {
                break;
            };
            self.enter()?;
            links += 1;
            let rhs = self.unary()?;
            lhs = Node::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= links;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Node, CompileError> {
        self.enter()?;
        let node = if self.eat("-") {
            Node::Neg(Box::new(self.unary()?))
        } else if self.peek_not_ne() {
            Node::Not(Box::new(self.unary()?))
        } else {
            self.power()?
        };
        self.depth -= 1;
        Ok(node)
    }

    /// `!` but not `!=`.
    fn peek_not_ne(&mut self) -> bool {
        self.skip_ws();
        if self.peek() == Some(b'!') && self.input.get(self.pos + 1) != Some(&b'=') {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn power(&mut self) -> Result<Node, CompileError> {
        let base = self.atom()?;
        if self.eat("^") {
            let exp = self.unary()?;
            return Ok(Node::Bin(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Node, CompileError> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if !self.eat(")") {
                    return Err(self.unexpected("')'"));
                }
                Ok(inner)
            }
            Some(b) if b.is_ascii_digit() || b == b'.' => self.number(),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => self.name(),
            Some(b) if !b.is_ascii() || b.is_ascii_control() => Err(CompileError::UnexpectedChar {
                ch: self.char_at_pos(),
                pos: self.pos,
            }),
            _ => Err(self.unexpected("number, name or '('")),
        }
    }

    fn char_at_pos(&self) -> char {
        core::str::from_utf8(&self.input[self.pos..])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    fn number(&mut self) -> Result<Node, CompileError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit() || b == b'.') {
            self.pos += 1;
        }
        // Exponent: 1e3, 2.5E-4
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = save;
            }
        }
        let text = core::str::from_utf8(&self.input[start..self.pos]).unwrap_or("");
        text.parse::<f64>()
            .map(Node::Num)
            .map_err(|_| CompileError::UnexpectedToken {
                found: format!("'{text}'"),
                expected: "number",
                pos: start,
            })
    }

    fn name(&mut self) -> Result<Node, CompileError> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        let name = core::str::from_utf8(&self.input[start..self.pos]).unwrap_or("");

        if self.eat("(") {
            let (func, canonical, arity) =
                Func::lookup(name).ok_or_else(|| CompileError::UnknownFunction(name.to_owned()))?;
            let mut args = Vec::new();
            if !self.eat(")") {
                loop {
                    args.push(self.expr()?);
                    if self.eat(",") {
                        continue;
                    }
                    if self.eat(")") {
                        break;
                    }
                    return Err(self.unexpected("',' or ')'"));
                }
            }
            if args.len() != arity {
                return Err(CompileError::Arity {
                    name: canonical,
                    expected: arity,
                    got: args.len(),
                });
            }
            return Ok(Node::Call(func, args));
        }

        if let Some(i) = self.vars.iter().position(|v| *v == name) {
            return Ok(Node::Var(i));
        }
        match name {
            "pi" => Ok(Node::Num(PI)),
            "e" => Ok(Node::Num(E)),
            "tau" => Ok(Node::Num(TAU)),
            _ => Err(CompileError::UnknownVariable(name.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, vars: &[&str], values: &[f64]) -> f64 {
        Expression::compile(src, vars).unwrap().eval(values).unwrap()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[], &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[], &[]), 9.0);
        assert_eq!(eval("10 - 4 - 3", &[], &[]), 3.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[], &[]), 512.0);
        assert_eq!(eval("-2 ^ 2", &[], &[]), -4.0);
        assert_eq!(eval("7 % 4", &[], &[]), 3.0);
    }

    #[test]
    fn comparisons_logic_and_conditionals() {
        assert_eq!(eval("x <= 2 && x != 1", &["x"], &[2.0]), 1.0);
        assert_eq!(eval("!x || x > 5", &["x"], &[3.0]), 0.0);
        assert_eq!(eval("x > 0 ? 1 : -1", &["x"], &[-3.0]), -1.0);
        assert_eq!(eval("x > 0 ? x < 1 ? 0.5 : 2 : 0", &["x"], &[3.0]), 2.0);
    }

    #[test]
    fn functions_and_constants() {
        assert!((eval("sin(pi / 2)", &[], &[]) - 1.0).abs() < 1e-12);
        assert_eq!(eval("clamp(x, 1, -1)", &["x"], &[4.0]), 1.0);
        assert_eq!(eval("max(1, min(5, 3))", &[], &[]), 3.0);
        assert_eq!(eval("2.5e1", &[], &[]), 25.0);
        // A bound variable shadows the constant.
        assert_eq!(eval("e", &["e"], &[9.0]), 9.0);
    }

    #[test]
    fn rejects_unknown_names_and_bad_syntax() {
        assert_eq!(
            Expression::compile("y + 1", &["x"]),
            Err(CompileError::UnknownVariable("y".into()))
        );
        assert_eq!(
            Expression::compile("exec(1)", &[]),
            Err(CompileError::UnknownFunction("exec".into()))
        );
        assert!(matches!(
            Expression::compile("pow(2)", &[]),
            Err(CompileError::Arity { name: "pow", expected: 2, got: 1 })
        ));
        assert!(matches!(Expression::compile("1 +", &[]), Err(CompileError::UnexpectedToken { .. })));
        assert!(matches!(Expression::compile("(1", &[]), Err(CompileError::UnexpectedToken { .. })));
        assert!(matches!(Expression::compile("1 2", &[]), Err(CompileError::UnexpectedToken { .. })));
        assert!(matches!(Expression::compile("x ü", &["x"]), Err(CompileError::UnexpectedToken { .. })));
    }

    #[test]
    fn deep_nesting_is_refused() {
        let src = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(Expression::compile(&src, &[]), Err(CompileError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn long_operator_chains_are_refused() {
        let sum = format!("x{}", "+x".repeat(100_000));
        assert_eq!(Expression::compile(&sum, &["x"]), Err(CompileError::TooDeep(MAX_DEPTH)));
        let product = format!("x{}", "*x".repeat(100_000));
        assert_eq!(Expression::compile(&product, &["x"]), Err(CompileError::TooDeep(MAX_DEPTH)));
        let logic = format!("x{}", "&&x||x".repeat(50_000));
        assert_eq!(Expression::compile(&logic, &["x"]), Err(CompileError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn modest_chains_still_compile() {
        let sum = format!("x{}", "+x".repeat(200));
        assert_eq!(eval(&sum, &["x"], &[0.5]), 100.5);
        let mixed = format!("1{}", "*x+1".repeat(100));
        assert!(Expression::compile(&mixed, &["x"]).is_ok());
    }

    #[test]
    fn non_finite_results_are_faults() {
        let e = Expression::compile("1 / x", &["x"]).unwrap();
        assert_eq!(e.eval(&[0.0]), Err(EvalFault::NonFinite));
        assert_eq!(e.eval(&[]), Err(EvalFault::Unbound("x".into())));
        assert_eq!(e.eval(&[4.0]), Ok(0.25));
    }
}
