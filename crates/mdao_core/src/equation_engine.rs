use crate::error::EvaluationError;
use crate::traits::{CompiledExpression, ExpressionEvaluator};
use std::collections::HashMap;

/// Built-in functions understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Log10,
    Sqrt,
    Abs,
    Pow,
    Atan2,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        let function = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "asin" | "arcsin" => Function::Asin,
            "acos" | "arccos" => Function::Acos,
            "atan" | "arctan" => Function::Atan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "exp" => Function::Exp,
            "log" | "ln" => Function::Ln,
            "log10" => Function::Log10,
            "sqrt" => Function::Sqrt,
            "abs" | "fabs" => Function::Abs,
            "pow" | "power" => Function::Pow,
            "atan2" | "arctan2" => Function::Atan2,
            "min" | "minimum" => Function::Min,
            "max" | "maximum" => Function::Max,
            _ => return None,
        };
        Some(function)
    }

    /// Accepted argument count as (min, max).
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Pow | Function::Atan2 => (2, 2),
            Function::Min | Function::Max => (2, usize::MAX),
            _ => (1, 1),
        }
    }
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the binding at the given slot onto the stack.
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b). Fails when b is zero.
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops `argc` values and pushes the function result.
    Call(Function, usize),
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }
}

/// Stack-based virtual machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes the bytecode, the bindings it reads
/// through `LoadVar`, and a scratch stack reused across calls.
pub struct VM;

impl VM {
    pub fn execute(
        bytecode: &Bytecode,
        bindings: &[f64],
        stack: &mut Vec<f64>,
    ) -> Result<f64, EvaluationError> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => {
                    let value = bindings.get(idx).copied().ok_or(EvaluationError::Binding {
                        expected: idx + 1,
                        found: bindings.len(),
                    })?;
                    stack.push(value);
                }
                OpCode::Add => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let (a, b) = pop_pair(stack)?;
                    if b == 0.0 {
                        return Err(EvaluationError::DivisionByZero);
                    }
                    stack.push(a / b);
                }
                OpCode::Pow => {
                    let (a, b) = pop_pair(stack)?;
                    stack.push(a.powf(b));
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(function, argc) => {
                    if stack.len() < argc {
                        return Err(malformed());
                    }
                    let args = stack.split_off(stack.len() - argc);
                    stack.push(apply_function(function, &args)?);
                }
            }
        }

        let result = pop(stack)?;
        if !stack.is_empty() {
            return Err(malformed());
        }
        Ok(result)
    }
}

fn malformed() -> EvaluationError {
    EvaluationError::Parse("malformed bytecode".to_string())
}

fn pop(stack: &mut Vec<f64>) -> Result<f64, EvaluationError> {
    stack.pop().ok_or_else(malformed)
}

fn pop_pair(stack: &mut Vec<f64>) -> Result<(f64, f64), EvaluationError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

fn apply_function(function: Function, args: &[f64]) -> Result<f64, EvaluationError> {
    let first = args.first().copied().ok_or_else(malformed)?;
    let value = match function {
        Function::Sin => first.sin(),
        Function::Cos => first.cos(),
        Function::Tan => first.tan(),
        Function::Asin => first.asin(),
        Function::Acos => first.acos(),
        Function::Atan => first.atan(),
        Function::Sinh => first.sinh(),
        Function::Cosh => first.cosh(),
        Function::Tanh => first.tanh(),
        Function::Exp => first.exp(),
        Function::Ln => first.ln(),
        Function::Log10 => first.log10(),
        Function::Sqrt => first.sqrt(),
        Function::Abs => first.abs(),
        Function::Pow => first.powf(*args.get(1).ok_or_else(malformed)?),
        Function::Atan2 => first.atan2(*args.get(1).ok_or_else(malformed)?),
        Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    Ok(value)
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// A symbol; subscripted references are stored as `name[index]`.
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// One `target = expression` assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: String,
    pub expr: Expr,
}

const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

fn constant(name: &str) -> Option<f64> {
    CONSTANTS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, value)| *value)
}

/// Compiles an AST (`Expr`) into `Bytecode`, resolving symbols to binding slots.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EvaluationError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EvaluationError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(value) = constant(name) {
                    ops.push(OpCode::LoadConst(value));
                } else {
                    return Err(EvaluationError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                let code = match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => {
                        return Err(EvaluationError::Parse(format!(
                            "unknown binary operator '{other}'"
                        )))
                    }
                };
                ops.push(code);
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    '+' => {}
                    other => {
                        return Err(EvaluationError::Parse(format!(
                            "unknown unary operator '{other}'"
                        )))
                    }
                }
            }
            Expr::Call(name, args) => {
                let function = Function::lookup(name)
                    .ok_or_else(|| EvaluationError::UnknownFunction(name.clone()))?;
                let (min, max) = function.arity();
                if args.len() < min || args.len() > max {
                    let expected = if min == max {
                        min.to_string()
                    } else {
                        format!("at least {min}")
                    };
                    return Err(EvaluationError::Arity {
                        name: name.clone(),
                        expected,
                        found: args.len(),
                    });
                }
                for arg in args {
                    self.compile_recursive(arg, ops)?;
                }
                ops.push(OpCode::Call(function, args.len()));
            }
        }
        Ok(())
    }
}

/// Collects the symbols an expression reads, in order of first appearance.
/// Named constants are skipped.
pub fn collect_symbols(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Variable(name) => {
            if constant(name).is_none() && !out.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::Binary(left, _, right) => {
            collect_symbols(left, out);
            collect_symbols(right, out);
        }
        Expr::Unary(_, operand) => collect_symbols(operand, out),
        Expr::Call(_, args) => {
            for arg in args {
                collect_symbols(arg, out);
            }
        }
    }
}

// --- Parser ---

/// Parses equation text into assignments. Statements are separated by `;` or
/// newlines; blank statements are skipped.
pub fn parse(input: &str) -> Result<Vec<Statement>, EvaluationError> {
    let mut statements = Vec::new();
    for source in input.split(|c: char| c == ';' || c == '\n') {
        if source.trim().is_empty() {
            continue;
        }
        statements.push(parse_statement(source)?);
    }
    if statements.is_empty() {
        return Err(EvaluationError::Parse("equation is empty".to_string()));
    }
    Ok(statements)
}

/// Parses a single `target = expression` assignment.
pub fn parse_statement(input: &str) -> Result<Statement, EvaluationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let target = parser.parse_target()?;
    match parser.consume() {
        Some(Token::Assign) => {}
        _ => {
            return Err(EvaluationError::Parse(format!(
                "expected '=' after '{target}' in \"{}\"",
                input.trim()
            )))
        }
    }
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(Statement { target, expr })
}

/// Parses a bare expression with no assignment.
pub fn parse_expression(input: &str) -> Result<Expr, EvaluationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Assign,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvaluationError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Exponent part: 1e-3, 2.5E+4
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| EvaluationError::Parse(format!("invalid number '{text}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Identifier(chars[start..i].iter().collect()));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' if chars.get(i + 1) == Some(&'*') => {
                    i += 1;
                    Token::Power
                }
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Power,
                '(' => Token::LParen,
                ')' => Token::RParen,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                ',' => Token::Comma,
                '=' => Token::Assign,
                other => {
                    return Err(EvaluationError::Parse(format!(
                        "unexpected character '{other}'"
                    )))
                }
            };
            tokens.push(token);
            i += 1;
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

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_end(&self) -> Result<(), EvaluationError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(EvaluationError::Parse(format!(
                "unexpected trailing token {token:?}"
            ))),
        }
    }

    fn parse_target(&mut self) -> Result<String, EvaluationError> {
        match self.consume() {
            Some(Token::Identifier(name)) => self.parse_subscript(name),
            _ => Err(EvaluationError::Parse(
                "expected an assignment target".to_string(),
            )),
        }
    }

    fn parse_subscript(&mut self, name: String) -> Result<String, EvaluationError> {
        if self.peek() != Some(&Token::LBracket) {
            return Ok(name);
        }
        self.consume();
        let index = match self.consume() {
            Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            _ => {
                return Err(EvaluationError::Parse(format!(
                    "subscript of '{name}' must be a non-negative integer"
                )))
            }
        };
        match self.consume() {
            Some(Token::RBracket) => Ok(format!("{name}[{index}]")),
            _ => Err(EvaluationError::Parse("expected ']'".to_string())),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, EvaluationError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than power: -x**2 == -(x**2).
    fn parse_unary(&mut self) -> Result<Expr, EvaluationError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary('-', Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Unary('+', Box::new(expr)))
            }
            _ => self.parse_power(),
        }
    }

    // Right-associative: 2**3**2 == 2**(3**2).
    fn parse_power(&mut self) -> Result<Expr, EvaluationError> {
        let base = self.parse_primary()?;
        if self.peek() == Some(&Token::Power) {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, EvaluationError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => match self.peek() {
                Some(Token::LParen) => {
                    self.consume();
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call(name, args))
                }
                Some(Token::LBracket) => Ok(Expr::Variable(self.parse_subscript(name)?)),
                _ => Ok(Expr::Variable(name)),
            },
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(EvaluationError::Parse("expected ')'".to_string())),
                }
            }
            Some(token) => Err(EvaluationError::Parse(format!(
                "unexpected token {token:?}"
            ))),
            None => Err(EvaluationError::Parse(
                "unexpected end of expression".to_string(),
            )),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, EvaluationError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.consume();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            match self.consume() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(EvaluationError::Parse("expected ',' or ')'".to_string())),
            }
        }
    }
}

// --- Compiled equations ---

/// A parsed and compiled equation: one bytecode program per assignment, all
/// reading from a shared binding list.
#[derive(Debug, Clone)]
pub struct BytecodeEquation {
    inputs: Vec<String>,
    outputs: Vec<String>,
    programs: Vec<Bytecode>,
}

impl BytecodeEquation {
    pub fn new(text: &str) -> Result<Self, EvaluationError> {
        let statements = parse(text)?;

        let mut outputs: Vec<String> = Vec::with_capacity(statements.len());
        for statement in &statements {
            if outputs.contains(&statement.target) {
                return Err(EvaluationError::Parse(format!(
                    "'{}' is assigned more than once",
                    statement.target
                )));
            }
            outputs.push(statement.target.clone());
        }

        let mut inputs = Vec::new();
        for statement in &statements {
            collect_symbols(&statement.expr, &mut inputs);
        }
        if let Some(name) = inputs.iter().find(|name| outputs.contains(name)) {
            return Err(EvaluationError::Parse(format!(
                "'{name}' is both assigned and read"
            )));
        }

        let compiler = Compiler::new(&inputs);
        let programs = statements
            .iter()
            .map(|statement| compiler.compile(&statement.expr))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            inputs,
            outputs,
            programs,
        })
    }
}

impl CompiledExpression for BytecodeEquation {
    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn outputs(&self) -> &[String] {
        &self.outputs
    }

    fn evaluate(&self, bindings: &[f64], out: &mut [f64]) -> Result<(), EvaluationError> {
        if bindings.len() != self.inputs.len() {
            return Err(EvaluationError::Binding {
                expected: self.inputs.len(),
                found: bindings.len(),
            });
        }
        if out.len() != self.outputs.len() {
            return Err(EvaluationError::Binding {
                expected: self.outputs.len(),
                found: out.len(),
            });
        }

        let mut stack = Vec::with_capacity(32);
        for (i, program) in self.programs.iter().enumerate() {
            let value = VM::execute(program, bindings, &mut stack)?;
            if !value.is_finite() {
                return Err(EvaluationError::NonFinite {
                    target: self.outputs[i].clone(),
                    value,
                });
            }
            out[i] = value;
        }
        Ok(())
    }
}

/// The default [`ExpressionEvaluator`]: compiles equations to bytecode for the VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytecodeEvaluator;

impl ExpressionEvaluator for BytecodeEvaluator {
    fn compile(&self, text: &str) -> Result<Box<dyn CompiledExpression>, EvaluationError> {
        Ok(Box::new(BytecodeEquation::new(text)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str, names: &[&str], values: &[f64]) -> Result<f64, EvaluationError> {
        let equation = BytecodeEquation::new(text)?;
        let bindings: Vec<f64> = equation
            .inputs()
            .iter()
            .map(|input| {
                let idx = names
                    .iter()
                    .position(|name| name == input)
                    .expect("test binding missing");
                values[idx]
            })
            .collect();
        let mut out = vec![0.0; equation.outputs().len()];
        equation.evaluate(&bindings, &mut out)?;
        Ok(out[0])
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let value = eval("y = -x**2", &["x"], &[3.0]).expect("should evaluate");
        assert_eq!(value, -9.0);
    }

    #[test]
    fn power_is_right_associative_and_accepts_caret() {
        assert_eq!(eval("y = 2**3**2", &[], &[]).unwrap(), 512.0);
        assert_eq!(eval("y = 2^-1", &[], &[]).unwrap(), 0.5);
    }

    #[test]
    fn numbers_accept_scientific_notation() {
        let value = eval("y = 1.5e2 + 2E-1 + x", &["x"], &[0.3]).unwrap();
        assert!((value - 150.5).abs() < 1e-12);
    }

    #[test]
    fn paraboloid_matches_hand_computation() {
        let value = eval(
            "f = (x-3)**2 + x*y + (y+4)**2 - 3",
            &["x", "y"],
            &[2.0, 1.0],
        )
        .unwrap();
        assert_eq!(value, 25.0);
    }

    #[test]
    fn subscripts_become_element_symbols() {
        let equation = BytecodeEquation::new("obj = x**2 + z[1] + exp(-y2)").unwrap();
        assert_eq!(equation.inputs(), &["x", "z[1]", "y2"]);
        assert_eq!(equation.outputs(), &["obj"]);
    }

    #[test]
    fn functions_support_multiple_arguments() {
        assert_eq!(eval("y = max(a, b, 2)", &["a", "b"], &[1.0, -4.0]).unwrap(), 2.0);
        assert_eq!(eval("y = min(a, b)", &["a", "b"], &[1.0, -4.0]).unwrap(), -4.0);
        assert_eq!(eval("y = pow(a, 3)", &["a"], &[2.0]).unwrap(), 8.0);
        let value = eval("y = sqrt(abs(a)) + cos(0)", &["a"], &[-16.0]).unwrap();
        assert!((value - 5.0).abs() < 1e-12);
    }

    #[test]
    fn named_constants_are_not_inputs() {
        let equation = BytecodeEquation::new("y = 2*pi*r").unwrap();
        assert_eq!(equation.inputs(), &["r"]);
    }

    #[test]
    fn multiple_statements_write_each_output() {
        let equation = BytecodeEquation::new("a = x + 1; b = x * 2\nc = x - 1").unwrap();
        assert_eq!(equation.outputs(), &["a", "b", "c"]);
        let mut out = vec![0.0; 3];
        equation.evaluate(&[4.0], &mut out).unwrap();
        assert_eq!(out, vec![5.0, 8.0, 3.0]);
    }

    #[test]
    fn division_by_zero_is_reported() {
        let err = eval("y = 1 / x", &["x"], &[0.0]).expect_err("should fail");
        assert_eq!(err, EvaluationError::DivisionByZero);
    }

    #[test]
    fn non_finite_results_are_reported() {
        let err = eval("y = sqrt(x)", &["x"], &[-1.0]).expect_err("should fail");
        assert!(matches!(err, EvaluationError::NonFinite { ref target, .. } if target == "y"));
    }

    #[test]
    fn unknown_function_and_arity_are_rejected() {
        let err = BytecodeEquation::new("y = foo(x)").expect_err("unknown function");
        assert_eq!(err, EvaluationError::UnknownFunction("foo".to_string()));
        let err = BytecodeEquation::new("y = sin(x, 2)").expect_err("arity");
        assert!(matches!(err, EvaluationError::Arity { found: 2, .. }));
    }

    #[test]
    fn malformed_statements_are_rejected() {
        assert!(matches!(parse("x + 1"), Err(EvaluationError::Parse(_))));
        assert!(matches!(parse("y = (x + 1"), Err(EvaluationError::Parse(_))));
        assert!(matches!(parse("y = x $ 2"), Err(EvaluationError::Parse(_))));
        assert!(matches!(parse("  ;  "), Err(EvaluationError::Parse(_))));
        assert!(matches!(parse("y = x 2"), Err(EvaluationError::Parse(_))));
    }

    #[test]
    fn targets_cannot_be_read_or_repeated() {
        assert!(BytecodeEquation::new("y = y + 1").is_err());
        assert!(BytecodeEquation::new("y = 1; y = 2").is_err());
    }

    #[test]
    fn compiler_rejects_unresolved_symbols() {
        let expr = parse_expression("x + w").unwrap();
        let compiler = Compiler::new(&["x".to_string()]);
        let err = compiler.compile(&expr).expect_err("w is unknown");
        assert_eq!(err, EvaluationError::UnknownSymbol("w".to_string()));
    }

    #[test]
    fn binding_count_mismatch_is_an_error() {
        let equation = BytecodeEquation::new("y = a + b").unwrap();
        let mut out = vec![0.0];
        let err = equation.evaluate(&[1.0], &mut out).expect_err("missing binding");
        assert_eq!(
            err,
            EvaluationError::Binding {
                expected: 2,
                found: 1
            }
        );
    }
}
