//! Serialises a syntax tree back to script text.
//!
//! Parenthesisation follows operator precedence so the output re-parses to the same tree.

use crate::ast::*;

const INDENT: &str = "    ";

// Precedence levels shared with the parser's operator tables.
const PREC_ASSIGN: u8 = 1;
const PREC_CONDITIONAL: u8 = 2;
const PREC_UNARY: u8 = 14;
const PREC_POSTFIX: u8 = 15;
const PREC_CALL: u8 = 17;
const PREC_PRIMARY: u8 = 18;

pub fn generate(program: &Program) -> String {
    let mut printer = Printer::default();
    printer.function(&program.root);
    printer.out.push('\n');
    printer.out
}

/// Render a single expression at top level.
pub fn generate_expr(expr: &Expr) -> String {
    Printer::default().expr(expr)
}

pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 && n.is_sign_negative() {
        "-0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn format_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{s:?}"))
}

fn is_identifier_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Assign { .. } => PREC_ASSIGN,
        Expr::Function(f) if f.style == FunctionStyle::Arrow => PREC_ASSIGN,
        Expr::Conditional { .. } => PREC_CONDITIONAL,
        Expr::Logical { op, .. } => op.precedence(),
        Expr::Binary { op, .. } => op.precedence(),
        Expr::Unary { .. } => PREC_UNARY,
        Expr::Update { prefix: true, .. } => PREC_UNARY,
        Expr::Update { prefix: false, .. } => PREC_POSTFIX,
        // printed with a leading `-`
        Expr::Number(n) if n.is_sign_negative() && !n.is_nan() => PREC_UNARY,
        Expr::Call { .. } | Expr::Member { .. } | Expr::Index { .. } => PREC_CALL,
        Expr::Number(_)
        | Expr::Str(_)
        | Expr::Bool(_)
        | Expr::Null
        | Expr::Undefined
        | Expr::Ident(_)
        | Expr::This
        | Expr::Array(_)
        | Expr::Object(_)
        | Expr::Function(_) => PREC_PRIMARY,
    }
}

#[derive(Default)]
struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn function_head(&self, f: &Function) -> String {
        let params = f
            .params
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match (f.style, &f.name) {
            (FunctionStyle::Arrow, _) => format!("({params}) =>"),
            (FunctionStyle::Classic, Some(name)) => format!("function {}({params})", name.name),
            (FunctionStyle::Classic, None) => format!("function ({params})"),
        }
    }

    /// Writes a function starting at the current cursor (no leading indent, no trailing newline).
    fn function(&mut self, f: &Function) {
        let head = self.function_head(f);
        match &f.body {
            FunctionBody::Block(stmts) => {
                self.out.push_str(&head);
                self.out.push_str(" {\n");
                self.depth += 1;
                for stmt in stmts {
                    self.stmt(stmt);
                }
                self.depth -= 1;
                for _ in 0..self.depth {
                    self.out.push_str(INDENT);
                }
                self.out.push('}');
            }
            FunctionBody::Expr(e) => {
                let body = self.expr(e);
                self.out.push_str(&head);
                self.out.push(' ');
                if matches!(e.as_ref(), Expr::Object(_)) {
                    self.out.push_str(&format!("({body})"));
                } else {
                    self.out.push_str(&body);
                }
            }
        }
    }

    fn function_text(&mut self, f: &Function) -> String {
        let saved = std::mem::take(&mut self.out);
        self.function(f);
        std::mem::replace(&mut self.out, saved)
    }

    fn body_block(&mut self, head: &str, body: &Stmt) {
        self.line(&format!("{head} {{"));
        self.depth += 1;
        match body {
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.stmt(s);
                }
            }
            other => self.stmt(other),
        }
        self.depth -= 1;
    }

    fn decl_text(&mut self, decl: &VarDecl) -> String {
        let parts = decl
            .declarators
            .iter()
            .map(|d| {
                let target = pattern_text(&d.target);
                match &d.init {
                    Some(init) => format!("{target} = {}", self.expr(init)),
                    None => target,
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} {parts}", decl.kind.keyword())
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl(decl) => {
                let text = self.decl_text(decl);
                self.line(&format!("{text};"));
            }
            Stmt::Expr(e) => {
                let text = self.expr(e);
                if text.starts_with('{') || text.starts_with("function") {
                    self.line(&format!("({text});"));
                } else {
                    self.line(&format!("{text};"));
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let head = format!("if ({})", self.expr(test));
                self.if_chain(&head, consequent, alternate.as_deref());
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let init = match init {
                    Some(ForInit::Decl(d)) => self.decl_text(d),
                    Some(ForInit::Expr(e)) => self.expr(e),
                    None => String::new(),
                };
                let test = test.as_ref().map(|e| self.expr(e)).unwrap_or_default();
                let update = update.as_ref().map(|e| self.expr(e)).unwrap_or_default();
                self.body_block(&format!("for ({init}; {test}; {update})"), body);
                self.line("}");
            }
            Stmt::While { test, body } => {
                let head = format!("while ({})", self.expr(test));
                self.body_block(&head, body);
                self.line("}");
            }
            Stmt::Block(stmts) => {
                self.line("{");
                self.depth += 1;
                for s in stmts {
                    self.stmt(s);
                }
                self.depth -= 1;
                self.line("}");
            }
            Stmt::Return(Some(e)) => {
                let text = self.expr(e);
                self.line(&format!("return {text};"));
            }
            Stmt::Return(None) => self.line("return;"),
            Stmt::Break => self.line("break;"),
            Stmt::Continue => self.line("continue;"),
            Stmt::Function(f) => {
                let text = self.function_text(f);
                for _ in 0..self.depth {
                    self.out.push_str(INDENT);
                }
                self.out.push_str(&text);
                self.out.push('\n');
            }
            Stmt::Empty => self.line(";"),
        }
    }

    fn if_chain(&mut self, head: &str, consequent: &Stmt, alternate: Option<&Stmt>) {
        self.body_block(head, consequent);
        match alternate {
            None => self.line("}"),
            Some(Stmt::If {
                test,
                consequent,
                alternate,
            }) => {
                let head = format!("}} else if ({})", self.expr(test));
                self.if_chain(&head, consequent, alternate.as_deref());
            }
            Some(other) => {
                self.body_block("} else", other);
                self.line("}");
            }
        }
    }

    fn operand(&mut self, expr: &Expr, parens: bool) -> String {
        let text = self.expr(expr);
        if parens {
            format!("({text})")
        } else {
            text
        }
    }

    fn object_of(&mut self, expr: &Expr) -> String {
        let wrap = precedence(expr) < PREC_CALL
            || matches!(expr, Expr::Number(_) | Expr::Function(_) | Expr::Object(_));
        self.operand(expr, wrap)
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Number(n) => format_number(*n),
            Expr::Str(s) => format_string(s),
            Expr::Bool(b) => b.to_string(),
            Expr::Null => "null".to_string(),
            Expr::Undefined => "undefined".to_string(),
            Expr::Ident(id) => id.name.clone(),
            Expr::This => "this".to_string(),
            Expr::Member { object, property } => {
                format!("{}.{property}", self.object_of(object))
            }
            Expr::Index { object, index } => {
                format!("{}[{}]", self.object_of(object), self.expr(index))
            }
            Expr::Call { callee, args } => {
                let callee = self.object_of(callee);
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{callee}({args})")
            }
            Expr::Unary { op, arg } => {
                let inner = self.operand(arg, precedence(arg) < PREC_UNARY);
                let sign = matches!(op, UnaryOp::Neg | UnaryOp::Plus);
                if sign && (inner.starts_with('-') || inner.starts_with('+')) {
                    format!("{} {inner}", op.symbol())
                } else {
                    format!("{}{inner}", op.symbol())
                }
            }
            Expr::Update { op, prefix, target } => {
                let inner = self.object_of(target);
                if *prefix {
                    format!("{}{inner}", op.symbol())
                } else {
                    format!("{inner}{}", op.symbol())
                }
            }
            Expr::Binary { op, left, right } => {
                let p = op.precedence();
                let pow = *op == BinaryOp::Pow;
                let lp = precedence(left);
                let rp = precedence(right);
                // `-a ** b` is rejected by hosts, so a unary base is always wrapped.
                let l = self.operand(left, lp < p || (pow && (lp == p || lp == PREC_UNARY)));
                let r = self.operand(right, rp < p || (!pow && rp == p));
                format!("{l} {} {r}", op.symbol())
            }
            Expr::Logical { op, left, right } => {
                let p = op.precedence();
                let l = self.operand(left, precedence(left) < p);
                let r = self.operand(right, precedence(right) <= p);
                format!("{l} {} {r}", op.symbol())
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let t = self.operand(test, precedence(test) <= PREC_CONDITIONAL);
                let c = self.expr(consequent);
                let a = self.expr(alternate);
                format!("{t} ? {c} : {a}")
            }
            Expr::Assign { op, target, value } => {
                let t = self.object_of(target);
                let v = self.expr(value);
                format!("{t} {} {v}", op.symbol())
            }
            Expr::Array(items) => {
                let items = items
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{items}]")
            }
            Expr::Object(props) => {
                if props.is_empty() {
                    return "{}".to_string();
                }
                let props = props
                    .iter()
                    .map(|(k, v)| match v {
                        Expr::Ident(id) if &id.name == k => k.clone(),
                        _ => {
                            let key = if is_identifier_name(k) {
                                k.clone()
                            } else {
                                format_string(k)
                            };
                            format!("{key}: {}", self.expr(v))
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {props} }}")
            }
            Expr::Function(f) => self.function_text(f),
        }
    }
}

fn pattern_text(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Ident(id) => id.name.clone(),
        Pattern::Object(props) => {
            let inner = props
                .iter()
                .map(|(k, v)| {
                    if *k == v.name {
                        k.clone()
                    } else {
                        format!("{k}: {}", v.name)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {inner} }}")
        }
        Pattern::Array(items) => {
            let mut items: Vec<&Option<Ident>> = items.iter().collect();
            while matches!(items.last(), Some(None)) {
                items.pop();
            }
            let inner = items
                .iter()
                .map(|i| i.as_ref().map(|id| id.name.clone()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{inner}]")
        }
    }
}
