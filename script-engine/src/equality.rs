//! Rewrites loose and strict equality into tolerance-aware `math.__eq` calls.
//!
//! Runs after the main transform, so operands are already slot reads. The rewrite is
//! idempotent: its output contains no `==`/`===` nodes for a second pass to touch.

use std::rc::Rc;

use tracing::debug;

use crate::ast::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualityOutcome {
    /// No equality operators found; the program is returned as given.
    Skipped,
    /// Number of comparisons replaced.
    Rewritten(usize),
}

pub fn normalize_equality(program: Program, root_param: &str) -> (Program, EqualityOutcome) {
    let mut pass = Normalizer {
        root: root_param,
        rewritten: 0,
    };
    let root = pass.function(program.root.as_ref());
    if pass.rewritten == 0 {
        debug!("no equality comparisons to normalise");
        return (program, EqualityOutcome::Skipped);
    }
    debug!(rewritten = pass.rewritten, "equality normalised");
    (
        Program {
            root: Rc::new(root),
        },
        EqualityOutcome::Rewritten(pass.rewritten),
    )
}

struct Normalizer<'a> {
    root: &'a str,
    rewritten: usize,
}

impl Normalizer<'_> {
    fn eq_call(&self, left: Expr, right: Expr) -> Expr {
        Expr::call(
            Expr::member(Expr::member(Expr::ident(self.root), "math"), "__eq"),
            vec![left, right],
        )
    }

    fn function(&mut self, f: &Function) -> Function {
        let body = match &f.body {
            FunctionBody::Block(stmts) => FunctionBody::Block(self.block(stmts)),
            FunctionBody::Expr(e) => FunctionBody::Expr(Box::new(self.expr(e))),
        };
        Function {
            body,
            ..f.clone()
        }
    }

    fn block(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn boxed(&mut self, stmt: &Stmt) -> Box<Stmt> {
        Box::new(self.stmt(stmt))
    }

    fn opt(&mut self, expr: &Option<Expr>) -> Option<Expr> {
        expr.as_ref().map(|e| self.expr(e))
    }

    fn decl(&mut self, decl: &VarDecl) -> VarDecl {
        VarDecl {
            kind: decl.kind,
            declarators: decl
                .declarators
                .iter()
                .map(|d| Declarator {
                    init: self.opt(&d.init),
                    ..d.clone()
                })
                .collect(),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Decl(d) => Stmt::Decl(self.decl(d)),
            Stmt::Expr(e) => Stmt::Expr(self.expr(e)),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => Stmt::If {
                test: self.expr(test),
                consequent: self.boxed(consequent),
                alternate: alternate.as_deref().map(|a| self.boxed(a)),
            },
            Stmt::For {
                init,
                test,
                update,
                body,
            } => Stmt::For {
                init: init.as_ref().map(|i| match i {
                    ForInit::Decl(d) => ForInit::Decl(self.decl(d)),
                    ForInit::Expr(e) => ForInit::Expr(self.expr(e)),
                }),
                test: self.opt(test),
                update: self.opt(update),
                body: self.boxed(body),
            },
            Stmt::While { test, body } => Stmt::While {
                test: self.expr(test),
                body: self.boxed(body),
            },
            Stmt::Block(stmts) => Stmt::Block(self.block(stmts)),
            Stmt::Return(arg) => Stmt::Return(self.opt(arg)),
            Stmt::Function(f) => Stmt::Function(Rc::new(self.function(f))),
            Stmt::Break | Stmt::Continue | Stmt::Empty => stmt.clone(),
        }
    }

    fn expr(&mut self, expr: &Expr) -> Expr {
        let b = |e: Expr| Box::new(e);
        match expr {
            Expr::Binary {
                op: BinaryOp::Eq | BinaryOp::StrictEq,
                left,
                right,
            } => {
                self.rewritten += 1;
                let left = self.expr(left);
                let right = self.expr(right);
                self.eq_call(left, right)
            }
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: b(self.expr(left)),
                right: b(self.expr(right)),
            },
            Expr::Member { object, property } => Expr::Member {
                object: b(self.expr(object)),
                property: property.clone(),
            },
            Expr::Index { object, index } => Expr::Index {
                object: b(self.expr(object)),
                index: b(self.expr(index)),
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: b(self.expr(callee)),
                args: args.iter().map(|a| self.expr(a)).collect(),
            },
            Expr::Unary { op, arg } => Expr::Unary {
                op: *op,
                arg: b(self.expr(arg)),
            },
            Expr::Update { op, prefix, target } => Expr::Update {
                op: *op,
                prefix: *prefix,
                target: b(self.expr(target)),
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op: *op,
                left: b(self.expr(left)),
                right: b(self.expr(right)),
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: b(self.expr(test)),
                consequent: b(self.expr(consequent)),
                alternate: b(self.expr(alternate)),
            },
            Expr::Assign { op, target, value } => Expr::Assign {
                op: *op,
                target: b(self.expr(target)),
                value: b(self.expr(value)),
            },
            Expr::Array(items) => Expr::Array(items.iter().map(|e| self.expr(e)).collect()),
            Expr::Object(props) => Expr::Object(
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), self.expr(v)))
                    .collect(),
            ),
            Expr::Function(f) => Expr::Function(Rc::new(self.function(f))),
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::Ident(_)
            | Expr::This => expr.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate;
    use crate::parser::parse;

    fn normalize(src: &str) -> (String, EqualityOutcome) {
        let (program, outcome) = normalize_equality(parse(src).unwrap(), "context");
        (generate(&program), outcome)
    }

    #[test]
    fn rewrites_loose_and_strict_equality() {
        let (out, outcome) = normalize("(context) => { const a = 1 == 2; const b = (a === 0) && 3 }");
        assert_eq!(outcome, EqualityOutcome::Rewritten(2));
        assert!(out.contains("const a = context.math.__eq(1, 2);"), "{out}");
        assert!(out.contains("const b = context.math.__eq(a, 0) && 3;"), "{out}");
    }

    #[test]
    fn leaves_inequality_alone() {
        let (out, outcome) = normalize("(context) => { const a = 1 != 2; return a !== 3 }");
        assert_eq!(outcome, EqualityOutcome::Skipped);
        assert!(out.contains("1 != 2"));
        assert!(out.contains("a !== 3"));
    }

    #[test]
    fn nested_comparisons_are_rewritten_inside_out() {
        let (out, outcome) =
            normalize("(context) => { if ((x == 1) == true) { const f = (v) => v == 2 } }");
        assert_eq!(outcome, EqualityOutcome::Rewritten(3));
        assert!(out.contains("if (context.math.__eq(context.math.__eq(x, 1), true)) {"), "{out}");
        assert!(out.contains("(v) => context.math.__eq(v, 2)"), "{out}");
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let program = parse("(context) => { let a = 1; while (a == 1) { a = a === 2 ? 1 : 3 } }").unwrap();
        let (once, _) = normalize_equality(program, "context");
        let (twice, outcome) = normalize_equality(once.clone(), "context");
        assert_eq!(outcome, EqualityOutcome::Skipped);
        assert_eq!(once, twice);
    }
}
