//! Lexical scope tracking and identifier renaming for one compilation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::ast::Span;
use crate::error::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    Global,
    If,
    Else,
    For,
    While,
    Function,
}

impl ScopeKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ScopeKind::Global => "glb",
            ScopeKind::If => "if",
            ScopeKind::Else => "els",
            ScopeKind::For => "for",
            ScopeKind::While => "whl",
            ScopeKind::Function => "fn",
        }
    }
}

/// Selects the storage bucket a slot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutability {
    Reassignable,
    SingleAssignment,
}

impl Mutability {
    /// Bucket name on the context object.
    pub fn bucket(self) -> &'static str {
        match self {
            Mutability::Reassignable => "let",
            Mutability::SingleAssignment => "const",
        }
    }

    pub fn from_bucket(name: &str) -> Option<Self> {
        match name {
            "let" => Some(Mutability::Reassignable),
            "const" => Some(Mutability::SingleAssignment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub original: String,
    pub scoped: String,
    pub mutability: Mutability,
    pub scope: ScopeKind,
    pub instance: u32,
}

/// How a use-site identifier must be treated by the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Re-homed into a persistent history slot.
    Slot(Binding),
    /// Loop induction variable, read as a plain value.
    Loop,
    /// Supplied by the context or a nested function parameter; read through.
    ContextBound,
    /// The root context parameter itself.
    Root,
    /// A hoisted function declaration.
    Function,
}

#[derive(Debug)]
struct Frame {
    kind: ScopeKind,
    instance: u32,
    vars: HashMap<String, Binding>,
    bound: HashSet<String>,
    loop_vars: HashSet<String>,
}

/// Scope stack plus every id generator for one compilation. Never reuse across scripts.
#[derive(Debug, Default)]
pub struct ScopeManager {
    frames: Vec<Frame>,
    counters: HashMap<ScopeKind, u32>,
    context_bound: HashSet<String>,
    root_param: Option<String>,
    functions: HashSet<String>,
    array_elements: HashSet<String>,
    temps: HashSet<String>,
    reserved: HashSet<String>,
    next_call_id: u32,
    next_param_id: u32,
    next_temp: u32,
    bindings_created: usize,
}

impl ScopeManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------- scope stack ----------

    /// Instance ids come from one counter per scope kind, so they follow static traversal order
    /// and stay unique across the whole unit.
    pub fn push_scope(&mut self, kind: ScopeKind) -> u32 {
        let counter = self.counters.entry(kind).or_insert(0);
        *counter += 1;
        let instance = *counter;
        self.frames.push(Frame {
            kind,
            instance,
            vars: HashMap::new(),
            bound: HashSet::new(),
            loop_vars: HashSet::new(),
        });
        trace!(scope = kind.prefix(), instance, depth = self.frames.len(), "push scope");
        instance
    }

    pub fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.pop() {
            trace!(scope = frame.kind.prefix(), instance = frame.instance, "pop scope");
        }
    }

    /// True while inside a nested function body at any depth.
    pub fn in_function(&self) -> bool {
        self.frames.iter().any(|f| f.kind == ScopeKind::Function)
    }

    // ---------- variables ----------

    /// Register a declaration in the innermost scope and return its slot binding.
    pub fn add_variable(&mut self, name: &str, mutability: Mutability) -> Binding {
        let (kind, instance) = self
            .frames
            .last()
            .map(|f| (f.kind, f.instance))
            .unwrap_or((ScopeKind::Global, 0));
        let binding = Binding {
            original: name.to_string(),
            scoped: format!("{}{}_{}", kind.prefix(), instance, name),
            mutability,
            scope: kind,
            instance,
        };
        trace!(name, scoped = %binding.scoped, bucket = mutability.bucket(), "declare");
        if let Some(frame) = self.frames.last_mut() {
            frame.vars.insert(name.to_string(), binding.clone());
        }
        self.bindings_created += 1;
        binding
    }

    /// Resolve a declared slot by walking from the innermost scope outwards.
    pub fn get_variable(&self, name: &str, span: Span) -> Result<Binding, CompileError> {
        match self.resolve(name, span)? {
            Resolution::Slot(binding) => Ok(binding),
            _ => Err(CompileError::unresolved(name, span)),
        }
    }

    /// Classify a use-site name. Frames shadow outer classifications; the global
    /// context-bound set, the root parameter and hoisted functions are consulted last.
    pub fn resolve(&self, name: &str, span: Span) -> Result<Resolution, CompileError> {
        for frame in self.frames.iter().rev() {
            if frame.loop_vars.contains(name) {
                return Ok(Resolution::Loop);
            }
            if frame.bound.contains(name) {
                return Ok(Resolution::ContextBound);
            }
            if let Some(binding) = frame.vars.get(name) {
                return Ok(Resolution::Slot(binding.clone()));
            }
        }
        if self.is_root_param(name) {
            Ok(Resolution::Root)
        } else if self.context_bound.contains(name) {
            Ok(Resolution::ContextBound)
        } else if self.functions.contains(name) {
            Ok(Resolution::Function)
        } else {
            Err(CompileError::unresolved(name, span))
        }
    }

    // ---------- special classifications ----------

    /// Mark a name as supplied by the context. With `is_root_param` the name is the context
    /// itself; otherwise it is a nested function parameter local to the current scope.
    pub fn add_context_bound_var(&mut self, name: &str, is_root_param: bool) {
        if is_root_param {
            self.root_param = Some(name.to_string());
            return;
        }
        match self.frames.last_mut() {
            Some(frame) => {
                frame.bound.insert(name.to_string());
            }
            None => {
                self.context_bound.insert(name.to_string());
            }
        }
    }

    /// Names destructured or read off the context anywhere in the script.
    pub fn add_global_context_bound(&mut self, name: &str) {
        self.context_bound.insert(name.to_string());
    }

    pub fn is_context_bound(&self, name: &str) -> bool {
        matches!(
            self.resolve(name, Span::default()),
            Ok(Resolution::ContextBound | Resolution::Root)
        )
    }

    pub fn is_root_param(&self, name: &str) -> bool {
        self.root_param.as_deref() == Some(name)
    }

    pub fn root_param(&self) -> &str {
        self.root_param.as_deref().unwrap_or("context")
    }

    pub fn add_loop_variable(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.loop_vars.insert(name.to_string());
        }
    }

    pub fn is_loop_variable(&self, name: &str) -> bool {
        matches!(self.resolve(name, Span::default()), Ok(Resolution::Loop))
    }

    pub fn add_function(&mut self, name: &str) {
        self.functions.insert(name.to_string());
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn add_array_pattern_element(&mut self, name: &str) {
        self.array_elements.insert(name.to_string());
    }

    pub fn is_array_pattern_element(&self, name: &str) -> bool {
        self.array_elements.contains(name)
    }

    pub fn is_temp_var(&self, name: &str) -> bool {
        self.temps.contains(name)
    }

    // ---------- id generators ----------

    /// Trailing call-site key for a primary-namespace call.
    pub fn next_ta_call_id(&mut self) -> String {
        let id = format!("_ta{}", self.next_call_id);
        self.next_call_id += 1;
        id
    }

    /// Per-argument key handed to `param`.
    pub fn next_param_id(&mut self) -> String {
        let id = format!("p{}", self.next_param_id);
        self.next_param_id += 1;
        id
    }

    /// Names written by the script itself; temporaries never take one of them.
    pub fn reserve_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
    }

    pub fn generate_temp_var(&mut self) -> String {
        loop {
            let name = format!("_tmp{}", self.next_temp);
            self.next_temp += 1;
            if !self.reserved.contains(&name) {
                self.temps.insert(name.clone());
                return name;
            }
        }
    }

    pub fn stats(&self) -> ScopeStats {
        ScopeStats {
            scopes: self.counters.values().map(|c| *c as usize).sum(),
            bindings: self.bindings_created,
            call_ids: self.next_call_id as usize,
            param_ids: self.next_param_id as usize,
        }
    }
}

/// Counters reported once a compilation finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStats {
    pub scopes: usize,
    pub bindings: usize,
    pub call_ids: usize,
    pub param_ids: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_scopes_get_distinct_names() {
        let mut sm = ScopeManager::new();
        sm.push_scope(ScopeKind::Global);
        sm.push_scope(ScopeKind::If);
        let a = sm.add_variable("x", Mutability::Reassignable);
        sm.pop_scope();
        sm.push_scope(ScopeKind::If);
        let b = sm.add_variable("x", Mutability::Reassignable);
        sm.pop_scope();
        assert_eq!(a.scoped, "if1_x");
        assert_eq!(b.scoped, "if2_x");
    }

    #[test]
    fn nested_scope_after_pop_does_not_reuse_instance() {
        let mut sm = ScopeManager::new();
        sm.push_scope(ScopeKind::Global);
        sm.push_scope(ScopeKind::If);
        sm.push_scope(ScopeKind::If);
        let inner = sm.add_variable("x", Mutability::SingleAssignment);
        sm.pop_scope();
        let outer = sm.add_variable("x", Mutability::SingleAssignment);
        assert_eq!(inner.scoped, "if2_x");
        assert_eq!(outer.scoped, "if1_x");
    }

    #[test]
    fn lookup_walks_outwards_and_fails_when_missing() {
        let mut sm = ScopeManager::new();
        sm.push_scope(ScopeKind::Global);
        sm.add_variable("a", Mutability::SingleAssignment);
        sm.push_scope(ScopeKind::While);
        let got = sm.get_variable("a", Span::default()).unwrap();
        assert_eq!(got.scoped, "glb1_a");
        assert_eq!(got.mutability.bucket(), "const");
        let err = sm.get_variable("nope", Span::new(3, 4)).unwrap_err();
        assert_eq!(err, CompileError::unresolved("nope", Span::new(3, 4)));
    }

    #[test]
    fn classifications() {
        let mut sm = ScopeManager::new();
        sm.add_context_bound_var("context", true);
        sm.add_global_context_bound("close");
        sm.push_scope(ScopeKind::Global);
        sm.push_scope(ScopeKind::For);
        sm.add_loop_variable("i");
        assert!(sm.is_loop_variable("i"));
        assert!(sm.is_context_bound("close"));
        assert!(sm.is_root_param("context"));
        sm.pop_scope();
        assert!(!sm.is_loop_variable("i"));

        sm.push_scope(ScopeKind::Function);
        sm.add_context_bound_var("len", false);
        assert_eq!(sm.resolve("len", Span::default()), Ok(Resolution::ContextBound));
        sm.pop_scope();
        assert!(sm.resolve("len", Span::default()).is_err());
    }

    #[test]
    fn local_declaration_shadows_context_name() {
        let mut sm = ScopeManager::new();
        sm.add_global_context_bound("close");
        sm.push_scope(ScopeKind::Global);
        sm.push_scope(ScopeKind::Function);
        sm.add_variable("close", Mutability::Reassignable);
        assert!(matches!(
            sm.resolve("close", Span::default()),
            Ok(Resolution::Slot(b)) if b.scoped == "fn1_close"
        ));
    }

    #[test]
    fn generators_are_monotonic() {
        let mut sm = ScopeManager::new();
        assert_eq!(sm.next_ta_call_id(), "_ta0");
        assert_eq!(sm.next_ta_call_id(), "_ta1");
        assert_eq!(sm.next_param_id(), "p0");
        assert_eq!(sm.generate_temp_var(), "_tmp0");
        assert!(sm.is_temp_var("_tmp0"));
        assert_eq!(sm.stats().call_ids, 2);
    }

    #[test]
    fn temporaries_skip_names_the_script_uses() {
        let mut sm = ScopeManager::new();
        sm.reserve_names(["_tmp0", "_tmp2"]);
        assert_eq!(sm.generate_temp_var(), "_tmp1");
        assert_eq!(sm.generate_temp_var(), "_tmp3");
        assert!(!sm.is_temp_var("_tmp0"));
    }

    #[test]
    fn function_frames_are_detected_at_any_depth() {
        let mut sm = ScopeManager::new();
        sm.push_scope(ScopeKind::Global);
        assert!(!sm.in_function());
        sm.push_scope(ScopeKind::Function);
        sm.push_scope(ScopeKind::If);
        assert!(sm.in_function());
        sm.pop_scope();
        sm.pop_scope();
        assert!(!sm.in_function());
    }
}
