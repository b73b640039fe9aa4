/// Slot bookkeeping for one function being resolved.
///
/// Blocks nest inside the function; a block's names are visible until it
/// closes, but its slots are never handed out again.
#[derive(Debug)]
pub(crate) struct FunctionScope {
    next_slot: usize,
    blocks: Vec<Vec<(String, usize)>>,
}

impl FunctionScope {
    pub fn new() -> Self {
        FunctionScope { next_slot: 0, blocks: vec![Vec::new()] }
    }

    /// A function scope whose first slots are its parameters, in order.
    pub fn with_params<S: AsRef<str>>(params: &[S]) -> Self {
        let mut scope = FunctionScope::new();
        for param in params {
            scope.declare(param.as_ref());
        }
        scope
    }

    pub fn open_block(&mut self) {
        self.blocks.push(Vec::new());
    }

    pub fn close_block(&mut self) {
        if self.blocks.len() > 1 {
            self.blocks.pop();
        }
    }

    /// Declares `name` in the innermost block, shadowing any earlier
    /// binding of the same name.
    pub fn declare(&mut self, name: &str) -> usize {
        let slot = self.temp();
        if let Some(block) = self.blocks.last_mut() {
            block.push((name.to_string(), slot));
        }
        slot
    }

    /// Reserves a slot no name can reach.
    pub fn temp(&mut self) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.blocks
            .iter()
            .rev()
            .flat_map(|block| block.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
    }

    pub fn locals_count(&self) -> usize {
        self.next_slot
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Binding {
    Local(usize),
    Upvalue { level: usize, index: usize },
    Global,
}

/// Stack of function scopes, innermost last.
#[derive(Debug)]
pub(crate) struct ScopeChain {
    functions: Vec<FunctionScope>,
}

impl ScopeChain {
    pub fn new() -> Self {
        ScopeChain { functions: vec![FunctionScope::new()] }
    }

    pub fn current(&mut self) -> &mut FunctionScope {
        let last = self.functions.len() - 1;
        &mut self.functions[last]
    }

    pub fn push_function(&mut self, scope: FunctionScope) {
        self.functions.push(scope);
    }

    pub fn pop_function(&mut self) -> FunctionScope {
        if self.functions.len() > 1 {
            if let Some(scope) = self.functions.pop() {
                return scope;
            }
        }
        FunctionScope::new()
    }

    /// Most recent visible declaration wins, searching the current function
    /// first and then each enclosing one.
    pub fn lookup(&self, name: &str) -> Binding {
        for (level, scope) in self.functions.iter().rev().enumerate() {
            if let Some(slot) = scope.lookup(name) {
                return if level == 0 { Binding::Local(slot) } else { Binding::Upvalue { level, index: slot } };
            }
        }
        Binding::Global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_allocates_new_slot() {
        let mut s = FunctionScope::new();
        assert_eq!(s.declare("x"), 0);
        assert_eq!(s.declare("x"), 1);
        assert_eq!(s.lookup("x"), Some(1));
        assert_eq!(s.locals_count(), 2);
    }

    #[test]
    fn sibling_blocks_never_share_slots() {
        let mut s = FunctionScope::new();
        s.open_block();
        assert_eq!(s.declare("a"), 0);
        s.close_block();
        assert_eq!(s.lookup("a"), None);
        s.open_block();
        assert_eq!(s.declare("b"), 1);
        s.close_block();
        assert_eq!(s.locals_count(), 2);
    }

    #[test]
    fn inner_block_sees_outer_names() {
        let mut s = FunctionScope::with_params(&["p"]);
        s.open_block();
        assert_eq!(s.lookup("p"), Some(0));
        let t = s.temp();
        assert_eq!(t, 1);
        assert_eq!(s.declare("p"), 2);
        assert_eq!(s.lookup("p"), Some(2));
        s.close_block();
        assert_eq!(s.lookup("p"), Some(0));
    }

    #[test]
    fn outermost_block_stays_open() {
        let mut s = FunctionScope::new();
        s.declare("x");
        s.close_block();
        assert_eq!(s.lookup("x"), Some(0));
    }

    #[test]
    fn chain_classifies_bindings() {
        let mut chain = ScopeChain::new();
        chain.current().declare("outer");
        chain.push_function(FunctionScope::with_params(&["arg"]));
        chain.push_function(FunctionScope::new());
        assert_eq!(chain.lookup("outer"), Binding::Upvalue { level: 2, index: 0 });
        assert_eq!(chain.lookup("arg"), Binding::Upvalue { level: 1, index: 0 });
        assert_eq!(chain.lookup("print"), Binding::Global);
        chain.current().declare("arg");
        assert_eq!(chain.lookup("arg"), Binding::Local(0));
        assert_eq!(chain.pop_function().locals_count(), 1);
    }
}
