use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    /// The enclosing named function literal, referenced from its own body.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// One lexical scope. A table without an `outer` is the global scope.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,
    num_definitions: usize,
    free_symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn new_enclosed(outer: SymbolTable) -> Self {
        SymbolTable { outer: Some(Box::new(outer)), ..SymbolTable::default() }
    }

    pub fn outer(&self) -> Option<&SymbolTable> {
        self.outer.as_deref()
    }

    /// Detach and return the enclosing table, if any.
    pub fn take_outer(&mut self) -> Option<SymbolTable> {
        self.outer.take().map(|outer| *outer)
    }

    pub fn num_definitions(&self) -> usize {
        self.num_definitions
    }

    /// Symbols captured from enclosing function scopes, in capture order.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.free_symbols
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_none() { SymbolScope::Global } else { SymbolScope::Local };
        let symbol = Symbol { name: name.to_string(), scope, index: self.num_definitions };
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: SymbolScope::Builtin, index };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol { name: name.to_string(), scope: SymbolScope::Function, index: 0 };
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: self.free_symbols.len(),
        };
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    /// Resolve a name, capturing it as a free variable when it lives in an
    /// enclosing function scope. Globals and built-ins are never captured.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }
        let symbol = self.outer.as_mut()?.resolve(name)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(symbol)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, scope: SymbolScope, index: usize) -> Symbol {
        Symbol { name: name.to_string(), scope, index }
    }

    #[test]
    fn define_counts_per_scope() {
        let mut global = SymbolTable::new();
        assert_eq!(global.define("a"), sym("a", SymbolScope::Global, 0));
        assert_eq!(global.define("b"), sym("b", SymbolScope::Global, 1));

        let mut first_local = SymbolTable::new_enclosed(global);
        assert_eq!(first_local.define("c"), sym("c", SymbolScope::Local, 0));
        assert_eq!(first_local.define("d"), sym("d", SymbolScope::Local, 1));

        let mut second_local = SymbolTable::new_enclosed(first_local);
        assert_eq!(second_local.define("e"), sym("e", SymbolScope::Local, 0));
        assert_eq!(second_local.define("f"), sym("f", SymbolScope::Local, 1));
    }

    #[test]
    fn resolve_global() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");
        assert_eq!(global.resolve("a"), Some(sym("a", SymbolScope::Global, 0)));
        assert_eq!(global.resolve("b"), Some(sym("b", SymbolScope::Global, 1)));
        assert_eq!(global.resolve("c"), None);
    }

    #[test]
    fn resolve_local_sees_globals_uncaptured() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");
        let mut local = SymbolTable::new_enclosed(global);
        local.define("c");
        local.define("d");

        let cases = [
            sym("a", SymbolScope::Global, 0),
            sym("b", SymbolScope::Global, 1),
            sym("c", SymbolScope::Local, 0),
            sym("d", SymbolScope::Local, 1),
        ];
        for expected in cases {
            assert_eq!(local.resolve(&expected.name), Some(expected.clone()));
        }
        assert!(local.free_symbols().is_empty());
    }

    #[test]
    fn resolve_builtins_from_any_depth() {
        let mut global = SymbolTable::new();
        let expected = [
            sym("a", SymbolScope::Builtin, 0),
            sym("c", SymbolScope::Builtin, 1),
            sym("e", SymbolScope::Builtin, 2),
            sym("f", SymbolScope::Builtin, 3),
        ];
        for s in &expected {
            global.define_builtin(s.index, &s.name);
        }
        let first = SymbolTable::new_enclosed(global.clone());
        let mut second = SymbolTable::new_enclosed(first);
        for s in &expected {
            assert_eq!(global.resolve(&s.name), Some(s.clone()));
            assert_eq!(second.resolve(&s.name), Some(s.clone()));
        }
        assert!(second.free_symbols().is_empty());
    }

    #[test]
    fn resolve_free_through_nested_scopes() {
        let mut global = SymbolTable::new();
        global.define("a");
        global.define("b");
        let mut first = SymbolTable::new_enclosed(global);
        first.define("c");
        first.define("d");
        let mut second = SymbolTable::new_enclosed(first);
        second.define("e");
        second.define("f");

        let cases = [
            sym("a", SymbolScope::Global, 0),
            sym("b", SymbolScope::Global, 1),
            sym("c", SymbolScope::Free, 0),
            sym("d", SymbolScope::Free, 1),
            sym("e", SymbolScope::Local, 0),
            sym("f", SymbolScope::Local, 1),
        ];
        for expected in cases {
            assert_eq!(second.resolve(&expected.name), Some(expected.clone()));
        }
        assert_eq!(
            second.free_symbols(),
            &[sym("c", SymbolScope::Local, 0), sym("d", SymbolScope::Local, 1)]
        );

        // A second lookup hits the captured symbol and does not capture twice.
        assert_eq!(second.resolve("c"), Some(sym("c", SymbolScope::Free, 0)));
        assert_eq!(second.free_symbols().len(), 2);
    }

    #[test]
    fn capture_propagates_through_intermediate_scopes() {
        let mut global = SymbolTable::new();
        global.define("g");
        let mut outer = SymbolTable::new_enclosed(global);
        outer.define("x");
        let middle = SymbolTable::new_enclosed(outer);
        let mut inner = SymbolTable::new_enclosed(middle);

        assert_eq!(inner.resolve("x"), Some(sym("x", SymbolScope::Free, 0)));
        // The middle scope had to capture `x` first for the inner one to see it.
        let middle = inner.outer().unwrap();
        assert_eq!(middle.free_symbols(), &[sym("x", SymbolScope::Local, 0)]);
        assert_eq!(inner.free_symbols(), &[sym("x", SymbolScope::Free, 0)]);
    }

    #[test]
    fn unresolvable_free_stays_undefined() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut first = SymbolTable::new_enclosed(global);
        first.define("c");
        let mut second = SymbolTable::new_enclosed(first);
        second.define("e");

        assert_eq!(second.resolve("a"), Some(sym("a", SymbolScope::Global, 0)));
        assert_eq!(second.resolve("c"), Some(sym("c", SymbolScope::Free, 0)));
        assert_eq!(second.resolve("e"), Some(sym("e", SymbolScope::Local, 0)));
        assert_eq!(second.resolve("b"), None);
        assert_eq!(second.resolve("d"), None);
    }

    #[test]
    fn define_and_resolve_function_name() {
        let mut global = SymbolTable::new();
        global.define_function_name("a");
        assert_eq!(global.resolve("a"), Some(sym("a", SymbolScope::Function, 0)));
    }

    #[test]
    fn define_shadows_function_name() {
        let mut global = SymbolTable::new();
        global.define_function_name("a");
        global.define("a");
        assert_eq!(global.resolve("a"), Some(sym("a", SymbolScope::Global, 0)));

        let mut local = SymbolTable::new_enclosed(SymbolTable::new());
        local.define_function_name("f");
        assert_eq!(local.define("f"), sym("f", SymbolScope::Local, 0));
        assert_eq!(local.resolve("f"), Some(sym("f", SymbolScope::Local, 0)));
    }

    #[test]
    fn take_outer_restores_enclosing_table() {
        let mut global = SymbolTable::new();
        global.define("a");
        let mut local = SymbolTable::new_enclosed(global);
        local.define("b");
        let mut restored = local.take_outer().unwrap();
        assert_eq!(restored.resolve("a"), Some(sym("a", SymbolScope::Global, 0)));
        assert_eq!(restored.resolve("b"), None);
    }
}
