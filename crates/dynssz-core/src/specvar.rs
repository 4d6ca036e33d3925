//! Expression-variable generator.
//!
//! Runtime spec lookups are deduplicated into a header block of locals: each
//! distinct (expression, default) pair resolves once through the spec
//! dictionary and is reused everywhere the expression appears in the emitted
//! function. Variables are numbered in order of first use.

use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct SpecVarTable {
    vars: IndexMap<(String, u64), String>,
}

impl SpecVarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variable holding "resolve `expr` through the spec dictionary, falling
    /// back to `default` when the dictionary reports absence". Resolution
    /// errors propagate out of the emitted function.
    pub fn intern(&mut self, expr: &str, default: u64) -> String {
        if let Some(name) = self.vars.get(&(expr.to_string(), default)) {
            return name.clone();
        }
        let name = format!("spec_v{}", self.vars.len());
        self.vars.insert((expr.to_string(), default), name.clone());
        name
    }

    /// Whether any expression was interned. The assembler uses this to
    /// decide between a real dynamic variant and a thin wrapper.
    pub fn any_interned(&self) -> bool {
        !self.vars.is_empty()
    }

    /// Header lines declaring the interned variables, in first-use order.
    pub fn header_lines(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|((expr, default), name)| {
                format!(
                    "let {name}: u64 = match specs.resolve({expr:?})? {{ Some(v) => v, None => {default}u64 }};"
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_deduplicated() {
        let mut t = SpecVarTable::new();
        let a = t.intern("MAX_ATTESTATIONS", 128);
        let b = t.intern("MAX_ATTESTATIONS", 128);
        assert_eq!(a, b);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_distinct_defaults_get_distinct_vars() {
        let mut t = SpecVarTable::new();
        let a = t.intern("N", 4);
        let b = t.intern("N", 8);
        assert_ne!(a, b);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_numbering_follows_first_use() {
        let mut t = SpecVarTable::new();
        assert_eq!(t.intern("A", 1), "spec_v0");
        assert_eq!(t.intern("B", 2), "spec_v1");
        assert_eq!(t.intern("A", 1), "spec_v0");
    }

    #[test]
    fn test_header_line_shape() {
        let mut t = SpecVarTable::new();
        t.intern("MAX_X", 1024);
        let lines = t.header_lines();
        assert_eq!(
            lines,
            vec![
                "let spec_v0: u64 = match specs.resolve(\"MAX_X\")? { Some(v) => v, None => 1024u64 };"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_any_interned() {
        let mut t = SpecVarTable::new();
        assert!(!t.any_interned());
        t.intern("X", 0);
        assert!(t.any_interned());
    }
}
