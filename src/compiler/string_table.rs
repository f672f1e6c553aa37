use indexmap::IndexSet;

/// Constant pool of a template under construction. Equal strings share a slot.
#[derive(Debug, Default, Clone)]
pub struct StringTable {
    arena: IndexSet<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, s: &str) -> usize {
        if let Some(index) = self.arena.get_index_of(s) {
            return index;
        }
        self.arena.insert_full(s.to_string()).0
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn into_strings(self) -> Vec<String> {
        self.arena.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup() {
        let mut table = StringTable::new();
        assert_eq!(table.allocate("a"), 0);
        assert_eq!(table.allocate("b"), 1);
        assert_eq!(table.allocate("a"), 0);
        assert_eq!(table.len(), 2);
        assert_eq!(table.into_strings(), vec!["a".to_string(), "b".to_string()]);
    }
}
