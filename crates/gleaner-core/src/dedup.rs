use std::collections::HashSet;

/// Identifiers already evaluated during the current run.
///
/// Not persisted: a new run starts empty and relies on the record log, not
/// this set, to keep accepted work from being duplicated.
#[derive(Debug, Default)]
pub struct SeenSet {
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the identifier was already present.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
