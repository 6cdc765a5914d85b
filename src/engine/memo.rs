// ---------------------------------------------------------------------------
// Single-slot memoization
// ---------------------------------------------------------------------------

/// One-entry memo: the parameters that produced a cached result, paired with
/// the result. A lookup hits only when the stored key equals the request
/// key; storing replaces the slot wholesale, so the key and value can never
/// be observed out of step.
///
/// Each memoized view owns one `Memo`, not an LRU: the viewer redraws the
/// *current* parameters many times and almost never revisits old ones.
#[derive(Debug, Clone)]
pub struct Memo<K, V> {
    slot: Option<(K, V)>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Memo { slot: None }
    }
}

impl<K: PartialEq, V> Memo<K, V> {
    pub fn new() -> Self {
        Memo { slot: None }
    }

    pub fn lookup(&self, key: &K) -> Option<&V> {
        match &self.slot {
            Some((k, v)) if k == key => Some(v),
            _ => None,
        }
    }

    /// The stored key, whether or not it matches any particular request.
    /// Used by views that classify *how much* of a request changed.
    pub fn stored_key(&self) -> Option<&K> {
        self.slot.as_ref().map(|(k, _)| k)
    }

    pub fn store(&mut self, key: K, value: V) -> &V {
        &self.slot.insert((key, value)).1
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_requires_exact_key() {
        let mut memo: Memo<(u64, u32), &'static str> = Memo::new();
        assert!(memo.lookup(&(1, 2)).is_none());
        memo.store((1, 2), "first");
        assert_eq!(memo.lookup(&(1, 2)), Some(&"first"));
        assert!(memo.lookup(&(1, 3)).is_none());
    }

    #[test]
    fn store_replaces_the_slot() {
        let mut memo: Memo<u64, u64> = Memo::new();
        memo.store(1, 10);
        memo.store(2, 20);
        assert!(memo.lookup(&1).is_none());
        assert_eq!(memo.lookup(&2), Some(&20));
        memo.invalidate();
        assert!(memo.lookup(&2).is_none());
    }
}
