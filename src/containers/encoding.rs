use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Integer value of the null category.
pub const NULL_CATEGORY: i32 = -1;

/// An append-only bijection between interned strings and non-negative
/// integers, monotone in insertion order. The engine carries two of these
/// per project: one for categorical values, one for join keys.
///
/// The fast path is read-shared; only a first-time `lookup` takes the
/// write lock. Readers that need a stable mapping for the duration of a
/// transform call take a `snapshot`.
#[derive(Debug, Default)]
pub struct Encoding {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    strings: Vec<Arc<str>>,
    indices: HashMap<Arc<str>, i32>,
}

impl Encoding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let encoding = Self::new();
        for s in strings {
            encoding.lookup(s.as_ref());
        }
        encoding
    }

    /// Returns the integer for `s`, appending it if unseen. The empty
    /// string and "NULL" encode as the null category.
    pub fn lookup(&self, s: &str) -> i32 {
        if s.is_empty() || s == "NULL" {
            return NULL_CATEGORY;
        }

        if let Some(&ix) = self.inner.read().indices.get(s) {
            return ix;
        }

        let mut inner = self.inner.write();

        // Lost the race between the read and the write lock.
        if let Some(&ix) = inner.indices.get(s) {
            return ix;
        }

        let ix = inner.strings.len() as i32;
        let interned: Arc<str> = Arc::from(s);
        inner.strings.push(Arc::clone(&interned));
        inner.indices.insert(interned, ix);
        ix
    }

    /// Read-only probe; never appends.
    pub fn get(&self, s: &str) -> Option<i32> {
        self.inner.read().indices.get(s).copied()
    }

    pub fn at(&self, ix: i32) -> Option<Arc<str>> {
        if ix < 0 {
            return None;
        }
        self.inner.read().strings.get(ix as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A stable copy of the mapping in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<str>> {
        self.inner.read().strings.clone()
    }
}
