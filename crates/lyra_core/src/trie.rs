//! Byte-wise prefix trie.
//!
//! Every runtime object keys its member dictionary with one of these: one
//! node per byte of the member name, values only at terminal nodes. Removal
//! and overwrite hand back the displaced value so the caller can release
//! the reference it held.

struct Node<V> {
    key: u8,
    value: Option<V>,
    children: Vec<Node<V>>,
}

impl<V> Node<V> {
    fn new(key: u8) -> Self {
        Self {
            key,
            value: None,
            children: Vec::new(),
        }
    }

    fn child(&self, key: u8) -> Option<&Node<V>> {
        self.children.iter().find(|c| c.key == key)
    }

    fn child_mut(&mut self, key: u8) -> Option<&mut Node<V>> {
        self.children.iter_mut().find(|c| c.key == key)
    }
}

pub struct Trie<V> {
    root: Node<V>,
    count: usize,
}

impl<V> Trie<V> {
    pub fn new() -> Self {
        Self {
            root: Node::new(0),
            count: 0,
        }
    }

    /// Inserts or overwrites, returning the displaced value if any.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let mut node = &mut self.root;
        for &b in key.as_bytes() {
            let i = match node.children.iter().position(|c| c.key == b) {
                Some(i) => i,
                None => {
                    node.children.push(Node::new(b));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[i];
        }
        let old = node.value.replace(value);
        if old.is_none() {
            self.count += 1;
        }
        old
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let mut node = &self.root;
        for &b in key.as_bytes() {
            node = node.child(b)?;
        }
        node.value.as_ref()
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let mut node = &mut self.root;
        for &b in key.as_bytes() {
            node = node.child_mut(b)?;
        }
        node.value.as_mut()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes a binding, pruning branches that no longer lead anywhere.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let out = Self::remove_below(&mut self.root, key.as_bytes());
        if out.is_some() {
            self.count -= 1;
        }
        out
    }

    fn remove_below(node: &mut Node<V>, path: &[u8]) -> Option<V> {
        match path.split_first() {
            None => node.value.take(),
            Some((&b, rest)) => {
                let i = node.children.iter().position(|c| c.key == b)?;
                let out = Self::remove_below(&mut node.children[i], rest)?;
                let child = &node.children[i];
                if child.value.is_none() && child.children.is_empty() {
                    node.children.swap_remove(i);
                }
                Some(out)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Visits every value. The collector marks members through this.
    pub fn values(&self, f: &mut impl FnMut(&V)) {
        Self::values_below(&self.root, f);
    }

    fn values_below(node: &Node<V>, f: &mut impl FnMut(&V)) {
        if let Some(v) = &node.value {
            f(v);
        }
        for child in &node.children {
            Self::values_below(child, f);
        }
    }

    /// Visits every binding with its reconstructed key.
    pub fn for_each(&self, f: &mut impl FnMut(&str, &V)) {
        let mut path = Vec::new();
        Self::for_each_below(&self.root, &mut path, f);
    }

    fn for_each_below(node: &Node<V>, path: &mut Vec<u8>, f: &mut impl FnMut(&str, &V)) {
        if let Some(v) = &node.value {
            if let Ok(key) = std::str::from_utf8(path) {
                f(key, v);
            }
        }
        for child in &node.children {
            path.push(child.key);
            Self::for_each_below(child, path, f);
            path.pop();
        }
    }

    /// Drains every value out of the trie.
    pub fn drain(&mut self, f: &mut impl FnMut(V)) {
        let root = std::mem::replace(&mut self.root, Node::new(0));
        self.count = 0;
        Self::drain_below(root, f);
    }

    fn drain_below(node: Node<V>, f: &mut impl FnMut(V)) {
        if let Some(v) = node.value {
            f(v);
        }
        for child in node.children {
            Self::drain_below(child, f);
        }
    }
}

impl<V> Default for Trie<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_distinct_keys() {
        let mut trie = Trie::new();
        trie.insert("op", 1);
        trie.insert("op_add_", 2);
        assert_eq!(trie.get("op"), Some(&1));
        assert_eq!(trie.get("op_add_"), Some(&2));
        assert_eq!(trie.get("op_"), None);
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn overwrite_returns_displaced() {
        let mut trie = Trie::new();
        assert_eq!(trie.insert("x", 7), None);
        assert_eq!(trie.insert("x", 8), Some(7));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn remove_keeps_shared_prefix_alive() {
        let mut trie = Trie::new();
        trie.insert("abc", 1);
        trie.insert("abd", 2);
        assert_eq!(trie.remove("abc"), Some(1));
        assert_eq!(trie.remove("abc"), None);
        assert_eq!(trie.get("abd"), Some(&2));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn empty_key_is_a_key() {
        let mut trie = Trie::new();
        trie.insert("", 9);
        assert_eq!(trie.get(""), Some(&9));
        assert_eq!(trie.remove(""), Some(9));
        assert!(trie.is_empty());
    }

    #[test]
    fn for_each_reconstructs_keys() {
        let mut trie = Trie::new();
        trie.insert("one", 1);
        trie.insert("two", 2);
        let mut seen = Vec::new();
        trie.for_each(&mut |k, v| seen.push((k.to_owned(), *v)));
        seen.sort();
        assert_eq!(seen, vec![("one".to_owned(), 1), ("two".to_owned(), 2)]);
    }

    #[test]
    fn drain_empties() {
        let mut trie = Trie::new();
        trie.insert("a", 1);
        trie.insert("b", 2);
        let mut total = 0;
        trie.drain(&mut |v| total += v);
        assert_eq!(total, 3);
        assert!(trie.is_empty());
        assert_eq!(trie.get("a"), None);
    }
}
