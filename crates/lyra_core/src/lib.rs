//! Containers shared by the compiler and the runtime.

mod idset;
mod strmap;
mod trie;

pub use idset::IdSet;
pub use strmap::StrMap;
pub use trie::Trie;
