//! Variable keys: a symbol character plus an index, displayed as `x0`, `l12`, `c3`.

use std::{
    fmt,
    fmt::{Display, Formatter},
};

/// Unique identifier of an unknown variable.
///
/// Keys order by symbol first, then index. Every container in the crate iterates in this order,
/// which fixes the column layout of the linear system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    symbol: char,
    index: u64,
}

impl Key {
    pub const fn new(symbol: char, index: u64) -> Self {
        Key { symbol, index }
    }

    pub fn symbol(&self) -> char {
        self.symbol
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.symbol, self.index)
    }
}

/// Render a key list as `x0, x1` for error messages.
pub(crate) fn format_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(Key::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
