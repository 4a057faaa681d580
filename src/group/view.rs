//! Member addresses and membership view snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a group member.
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Serialize, Deserialize,
)]
pub struct Address(String);

impl Address {
    pub fn new(name: impl Into<String>) -> Self {
        Address(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(name: &str) -> Self {
        Address(name.into())
    }
}

/// An ordered snapshot of the currently reachable members. Views are never
/// patched in place: a membership change installs a whole new `View`.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct View {
    /// Monotonically increasing view number.
    id: u64,

    /// Members in view order.
    members: Vec<Address>,
}

impl View {
    pub fn new(id: u64, members: Vec<Address>) -> Self {
        View { id, members }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn index_of(&self, addr: &Address) -> Option<usize> {
        self.members.iter().position(|m| m == addr)
    }

    /// Picks the member right after `local` in view order, wrapping around.
    /// In a single-member view this is `local` itself. Returns `None` if
    /// `local` is not in the view.
    pub fn next_after(&self, local: &Address) -> Option<&Address> {
        let idx = self.index_of(local)?;
        self.members.get((idx + 1) % self.members.len())
    }

    /// Picks the `count` members following `local` in view order, wrapping
    /// around (so `local` itself is included once `count` reaches the view
    /// size). `count` is capped at the view size. Returns `None` if `local`
    /// is not in the view.
    pub fn following(
        &self,
        local: &Address,
        count: usize,
    ) -> Option<Vec<Address>> {
        let idx = self.index_of(local)?;
        let size = self.members.len();
        Some(
            (1..=count.min(size))
                .map(|i| self.members[(idx + i) % size].clone())
                .collect(),
        )
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] ({}) [", self.id, self.members.len())?;
        for (i, m) in self.members.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", m)?;
        }
        write!(f, "]")
    }
}
