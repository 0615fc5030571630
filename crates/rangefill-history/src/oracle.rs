//! Branch identity, lineage, and the oracle trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use rangefill_core::Version;

use crate::error::{HistoryError, Result};

/// A 16-byte branch identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchId(pub [u8; 16]);

impl BranchId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a random branch ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// One link in a lineage: a branch and the version at which it began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPoint {
    pub branch: BranchId,
    pub since: Version,
}

/// The ancestry of a branch, oldest first; the last point is the branch
/// itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    pub points: Vec<BranchPoint>,
}

/// How two lineages relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// No common ancestor; the data sets are not comparable.
    Unrelated,
    /// Shared ancestry up to this version, divergent after it.
    Diverged(Version),
    /// One lineage is a prefix of the other (or they are equal); nothing
    /// bounds how far the peer may have followed the shared line.
    SameLine,
}

impl Lineage {
    /// The branch this lineage describes.
    pub fn branch(&self) -> Option<BranchId> {
        self.points.last().map(|p| p.branch)
    }

    /// Relate this lineage to another.
    ///
    /// The shared prefix of the two point lists is the common ancestry;
    /// the first divergent point on either side caps the version up to
    /// which the data sets can be assumed identical.
    pub fn relation(&self, other: &Lineage) -> Relation {
        let common = self
            .points
            .iter()
            .zip(&other.points)
            .take_while(|(a, b)| a == b)
            .count();
        if common == 0 {
            return Relation::Unrelated;
        }
        let next_ours = self.points.get(common).map(|p| p.since);
        let next_theirs = other.points.get(common).map(|p| p.since);
        match (next_ours, next_theirs) {
            (None, None) => Relation::SameLine,
            (Some(v), None) | (None, Some(v)) => Relation::Diverged(v),
            (Some(a), Some(b)) => Relation::Diverged(a.min(b)),
        }
    }
}

/// Read access to recorded branch lineage.
#[async_trait]
pub trait HistoryOracle: Send + Sync {
    /// Look up the lineage of `branch`.
    async fn lookup(&self, branch: &BranchId) -> Result<Lineage>;
}

/// In-memory lineage registry.
///
/// Registration methods model the external collaborator that creates
/// branches; the backfiller only reads.
pub struct MemoryHistory {
    branches: RwLock<HashMap<BranchId, Lineage>>,
}

impl MemoryHistory {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            branches: RwLock::new(HashMap::new()),
        }
    }

    /// Record a new root branch starting at version zero.
    pub fn register_root(&self) -> BranchId {
        let branch = BranchId::random();
        let lineage = Lineage {
            points: vec![BranchPoint {
                branch,
                since: Version::ZERO,
            }],
        };
        self.branches.write().unwrap().insert(branch, lineage);
        branch
    }

    /// Record a child of `parent` forked at `since`.
    pub fn fork(&self, parent: &BranchId, since: Version) -> Result<BranchId> {
        let mut branches = self.branches.write().unwrap();
        let mut lineage = branches
            .get(parent)
            .cloned()
            .ok_or_else(|| HistoryError::UnknownBranch(parent.to_hex()))?;
        let branch = BranchId::random();
        lineage.points.push(BranchPoint { branch, since });
        branches.insert(branch, lineage);
        Ok(branch)
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryOracle for MemoryHistory {
    async fn lookup(&self, branch: &BranchId) -> Result<Lineage> {
        self.branches
            .read()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| HistoryError::UnknownBranch(branch.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_branch_is_same_line() {
        let history = MemoryHistory::new();
        let root = history.register_root();
        let lineage = history.lookup(&root).await.unwrap();
        assert_eq!(lineage.relation(&lineage), Relation::SameLine);
    }

    #[tokio::test]
    async fn test_child_diverges_at_fork() {
        let history = MemoryHistory::new();
        let root = history.register_root();
        let child = history.fork(&root, Version(10)).unwrap();

        let root_lineage = history.lookup(&root).await.unwrap();
        let child_lineage = history.lookup(&child).await.unwrap();
        // Root and child share the line only up to the fork point.
        assert_eq!(
            root_lineage.relation(&child_lineage),
            Relation::Diverged(Version(10))
        );
    }

    #[tokio::test]
    async fn test_siblings_diverge_at_earlier_fork() {
        let history = MemoryHistory::new();
        let root = history.register_root();
        let a = history.fork(&root, Version(5)).unwrap();
        let b = history.fork(&root, Version(9)).unwrap();

        let la = history.lookup(&a).await.unwrap();
        let lb = history.lookup(&b).await.unwrap();
        assert_eq!(la.relation(&lb), Relation::Diverged(Version(5)));
        assert_eq!(lb.relation(&la), Relation::Diverged(Version(5)));
    }

    #[tokio::test]
    async fn test_unrelated_roots() {
        let history = MemoryHistory::new();
        let a = history.register_root();
        let b = history.register_root();
        let la = history.lookup(&a).await.unwrap();
        let lb = history.lookup(&b).await.unwrap();
        assert_eq!(la.relation(&lb), Relation::Unrelated);
    }

    #[tokio::test]
    async fn test_unknown_branch() {
        let history = MemoryHistory::new();
        assert!(history.lookup(&BranchId::random()).await.is_err());
    }
}
