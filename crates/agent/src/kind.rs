//! Profile kinds and the ordered set of enabled kinds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Runtime diagnostic category sampled from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// CPU profile captured over a duration.
    Cpu,
    /// Heap snapshot.
    Heap,
    /// Blocking events.
    Block,
    /// Lock contention.
    Mutex,
    /// Live tasks/threads.
    Goroutine,
    /// Thread creation sites.
    #[serde(rename = "threadcreate")]
    ThreadCreate,
    /// Past allocations.
    Allocs,
}

/// How a kind is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    /// Non-blocking point-in-time read.
    Point,
    /// Exclusive capture spanning the configured duration.
    OverDuration,
}

impl ProfileKind {
    /// Catalogue order, used when enabling every kind at once.
    pub const ALL: [Self; 7] = [
        Self::ThreadCreate,
        Self::Block,
        Self::Mutex,
        Self::Goroutine,
        Self::Heap,
        Self::Allocs,
        Self::Cpu,
    ];

    /// Wire name of the kind (`profile_type` and file extension).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Heap => "heap",
            Self::Block => "block",
            Self::Mutex => "mutex",
            Self::Goroutine => "goroutine",
            Self::ThreadCreate => "threadcreate",
            Self::Allocs => "allocs",
        }
    }

    /// Capture strategy lookup.
    #[must_use]
    pub const fn strategy(self) -> CaptureStrategy {
        match self {
            Self::Cpu => CaptureStrategy::OverDuration,
            Self::Heap
            | Self::Block
            | Self::Mutex
            | Self::Goroutine
            | Self::ThreadCreate
            | Self::Allocs => CaptureStrategy::Point,
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "heap" => Ok(Self::Heap),
            "block" => Ok(Self::Block),
            "mutex" => Ok(Self::Mutex),
            "goroutine" | "task" | "tasks" => Ok(Self::Goroutine),
            "threadcreate" | "thread_create" | "thread-create" => Ok(Self::ThreadCreate),
            "allocs" => Ok(Self::Allocs),
            other => Err(Error::unknown_profile_kind(other)),
        }
    }
}

/// Insertion-ordered set of enabled kinds. Iteration order is collection order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnabledKinds(Vec<ProfileKind>);

impl EnabledKinds {
    /// Empty set.
    #[must_use]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    /// Every kind in catalogue order.
    #[must_use]
    pub fn all() -> Self {
        Self(ProfileKind::ALL.to_vec())
    }

    /// Enable a kind. Re-enabling keeps its original position.
    pub fn insert(&mut self, kind: ProfileKind) {
        if !self.contains(kind) {
            self.0.push(kind);
        }
    }

    /// Disable a kind.
    pub fn remove(&mut self, kind: ProfileKind) {
        self.0.retain(|k| *k != kind);
    }

    /// Append every kind not yet enabled, in catalogue order.
    pub fn insert_all(&mut self) {
        for kind in ProfileKind::ALL {
            self.insert(kind);
        }
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    #[must_use]
    pub fn contains(&self, kind: ProfileKind) -> bool {
        self.0.contains(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Kinds in collection order.
    pub fn iter(&self) -> impl Iterator<Item = ProfileKind> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ProfileKind] {
        &self.0
    }
}

impl FromIterator<ProfileKind> for EnabledKinds {
    fn from_iter<I: IntoIterator<Item = ProfileKind>>(iter: I) -> Self {
        let mut kinds = Self::none();
        for kind in iter {
            kinds.insert(kind);
        }
        kinds
    }
}
