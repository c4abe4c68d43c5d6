//! Update-mode lattice
//!
//! An [`UpdateMode`] describes how severe a deploy is for the running app.
//! Modes are totally ordered and fold together with [`UpdateMode::combine`],
//! so independent signals (code changed, resources changed) escalate to a
//! single action.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the device agent should apply a set of patches.
///
/// The declaration order is the severity order; the derived `Ord` relies on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateMode {
    /// Nothing to send
    #[default]
    NoChanges,
    /// Swap code in place, activity keeps running
    HotSwap,
    /// Apply changes and restart the current activity
    WarmSwap,
    /// Restart the whole process without reinstalling
    ColdSwap,
}

impl UpdateMode {
    /// All modes in severity order
    pub const ALL: [UpdateMode; 4] = [
        UpdateMode::NoChanges,
        UpdateMode::HotSwap,
        UpdateMode::WarmSwap,
        UpdateMode::ColdSwap,
    ];

    /// Stable wire identifier understood by the device agent.
    pub fn id(self) -> i32 {
        match self {
            UpdateMode::NoChanges => 0,
            UpdateMode::HotSwap => 1,
            UpdateMode::WarmSwap => 2,
            UpdateMode::ColdSwap => 3,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(UpdateMode::NoChanges),
            1 => Some(UpdateMode::HotSwap),
            2 => Some(UpdateMode::WarmSwap),
            3 => Some(UpdateMode::ColdSwap),
            _ => None,
        }
    }

    /// Return the more severe of the two modes.
    #[must_use]
    pub fn combine(self, other: UpdateMode) -> UpdateMode {
        self.max(other)
    }

    pub fn is_no_changes(self) -> bool {
        self == UpdateMode::NoChanges
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateMode::NoChanges => write!(f, "no changes"),
            UpdateMode::HotSwap => write!(f, "hot swap"),
            UpdateMode::WarmSwap => write!(f, "warm swap"),
            UpdateMode::ColdSwap => write!(f, "cold swap"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordinal(mode: UpdateMode) -> usize {
        UpdateMode::ALL.iter().position(|m| *m == mode).unwrap()
    }

    #[test]
    fn test_combine_is_max_by_ordinal() {
        for a in UpdateMode::ALL {
            for b in UpdateMode::ALL {
                let expected = UpdateMode::ALL[ordinal(a).max(ordinal(b))];
                assert_eq!(a.combine(b), expected, "{:?} + {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_combine_is_commutative_and_idempotent() {
        for a in UpdateMode::ALL {
            assert_eq!(a.combine(a), a);
            for b in UpdateMode::ALL {
                assert_eq!(a.combine(b), b.combine(a));
            }
        }
    }

    #[test]
    fn test_combine_is_associative() {
        for a in UpdateMode::ALL {
            for b in UpdateMode::ALL {
                for c in UpdateMode::ALL {
                    assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
                }
            }
        }
    }

    #[test]
    fn test_stable_ids() {
        assert_eq!(UpdateMode::NoChanges.id(), 0);
        assert_eq!(UpdateMode::HotSwap.id(), 1);
        assert_eq!(UpdateMode::WarmSwap.id(), 2);
        assert_eq!(UpdateMode::ColdSwap.id(), 3);
    }

    #[test]
    fn test_from_id() {
        for mode in UpdateMode::ALL {
            assert_eq!(UpdateMode::from_id(mode.id()), Some(mode));
        }
        assert_eq!(UpdateMode::from_id(4), None);
        assert_eq!(UpdateMode::from_id(-1), None);
    }

    #[test]
    fn test_resources_and_code_fold_to_warm() {
        let mode = UpdateMode::NoChanges
            .combine(UpdateMode::HotSwap)
            .combine(UpdateMode::WarmSwap);
        assert_eq!(mode, UpdateMode::WarmSwap);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&UpdateMode::WarmSwap).unwrap();
        assert_eq!(json, "\"WARM_SWAP\"");
        let mode: UpdateMode = serde_json::from_str("\"COLD_SWAP\"").unwrap();
        assert_eq!(mode, UpdateMode::ColdSwap);
    }
}
