// Wallet-level libraries for bitcoin protocol by LNP/BP Association
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// This software is distributed without any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

use core::fmt::{self, Display, Formatter};
use core::str::FromStr;

use crate::path::PathParseError;
use crate::HARDENED_INDEX_BOUNDARY;

/// child index {_0} exceeds the BIP32 boundary of 2^31
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error
)]
#[display(doc_comments)]
pub struct IndexOverflow(pub u32);

/// Index of a single derivation tree child; ensures that the inner value is
/// always < 2^31.
///
/// Whether the index is hardened is a property of the [`DerivationStep`]
/// carrying it, not of the index itself.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display, From
)]
#[display(inner)]
pub struct ChildIndex(
    #[from(u8)]
    #[from(u16)]
    u32,
);

impl ChildIndex {
    /// Constructs index from a raw `u32` value, checking the BIP32 boundary.
    pub fn new(index: u32) -> Result<Self, IndexOverflow> {
        if index >= HARDENED_INDEX_BOUNDARY {
            Err(IndexOverflow(index))
        } else {
            Ok(Self(index))
        }
    }

    /// Returns the index value, always within `0..`[`HARDENED_INDEX_BOUNDARY`].
    #[inline]
    pub fn index(self) -> u32 { self.0 }
}

impl From<ChildIndex> for u32 {
    #[inline]
    fn from(index: ChildIndex) -> Self { index.0 }
}

impl FromStr for ChildIndex {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let index =
            u32::from_str(s).map_err(|_| PathParseError::InvalidStep(s.to_owned()))?;
        Ok(ChildIndex::new(index)?)
    }
}

/// Specification of a child index inside a derivation step: either a
/// concrete index or the `*` wildcard placeholder.
///
/// Wildcards are template markers and must be substituted with a concrete
/// index before any derivation can take place.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, From
)]
pub enum ChildIndexSpec {
    /// Concrete child index
    #[from]
    #[from(u8)]
    #[from(u16)]
    #[display(inner)]
    Index(ChildIndex),

    /// Wildcard requiring substitution before use
    #[display("*")]
    Wildcard,
}

impl ChildIndexSpec {
    /// Returns the concrete index, or `None` for a wildcard.
    #[inline]
    pub fn index(self) -> Option<ChildIndex> {
        match self {
            ChildIndexSpec::Index(index) => Some(index),
            ChildIndexSpec::Wildcard => None,
        }
    }

    /// Detects whether the specification is the `*` wildcard.
    #[inline]
    pub fn is_wildcard(self) -> bool { matches!(self, ChildIndexSpec::Wildcard) }
}

/// Single step of a derivation path: a child index specification plus the
/// hardened flag.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct DerivationStep {
    /// Child index specification (concrete index or wildcard)
    pub spec: ChildIndexSpec,
    /// Whether the child is derived with the hardened procedure
    pub hardened: bool,
}

impl DerivationStep {
    /// Constructs a concrete step, checking the index boundary.
    pub fn index(index: u32, hardened: bool) -> Result<Self, IndexOverflow> {
        Ok(DerivationStep {
            spec: ChildIndexSpec::Index(ChildIndex::new(index)?),
            hardened,
        })
    }

    /// Constructs a wildcard step.
    #[inline]
    pub fn wildcard(hardened: bool) -> Self {
        DerivationStep {
            spec: ChildIndexSpec::Wildcard,
            hardened,
        }
    }

    /// Constructs a concrete step from a packed BIP32 child number, reading
    /// the hardened flag from the top bit.
    pub fn from_child_num(child_num: u32) -> Self {
        DerivationStep {
            spec: ChildIndexSpec::Index(ChildIndex(child_num & !HARDENED_INDEX_BOUNDARY)),
            hardened: child_num & HARDENED_INDEX_BOUNDARY != 0,
        }
    }

    /// Returns the packed BIP32 child number (`index | 0x8000_0000` when
    /// hardened).
    ///
    /// For a wildcard step the substitution index must be supplied;
    /// otherwise the function returns `None`.
    pub fn raw_value(&self, wildcard_child_num: Option<ChildIndex>) -> Option<u32> {
        let index = match self.spec {
            ChildIndexSpec::Index(index) => index,
            ChildIndexSpec::Wildcard => wildcard_child_num?,
        };
        let mut value = index.index();
        if self.hardened {
            value |= HARDENED_INDEX_BOUNDARY;
        }
        Some(value)
    }

    /// Returns the step with its wildcard (if any) substituted with the
    /// provided index, or `None` when the step is a wildcard and no
    /// substitution was supplied.
    pub fn resolved(&self, wildcard_child_num: Option<ChildIndex>) -> Option<DerivationStep> {
        let index = match self.spec {
            ChildIndexSpec::Index(index) => index,
            ChildIndexSpec::Wildcard => wildcard_child_num?,
        };
        Some(DerivationStep {
            spec: ChildIndexSpec::Index(index),
            hardened: self.hardened,
        })
    }

    /// Detects whether the step carries a wildcard.
    #[inline]
    pub fn is_wildcard(&self) -> bool { self.spec.is_wildcard() }
}

impl Display for DerivationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.spec, f)?;
        if self.hardened {
            f.write_str("'")?;
        }
        Ok(())
    }
}

impl FromStr for DerivationStep {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (body, hardened) = match s.strip_suffix(&['h', 'H', '\''][..]) {
            Some(body) => (body, true),
            None => (s, false),
        };
        if body.is_empty() {
            return Err(PathParseError::InvalidStep(s.to_owned()));
        }
        if body == "*" {
            return Ok(DerivationStep::wildcard(hardened));
        }
        let index = ChildIndex::from_str(body)
            .map_err(|_| PathParseError::InvalidStep(s.to_owned()))?;
        Ok(DerivationStep {
            spec: ChildIndexSpec::Index(index),
            hardened,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn index_boundary() {
        assert_eq!(ChildIndex::new(0).unwrap().index(), 0);
        assert_eq!(
            ChildIndex::new(HARDENED_INDEX_BOUNDARY - 1).unwrap().index(),
            HARDENED_INDEX_BOUNDARY - 1
        );
        assert_eq!(
            ChildIndex::new(HARDENED_INDEX_BOUNDARY),
            Err(IndexOverflow(HARDENED_INDEX_BOUNDARY))
        );
        assert_eq!(ChildIndex::new(u32::MAX), Err(IndexOverflow(u32::MAX)));
    }

    #[test]
    fn step_raw_value() {
        let normal = DerivationStep::index(44, false).unwrap();
        assert_eq!(normal.raw_value(None), Some(44));

        let hardened = DerivationStep::index(44, true).unwrap();
        assert_eq!(hardened.raw_value(None), Some(44 | HARDENED_INDEX_BOUNDARY));

        let wildcard = DerivationStep::wildcard(false);
        assert_eq!(wildcard.raw_value(None), None);
        assert_eq!(
            wildcard.raw_value(Some(ChildIndex::new(7).unwrap())),
            Some(7)
        );

        let hardened_wildcard = DerivationStep::wildcard(true);
        assert_eq!(
            hardened_wildcard.raw_value(Some(ChildIndex::new(7).unwrap())),
            Some(7 | HARDENED_INDEX_BOUNDARY)
        );
    }

    #[test]
    fn step_from_child_num() {
        let step = DerivationStep::from_child_num(48 | HARDENED_INDEX_BOUNDARY);
        assert!(step.hardened);
        assert_eq!(step.spec.index().unwrap().index(), 48);

        let step = DerivationStep::from_child_num(2);
        assert!(!step.hardened);
        assert_eq!(step.spec.index().unwrap().index(), 2);
    }

    #[test]
    fn step_display_from_str() {
        for (s, canonical) in [
            ("44'", "44'"),
            ("44h", "44'"),
            ("44H", "44'"),
            ("0", "0"),
            ("*", "*"),
            ("*'", "*'"),
            ("*h", "*'"),
        ] {
            let step = DerivationStep::from_str(s).unwrap();
            assert_eq!(step.to_string(), canonical);
        }

        assert!(DerivationStep::from_str("").is_err());
        assert!(DerivationStep::from_str("'").is_err());
        assert!(DerivationStep::from_str("x").is_err());
        assert!(DerivationStep::from_str("2147483648").is_err());
        assert!(DerivationStep::from_str("2147483647").is_ok());
    }

    #[test]
    fn wildcard_resolution() {
        let step = DerivationStep::wildcard(false);
        assert_eq!(step.resolved(None), None);
        let resolved = step.resolved(Some(ChildIndex::from(9u8))).unwrap();
        assert!(!resolved.is_wildcard());
        assert_eq!(resolved.to_string(), "9");
    }
}
