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

use minicbor::data::{Tag, Type};
use minicbor::{decode, encode, Decoder, Encoder};

use crate::cbor::CRYPTO_KEYPATH;
use crate::indexes::{ChildIndex, ChildIndexSpec, DerivationStep, IndexOverflow};
use crate::HARDENED_INDEX_BOUNDARY;

/// Errors during parsing of textual derivation path representation
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PathParseError {
    /// index value overflow.
    #[from]
    #[display(inner)]
    IndexOverflow(IndexOverflow),

    /// invalid derivation step `{0}`
    InvalidStep(String),

    /// invalid derivation path origin `{0}`
    InvalidOrigin(String),
}

/// Reference to the source a derivation path is rooted at: the fingerprint
/// of the origin key, a symbolic name, or nothing.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display, From
)]
pub enum PathOrigin {
    /// Origin reference is not present
    #[default]
    #[display("")]
    None,

    /// Origin referenced by the fingerprint of its key
    #[from]
    #[display("{0:08x}")]
    Fingerprint(u32),

    /// Origin referenced by a symbolic name
    #[from]
    #[display("@{0}")]
    Named(String),
}

impl PathOrigin {
    /// Returns the origin key fingerprint, if the origin has that form.
    #[inline]
    pub fn fingerprint(&self) -> Option<u32> {
        match self {
            PathOrigin::Fingerprint(fp) => Some(*fp),
            _ => None,
        }
    }

    /// Detects whether any origin reference is present.
    #[inline]
    pub fn is_some(&self) -> bool { self != &PathOrigin::None }
}

/// Ordered sequence of derivation steps together with the origin the
/// sequence is rooted at and an optional explicit depth of the final key.
///
/// The empty value (no steps, no origin, no depth) denotes an unknown or
/// absent path; encoders elide it from wire forms.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug)]
pub struct DerivationPath {
    /// Derivation steps, starting from the origin
    pub steps: Vec<DerivationStep>,
    /// Where the path is rooted
    pub origin: PathOrigin,
    /// Explicit depth of the key at the end of the path; when absent the
    /// effective depth equals the number of steps
    pub depth: Option<u8>,
}

impl DerivationPath {
    /// Constructs an empty path (the "unknown / none" value).
    #[inline]
    pub fn new() -> Self { Self::default() }

    /// Constructs a path from steps, origin and depth.
    pub fn with_origin(
        steps: Vec<DerivationStep>,
        origin: PathOrigin,
        depth: Option<u8>,
    ) -> Self {
        DerivationPath {
            steps,
            origin,
            depth,
        }
    }

    /// Detects the empty value denoting an absent path.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && !self.origin.is_some() && self.depth.is_none()
    }

    /// Detects whether the path addresses a master key: no steps, and no
    /// origin other than a fingerprint.
    #[inline]
    pub fn is_master(&self) -> bool {
        self.steps.is_empty() && !matches!(self.origin, PathOrigin::Named(_))
    }

    /// Detects whether any of the steps uses hardened derivation.
    #[inline]
    pub fn is_hardened(&self) -> bool { self.steps.iter().any(|step| step.hardened) }

    /// Detects whether any of the steps carries a wildcard.
    #[inline]
    pub fn has_wildcard(&self) -> bool { self.steps.iter().any(DerivationStep::is_wildcard) }

    /// Returns the explicit depth if set, or the number of steps otherwise.
    #[inline]
    pub fn effective_depth(&self) -> usize {
        self.depth.map(usize::from).unwrap_or(self.steps.len())
    }

    /// Returns the origin key fingerprint, if the origin has that form.
    #[inline]
    pub fn origin_fingerprint(&self) -> Option<u32> { self.origin.fingerprint() }

    /// Removes the first `count` steps, clearing the origin reference and
    /// the explicit depth of the remaining suffix.
    ///
    /// Returns `None` when the path is shorter than `count`.
    pub fn drop_first(&self, count: usize) -> Option<DerivationPath> {
        if self.steps.len() < count {
            return None;
        }
        Some(DerivationPath {
            steps: self.steps[count..].to_vec(),
            origin: PathOrigin::None,
            depth: None,
        })
    }
}

impl From<Vec<DerivationStep>> for DerivationPath {
    fn from(steps: Vec<DerivationStep>) -> Self {
        DerivationPath {
            steps,
            origin: PathOrigin::None,
            depth: None,
        }
    }
}

impl FromIterator<DerivationStep> for DerivationPath {
    fn from_iter<T: IntoIterator<Item = DerivationStep>>(iter: T) -> Self {
        Vec::from_iter(iter).into()
    }
}

impl Display for DerivationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.origin.is_some() {
            Display::fmt(&self.origin, f)?;
            if !self.steps.is_empty() {
                f.write_str("/")?;
            }
        }
        let mut first = true;
        for step in &self.steps {
            if !first {
                f.write_str("/")?;
            }
            Display::fmt(step, f)?;
            first = false;
        }
        Ok(())
    }
}

fn parse_origin(segment: &str) -> Result<Option<PathOrigin>, PathParseError> {
    if let Some(name) = segment.strip_prefix('@') {
        if name.is_empty() {
            return Err(PathParseError::InvalidOrigin(segment.to_owned()));
        }
        return Ok(Some(PathOrigin::Named(name.to_owned())));
    }
    if segment.len() == 8 && segment.chars().all(|c| c.is_ascii_hexdigit()) {
        let fp = u32::from_str_radix(segment, 16)
            .expect("8-character hexadecimal string fits into u32");
        return Ok(Some(PathOrigin::Fingerprint(fp)));
    }
    Ok(None)
}

impl FromStr for DerivationPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(DerivationPath::new());
        }
        let mut segments = s.split('/').peekable();
        let first = segments
            .peek()
            .expect("split always returns at least one element");
        let origin = match parse_origin(first)? {
            Some(origin) => {
                segments.next();
                origin
            }
            None => PathOrigin::None,
        };
        let steps = segments
            .map(DerivationStep::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DerivationPath {
            steps,
            origin,
            depth: None,
        })
    }
}

// The wire form is the tag-304 map `{1: [value, hardened, ...], 2?: origin
// fingerprint, 3?: depth}`. Each step flattens into a value/hardened pair;
// a wildcard puts an empty array in the value slot. Named origins have no
// wire representation and are dropped on encoding.

impl<C> encode::Encode<C> for DerivationPath {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.tag(Tag::new(CRYPTO_KEYPATH))?;
        let mut len = 1u64;
        if self.origin_fingerprint().is_some() {
            len += 1;
        }
        if self.depth.is_some() {
            len += 1;
        }
        e.map(len)?;
        e.u8(1)?.array(self.steps.len() as u64 * 2)?;
        for step in &self.steps {
            match step.spec {
                ChildIndexSpec::Index(index) => e.u32(index.index())?,
                ChildIndexSpec::Wildcard => e.array(0)?,
            };
            e.bool(step.hardened)?;
        }
        if let Some(fp) = self.origin_fingerprint() {
            e.u8(2)?.u32(fp)?;
        }
        if let Some(depth) = self.depth {
            e.u8(3)?.u8(depth)?;
        }
        Ok(())
    }
}

fn decode_steps(d: &mut Decoder) -> Result<Vec<DerivationStep>, decode::Error> {
    let len = d
        .array()?
        .ok_or_else(|| decode::Error::message("indefinite-length step array"))?;
    if len % 2 != 0 {
        return Err(decode::Error::message(
            "step array must hold value/hardened pairs",
        ));
    }
    let mut steps = Vec::with_capacity(len as usize / 2);
    for _ in 0..len / 2 {
        let spec = match d.datatype()? {
            Type::Array => {
                if d.array()? != Some(0) {
                    return Err(decode::Error::message("malformed wildcard step"));
                }
                ChildIndexSpec::Wildcard
            }
            _ => {
                let value = d.u32()?;
                if value >= HARDENED_INDEX_BOUNDARY {
                    return Err(decode::Error::message("step index exceeds 2^31"));
                }
                ChildIndexSpec::Index(
                    ChildIndex::new(value).expect("value checked against the boundary"),
                )
            }
        };
        let hardened = d.bool()?;
        steps.push(DerivationStep { spec, hardened });
    }
    Ok(steps)
}

impl<'b, C> decode::Decode<'b, C> for DerivationPath {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
        if d.tag()? != Tag::new(CRYPTO_KEYPATH) {
            return Err(decode::Error::message("wrong derivation path tag"));
        }
        let len = d
            .map()?
            .ok_or_else(|| decode::Error::message("indefinite-length map"))?;
        let mut steps = None;
        let mut origin = PathOrigin::None;
        let mut depth = None;
        for _ in 0..len {
            match d.u32()? {
                1 => steps = Some(decode_steps(d)?),
                2 => origin = PathOrigin::Fingerprint(d.u32()?),
                3 => {
                    depth = Some(
                        u8::try_from(d.u32()?)
                            .map_err(|_| decode::Error::message("depth exceeds 255"))?,
                    )
                }
                _ => return Err(decode::Error::message("unknown derivation path map key")),
            }
        }
        let steps =
            steps.ok_or_else(|| decode::Error::message("derivation path without steps"))?;
        if let Some(depth) = depth {
            if usize::from(depth) < steps.len() {
                return Err(decode::Error::message("depth smaller than the step count"));
            }
        }
        Ok(DerivationPath {
            steps,
            origin,
            depth,
        })
    }
}
