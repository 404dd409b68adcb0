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

//! Hierarchical deterministic key core for bitcoin wallets.
//!
//! The crate represents, derives, encodes and decodes BIP32 extended keys
//! while preserving their full provenance: origin fingerprint, depth,
//! derivation path from the origin and child derivation templates. Keys and
//! the account-level descriptor bundles built from them serialize into
//! tag-qualified CBOR envelopes suitable for uniform-resource string
//! transport.
//!
//! Elliptic-curve arithmetic, HASH160 and base58check are reached through
//! the [`CryptoKernel`] capability seam; [`SecpKernel`] is the production
//! implementation backed by libsecp256k1.

// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    missing_docs
)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[macro_use]
extern crate amplify;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod account;
pub mod cbor;
mod hdkey;
mod indexes;
mod kernel;
mod path;
mod secp;
mod useinfo;

pub use account::{AccountDescriptorBundle, AccountError, OutputDescriptor, OutputType};
pub use hdkey::{DeriveOptions, HdKey, HdKeyError, KeyType, PrivateKeyProvider};
pub use indexes::{ChildIndex, ChildIndexSpec, DerivationStep, IndexOverflow};
pub use kernel::{
    CryptoKernel, ExtKey, KernelError, VERSION_MAGIC_TPRV, VERSION_MAGIC_TPUB, VERSION_MAGIC_XPRV,
    VERSION_MAGIC_XPUB,
};
pub use path::{DerivationPath, PathOrigin, PathParseError};
pub use secp::SecpKernel;
pub use useinfo::{Asset, Network, UseInfo};

/// Constant determining BIP32 boundary for u32 values after which index
/// is treated as hardened
pub const HARDENED_INDEX_BOUNDARY: u32 = 1 << 31;
