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

//! Capability seam isolating the key core from the underlying
//! elliptic-curve, hashing and base58check machinery.

use zeroize::Zeroize;

use crate::useinfo::Network;

/// Magical version bytes for xpub: bitcoin mainnet public key
pub const VERSION_MAGIC_XPUB: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];
/// Magical version bytes for xprv: bitcoin mainnet private key
pub const VERSION_MAGIC_XPRV: [u8; 4] = [0x04, 0x88, 0xAD, 0xE4];
/// Magical version bytes for tpub: bitcoin testnet/regtest public key
pub const VERSION_MAGIC_TPUB: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];
/// Magical version bytes for tprv: bitcoin testnet/regtest private key
pub const VERSION_MAGIC_TPRV: [u8; 4] = [0x04, 0x35, 0x83, 0x94];

/// Returns the BIP32 version magic for the given network and key type.
pub const fn version_magic(network: Network, is_private: bool) -> [u8; 4] {
    match (network, is_private) {
        (Network::Mainnet, true) => VERSION_MAGIC_XPRV,
        (Network::Mainnet, false) => VERSION_MAGIC_XPUB,
        (Network::Testnet, true) => VERSION_MAGIC_TPRV,
        (Network::Testnet, false) => VERSION_MAGIC_TPUB,
    }
}

/// Resolves BIP32 version magic bytes into the network and key type they
/// encode; `None` for unknown magics.
pub fn resolve_version(magic: [u8; 4]) -> Option<(Network, bool)> {
    match magic {
        VERSION_MAGIC_XPRV => Some((Network::Mainnet, true)),
        VERSION_MAGIC_XPUB => Some((Network::Mainnet, false)),
        VERSION_MAGIC_TPRV => Some((Network::Testnet, true)),
        VERSION_MAGIC_TPUB => Some((Network::Testnet, false)),
        _ => None,
    }
}

/// Raw extended-key record exchanged with the crypto kernel.
///
/// The layout mirrors the 78-byte BIP32 serialized form, with the public
/// key always materialized and the full 20-byte parent HASH160 slot (only
/// the leftmost four bytes survive serialization).
#[derive(Clone, Eq)]
pub struct ExtKey {
    /// Number of derivation steps from the master key
    pub depth: u8,
    /// Packed child number of the key (hardened bit included)
    pub child_num: u32,
    /// Chain code parameterizing child derivation
    pub chain_code: [u8; 32],
    /// Private key material: `0x00` followed by the 32-byte scalar; all
    /// zero when the key is public-only
    pub priv_key: [u8; 33],
    /// SEC1-compressed public key
    pub pub_key: [u8; 33],
    /// HASH160 of the parent public key; only the leftmost four bytes are
    /// meaningful for keys reconstructed from serialized forms
    pub parent160: [u8; 20],
    /// BIP32 version magic defining network and key type
    pub version: [u8; 4],
}

impl ExtKey {
    /// Detects whether the key carries private material, from its version
    /// magic.
    #[inline]
    pub fn is_private(&self) -> bool {
        matches!(self.version, VERSION_MAGIC_XPRV | VERSION_MAGIC_TPRV)
    }

    /// Detects a master key (depth zero).
    #[inline]
    pub fn is_master(&self) -> bool { self.depth == 0 }

    /// Returns the network encoded in the version magic, or `None` for an
    /// unrecognized magic.
    #[inline]
    pub fn network(&self) -> Option<Network> {
        resolve_version(self.version).map(|(network, _)| network)
    }

    /// Returns the leftmost four bytes of the parent HASH160 slot.
    #[inline]
    pub fn parent_fingerprint(&self) -> [u8; 4] {
        [
            self.parent160[0],
            self.parent160[1],
            self.parent160[2],
            self.parent160[3],
        ]
    }
}

// Secret comparison must not leak positions; equality folds over every byte.
impl PartialEq for ExtKey {
    fn eq(&self, other: &Self) -> bool {
        let mut diff = (self.depth ^ other.depth)
            | (self.child_num ^ other.child_num).to_be_bytes().iter().fold(0, |acc, b| acc | b);
        for (a, b) in self.chain_code.iter().zip(&other.chain_code) {
            diff |= a ^ b;
        }
        for (a, b) in self.priv_key.iter().zip(&other.priv_key) {
            diff |= a ^ b;
        }
        for (a, b) in self.pub_key.iter().zip(&other.pub_key) {
            diff |= a ^ b;
        }
        for (a, b) in self.parent160.iter().zip(&other.parent160) {
            diff |= a ^ b;
        }
        for (a, b) in self.version.iter().zip(&other.version) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

impl Drop for ExtKey {
    fn drop(&mut self) {
        self.priv_key.zeroize();
        self.chain_code.zeroize();
    }
}

// Secret material never reaches debug output.
impl core::fmt::Debug for ExtKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExtKey")
            .field("depth", &self.depth)
            .field("child_num", &self.child_num)
            .field("chain_code", &"[REDACTED]")
            .field("priv_key", &"[REDACTED]")
            .field("pub_key", &self.pub_key)
            .field("parent160", &self.parent160)
            .field("version", &self.version)
            .finish()
    }
}

/// Errors reported by crypto kernel implementations
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error
)]
#[display(doc_comments)]
pub enum KernelError {
    /// seed entropy was rejected by the key derivation function
    InvalidSeed,

    /// invalid base58 encoding or checksum of an extended key
    InvalidBase58,

    /// extended key material is inconsistent or out of range
    InvalidKeyMaterial,

    /// child key derivation has failed
    Derivation,
}

/// Capabilities the key core requires from the underlying cryptographic
/// machinery.
///
/// Implementations must be stateless and thread-safe; every call is
/// synchronous and fallible through the return path. The production
/// implementation is [`crate::SecpKernel`].
pub trait CryptoKernel {
    /// Computes the BIP32 master extended key from seed entropy.
    fn master_from_seed(&self, seed: &[u8], network: Network) -> Result<ExtKey, KernelError>;

    /// Parses a base58check-serialized extended key.
    fn parse_base58(&self, s: &str) -> Result<ExtKey, KernelError>;

    /// Serializes an extended key into its base58check form, as a private
    /// key when `private` is set (which requires private material).
    fn serialize_base58(&self, key: &ExtKey, private: bool) -> Result<String, KernelError>;

    /// Derives the child key at the given packed child number.
    ///
    /// A private child (`want_private`) requires a private parent; hardened
    /// child numbers additionally require private material regardless of
    /// the wanted type.
    fn derive_child(
        &self,
        parent: &ExtKey,
        child_num: u32,
        want_private: bool,
    ) -> Result<ExtKey, KernelError>;

    /// Computes the SEC1-compressed public key of a private scalar given in
    /// the 33-byte `0x00`-prefixed form.
    fn public_from_private(&self, priv_key: &[u8; 33]) -> Result<[u8; 33], KernelError>;

    /// Computes RIPEMD160(SHA256(data)).
    fn hash160(&self, data: &[u8]) -> [u8; 20];

    /// Computes the fingerprint of an extended key: the leftmost four bytes
    /// of HASH160 of its public key.
    fn fingerprint(&self, key: &ExtKey) -> [u8; 4] {
        let hash = self.hash160(&key.pub_key);
        [hash[0], hash[1], hash[2], hash[3]]
    }
}
