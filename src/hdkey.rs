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

use core::fmt;

use zeroize::Zeroize;

use crate::indexes::{ChildIndex, DerivationStep};
use crate::kernel::{version_magic, CryptoKernel, ExtKey};
use crate::path::{DerivationPath, PathOrigin};
use crate::useinfo::{Asset, UseInfo};

/// Whether a key carries private or public material.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display
)]
pub enum KeyType {
    /// Extended private key
    #[display("private")]
    Private,

    /// Extended public key
    #[display("public")]
    Public,
}

impl KeyType {
    /// Detects the private key type.
    #[inline]
    pub fn is_private(self) -> bool { self == KeyType::Private }
}

/// Errors produced by key construction and derivation operations
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error
)]
#[display(doc_comments)]
pub enum HdKeyError {
    /// seed entropy was rejected by the crypto kernel
    InvalidSeed,

    /// invalid base58 encoding or checksum of an extended key
    InvalidBase58,

    /// a private key cannot be derived from a public key
    CannotDerivePrivateFromPublic,

    /// a hardened child cannot be derived from a public key without a
    /// private key provider
    CannotDeriveHardenedFromPublic,

    /// the key carries no chain code and cannot act as a derivation parent
    CannotDeriveFromNonDerivable,

    /// the derivation step carries a wildcard without a substitution index
    CannotDeriveInspecificStep,

    /// the derivation path is too short to be rebased onto the key
    InvalidDepth,

    /// the crypto kernel failed to derive a child for an otherwise valid
    /// input
    UnknownDerivationError,

    /// invalid structure of a serialized key
    InvalidFormat,
}

/// Capability producing the private counterpart of a public key, injected
/// into [`HdKey::derive_path_with`] for hardened derivation from public
/// keys.
pub type PrivateKeyProvider<'a> = &'a dyn Fn(&HdKey) -> Option<HdKey>;

/// Options of the path derivation procedure [`HdKey::derive_path_with`].
pub struct DeriveOptions<'a> {
    /// Key type of the derived key; the parent key type when absent
    pub key_type: Option<KeyType>,
    /// Whether the derived key keeps its chain code and may act as a
    /// derivation parent itself
    pub derivable: bool,
    /// Substitution index for wildcard steps met along the path
    pub wildcard_child_num: Option<ChildIndex>,
    /// Capability recovering private material when hardened steps are
    /// derived from a public key
    pub private_key_provider: Option<PrivateKeyProvider<'a>>,
    /// Child derivation template attached to the derived key
    pub children: Option<DerivationPath>,
}

impl Default for DeriveOptions<'_> {
    fn default() -> Self {
        DeriveOptions {
            key_type: None,
            derivable: true,
            wildcard_child_num: None,
            private_key_provider: None,
            children: None,
        }
    }
}

/// BIP32 extended key with full provenance information.
///
/// Keys are immutable values: every constructor and derivation produces a
/// new key. Elliptic-curve arithmetic, HASH160 and base58check are
/// performed by the [`CryptoKernel`] passed into the operations that need
/// them. Private material is zeroed on drop and compared in constant time.
#[derive(Clone, Eq)]
pub struct HdKey {
    is_master: bool,
    key_type: KeyType,
    key_data: [u8; 33],
    chain_code: Option<[u8; 32]>,
    use_info: UseInfo,
    parent: DerivationPath,
    children: DerivationPath,
    parent_fingerprint: Option<u32>,
}

impl HdKey {
    pub(crate) fn from_parts(
        is_master: bool,
        key_type: KeyType,
        key_data: [u8; 33],
        chain_code: Option<[u8; 32]>,
        use_info: UseInfo,
        parent: DerivationPath,
        children: DerivationPath,
        parent_fingerprint: Option<u32>,
    ) -> HdKey {
        HdKey {
            is_master,
            key_type,
            key_data,
            chain_code,
            use_info,
            parent,
            children,
            parent_fingerprint,
        }
    }

    /// Computes the master key of the given network from BIP39 seed
    /// entropy.
    ///
    /// The resulting key is private, carries depth zero and an origin path
    /// rooted at its own fingerprint. Fails with
    /// [`HdKeyError::InvalidSeed`] when the kernel rejects the entropy
    /// (a rare event; the caller is expected to retry with fresh entropy).
    pub fn from_seed(
        kernel: &impl CryptoKernel,
        seed: &[u8],
        use_info: UseInfo,
    ) -> Result<HdKey, HdKeyError> {
        let ext = kernel
            .master_from_seed(seed, use_info.network)
            .map_err(|_| HdKeyError::InvalidSeed)?;
        let fingerprint = u32::from_be_bytes(kernel.fingerprint(&ext));
        Ok(HdKey {
            is_master: true,
            key_type: KeyType::Private,
            key_data: ext.priv_key,
            chain_code: Some(ext.chain_code),
            use_info,
            parent: DerivationPath::with_origin(
                vec![],
                PathOrigin::Fingerprint(fingerprint),
                Some(0),
            ),
            children: DerivationPath::new(),
            parent_fingerprint: None,
        })
    }

    /// Parses a base58check-serialized extended key, synthesizing its
    /// provenance from the serialized fields.
    pub fn from_base58(kernel: &impl CryptoKernel, s: &str) -> Result<HdKey, HdKeyError> {
        HdKey::from_base58_with(kernel, s, None, None, None, None)
    }

    /// Parses a base58check-serialized extended key with explicit
    /// provenance.
    ///
    /// A caller-supplied `parent` path is authoritative and stored
    /// verbatim; when absent, a one-step path is synthesized from the
    /// serialized child number, rooted at `override_origin_fingerprint` or
    /// the fingerprint of the parsed key itself. Callers must therefore
    /// provide a *complete* path or rely on the synthesis.
    pub fn from_base58_with(
        kernel: &impl CryptoKernel,
        s: &str,
        use_info: Option<UseInfo>,
        parent: Option<DerivationPath>,
        children: Option<DerivationPath>,
        override_origin_fingerprint: Option<u32>,
    ) -> Result<HdKey, HdKeyError> {
        let ext = kernel
            .parse_base58(s)
            .map_err(|_| HdKeyError::InvalidBase58)?;
        HdKey::from_ext_parts(
            kernel,
            ext,
            use_info,
            parent,
            children,
            override_origin_fingerprint,
        )
    }

    /// Constructs a key from raw extended-key material.
    pub fn from_ext_key(
        kernel: &impl CryptoKernel,
        key: ExtKey,
        use_info: Option<UseInfo>,
        parent: Option<DerivationPath>,
        children: Option<DerivationPath>,
    ) -> Result<HdKey, HdKeyError> {
        HdKey::from_ext_parts(kernel, key, use_info, parent, children, None)
    }

    fn from_ext_parts(
        kernel: &impl CryptoKernel,
        ext: ExtKey,
        use_info: Option<UseInfo>,
        parent: Option<DerivationPath>,
        children: Option<DerivationPath>,
        override_origin_fingerprint: Option<u32>,
    ) -> Result<HdKey, HdKeyError> {
        let network = ext.network().ok_or(HdKeyError::InvalidFormat)?;
        let use_info = use_info.unwrap_or(UseInfo {
            asset: Asset::Btc,
            network,
        });
        // A master key must be private; depth-0 public keys are plain keys
        // with an empty path.
        let is_master = ext.is_private()
            && match &parent {
                Some(path) => path.is_master(),
                None => ext.is_master(),
            };
        let key_type = if ext.is_private() {
            KeyType::Private
        } else {
            KeyType::Public
        };
        let key_data = if ext.is_private() {
            ext.priv_key
        } else {
            ext.pub_key
        };
        let key_fingerprint = u32::from_be_bytes(kernel.fingerprint(&ext));
        let parent = parent.unwrap_or_else(|| {
            let steps = if ext.child_num == 0 {
                vec![]
            } else {
                vec![DerivationStep::from_child_num(ext.child_num)]
            };
            DerivationPath::with_origin(
                steps,
                PathOrigin::Fingerprint(
                    override_origin_fingerprint.unwrap_or(key_fingerprint),
                ),
                Some(ext.depth),
            )
        });
        let parent_fingerprint = if is_master {
            None
        } else {
            let fingerprint = u32::from_be_bytes(ext.parent_fingerprint());
            (fingerprint != 0).then_some(fingerprint)
        };
        Ok(HdKey {
            is_master,
            key_type,
            key_data,
            chain_code: Some(ext.chain_code),
            use_info,
            parent,
            children: children.unwrap_or_default(),
            parent_fingerprint,
        })
    }

    /// Projects the key to the requested key type, optionally clearing its
    /// chain code and replacing provenance paths.
    ///
    /// Projecting a public key to private fails with
    /// [`HdKeyError::CannotDerivePrivateFromPublic`]. Absent `parent` and
    /// `children` are copied from the source key.
    pub fn with_key_type(
        &self,
        kernel: &impl CryptoKernel,
        key_type: KeyType,
        derivable: bool,
        parent: Option<DerivationPath>,
        children: Option<DerivationPath>,
    ) -> Result<HdKey, HdKeyError> {
        if key_type.is_private() && !self.is_private() {
            return Err(HdKeyError::CannotDerivePrivateFromPublic);
        }
        let key_data = if self.key_type == key_type {
            self.key_data
        } else {
            kernel
                .public_from_private(&self.key_data)
                .map_err(|_| HdKeyError::UnknownDerivationError)?
        };
        Ok(HdKey {
            is_master: self.is_master && key_type.is_private(),
            key_type,
            key_data,
            chain_code: if derivable { self.chain_code } else { None },
            use_info: self.use_info,
            parent: parent.unwrap_or_else(|| self.parent.clone()),
            children: children.unwrap_or_else(|| self.children.clone()),
            parent_fingerprint: self.parent_fingerprint,
        })
    }

    /// Derives the child key one step down the tree.
    ///
    /// Wildcard steps require a substitution index. The child records the
    /// appended provenance path, the incremented depth and the fingerprint
    /// of this key as its parent fingerprint.
    pub fn derive_step(
        &self,
        kernel: &impl CryptoKernel,
        step: DerivationStep,
        key_type: Option<KeyType>,
        wildcard_child_num: Option<ChildIndex>,
    ) -> Result<HdKey, HdKeyError> {
        let derived_type = key_type.unwrap_or(self.key_type);
        if derived_type.is_private() && !self.is_private() {
            return Err(HdKeyError::CannotDerivePrivateFromPublic);
        }
        if !self.is_derivable() {
            return Err(HdKeyError::CannotDeriveFromNonDerivable);
        }
        let resolved = step
            .resolved(wildcard_child_num)
            .ok_or(HdKeyError::CannotDeriveInspecificStep)?;
        if resolved.hardened && !self.is_private() {
            return Err(HdKeyError::CannotDeriveHardenedFromPublic);
        }
        let child_num = resolved
            .raw_value(None)
            .expect("resolved step is always concrete");

        let parent_ext = self.to_ext_key(kernel)?;
        let child_ext = kernel
            .derive_child(&parent_ext, child_num, self.is_private())
            .map_err(|_| HdKeyError::UnknownDerivationError)?;
        let key_fingerprint = u32::from_be_bytes(kernel.fingerprint(&parent_ext));

        let mut steps = self.parent.steps.clone();
        steps.push(resolved);
        // When the parent path is rootless and stepless this key itself is
        // the origin.
        let origin = match &self.parent.origin {
            PathOrigin::None if self.parent.steps.is_empty() => {
                PathOrigin::Fingerprint(key_fingerprint)
            }
            origin => origin.clone(),
        };
        let depth = self
            .parent
            .depth
            .map(|depth| depth.saturating_add(1))
            .unwrap_or(1);

        let child = HdKey {
            is_master: false,
            key_type: if child_ext.is_private() {
                KeyType::Private
            } else {
                KeyType::Public
            },
            key_data: if child_ext.is_private() {
                child_ext.priv_key
            } else {
                child_ext.pub_key
            },
            chain_code: Some(child_ext.chain_code),
            use_info: self.use_info,
            parent: DerivationPath::with_origin(steps, origin, Some(depth)),
            children: DerivationPath::new(),
            parent_fingerprint: Some(key_fingerprint),
        };
        if child.key_type == derived_type {
            Ok(child)
        } else {
            child.with_key_type(kernel, derived_type, true, None, None)
        }
    }

    /// Derives a key along a whole path with default options: same key
    /// type, derivable result, no wildcard substitution.
    pub fn derive_path(
        &self,
        kernel: &impl CryptoKernel,
        path: &DerivationPath,
    ) -> Result<HdKey, HdKeyError> {
        self.derive_path_with(kernel, path, &DeriveOptions::default())
    }

    /// Derives a key along a whole path.
    ///
    /// A path carrying an origin is rebased onto this key by dropping its
    /// first `effective_depth` steps ([`HdKeyError::InvalidDepth`] when the
    /// path is shorter than that). Hardened steps requested of a public key
    /// are served by the injected private-key provider, or fail with
    /// [`HdKeyError::CannotDeriveHardenedFromPublic`]. Zero-step paths are
    /// legal and act as identity plus retyping.
    pub fn derive_path_with(
        &self,
        kernel: &impl CryptoKernel,
        path: &DerivationPath,
        options: &DeriveOptions,
    ) -> Result<HdKey, HdKeyError> {
        let rebased;
        let effective = if path.origin.is_some() {
            rebased = path
                .drop_first(self.parent.effective_depth())
                .ok_or(HdKeyError::InvalidDepth)?;
            &rebased
        } else {
            path
        };
        let derived_type = options.key_type.unwrap_or(self.key_type);

        let mut key = self.clone();
        if !self.is_private() && effective.is_hardened() {
            let provider = options
                .private_key_provider
                .ok_or(HdKeyError::CannotDeriveHardenedFromPublic)?;
            key = provider(self)
                .filter(HdKey::is_private)
                .ok_or(HdKeyError::CannotDeriveHardenedFromPublic)?;
        }
        for step in &effective.steps {
            key = key.derive_step(kernel, *step, None, options.wildcard_child_num)?;
        }
        key.with_key_type(
            kernel,
            derived_type,
            options.derivable,
            None,
            options.children.clone(),
        )
    }

    /// Returns the public projection of the key.
    pub fn public(&self, kernel: &impl CryptoKernel) -> HdKey {
        self.with_key_type(kernel, KeyType::Public, self.is_derivable(), None, None)
            .expect("public projection of a structurally valid key")
    }

    /// Detects whether the key was derived directly from the seed.
    #[inline]
    pub fn is_master(&self) -> bool { self.is_master }

    /// Returns the key type.
    #[inline]
    pub fn key_type(&self) -> KeyType { self.key_type }

    /// Returns the 33-byte key material: `0x00` followed by the scalar for
    /// private keys, the SEC1-compressed point for public keys.
    #[inline]
    pub fn key_data(&self) -> &[u8; 33] { &self.key_data }

    /// Returns the chain code, absent for non-derivable keys.
    #[inline]
    pub fn chain_code(&self) -> Option<&[u8; 32]> { self.chain_code.as_ref() }

    /// Returns the asset and network the key is intended for.
    #[inline]
    pub fn use_info(&self) -> &UseInfo { &self.use_info }

    /// Returns the provenance path of the key from its origin source.
    #[inline]
    pub fn parent(&self) -> &DerivationPath { &self.parent }

    /// Returns the template path of intended descendants, possibly holding
    /// wildcards.
    #[inline]
    pub fn children(&self) -> &DerivationPath { &self.children }

    /// Returns the leftmost four bytes of the parent key HASH160, absent
    /// for master keys.
    #[inline]
    pub fn parent_fingerprint(&self) -> Option<u32> { self.parent_fingerprint }

    /// Detects whether the key carries private material.
    #[inline]
    pub fn is_private(&self) -> bool { self.key_type.is_private() }

    /// Detects whether the key may act as a derivation parent (has a chain
    /// code).
    #[inline]
    pub fn is_derivable(&self) -> bool { self.chain_code.is_some() }

    /// Detects whether using the children template requires a wildcard
    /// substitution index.
    #[inline]
    pub fn requires_wildcard_child_num(&self) -> bool { self.children.has_wildcard() }

    /// Returns the origin fingerprint propagated through the provenance
    /// path.
    #[inline]
    pub fn origin_fingerprint(&self) -> Option<u32> { self.parent.origin_fingerprint() }

    /// Computes the key fingerprint: the leftmost four bytes of HASH160 of
    /// the public key.
    pub fn key_fingerprint(&self, kernel: &impl CryptoKernel) -> Result<u32, HdKeyError> {
        Ok(u32::from_be_bytes(self.key_fingerprint_data(kernel)?))
    }

    /// Computes the key fingerprint as raw bytes.
    pub fn key_fingerprint_data(
        &self,
        kernel: &impl CryptoKernel,
    ) -> Result<[u8; 4], HdKeyError> {
        let ext = self.to_ext_key(kernel)?;
        Ok(kernel.fingerprint(&ext))
    }

    /// Returns the SEC1-compressed public key point.
    pub fn ec_public_key(&self, kernel: &impl CryptoKernel) -> [u8; 33] {
        match self.key_type {
            KeyType::Public => self.key_data,
            KeyType::Private => kernel
                .public_from_private(&self.key_data)
                .expect("key material validated on construction"),
        }
    }

    /// Returns the raw 32-byte private scalar, or `None` for public keys.
    pub fn ec_private_key(&self) -> Option<[u8; 32]> {
        if !self.is_private() {
            return None;
        }
        let mut scalar = [0u8; 32];
        scalar.copy_from_slice(&self.key_data[1..]);
        Some(scalar)
    }

    /// Reconstitutes the kernel-level extended key record.
    ///
    /// Depth comes from the effective depth of the provenance path, the
    /// child number from its last step, the version magic from the key type
    /// and network; the public key is recomputed from the private scalar
    /// when needed. A missing chain code reconstitutes as zero bytes.
    pub fn to_ext_key(&self, kernel: &impl CryptoKernel) -> Result<ExtKey, HdKeyError> {
        let depth = u8::try_from(self.parent.effective_depth())
            .map_err(|_| HdKeyError::InvalidDepth)?;
        let child_num = match self.parent.steps.last() {
            Some(step) => step
                .raw_value(None)
                .ok_or(HdKeyError::CannotDeriveInspecificStep)?,
            None => 0,
        };
        let (priv_key, pub_key) = match self.key_type {
            KeyType::Private => {
                let pub_key = kernel
                    .public_from_private(&self.key_data)
                    .map_err(|_| HdKeyError::UnknownDerivationError)?;
                (self.key_data, pub_key)
            }
            KeyType::Public => ([0u8; 33], self.key_data),
        };
        let mut parent160 = [0u8; 20];
        if let Some(fingerprint) = self.parent_fingerprint {
            parent160[..4].copy_from_slice(&fingerprint.to_be_bytes());
        }
        Ok(ExtKey {
            depth,
            child_num,
            chain_code: self.chain_code.unwrap_or([0u8; 32]),
            priv_key,
            pub_key,
            parent160,
            version: version_magic(self.use_info.network, self.key_type.is_private()),
        })
    }

    /// Serializes the key in its base58check private form, or `None` for
    /// public keys.
    pub fn base58_private(&self, kernel: &impl CryptoKernel) -> Option<String> {
        if !self.is_private() {
            return None;
        }
        let ext = self.to_ext_key(kernel).ok()?;
        kernel.serialize_base58(&ext, true).ok()
    }

    /// Serializes the key in its base58check public form, or `None` when
    /// the key material cannot be reconstituted.
    pub fn base58_public(&self, kernel: &impl CryptoKernel) -> Option<String> {
        let ext = self.to_ext_key(kernel).ok()?;
        kernel.serialize_base58(&ext, false).ok()
    }

    /// Serializes the key in base58check, preferring the private form.
    pub fn base58(&self, kernel: &impl CryptoKernel) -> String {
        self.base58_private(kernel)
            .or_else(|| self.base58_public(kernel))
            .unwrap_or_else(|| s!("invalid"))
    }

    /// Renders the key as `[parent]base58/children`, with the parent and
    /// children segments elided when empty or not requested.
    pub fn description(
        &self,
        kernel: &impl CryptoKernel,
        with_parent: bool,
        with_children: bool,
    ) -> String {
        let mut description = String::new();
        if with_parent && !self.parent.is_empty() {
            description.push('[');
            description.push_str(&self.parent.to_string());
            description.push(']');
        }
        description.push_str(&self.base58(kernel));
        if with_children && !self.children.is_empty() {
            description.push('/');
            description.push_str(&self.children.to_string());
        }
        description
    }

    /// Renders the key with both its parent and children segments.
    #[inline]
    pub fn full_description(&self, kernel: &impl CryptoKernel) -> String {
        self.description(kernel, true, true)
    }
}

// Key material is compared in constant time; the remaining fields are
// plain values.
impl PartialEq for HdKey {
    fn eq(&self, other: &Self) -> bool {
        let mut diff = 0u8;
        for (a, b) in self.key_data.iter().zip(&other.key_data) {
            diff |= a ^ b;
        }
        let self_chain = self.chain_code.unwrap_or_default();
        let other_chain = other.chain_code.unwrap_or_default();
        for (a, b) in self_chain.iter().zip(&other_chain) {
            diff |= a ^ b;
        }
        diff == 0
            && self.chain_code.is_some() == other.chain_code.is_some()
            && self.is_master == other.is_master
            && self.key_type == other.key_type
            && self.use_info == other.use_info
            && self.parent == other.parent
            && self.children == other.children
            && self.parent_fingerprint == other.parent_fingerprint
    }
}

impl Drop for HdKey {
    fn drop(&mut self) {
        self.key_data.zeroize();
        if let Some(chain_code) = self.chain_code.as_mut() {
            chain_code.zeroize();
        }
    }
}

// Secret material never reaches debug output.
impl fmt::Debug for HdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("HdKey");
        s.field("is_master", &self.is_master)
            .field("key_type", &self.key_type);
        if self.is_private() {
            s.field("key_data", &"[REDACTED]");
        } else {
            s.field("key_data", &self.key_data);
        }
        s.field(
            "chain_code",
            &self.chain_code.map(|_| "[REDACTED]"),
        )
        .field("use_info", &self.use_info)
        .field("parent", &self.parent)
        .field("children", &self.children)
        .field("parent_fingerprint", &self.parent_fingerprint)
        .finish()
    }
}
