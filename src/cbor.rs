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

//! Registered CBOR tag identifiers, uniform-resource type labels and the
//! tagged envelope codec for [`HdKey`].
//!
//! Tag numbers follow the BCR-2020-006/007/010/015 registrations.

use minicbor::data::Tag;
use minicbor::{decode, encode, Decode, Decoder, Encode, Encoder};

use crate::hdkey::{HdKey, HdKeyError, KeyType};
use crate::path::DerivationPath;
use crate::useinfo::UseInfo;

/// Tag of a serialized extended key
pub const CRYPTO_HDKEY: u64 = 303;
/// Tag of a serialized derivation path
pub const CRYPTO_KEYPATH: u64 = 304;
/// Tag of serialized asset/network use information
pub const CRYPTO_COIN_INFO: u64 = 305;
/// Tag of a serialized output descriptor
pub const CRYPTO_OUTPUT: u64 = 308;
/// Tag of a serialized account descriptor bundle
pub const CRYPTO_ACCOUNT: u64 = 311;

/// Script expression tag: P2SH wrapper
pub const SCRIPT_HASH: u64 = 400;
/// Script expression tag: P2WSH
pub const WITNESS_SCRIPT_HASH: u64 = 401;
/// Script expression tag: P2PKH
pub const PAY_TO_PUBKEY_HASH: u64 = 403;
/// Script expression tag: P2WPKH
pub const WITNESS_PUBKEY_HASH: u64 = 404;
/// Script expression tag: P2TR
pub const TAPROOT: u64 = 409;

/// Uniform-resource type label under which extended keys travel as
/// strings.
pub const UR_TYPE_HDKEY: &str = "crypto-hdkey";
/// Uniform-resource type label under which account bundles travel as
/// strings.
pub const UR_TYPE_ACCOUNT: &str = "crypto-account";

/// Serializes a value into its canonical CBOR byte form.
pub fn to_vec<T: Encode<()>>(value: &T) -> Vec<u8> {
    minicbor::to_vec(value).expect("writes into a vector are infallible")
}

/// Deserializes a value from CBOR bytes, reporting schema violations as
/// [`HdKeyError::InvalidFormat`].
pub fn from_slice<'b, T: Decode<'b, ()>>(bytes: &'b [u8]) -> Result<T, HdKeyError> {
    minicbor::decode(bytes).map_err(|_| HdKeyError::InvalidFormat)
}

// The wire form is the tag-303 map with integer keys written in ascending
// order: 1 is-master (only when true), 2 is-private (only when true),
// 3 key data, 4 chain code, 5 use info, 6 parent path, 7 children path,
// 8 parent fingerprint; absent values are elided per the schema.

impl<C> Encode<C> for HdKey {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.tag(Tag::new(CRYPTO_HDKEY))?;
        let mut len = 1u64;
        if self.is_master() {
            len += 1;
        }
        if self.is_private() {
            len += 1;
        }
        if self.chain_code().is_some() {
            len += 1;
        }
        if !self.use_info().is_default() {
            len += 1;
        }
        if !self.parent().is_empty() {
            len += 1;
        }
        if !self.children().is_empty() {
            len += 1;
        }
        if self.parent_fingerprint().is_some() {
            len += 1;
        }
        e.map(len)?;
        if self.is_master() {
            e.u8(1)?.bool(true)?;
        }
        if self.is_private() {
            e.u8(2)?.bool(true)?;
        }
        e.u8(3)?.bytes(self.key_data())?;
        if let Some(chain_code) = self.chain_code() {
            e.u8(4)?.bytes(chain_code)?;
        }
        if !self.use_info().is_default() {
            e.u8(5)?;
            self.use_info().encode(e, ctx)?;
        }
        if !self.parent().is_empty() {
            e.u8(6)?;
            self.parent().encode(e, ctx)?;
        }
        if !self.children().is_empty() {
            e.u8(7)?;
            self.children().encode(e, ctx)?;
        }
        if let Some(fingerprint) = self.parent_fingerprint() {
            e.u8(8)?.u32(fingerprint)?;
        }
        Ok(())
    }
}

impl<'b, C> Decode<'b, C> for HdKey {
    fn decode(d: &mut Decoder<'b>, ctx: &mut C) -> Result<Self, decode::Error> {
        if d.tag()? != Tag::new(CRYPTO_HDKEY) {
            return Err(decode::Error::message("wrong extended key tag"));
        }
        let len = d
            .map()?
            .ok_or_else(|| decode::Error::message("indefinite-length map"))?;

        let mut is_master = false;
        let mut is_private = None;
        let mut key_data = None;
        let mut chain_code = None;
        let mut use_info = UseInfo::default();
        let mut parent = DerivationPath::new();
        let mut children = DerivationPath::new();
        let mut parent_fingerprint = None;

        for _ in 0..len {
            match d.u32()? {
                1 => is_master = d.bool()?,
                2 => is_private = Some(d.bool()?),
                3 => {
                    let bytes = d.bytes()?;
                    let data: [u8; 33] = bytes
                        .try_into()
                        .map_err(|_| decode::Error::message("key data must be 33 bytes"))?;
                    key_data = Some(data);
                }
                4 => {
                    let bytes = d.bytes()?;
                    let data: [u8; 32] = bytes
                        .try_into()
                        .map_err(|_| decode::Error::message("chain code must be 32 bytes"))?;
                    chain_code = Some(data);
                }
                5 => use_info = UseInfo::decode(d, ctx)?,
                6 => parent = DerivationPath::decode(d, ctx)?,
                7 => children = DerivationPath::decode(d, ctx)?,
                8 => {
                    let fingerprint = d.u32()?;
                    if fingerprint == 0 {
                        return Err(decode::Error::message("zero parent fingerprint"));
                    }
                    parent_fingerprint = Some(fingerprint);
                }
                _ => return Err(decode::Error::message("unknown extended key map key")),
            }
        }

        // A master key is implicitly private; an explicit public master is
        // a contradiction.
        let is_private = is_private.unwrap_or(is_master);
        if is_master && !is_private {
            return Err(decode::Error::message("master key cannot be public"));
        }
        let key_data =
            key_data.ok_or_else(|| decode::Error::message("extended key without key data"))?;

        Ok(HdKey::from_parts(
            is_master,
            if is_private {
                KeyType::Private
            } else {
                KeyType::Public
            },
            key_data,
            chain_code,
            use_info,
            parent,
            children,
            parent_fingerprint,
        ))
    }
}

impl HdKey {
    /// Encodes the key into its tagged-CBOR envelope, transported under the
    /// [`UR_TYPE_HDKEY`] label.
    pub fn to_cbor(&self) -> Vec<u8> { to_vec(self) }

    /// Decodes a key from its tagged-CBOR envelope.
    pub fn from_cbor(bytes: &[u8]) -> Result<HdKey, HdKeyError> { from_slice(bytes) }

    /// Computes the deterministic payload feeding the identity digest of
    /// the key: the canonical CBOR sequence of key data, chain code (or
    /// null), asset coin type and network.
    ///
    /// The payload depends only on the key material, chain code, asset and
    /// network; provenance paths and fingerprints do not participate.
    pub fn identity_digest_source(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.bytes(self.key_data())
            .expect("writes into a vector are infallible");
        match self.chain_code() {
            Some(chain_code) => e.bytes(chain_code),
            None => e.null(),
        }
        .expect("writes into a vector are infallible");
        e.u32(self.use_info().asset.coin_type())
            .expect("writes into a vector are infallible");
        e.u8(self.use_info().network.index())
            .expect("writes into a vector are infallible");
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path::PathOrigin;
    use crate::useinfo::{Asset, Network};
    use crate::{DeriveOptions, SecpKernel};

    fn kernel() -> SecpKernel { SecpKernel::new() }

    fn master(kernel: &SecpKernel) -> HdKey {
        HdKey::from_seed(kernel, &[0x42u8; 64], UseInfo::default()).unwrap()
    }

    fn path(s: &str) -> DerivationPath { s.parse().unwrap() }

    #[test]
    fn roundtrip() {
        let kernel = kernel();
        let master = master(&kernel);
        let derived = master.derive_path(&kernel, &path("48'/0'/0'/2'")).unwrap();
        let options = DeriveOptions {
            key_type: Some(KeyType::Public),
            children: Some(path("0/*")),
            ..Default::default()
        };
        let account = master
            .derive_path_with(&kernel, &path("84'/0'/0'"), &options)
            .unwrap();

        for key in [master, derived, account] {
            let decoded = HdKey::from_cbor(&key.to_cbor()).unwrap();
            assert_eq!(decoded, key);
        }
    }

    #[test]
    fn canonical_key_set() {
        let kernel = kernel();
        let master = master(&kernel);
        // private, default use info, empty children, present parent
        // fingerprint
        let derived = master.derive_path(&kernel, &path("44'")).unwrap();
        let bytes = derived.to_cbor();

        let mut d = Decoder::new(&bytes);
        assert_eq!(d.tag().unwrap(), Tag::new(CRYPTO_HDKEY));
        let len = d.map().unwrap().unwrap();
        assert_eq!(len, 5);
        let mut keys = Vec::new();
        for _ in 0..len {
            keys.push(d.u32().unwrap());
            d.skip().unwrap();
        }
        assert_eq!(keys, vec![2, 3, 4, 6, 8]);
    }

    #[test]
    fn decode_defaults() {
        // a bare map with only key data decodes as a public, non-master,
        // non-derivable key
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
        e.map(1).unwrap();
        e.u8(3).unwrap().bytes(&[2u8; 33]).unwrap();
        let key = HdKey::from_cbor(&bytes).unwrap();
        assert!(!key.is_master());
        assert!(!key.is_private());
        assert!(!key.is_derivable());
        assert!(key.parent().is_empty());

        // a master flag without an explicit is-private reads as private
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
        e.map(2).unwrap();
        e.u8(1).unwrap().bool(true).unwrap();
        e.u8(3).unwrap().bytes(&[0u8; 33]).unwrap();
        let key = HdKey::from_cbor(&bytes).unwrap();
        assert!(key.is_master());
        assert!(key.is_private());
    }

    #[test]
    fn rejects_public_master() {
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
        e.map(3).unwrap();
        e.u8(1).unwrap().bool(true).unwrap();
        e.u8(2).unwrap().bool(false).unwrap();
        e.u8(3).unwrap().bytes(&[2u8; 33]).unwrap();
        assert_eq!(HdKey::from_cbor(&bytes), Err(HdKeyError::InvalidFormat));
    }

    #[test]
    fn rejects_wrong_lengths() {
        for (key, payload) in [(3u8, 32usize), (3, 34), (4, 31), (4, 33)] {
            let mut bytes = Vec::new();
            let mut e = Encoder::new(&mut bytes);
            e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
            e.map(2).unwrap();
            if key != 3 {
                e.u8(3).unwrap().bytes(&[2u8; 33]).unwrap();
            }
            e.u8(key).unwrap().bytes(&vec![0u8; payload]).unwrap();
            if key == 3 {
                e.u8(4).unwrap().bytes(&[0u8; 32]).unwrap();
            }
            assert_eq!(
                HdKey::from_cbor(&bytes),
                Err(HdKeyError::InvalidFormat),
                "length {payload} for key {key} must be rejected"
            );
        }
    }

    #[test]
    fn rejects_unknown_keys() {
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
        e.map(2).unwrap();
        e.u8(3).unwrap().bytes(&[2u8; 33]).unwrap();
        e.u8(99).unwrap().str("future field").unwrap();
        assert_eq!(HdKey::from_cbor(&bytes), Err(HdKeyError::InvalidFormat));
    }

    #[test]
    fn rejects_zero_parent_fingerprint() {
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
        e.map(2).unwrap();
        e.u8(3).unwrap().bytes(&[2u8; 33]).unwrap();
        e.u8(8).unwrap().u32(0).unwrap();
        assert_eq!(HdKey::from_cbor(&bytes), Err(HdKeyError::InvalidFormat));
    }

    #[test]
    fn rejects_missing_key_data() {
        let mut bytes = Vec::new();
        let mut e = Encoder::new(&mut bytes);
        e.tag(Tag::new(CRYPTO_HDKEY)).unwrap();
        e.map(1).unwrap();
        e.u8(1).unwrap().bool(true).unwrap();
        assert_eq!(HdKey::from_cbor(&bytes), Err(HdKeyError::InvalidFormat));
    }

    #[test]
    fn use_info_on_the_wire() {
        let kernel = kernel();
        let master = HdKey::from_seed(
            &kernel,
            &[0x42u8; 64],
            UseInfo::with(Asset::Btc, Network::Testnet),
        )
        .unwrap();
        let decoded = HdKey::from_cbor(&master.to_cbor()).unwrap();
        assert_eq!(decoded.use_info().network, Network::Testnet);
        assert_eq!(decoded, master);
    }

    #[test]
    fn identity_digest_stability() {
        let kernel = kernel();
        let master = master(&kernel);
        let base58 = master.base58(&kernel);

        // permuting provenance and fingerprints leaves the digest source
        // unchanged
        let plain = HdKey::from_base58(&kernel, &base58).unwrap();
        let reworded = HdKey::from_base58_with(
            &kernel,
            &base58,
            None,
            Some(DerivationPath::with_origin(
                path("1/2/3").steps,
                PathOrigin::Named(s!("elsewhere")),
                None,
            )),
            Some(path("0/*")),
            Some(0x99999999),
        )
        .unwrap();
        assert_eq!(
            plain.identity_digest_source(),
            reworded.identity_digest_source()
        );

        // changing the network changes it
        let testnet = HdKey::from_seed(
            &kernel,
            &[0x42u8; 64],
            UseInfo::with(Asset::Btc, Network::Testnet),
        )
        .unwrap();
        assert_ne!(
            master.identity_digest_source(),
            testnet.identity_digest_source()
        );

        // a non-derivable projection encodes a null chain code slot
        let sealed = master
            .with_key_type(&kernel, KeyType::Private, false, None, None)
            .unwrap();
        assert_ne!(
            master.identity_digest_source(),
            sealed.identity_digest_source()
        );
    }
}
