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

use core::str::FromStr;

use bitcoin::bip32::{ChildNumber, ExtendedPrivKey, ExtendedPubKey};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};

use crate::kernel::{resolve_version, version_magic, CryptoKernel, ExtKey, KernelError};
use crate::useinfo::Network;

fn bitcoin_network(network: Network) -> bitcoin::Network {
    match network {
        Network::Mainnet => bitcoin::Network::Bitcoin,
        Network::Testnet => bitcoin::Network::Testnet,
    }
}

/// Production crypto kernel backed by libsecp256k1 through the `bitcoin`
/// crate BIP32 implementation.
///
/// The kernel is stateless apart from the precomputed curve context and may
/// be shared freely between threads.
pub struct SecpKernel {
    secp: Secp256k1<All>,
}

impl SecpKernel {
    /// Creates a kernel with a fresh curve context.
    pub fn new() -> Self {
        SecpKernel {
            secp: Secp256k1::new(),
        }
    }

    /// Reads the 78-byte BIP32 serialized payload into an [`ExtKey`],
    /// materializing the public key for private payloads.
    fn ext_from_payload(&self, payload: &[u8; 78]) -> Result<ExtKey, KernelError> {
        let mut version = [0u8; 4];
        version.copy_from_slice(&payload[0..4]);
        let (_, is_private) =
            resolve_version(version).ok_or(KernelError::InvalidKeyMaterial)?;

        let depth = payload[4];
        let mut parent160 = [0u8; 20];
        parent160[..4].copy_from_slice(&payload[5..9]);
        let child_num =
            u32::from_be_bytes([payload[9], payload[10], payload[11], payload[12]]);
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&payload[13..45]);

        let mut priv_key = [0u8; 33];
        let mut pub_key = [0u8; 33];
        if is_private {
            if payload[45] != 0 {
                return Err(KernelError::InvalidKeyMaterial);
            }
            priv_key.copy_from_slice(&payload[45..78]);
            pub_key = self.public_from_private(&priv_key)?;
        } else {
            pub_key.copy_from_slice(&payload[45..78]);
            PublicKey::from_slice(&pub_key).map_err(|_| KernelError::InvalidKeyMaterial)?;
        }

        Ok(ExtKey {
            depth,
            child_num,
            chain_code,
            priv_key,
            pub_key,
            parent160,
            version,
        })
    }

    /// Assembles the 78-byte BIP32 payload for the requested key type.
    fn payload_from_ext(&self, key: &ExtKey, private: bool) -> Result<[u8; 78], KernelError> {
        if private && !key.is_private() {
            return Err(KernelError::InvalidKeyMaterial);
        }
        let network = key.network().ok_or(KernelError::InvalidKeyMaterial)?;
        let mut payload = [0u8; 78];
        payload[0..4].copy_from_slice(&version_magic(network, private));
        payload[4] = key.depth;
        payload[5..9].copy_from_slice(&key.parent160[..4]);
        payload[9..13].copy_from_slice(&key.child_num.to_be_bytes());
        payload[13..45].copy_from_slice(&key.chain_code);
        if private {
            payload[45..78].copy_from_slice(&key.priv_key);
        } else {
            payload[45..78].copy_from_slice(&key.pub_key);
        }
        Ok(payload)
    }
}

impl Default for SecpKernel {
    fn default() -> Self { SecpKernel::new() }
}

impl CryptoKernel for SecpKernel {
    fn master_from_seed(&self, seed: &[u8], network: Network) -> Result<ExtKey, KernelError> {
        let xprv = ExtendedPrivKey::new_master(bitcoin_network(network), seed)
            .map_err(|_| KernelError::InvalidSeed)?;
        self.ext_from_payload(&xprv.encode())
    }

    fn parse_base58(&self, s: &str) -> Result<ExtKey, KernelError> {
        if let Ok(xprv) = ExtendedPrivKey::from_str(s) {
            return self.ext_from_payload(&xprv.encode());
        }
        let xpub = ExtendedPubKey::from_str(s).map_err(|_| KernelError::InvalidBase58)?;
        self.ext_from_payload(&xpub.encode())
    }

    fn serialize_base58(&self, key: &ExtKey, private: bool) -> Result<String, KernelError> {
        let payload = self.payload_from_ext(key, private)?;
        if private {
            let xprv = ExtendedPrivKey::decode(&payload)
                .map_err(|_| KernelError::InvalidKeyMaterial)?;
            Ok(xprv.to_string())
        } else {
            let xpub = ExtendedPubKey::decode(&payload)
                .map_err(|_| KernelError::InvalidKeyMaterial)?;
            Ok(xpub.to_string())
        }
    }

    fn derive_child(
        &self,
        parent: &ExtKey,
        child_num: u32,
        want_private: bool,
    ) -> Result<ExtKey, KernelError> {
        if want_private && !parent.is_private() {
            return Err(KernelError::Derivation);
        }
        let child_number = ChildNumber::from(child_num);
        if parent.is_private() {
            let payload = self.payload_from_ext(parent, true)?;
            let xprv = ExtendedPrivKey::decode(&payload)
                .map_err(|_| KernelError::InvalidKeyMaterial)?;
            let child = xprv
                .derive_priv(&self.secp, &[child_number])
                .map_err(|_| KernelError::Derivation)?;
            if want_private {
                self.ext_from_payload(&child.encode())
            } else {
                let child_pub = ExtendedPubKey::from_priv(&self.secp, &child);
                self.ext_from_payload(&child_pub.encode())
            }
        } else {
            let payload = self.payload_from_ext(parent, false)?;
            let xpub = ExtendedPubKey::decode(&payload)
                .map_err(|_| KernelError::InvalidKeyMaterial)?;
            let child = xpub
                .ckd_pub(&self.secp, child_number)
                .map_err(|_| KernelError::Derivation)?;
            self.ext_from_payload(&child.encode())
        }
    }

    fn public_from_private(&self, priv_key: &[u8; 33]) -> Result<[u8; 33], KernelError> {
        if priv_key[0] != 0 {
            return Err(KernelError::InvalidKeyMaterial);
        }
        let secret = SecretKey::from_slice(&priv_key[1..])
            .map_err(|_| KernelError::InvalidKeyMaterial)?;
        Ok(PublicKey::from_secret_key(&self.secp, &secret).serialize())
    }

    fn hash160(&self, data: &[u8]) -> [u8; 20] {
        hash160::Hash::hash(data).to_byte_array()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kernel() -> SecpKernel { SecpKernel::new() }

    fn derive_along(
        kernel: &SecpKernel,
        seed_hex: &str,
        path: &[u32],
    ) -> ExtKey {
        let seed = hex::decode(seed_hex).unwrap();
        let mut key = kernel.master_from_seed(&seed, Network::Mainnet).unwrap();
        for &child_num in path {
            key = kernel.derive_child(&key, child_num, true).unwrap();
        }
        key
    }

    fn assert_pair(kernel: &SecpKernel, key: &ExtKey, xprv: &str, xpub: &str) {
        assert_eq!(kernel.serialize_base58(key, true).unwrap(), xprv);
        assert_eq!(kernel.serialize_base58(key, false).unwrap(), xpub);
    }

    const H: u32 = crate::HARDENED_INDEX_BOUNDARY;

    // BIP32 test vector 1
    #[test]
    fn bip32_vector1() {
        let kernel = kernel();
        let seed = "000102030405060708090a0b0c0d0e0f";

        let m = derive_along(&kernel, seed, &[]);
        assert_pair(
            &kernel, &m,
            "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi",
            "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8",
        );

        let child = derive_along(&kernel, seed, &[H]);
        assert_pair(
            &kernel, &child,
            "xprv9uHRZZhk6KAJC1avXpDAp4MDc3sQKNxDiPvvkX8Br5ngLNv1TxvUxt4cV1rGL5hj6KCesnDYUhd7oWgT11eZG7XnxHrnYeSvkzY7d2bhkJ7",
            "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeNK1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw",
        );

        let child = derive_along(&kernel, seed, &[H, 1, 2 | H, 2, 1000000000]);
        assert_pair(
            &kernel, &child,
            "xprvA41z7zogVVwxVSgdKUHDy1SKmdb533PjDz7J6N6mV6uS3ze1ai8FHa8kmHScGpWmj4WggLyQjgPie1rFSruoUihUZREPSL39UNdE3BBDu76",
            "xpub6H1LXWLaKsWFhvm6RVpEL9P4KfRZSW7abD2ttkWP3SSQvnyA8FSVqNTEcYFgJS2UaFcxupHiYkro49S8yGasTvXEYBVPamhGW6cFJodrTHy",
        );
    }

    // BIP32 test vector 2
    #[test]
    fn bip32_vector2() {
        let kernel = kernel();
        let seed = "fffcf9f6f3f0edeae7e4e1dedbd8d5d2cfccc9c6c3c0bdbab7b4b1aeaba8a5a29f9c999693908d8a8784817e7b7875726f6c696663605d5a5754514e4b484542";

        let m = derive_along(&kernel, seed, &[]);
        assert_pair(
            &kernel, &m,
            "xprv9s21ZrQH143K31xYSDQpPDxsXRTUcvj2iNHm5NUtrGiGG5e2DtALGdso3pGz6ssrdK4PFmM8NSpSBHNqPqm55Qn3LqFtT2emdEXVYsCzC2U",
            "xpub661MyMwAqRbcFW31YEwpkMuc5THy2PSt5bDMsktWQcFF8syAmRUapSCGu8ED9W6oDMSgv6Zz8idoc4a6mr8BDzTJY47LJhkJ8UB7WEGuduB",
        );

        let child = derive_along(&kernel, seed, &[0, 2147483647 | H, 1, 2147483646 | H, 2]);
        assert_pair(
            &kernel, &child,
            "xprvA2nrNbFZABcdryreWet9Ea4LvTJcGsqrMzxHx98MMrotbir7yrKCEXw7nadnHM8Dq38EGfSh6dqA9QWTyefMLEcBYJUuekgW4BYPJcr9E7j",
            "xpub6FnCn6nSzZAw5Tw7cgR9bi15UV96gLZhjDstkXXxvCLsUXBGXPdSnLFbdpq8p9HmGsApME5hQTZ3emM2rnY5agb9rXpVGyy3bdW6EEgAtqt",
        );
    }

    #[test]
    fn parse_roundtrip() {
        let kernel = kernel();
        for s in [
            "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi",
            "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8",
            "xpub6ASuArnXKPbfEwhqN6e3mwBcDTgzisQN1wXN9BJcM47sSikHjJf3UFHKkNAWbWMiGj7Wf5uMash7SyYq527Hqck2AxYysAA7xmALppuCkwQ",
        ] {
            let key = kernel.parse_base58(s).unwrap();
            let private = key.is_private();
            assert_eq!(kernel.serialize_base58(&key, private).unwrap(), s);
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        let kernel = kernel();
        assert_eq!(
            kernel.parse_base58("not a key"),
            Err(KernelError::InvalidBase58)
        );
        assert_eq!(
            kernel.parse_base58("xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet9"),
            Err(KernelError::InvalidBase58)
        );
    }

    #[test]
    fn public_derivation_matches_private() {
        let kernel = kernel();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = kernel.master_from_seed(&seed, Network::Mainnet).unwrap();

        let via_private = kernel.derive_child(&master, 1, false).unwrap();

        let master_pub = kernel
            .parse_base58(&kernel.serialize_base58(&master, false).unwrap())
            .unwrap();
        let via_public = kernel.derive_child(&master_pub, 1, false).unwrap();

        assert_eq!(via_private.pub_key, via_public.pub_key);
        assert_eq!(via_private.chain_code, via_public.chain_code);
        assert_eq!(via_private.parent160[..4], via_public.parent160[..4]);
    }

    #[test]
    fn hardened_requires_private() {
        let kernel = kernel();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = kernel.master_from_seed(&seed, Network::Mainnet).unwrap();
        let master_pub = kernel
            .parse_base58(&kernel.serialize_base58(&master, false).unwrap())
            .unwrap();

        assert_eq!(
            kernel.derive_child(&master_pub, H, false),
            Err(KernelError::Derivation)
        );
        assert_eq!(
            kernel.derive_child(&master_pub, 0, true),
            Err(KernelError::Derivation)
        );
    }

    #[test]
    fn fingerprint_matches_bitcoin() {
        let kernel = kernel();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = kernel.master_from_seed(&seed, Network::Mainnet).unwrap();
        let child = kernel.derive_child(&master, H, true).unwrap();
        // the child records the parent fingerprint computed over the master
        // public key
        assert_eq!(child.parent160[..4], kernel.fingerprint(&master));
    }

    #[test]
    fn testnet_versions() {
        let kernel = kernel();
        let seed = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let master = kernel.master_from_seed(&seed, Network::Testnet).unwrap();
        assert_eq!(master.network(), Some(Network::Testnet));
        assert!(kernel
            .serialize_base58(&master, true)
            .unwrap()
            .starts_with("tprv"));
        assert!(kernel
            .serialize_base58(&master, false)
            .unwrap()
            .starts_with("tpub"));
    }
}
