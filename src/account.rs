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

//! Account-level output descriptor bundles: the standard per-output-type
//! public keys derived from a master key, aggregated under the master key
//! fingerprint.

use std::collections::BTreeMap;

use minicbor::data::Tag;
use minicbor::{encode, Encode, Encoder};

use crate::cbor::{
    CRYPTO_ACCOUNT, PAY_TO_PUBKEY_HASH, SCRIPT_HASH, TAPROOT, WITNESS_PUBKEY_HASH,
};
use crate::hdkey::{DeriveOptions, HdKey, HdKeyError, KeyType};
use crate::indexes::{ChildIndex, ChildIndexSpec, DerivationStep};
use crate::kernel::CryptoKernel;
use crate::path::DerivationPath;
use crate::useinfo::{Asset, Network, UseInfo};

/// Standard script types an account may produce outputs for, each bound to
/// its BIP43 purpose.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display
)]
pub enum OutputType {
    /// Legacy P2PKH outputs (BIP44 accounts)
    #[display("pkh")]
    Pkh,

    /// P2WPKH-in-P2SH outputs (BIP49 accounts)
    #[display("sh-wpkh")]
    ShWpkh,

    /// Native P2WPKH outputs (BIP84 accounts)
    #[display("wpkh")]
    Wpkh,

    /// Single-key P2TR outputs (BIP86 accounts)
    #[display("tr")]
    Tr,
}

impl OutputType {
    /// All output types in their standard bundle order.
    pub const ALL: [OutputType; 4] = [
        OutputType::Pkh,
        OutputType::ShWpkh,
        OutputType::Wpkh,
        OutputType::Tr,
    ];

    /// Returns the BIP43 purpose index of the output type.
    pub fn purpose(self) -> ChildIndex {
        let purpose = match self {
            OutputType::Pkh => 44,
            OutputType::ShWpkh => 49,
            OutputType::Wpkh => 84,
            OutputType::Tr => 86,
        };
        ChildIndex::new(purpose).expect("BIP43 purposes fit the index range")
    }

    /// Returns the script expression tags wrapping the account key on the
    /// wire, outermost first.
    pub fn script_tags(self) -> &'static [u64] {
        match self {
            OutputType::Pkh => &[PAY_TO_PUBKEY_HASH],
            OutputType::ShWpkh => &[SCRIPT_HASH, WITNESS_PUBKEY_HASH],
            OutputType::Wpkh => &[WITNESS_PUBKEY_HASH],
            OutputType::Tr => &[TAPROOT],
        }
    }

    /// Constructs the hardened account-level derivation path
    /// `purpose'/coin_type'/account'` for the given network.
    pub fn account_path(self, network: Network, account: ChildIndex) -> DerivationPath {
        let coin_type = UseInfo::with(Asset::Btc, network).coin_type_index();
        [self.purpose(), coin_type, account]
            .into_iter()
            .map(|index| DerivationStep {
                spec: ChildIndexSpec::Index(index),
                hardened: true,
            })
            .collect()
    }
}

/// Account-level public key for one output type, wrapped into its script
/// expression tags on the wire.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct OutputDescriptor {
    /// Script type the descriptor produces outputs for
    pub output_type: OutputType,
    /// Public key at the account-level derivation path of the output type
    pub account_key: HdKey,
}

impl<C> Encode<C> for OutputDescriptor {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        for tag in self.output_type.script_tags() {
            e.tag(Tag::new(*tag))?;
        }
        self.account_key.encode(e, ctx)
    }
}

impl OutputDescriptor {
    /// Encodes the descriptor into its tagged-CBOR form.
    pub fn to_cbor(&self) -> Vec<u8> { crate::cbor::to_vec(self) }
}

/// Errors of account bundle construction
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error, From
)]
#[display(doc_comments)]
pub enum AccountError {
    /// account descriptors can only be derived from a master key
    NonMasterKey,

    /// account-level derivation has failed. Details: {0}
    #[from]
    Derivation(HdKeyError),
}

/// Bundle of output descriptors sharing one master key and account index,
/// transported under the [`crate::cbor::UR_TYPE_ACCOUNT`] label as the
/// tag-311 map `{1: master key fingerprint, 2: [descriptors…]}`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct AccountDescriptorBundle {
    master_fingerprint: u32,
    network: Network,
    account: ChildIndex,
    descriptors: Vec<OutputDescriptor>,
    by_type: BTreeMap<OutputType, OutputDescriptor>,
}

impl AccountDescriptorBundle {
    /// Derives the account descriptors for the requested output types from
    /// a master key.
    ///
    /// Fails with [`AccountError::NonMasterKey`] unless the key is a
    /// master key, and propagates any per-output-type derivation failure.
    pub fn with(
        kernel: &impl CryptoKernel,
        master_key: &HdKey,
        network: Network,
        account: ChildIndex,
        output_types: &[OutputType],
    ) -> Result<AccountDescriptorBundle, AccountError> {
        if !master_key.is_master() {
            return Err(AccountError::NonMasterKey);
        }
        let master_fingerprint = master_key.key_fingerprint(kernel)?;
        let mut descriptors = Vec::with_capacity(output_types.len());
        let mut by_type = BTreeMap::new();
        for output_type in output_types {
            let descriptor =
                Self::account_descriptor(kernel, master_key, network, account, *output_type)?;
            descriptors.push(descriptor.clone());
            by_type.insert(*output_type, descriptor);
        }
        Ok(AccountDescriptorBundle {
            master_fingerprint,
            network,
            account,
            descriptors,
            by_type,
        })
    }

    /// Derives the account-level public key of a single output type.
    fn account_descriptor(
        kernel: &impl CryptoKernel,
        master_key: &HdKey,
        network: Network,
        account: ChildIndex,
        output_type: OutputType,
    ) -> Result<OutputDescriptor, HdKeyError> {
        let path = output_type.account_path(network, account);
        let options = DeriveOptions {
            key_type: Some(KeyType::Public),
            ..Default::default()
        };
        let account_key = master_key.derive_path_with(kernel, &path, &options)?;
        Ok(OutputDescriptor {
            output_type,
            account_key,
        })
    }

    /// Returns the fingerprint of the master key the bundle was derived
    /// from.
    #[inline]
    pub fn master_fingerprint(&self) -> u32 { self.master_fingerprint }

    /// Returns the network of the bundle.
    #[inline]
    pub fn network(&self) -> Network { self.network }

    /// Returns the account index of the bundle.
    #[inline]
    pub fn account(&self) -> ChildIndex { self.account }

    /// Returns the descriptors in their requested order.
    #[inline]
    pub fn descriptors(&self) -> &[OutputDescriptor] { &self.descriptors }

    /// Returns the descriptor for one output type, if it was requested.
    #[inline]
    pub fn descriptor(&self, output_type: OutputType) -> Option<&OutputDescriptor> {
        self.by_type.get(&output_type)
    }

    /// Encodes the bundle into its tagged-CBOR form.
    pub fn to_cbor(&self) -> Vec<u8> { crate::cbor::to_vec(self) }
}

impl<C> Encode<C> for AccountDescriptorBundle {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.tag(Tag::new(CRYPTO_ACCOUNT))?;
        e.map(2)?;
        e.u8(1)?.u32(self.master_fingerprint)?;
        e.u8(2)?.array(self.descriptors.len() as u64)?;
        for descriptor in &self.descriptors {
            descriptor.encode(e, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use minicbor::Decoder;

    use crate::SecpKernel;

    fn kernel() -> SecpKernel { SecpKernel::new() }

    fn master(kernel: &SecpKernel) -> HdKey {
        HdKey::from_seed(kernel, &[0x42u8; 64], UseInfo::default()).unwrap()
    }

    fn account_index() -> ChildIndex { ChildIndex::new(0).unwrap() }

    #[test]
    fn account_paths() {
        let account = account_index();
        assert_eq!(
            OutputType::Pkh
                .account_path(Network::Mainnet, account)
                .to_string(),
            "44'/0'/0'"
        );
        assert_eq!(
            OutputType::Wpkh
                .account_path(Network::Testnet, account)
                .to_string(),
            "84'/1'/0'"
        );
        assert_eq!(
            OutputType::Tr
                .account_path(Network::Mainnet, ChildIndex::new(7).unwrap())
                .to_string(),
            "86'/0'/7'"
        );
    }

    #[test]
    fn bundle_construction() {
        let kernel = kernel();
        let master = master(&kernel);
        let bundle = AccountDescriptorBundle::with(
            &kernel,
            &master,
            Network::Mainnet,
            account_index(),
            &OutputType::ALL,
        )
        .unwrap();

        assert_eq!(
            bundle.master_fingerprint(),
            master.key_fingerprint(&kernel).unwrap()
        );
        assert_eq!(bundle.descriptors().len(), 4);

        let wpkh = bundle.descriptor(OutputType::Wpkh).unwrap();
        assert_eq!(wpkh.account_key.key_type(), KeyType::Public);
        assert_eq!(
            wpkh.account_key.parent().steps,
            "84'/0'/0'".parse::<DerivationPath>().unwrap().steps
        );
        assert_eq!(
            wpkh.account_key.origin_fingerprint(),
            Some(bundle.master_fingerprint())
        );
        assert!(bundle.descriptor(OutputType::Tr).is_some());

        let direct = master
            .derive_path(
                &kernel,
                &"84'/0'/0'".parse::<DerivationPath>().unwrap(),
            )
            .unwrap()
            .public(&kernel);
        assert_eq!(wpkh.account_key, direct);
    }

    #[test]
    fn rejects_non_master() {
        let kernel = kernel();
        let master = master(&kernel);
        let child = master
            .derive_path(&kernel, &"44'".parse::<DerivationPath>().unwrap())
            .unwrap();

        for types in [&OutputType::ALL[..], &[OutputType::Pkh][..], &[][..]] {
            assert_eq!(
                AccountDescriptorBundle::with(
                    &kernel,
                    &child,
                    Network::Mainnet,
                    account_index(),
                    types,
                ),
                Err(AccountError::NonMasterKey)
            );
        }

        let public_master = master.public(&kernel);
        assert_eq!(
            AccountDescriptorBundle::with(
                &kernel,
                &public_master,
                Network::Mainnet,
                account_index(),
                &OutputType::ALL,
            ),
            Err(AccountError::NonMasterKey)
        );
    }

    #[test]
    fn cbor_shape() {
        let kernel = kernel();
        let master = master(&kernel);
        let bundle = AccountDescriptorBundle::with(
            &kernel,
            &master,
            Network::Mainnet,
            account_index(),
            &[OutputType::Pkh, OutputType::ShWpkh],
        )
        .unwrap();
        let bytes = bundle.to_cbor();

        let mut d = Decoder::new(&bytes);
        assert_eq!(d.tag().unwrap(), Tag::new(CRYPTO_ACCOUNT));
        assert_eq!(d.map().unwrap(), Some(2));
        assert_eq!(d.u32().unwrap(), 1);
        assert_eq!(d.u32().unwrap(), bundle.master_fingerprint());
        assert_eq!(d.u32().unwrap(), 2);
        assert_eq!(d.array().unwrap(), Some(2));
        // pkh descriptor nests the key under a single script tag
        assert_eq!(d.tag().unwrap(), Tag::new(PAY_TO_PUBKEY_HASH));
        d.skip().unwrap();
        // sh-wpkh nests two script tags
        assert_eq!(d.tag().unwrap(), Tag::new(SCRIPT_HASH));
        assert_eq!(d.tag().unwrap(), Tag::new(WITNESS_PUBKEY_HASH));
        d.skip().unwrap();
    }
}
