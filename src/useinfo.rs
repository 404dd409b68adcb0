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

use minicbor::data::Tag;
use minicbor::{decode, encode, Decoder, Encoder};

use crate::cbor::CRYPTO_COIN_INFO;
use crate::indexes::ChildIndex;

/// Asset (coin) a key is intended to operate with.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display
)]
pub enum Asset {
    /// Bitcoin
    #[default]
    #[display("btc")]
    Btc,

    /// Ethereum
    #[display("eth")]
    Eth,
}

impl Asset {
    /// Returns the registered coin type of the asset used on the wire and in
    /// BIP44 coin-type derivation segments.
    #[inline]
    pub fn coin_type(self) -> u32 {
        match self {
            Asset::Btc => 0,
            Asset::Eth => 0x3c,
        }
    }

    /// Resolves an asset from its registered coin type.
    pub fn from_coin_type(coin_type: u32) -> Option<Asset> {
        match coin_type {
            0 => Some(Asset::Btc),
            0x3c => Some(Asset::Eth),
            _ => None,
        }
    }
}

/// Network a key belongs to, as reflected by its serialized version bytes.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display
)]
pub enum Network {
    /// Bitcoin mainnet
    #[default]
    #[display("mainnet")]
    Mainnet,

    /// Bitcoin testnet (and test-like networks)
    #[display("testnet")]
    Testnet,
}

impl Network {
    /// Returns the wire value of the network (0 mainnet, 1 testnet).
    #[inline]
    pub fn index(self) -> u8 {
        match self {
            Network::Mainnet => 0,
            Network::Testnet => 1,
        }
    }

    /// Resolves a network from its wire value.
    pub fn from_index(index: u32) -> Option<Network> {
        match index {
            0 => Some(Network::Mainnet),
            1 => Some(Network::Testnet),
            _ => None,
        }
    }
}

/// Pair of asset and network qualifying the intended use of a key.
///
/// The default value `(btc, mainnet)` acts as a sentinel which is elided
/// from wire forms.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display
)]
#[display("{asset}/{network}")]
pub struct UseInfo {
    /// Asset the key operates with
    pub asset: Asset,
    /// Network the key belongs to
    pub network: Network,
}

impl UseInfo {
    /// Constructs use information from asset and network.
    #[inline]
    pub fn with(asset: Asset, network: Network) -> Self { UseInfo { asset, network } }

    /// Detects the `(btc, mainnet)` default sentinel.
    #[inline]
    pub fn is_default(&self) -> bool { self == &UseInfo::default() }

    /// Returns the BIP44 coin-type child index for account-level
    /// derivations: the asset coin type on mainnet, 1 on testnet.
    pub fn coin_type_index(&self) -> ChildIndex {
        let coin_type = match self.network {
            Network::Mainnet => self.asset.coin_type(),
            Network::Testnet => 1,
        };
        ChildIndex::new(coin_type).expect("registered coin types fit the index range")
    }
}

// Tag-305 map `{1?: coin type, 2?: network}` with default values elided.

impl<C> encode::Encode<C> for UseInfo {
    fn encode<W: encode::Write>(
        &self,
        e: &mut Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), encode::Error<W::Error>> {
        e.tag(Tag::new(CRYPTO_COIN_INFO))?;
        let mut len = 0u64;
        if self.asset != Asset::default() {
            len += 1;
        }
        if self.network != Network::default() {
            len += 1;
        }
        e.map(len)?;
        if self.asset != Asset::default() {
            e.u8(1)?.u32(self.asset.coin_type())?;
        }
        if self.network != Network::default() {
            e.u8(2)?.u8(self.network.index())?;
        }
        Ok(())
    }
}

impl<'b, C> decode::Decode<'b, C> for UseInfo {
    fn decode(d: &mut Decoder<'b>, _ctx: &mut C) -> Result<Self, decode::Error> {
        if d.tag()? != Tag::new(CRYPTO_COIN_INFO) {
            return Err(decode::Error::message("wrong use-info tag"));
        }
        let len = d
            .map()?
            .ok_or_else(|| decode::Error::message("indefinite-length map"))?;
        let mut info = UseInfo::default();
        for _ in 0..len {
            match d.u32()? {
                1 => {
                    info.asset = Asset::from_coin_type(d.u32()?)
                        .ok_or_else(|| decode::Error::message("unknown coin type"))?
                }
                2 => {
                    info.network = Network::from_index(d.u32()?)
                        .ok_or_else(|| decode::Error::message("unknown network"))?
                }
                _ => return Err(decode::Error::message("unknown use-info map key")),
            }
        }
        Ok(info)
    }
}
