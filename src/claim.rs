//! A claim is a statement an identity makes about itself that others can check
//! against the outside world. Here, that's "this cryptocurrency address is
//! mine."
//!
//! Claims are grouped into [families][ClaimFamily] (one per external system a
//! claim can reference). An identity may hold at most one *active* claim per
//! family, which is why registering a second address in a family means
//! revoking the first one.
//!
//! This module turns a raw address string into a typed [Claim]. The actual
//! address grammar is pluggable via [AddressParser]; the
//! [StandardAddressParser] checks prefixes, lengths, and alphabets but does not
//! verify checksums.

use crate::error::{Error, Result};
use getset;
use rasn::{AsnType, Decode, Encode};
use std::str::FromStr;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32_CHARSET: &str = "qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// A coarse category of claims. An identity has at most one active claim per
/// family at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum ClaimFamily {
    #[rasn(tag(explicit(0)))]
    Bitcoin,
    #[rasn(tag(explicit(1)))]
    Zcash,
}

impl ClaimFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Zcash => "zcash",
        }
    }
}

impl std::fmt::Display for ClaimFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClaimFamily {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bitcoin" => Ok(Self::Bitcoin),
            "zcash" => Ok(Self::Zcash),
            _ => Err(Error::InvalidClaim(format!("unknown claim family {:?}", s))),
        }
    }
}

/// The specific type of an address. Every type belongs to exactly one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum ClaimType {
    /// Legacy pay-to-pubkey-hash bitcoin address (`1...`)
    #[rasn(tag(explicit(0)))]
    BitcoinP2PKH,
    /// Pay-to-script-hash bitcoin address (`3...`), usually multisig
    #[rasn(tag(explicit(1)))]
    BitcoinP2SH,
    /// Segwit bitcoin address (`bc1...`)
    #[rasn(tag(explicit(2)))]
    BitcoinBech32,
    /// Sprout shielded zcash address (`zc...`)
    #[rasn(tag(explicit(3)))]
    ZcashShielded,
    /// Transparent zcash address (`t1...`)
    #[rasn(tag(explicit(4)))]
    ZcashTransparentP2PKH,
    /// Transparent zcash script address (`t3...`)
    #[rasn(tag(explicit(5)))]
    ZcashTransparentP2SH,
    /// Sapling shielded zcash address (`zs1...`)
    #[rasn(tag(explicit(6)))]
    ZcashSapling,
}

impl ClaimType {
    /// Which family this claim type lives in.
    pub fn family(&self) -> ClaimFamily {
        match self {
            Self::BitcoinP2PKH | Self::BitcoinP2SH | Self::BitcoinBech32 => ClaimFamily::Bitcoin,
            Self::ZcashShielded | Self::ZcashTransparentP2PKH | Self::ZcashTransparentP2SH | Self::ZcashSapling => ClaimFamily::Zcash,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BitcoinP2PKH => "bitcoin",
            Self::BitcoinP2SH => "bitcoin multi-sig",
            Self::BitcoinBech32 => "bech32 bitcoin",
            Self::ZcashShielded => "zcash.z",
            Self::ZcashTransparentP2PKH => "zcash.t",
            Self::ZcashTransparentP2SH => "zcash.t multi-sig",
            Self::ZcashSapling => "zcash.s",
        }
    }
}

impl std::fmt::Display for ClaimType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated address claim. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, getset::Getters)]
#[getset(get = "pub")]
pub struct Claim {
    /// The address type (which implies the family)
    ty: ClaimType,
    /// The address itself, as given
    address: String,
}

impl Claim {
    pub(crate) fn new(ty: ClaimType, address: String) -> Self {
        Self { ty, address }
    }

    pub fn family(&self) -> ClaimFamily {
        self.ty.family()
    }
}

/// Decodes an address string into a claim type. Anything that can't be decoded
/// is an `InvalidClaim`.
pub trait AddressParser: Send + Sync {
    fn parse(&self, address: &str) -> Result<ClaimType>;
}

/// Recognizes the bitcoin and zcash address formats by prefix, length, and
/// alphabet.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardAddressParser;

impl StandardAddressParser {
    fn is_base58(s: &str) -> bool {
        !s.is_empty() && s.chars().all(|c| BASE58_ALPHABET.contains(c))
    }

    /// Checks a bech32 string's data part (everything after the `1`
    /// separator). Mixed case is never valid bech32.
    fn bech32_data<'a>(lowered: &'a str, hrp: &str) -> Option<&'a str> {
        let data = lowered.strip_prefix(hrp)?.strip_prefix('1')?;
        if data.len() >= 6 && data.chars().all(|c| BECH32_CHARSET.contains(c)) {
            Some(data)
        } else {
            None
        }
    }
}

impl AddressParser for StandardAddressParser {
    fn parse(&self, address: &str) -> Result<ClaimType> {
        let bad = |msg: &str| Error::InvalidClaim(format!("{}: {:?}", msg, address));
        if address.is_empty() {
            Err(Error::InvalidClaim(String::from("empty address")))?;
        }
        if address.trim() != address {
            Err(bad("address has surrounding whitespace"))?;
        }

        let lowered = address.to_ascii_lowercase();
        let is_upper = address.to_ascii_uppercase() == address;
        let single_case = lowered == address || is_upper;
        if lowered.starts_with("bc1") {
            if !single_case {
                Err(bad("mixed-case bech32 address"))?;
            }
            if !(14..=74).contains(&address.len()) || Self::bech32_data(&lowered, "bc").is_none() {
                Err(bad("malformed bech32 bitcoin address"))?;
            }
            return Ok(ClaimType::BitcoinBech32);
        }
        if lowered.starts_with("zs1") {
            if !single_case {
                Err(bad("mixed-case bech32 address"))?;
            }
            if address.len() != 78 || Self::bech32_data(&lowered, "zs").is_none() {
                Err(bad("malformed sapling address"))?;
            }
            return Ok(ClaimType::ZcashSapling);
        }

        if !Self::is_base58(address) {
            Err(bad("address is not base58"))?;
        }
        let ty = if address.starts_with('1') {
            ClaimType::BitcoinP2PKH
        } else if address.starts_with('3') {
            ClaimType::BitcoinP2SH
        } else if address.starts_with("t1") {
            ClaimType::ZcashTransparentP2PKH
        } else if address.starts_with("t3") {
            ClaimType::ZcashTransparentP2SH
        } else if address.starts_with("zc") {
            ClaimType::ZcashShielded
        } else {
            Err(bad("unrecognized address format"))?
        };
        let len_ok = match ty {
            ClaimType::BitcoinP2PKH | ClaimType::BitcoinP2SH => (26..=35).contains(&address.len()),
            ClaimType::ZcashTransparentP2PKH | ClaimType::ZcashTransparentP2SH => address.len() == 35,
            ClaimType::ZcashShielded => address.len() == 95,
            ClaimType::BitcoinBech32 | ClaimType::ZcashSapling => false,
        };
        if !len_ok {
            Err(bad("address has the wrong length"))?;
        }
        Ok(ty)
    }
}

/// Validates an address and works out which family it belongs to.
#[derive(Debug, Clone, Default)]
pub struct ClaimFamilyClassifier<P = StandardAddressParser> {
    parser: P,
}

impl<P: AddressParser> ClaimFamilyClassifier<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }

    /// Turn an address into a [Claim]. If `wanted_family` is given (and not
    /// empty) the address must belong to that family.
    pub fn classify(&self, address: &str, wanted_family: Option<&str>) -> Result<Claim> {
        let ty = self.parser.parse(address)?;
        let family = ty.family();
        match wanted_family {
            Some(wanted) if !wanted.is_empty() && wanted != family.as_str() => {
                Err(Error::InvalidClaim(format!("wanted coin type {:?}, but got {:?}", wanted, family.as_str())))
            }
            _ => Ok(Claim::new(ty, address.to_string())),
        }
    }
}
