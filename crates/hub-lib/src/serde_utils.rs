use serde::{de::Error, Deserialize, Deserializer, Serializer};
use serde_with::{DeserializeAs, SerializeAs};

fn strip_hex_prefix(value: &str) -> Result<&str, String> {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| format!("hex string does not start with 0x: {}", value))
}

/// Byte strings as `0x`-prefixed hex.
pub struct SliceHex;

impl<T> SerializeAs<T> for SliceHex
where
    T: AsRef<[u8]>,
{
    fn serialize_as<S>(source: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(source.as_ref())))
    }
}

impl<'de, T> DeserializeAs<'de, T> for SliceHex
where
    T: TryFrom<Vec<u8>>,
{
    fn deserialize_as<D>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let bytes = hex::decode(strip_hex_prefix(&value).map_err(Error::custom)?)
            .map_err(|err| Error::custom(format!("invalid hex string {}: {}", value, err)))?;
        let len = bytes.len();
        T::try_from(bytes).map_err(|_| Error::custom(format!("unexpected byte length {}", len)))
    }
}

pub trait HexUint: Sized + std::fmt::LowerHex {
    fn from_hex_digits(digits: &str) -> Result<Self, std::num::ParseIntError>;
}

impl HexUint for u64 {
    fn from_hex_digits(digits: &str) -> Result<Self, std::num::ParseIntError> {
        u64::from_str_radix(digits, 16)
    }
}

impl HexUint for u128 {
    fn from_hex_digits(digits: &str) -> Result<Self, std::num::ParseIntError> {
        u128::from_str_radix(digits, 16)
    }
}

/// Unsigned integers as minimal `0x`-prefixed hex, the JSON-RPC convention.
pub struct UintHex;
pub type U128Hex = UintHex;
pub type U64Hex = UintHex;

impl<T: HexUint> SerializeAs<T> for UintHex {
    fn serialize_as<S>(source: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:#x}", source))
    }
}

impl<'de, T: HexUint> DeserializeAs<'de, T> for UintHex {
    fn deserialize_as<D>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        let digits = strip_hex_prefix(&value).map_err(Error::custom)?;
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(Error::custom(format!(
                "hex integer has leading zeros: {}",
                value
            )));
        }
        T::from_hex_digits(digits)
            .map_err(|err| Error::custom(format!("invalid hex integer {}: {}", value, err)))
    }
}

/// Settlement-layer integers, delivered either as JSON numbers or as decimal
/// strings optionally carrying the contract language's `u` prefix.
pub struct Decimal;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn parse_decimal<T: std::str::FromStr>(value: NumberOrString) -> Result<T, String>
where
    T: TryFrom<u64>,
{
    match value {
        NumberOrString::Number(n) => {
            T::try_from(n).map_err(|_| format!("integer {} out of range", n))
        }
        NumberOrString::String(s) => {
            let digits = s.strip_prefix('u').unwrap_or(&s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("invalid decimal integer: {}", s));
            }
            digits
                .parse::<T>()
                .map_err(|_| format!("decimal integer out of range: {}", s))
        }
    }
}

impl SerializeAs<u128> for Decimal {
    fn serialize_as<S>(source: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&source.to_string())
    }
}

impl<'de> DeserializeAs<'de, u128> for Decimal {
    fn deserialize_as<D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_decimal(NumberOrString::deserialize(deserializer)?).map_err(Error::custom)
    }
}

impl SerializeAs<u64> for Decimal {
    fn serialize_as<S>(source: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(*source)
    }
}

impl<'de> DeserializeAs<'de, u64> for Decimal {
    fn deserialize_as<D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        parse_decimal(NumberOrString::deserialize(deserializer)?).map_err(Error::custom)
    }
}
