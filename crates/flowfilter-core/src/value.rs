//! Runtime value representation.
//!
//! [`Value`] is the dynamic counterpart of [`DataType`](crate::types::DataType).
//! Every evaluator step produces a `Value`; the resolver materialises constant
//! symbols as `Value`s; value sources yield one `Value` per field fetch.
//!
//! String and list payloads are `Arc`-backed so that values can be cloned
//! freely during multi-value iteration without copying bytes. Opaque payloads
//! carry compiled artifacts (e.g. an IP trie) and are reclaimed when the last
//! clone is dropped.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{DataType, TypeTag};

/// IP protocol version of an [`IpAddr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Address width in bits: 32 or 128.
    pub fn bit_len(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

/// Error parsing an IP address literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpParseError {
    #[error("invalid IPv4 octet")]
    BadOctet,
    #[error("invalid IPv4 address: expected four octets")]
    BadOctetCount,
    #[error("invalid hex group")]
    BadGroup,
    #[error("invalid IPv6 address: wrong number of groups")]
    BadGroupCount,
    #[error("at most one '::' is allowed")]
    DoubleCompression,
    #[error("prefix length out of range")]
    BadPrefix,
    #[error("empty address literal")]
    Empty,
}

/// An IPv4 or IPv6 address with a prefix length.
///
/// `bytes` is big-endian and zero-padded past the significant length; bits
/// beyond `prefix_len` are always zero (masked on construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpAddr {
    pub version: IpVersion,
    /// 1..=32 for V4, 1..=128 for V6.
    pub prefix_len: u8,
    pub bytes: [u8; 16],
}

impl IpAddr {
    pub fn v4(octets: [u8; 4], prefix_len: u8) -> IpAddr {
        debug_assert!((1..=32).contains(&prefix_len));
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&octets);
        let mut ip = IpAddr {
            version: IpVersion::V4,
            prefix_len,
            bytes,
        };
        ip.mask_tail();
        ip
    }

    pub fn v6(bytes: [u8; 16], prefix_len: u8) -> IpAddr {
        debug_assert!((1..=128).contains(&prefix_len));
        let mut ip = IpAddr {
            version: IpVersion::V6,
            prefix_len,
            bytes,
        };
        ip.mask_tail();
        ip
    }

    /// Zeroes every bit past `prefix_len`.
    fn mask_tail(&mut self) {
        let len = self.prefix_len as usize;
        for (i, byte) in self.bytes.iter_mut().enumerate() {
            let bit_base = i * 8;
            if bit_base >= len {
                *byte = 0;
            } else if bit_base + 8 > len {
                let keep = (len - bit_base) as u32;
                *byte &= 0xffu8 << (8 - keep);
            }
        }
    }

    /// True if the first `nbits` bits of both addresses are equal.
    pub fn bits_match(&self, other: &IpAddr, nbits: u8) -> bool {
        let mut remaining = nbits as usize;
        for i in 0..16 {
            if remaining == 0 {
                return true;
            }
            if remaining >= 8 {
                if self.bytes[i] != other.bytes[i] {
                    return false;
                }
                remaining -= 8;
            } else {
                let shift = 8 - remaining as u32;
                return self.bytes[i] >> shift == other.bytes[i] >> shift;
            }
        }
        true
    }

    /// Implicit-comparison semantics: same version and equal leading bits up
    /// to the shorter of the two prefix lengths.
    pub fn matches(&self, other: &IpAddr) -> bool {
        self.version == other.version
            && self.bits_match(other, self.prefix_len.min(other.prefix_len))
    }

    /// Containment: true if `net`'s stored prefix is a prefix of `self`
    /// (so `192.168.0.7 in 192.168.0.0/24` holds).
    pub fn is_within(&self, net: &IpAddr) -> bool {
        self.version == net.version
            && net.prefix_len <= self.prefix_len
            && self.bits_match(net, net.prefix_len)
    }
}

fn parse_prefix(text: &str, max: u8) -> Result<(&str, Option<u8>), IpParseError> {
    match text.split_once('/') {
        None => Ok((text, None)),
        Some((addr, prefix)) => {
            let n: u8 = prefix.parse().map_err(|_| IpParseError::BadPrefix)?;
            if n == 0 || n > max {
                return Err(IpParseError::BadPrefix);
            }
            Ok((addr, Some(n)))
        }
    }
}

fn parse_v4(text: &str) -> Result<IpAddr, IpParseError> {
    let (addr, prefix) = parse_prefix(text, 32)?;
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in addr.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 {
            return Err(IpParseError::BadOctetCount);
        }
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IpParseError::BadOctet);
        }
        octets[count] = part.parse().map_err(|_| IpParseError::BadOctet)?;
        count += 1;
    }
    if count != 4 {
        return Err(IpParseError::BadOctetCount);
    }
    Ok(IpAddr::v4(octets, prefix.unwrap_or(32)))
}

fn parse_v6_groups(text: &str, out: &mut Vec<u16>) -> Result<(), IpParseError> {
    if text.is_empty() {
        return Ok(());
    }
    for group in text.split(':') {
        if group.is_empty() || group.len() > 4 {
            return Err(IpParseError::BadGroup);
        }
        out.push(u16::from_str_radix(group, 16).map_err(|_| IpParseError::BadGroup)?);
    }
    Ok(())
}

fn parse_v6(text: &str) -> Result<IpAddr, IpParseError> {
    let (addr, prefix) = parse_prefix(text, 128)?;
    if addr.is_empty() {
        return Err(IpParseError::Empty);
    }

    let mut head = Vec::new();
    let mut tail = Vec::new();
    match addr.find("::") {
        Some(pos) => {
            let (before, after) = (&addr[..pos], &addr[pos + 2..]);
            if after.contains("::") {
                return Err(IpParseError::DoubleCompression);
            }
            parse_v6_groups(before, &mut head)?;
            parse_v6_groups(after, &mut tail)?;
            if head.len() + tail.len() > 7 {
                return Err(IpParseError::BadGroupCount);
            }
        }
        None => {
            parse_v6_groups(addr, &mut head)?;
            if head.len() != 8 {
                return Err(IpParseError::BadGroupCount);
            }
        }
    }

    let mut groups = [0u16; 8];
    for (i, g) in head.iter().enumerate() {
        groups[i] = *g;
    }
    for (i, g) in tail.iter().rev().enumerate() {
        groups[7 - i] = *g;
    }
    let mut bytes = [0u8; 16];
    for (i, g) in groups.iter().enumerate() {
        bytes[i * 2] = (g >> 8) as u8;
        bytes[i * 2 + 1] = *g as u8;
    }
    Ok(IpAddr::v6(bytes, prefix.unwrap_or(128)))
}

impl FromStr for IpAddr {
    type Err = IpParseError;

    fn from_str(s: &str) -> Result<IpAddr, IpParseError> {
        if s.contains(':') {
            parse_v6(s)
        } else {
            parse_v4(s)
        }
    }
}

impl fmt::Display for IpAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            IpVersion::V4 => {
                write!(
                    f,
                    "{}.{}.{}.{}",
                    self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]
                )?;
                if self.prefix_len < 32 {
                    write!(f, "/{}", self.prefix_len)?;
                }
            }
            IpVersion::V6 => {
                for i in 0..8 {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    let group = u16::from_be_bytes([self.bytes[i * 2], self.bytes[i * 2 + 1]]);
                    write!(f, "{group:x}")?;
                }
                if self.prefix_len < 128 {
                    write!(f, "/{}", self.prefix_len)?;
                }
            }
        }
        Ok(())
    }
}

/// Error parsing a MAC address literal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: expected six ':'-separated hex octets")]
pub struct MacParseError;

/// A 48-bit MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<MacAddr, MacParseError> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 || part.len() != 2 {
                return Err(MacParseError);
            }
            bytes[count] = u8::from_str_radix(part, 16).map_err(|_| MacParseError)?;
            count += 1;
        }
        if count != 6 {
            return Err(MacParseError);
        }
        Ok(MacAddr(bytes))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// A caller-defined artifact value (e.g. a compiled IP trie).
///
/// Carries the custom type id it was constructed with so the value's
/// [`DataType`] stays recoverable. Equality is identity (same allocation).
#[derive(Clone)]
pub struct Opaque {
    id: u16,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(id: u16, artifact: T) -> Opaque {
        Opaque {
            id,
            inner: Arc::new(artifact),
        }
    }

    pub fn type_id(&self) -> u16 {
        self.id
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque(custom({}))", self.id)
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Opaque) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A runtime filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Flags(u64),
    Str(Arc<str>),
    Mac(MacAddr),
    Ip(IpAddr),
    List(Arc<[Value]>),
    Opaque(Opaque),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: impl Into<Arc<[Value]>>) -> Value {
        Value::List(items.into())
    }

    /// The value's [`DataType`]. A list's element tag comes from its first
    /// item; an empty list has element tag `None`.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Bool(_) => DataType::BOOL,
            Value::UInt(_) => DataType::UINT,
            Value::Int(_) => DataType::INT,
            Value::Float(_) => DataType::FLOAT,
            Value::Flags(_) => DataType::FLAGS,
            Value::Str(_) => DataType::STR,
            Value::Mac(_) => DataType::MAC,
            Value::Ip(_) => DataType::IP,
            Value::List(items) => {
                let elem = items.first().map_or(TypeTag::None, |v| v.data_type().tag);
                DataType::list(elem)
            }
            Value::Opaque(o) => DataType::custom(o.type_id()),
        }
    }

    /// Ordering for the ordered types (numeric, string, ip). `None` for
    /// unordered pairs and NaN comparisons.
    pub fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::Ip(a), Value::Ip(b)) => {
                Some((a.version, a.bytes, a.prefix_len).cmp(&(b.version, b.bytes, b.prefix_len)))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Flags(u) => write!(f, "{u}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Mac(m) => write!(f, "{m}"),
            Value::Ip(ip) => write!(f, "{ip}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Opaque(o) => write!(f, "<custom({})>", o.type_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    // -----------------------------------------------------------------------
    // IP parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_ipv4() {
        let a = ip("127.0.0.1");
        assert_eq!(a.version, IpVersion::V4);
        assert_eq!(a.prefix_len, 32);
        assert_eq!(&a.bytes[..4], &[127, 0, 0, 1]);
    }

    #[test]
    fn parse_ipv4_with_prefix() {
        let a = ip("192.168.0.0/24");
        assert_eq!(a.prefix_len, 24);
        assert_eq!(&a.bytes[..4], &[192, 168, 0, 0]);
    }

    #[test]
    fn parse_ipv4_masks_tail_bits() {
        // Host bits past the prefix are zeroed.
        let a = ip("192.168.0.255/24");
        assert_eq!(&a.bytes[..4], &[192, 168, 0, 0]);
    }

    #[test]
    fn parse_ipv4_rejects_bad_octets() {
        assert!("256.0.0.1".parse::<IpAddr>().is_err());
        assert!("1.2.3".parse::<IpAddr>().is_err());
        assert!("1.2.3.4.5".parse::<IpAddr>().is_err());
        assert!("1.2.3.x".parse::<IpAddr>().is_err());
    }

    #[test]
    fn parse_ipv6_shortened() {
        let a = ip("::1");
        assert_eq!(a.version, IpVersion::V6);
        assert_eq!(a.bytes[15], 1);
        assert!(a.bytes[..15].iter().all(|b| *b == 0));

        let b = ip("1::");
        assert_eq!(b.bytes[1], 1);
        assert!(b.bytes[2..].iter().all(|x| *x == 0));

        let c = ip("aabb:ccdd::");
        assert_eq!(&c.bytes[..4], &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn parse_ipv6_full_form() {
        let a = ip("0011:2233:4455:6677:8899:aabb:ccdd:eeff");
        assert_eq!(
            a.bytes,
            [
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
    }

    #[test]
    fn parse_ipv6_rejects_double_compression() {
        assert_eq!(
            "f::a::f".parse::<IpAddr>(),
            Err(IpParseError::DoubleCompression)
        );
    }

    #[test]
    fn parse_ipv6_with_prefix() {
        assert_eq!(ip("1:2:3:4::/64").prefix_len, 64);
        assert_eq!(ip("::f/120").prefix_len, 120);
    }

    #[test]
    fn parse_ipv6_mixed_tail() {
        let a = ip("f::1:2:3:4:56");
        assert_eq!(a.bytes[1], 0x0f);
        assert_eq!(a.bytes[15], 0x56);
    }

    #[test]
    fn parse_rejects_bad_prefix() {
        assert!("1.2.3.4/0".parse::<IpAddr>().is_err());
        assert!("1.2.3.4/33".parse::<IpAddr>().is_err());
        assert!("::1/129".parse::<IpAddr>().is_err());
    }

    // -----------------------------------------------------------------------
    // IP semantics
    // -----------------------------------------------------------------------

    #[test]
    fn ip_matches_uses_shorter_prefix() {
        assert!(ip("192.168.0.1").matches(&ip("192.168.0.0/24")));
        assert!(ip("192.168.0.0/24").matches(&ip("192.168.0.1")));
        assert!(!ip("192.168.1.1").matches(&ip("192.168.0.0/24")));
    }

    #[test]
    fn ip_matches_requires_same_version() {
        assert!(!ip("127.0.0.1").matches(&ip("::1")));
    }

    #[test]
    fn ip_is_within_prefix() {
        assert!(ip("192.168.0.7").is_within(&ip("192.168.0.0/24")));
        assert!(!ip("192.168.1.7").is_within(&ip("192.168.0.0/24")));
        // A /24 query is not inside a /32 network.
        assert!(!ip("192.168.0.0/24").is_within(&ip("192.168.0.7")));
    }

    #[test]
    fn ip_display_roundtrip() {
        for text in ["127.0.0.1", "192.168.0.0/24", "aabb:ccdd:0:0:0:0:0:0"] {
            let a: IpAddr = text.parse().unwrap();
            assert_eq!(a, a.to_string().parse().unwrap());
        }
    }

    // -----------------------------------------------------------------------
    // MAC
    // -----------------------------------------------------------------------

    #[test]
    fn parse_mac() {
        let m: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(m.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(m.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn parse_mac_rejects_bad_forms() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
        assert!("aab:b:cc:dd:ee:ff".parse::<MacAddr>().is_err());
        assert!("gg:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
    }

    // -----------------------------------------------------------------------
    // Value
    // -----------------------------------------------------------------------

    #[test]
    fn value_data_types() {
        assert_eq!(Value::UInt(1).data_type(), DataType::UINT);
        assert_eq!(
            Value::list(vec![Value::UInt(1), Value::UInt(2)]).data_type(),
            DataType::list(TypeTag::UInt)
        );
        assert_eq!(
            Value::list(Vec::new()).data_type(),
            DataType::list(TypeTag::None)
        );
    }

    #[test]
    fn value_equality_is_deep() {
        let a = Value::list(vec![Value::str("x"), Value::UInt(3)]);
        let b = Value::list(vec![Value::str("x"), Value::UInt(3)]);
        assert_eq!(a, b);
    }

    #[test]
    fn value_ordering() {
        use std::cmp::Ordering::*;
        assert_eq!(Value::UInt(1).partial_cmp(&Value::UInt(2)), Some(Less));
        assert_eq!(
            Value::str("abc").partial_cmp(&Value::str("abd")),
            Some(Less)
        );
        assert_eq!(Value::Float(f64::NAN).partial_cmp(&Value::Float(1.0)), None);
        assert_eq!(Value::UInt(1).partial_cmp(&Value::str("x")), None);
    }

    #[test]
    fn opaque_equality_is_identity() {
        let a = Value::Opaque(Opaque::new(7, 42u32));
        let b = Value::Opaque(Opaque::new(7, 42u32));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
