//! Binary radix trie over IP address bit-strings.
//!
//! Stores a set of IPv4/IPv6 prefixes (one root per version) and answers
//! membership with prefix semantics: [`IpTrie::contains`] is true when any
//! stored prefix is a prefix of the queried address. Lookup cost is bounded
//! by the address length in bits regardless of how many prefixes are stored.
//!
//! Each node holds up to 32 prefix bits; the branch bit after a node's
//! prefix is implied by which child slot is taken. Inserting an address that
//! diverges inside a node's prefix splits the node at the first differing
//! bit. Terminal nodes (`is_intermediate == false`) mark ends of stored
//! prefixes and dominate anything stored beneath them.

use crate::value::{IpAddr, IpVersion};

/// Custom type id under which compiled tries travel as opaque values.
pub const TRIE_TYPE_ID: u16 = 1;

#[derive(Debug)]
struct Node {
    /// Up to 32 prefix bits, left-aligned.
    prefix: u32,
    /// 0..=32.
    prefix_len: u8,
    is_intermediate: bool,
    children: [Option<Box<Node>>; 2],
}

/// Cursor over the bits of one address, most-significant bit first.
struct Bits {
    words: [u32; 4],
    len: u16,
    pos: u16,
}

impl Bits {
    fn new(ip: &IpAddr) -> Bits {
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u32::from_be_bytes([
                ip.bytes[i * 4],
                ip.bytes[i * 4 + 1],
                ip.bytes[i * 4 + 2],
                ip.bytes[i * 4 + 3],
            ]);
        }
        Bits {
            words,
            len: ip.prefix_len as u16,
            pos: 0,
        }
    }

    fn remaining(&self) -> u16 {
        self.len - self.pos
    }

    /// The next `n` bits (`n <= 32`), left-aligned and zero-padded.
    fn peek(&self, n: u8) -> u32 {
        if n == 0 {
            return 0;
        }
        let word = (self.pos / 32) as usize;
        let off = self.pos % 32;
        let mut v = self.words[word] << off;
        if off as u32 + n as u32 > 32 && word + 1 < 4 {
            v |= self.words[word + 1] >> (32 - off);
        }
        v & (u32::MAX << (32 - n as u32))
    }

    fn advance(&mut self, n: u16) {
        self.pos += n;
    }
}

/// Length of the common prefix of two left-aligned bit-strings, capped.
fn common_len(a: u32, b: u32, limit: u8) -> u8 {
    ((a ^ b).leading_zeros() as u8).min(limit)
}

/// Keep only the top `n` bits of a left-aligned word.
fn top_bits(v: u32, n: u8) -> u32 {
    if n == 0 {
        0
    } else {
        v & (u32::MAX << (32 - n as u32))
    }
}

/// A set of IP prefixes with one radix trie per IP version.
#[derive(Debug, Default)]
pub struct IpTrie {
    roots: [Option<Box<Node>>; 2],
}

impl IpTrie {
    pub fn new() -> IpTrie {
        IpTrie::default()
    }

    fn root_index(version: IpVersion) -> usize {
        match version {
            IpVersion::V4 => 0,
            IpVersion::V6 => 1,
        }
    }

    /// Inserts the address's `prefix_len`-bit prefix.
    pub fn add(&mut self, ip: &IpAddr) {
        let mut bits = Bits::new(ip);
        debug_assert!(bits.remaining() > 0);
        Self::add_at(&mut self.roots[Self::root_index(ip.version)], &mut bits);
    }

    fn add_at(slot: &mut Option<Box<Node>>, bits: &mut Bits) {
        let node = match slot {
            None => {
                *slot = Some(Self::chain(bits));
                return;
            }
            Some(node) => node,
        };

        let chunk = (node.prefix_len as u16).min(bits.remaining()) as u8;
        let common = common_len(bits.peek(chunk), node.prefix, chunk);

        if common < chunk {
            // Diverges inside both the node's prefix and the address.
            Self::split(node, common);
            bits.advance(common as u16);
            let bit = (bits.peek(1) >> 31) as usize;
            bits.advance(1);
            debug_assert!(node.children[bit].is_none());
            node.children[bit] = Some(Self::chain(bits));
        } else if bits.remaining() < node.prefix_len as u16 {
            // The address ends inside the node's prefix; split there and the
            // head becomes a terminal that dominates the old tail.
            Self::split(node, chunk);
            node.is_intermediate = false;
        } else if bits.remaining() == node.prefix_len as u16 {
            // Exact: re-inserting the same prefix is a no-op structurally.
            node.is_intermediate = false;
        } else {
            // The node's prefix is exhausted; descend along the branch bit.
            bits.advance(node.prefix_len as u16);
            let bit = (bits.peek(1) >> 31) as usize;
            bits.advance(1);
            Self::add_at(&mut node.children[bit], bits);
        }
    }

    /// Splits `node` so its prefix ends after `at` bits. The remainder (past
    /// the implied branch bit) moves into a child that keeps the old
    /// children and terminal flag.
    fn split(node: &mut Node, at: u8) {
        debug_assert!(at < node.prefix_len);
        let old_bit = ((node.prefix >> (31 - at as u32)) & 1) as usize;
        let tail_len = node.prefix_len - at - 1;
        let tail_prefix = if tail_len == 0 {
            0
        } else {
            top_bits(node.prefix << (at as u32 + 1), tail_len)
        };
        let tail = Node {
            prefix: tail_prefix,
            prefix_len: tail_len,
            is_intermediate: node.is_intermediate,
            children: std::mem::take(&mut node.children),
        };
        node.prefix = top_bits(node.prefix, at);
        node.prefix_len = at;
        node.is_intermediate = true;
        node.children[old_bit] = Some(Box::new(tail));
    }

    /// Builds the node chain holding all remaining address bits.
    fn chain(bits: &mut Bits) -> Box<Node> {
        if bits.remaining() > 32 {
            let prefix = bits.peek(31);
            bits.advance(31);
            let bit = (bits.peek(1) >> 31) as usize;
            bits.advance(1);
            let mut node = Node {
                prefix,
                prefix_len: 31,
                is_intermediate: true,
                children: [None, None],
            };
            node.children[bit] = Some(Self::chain(bits));
            Box::new(node)
        } else {
            let n = bits.remaining() as u8;
            let prefix = bits.peek(n);
            bits.advance(n as u16);
            Box::new(Node {
                prefix,
                prefix_len: n,
                is_intermediate: false,
                children: [None, None],
            })
        }
    }

    /// True if some stored prefix is a prefix of the queried address.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        let mut bits = Bits::new(ip);
        let mut node = match &self.roots[Self::root_index(ip.version)] {
            Some(node) => node,
            None => return false,
        };
        loop {
            if bits.remaining() < node.prefix_len as u16 {
                return false;
            }
            if bits.peek(node.prefix_len) != node.prefix {
                return false;
            }
            if !node.is_intermediate {
                return true;
            }
            bits.advance(node.prefix_len as u16);
            if bits.remaining() == 0 {
                // Query exhausted at an intermediate node: everything stored
                // below is longer than the query.
                return false;
            }
            let bit = (bits.peek(1) >> 31) as usize;
            bits.advance(1);
            match &node.children[bit] {
                Some(child) => node = child,
                None => return false,
            }
        }
    }

    /// Total node count across both versions. Exposed so callers can check
    /// structural idempotency of repeated inserts.
    pub fn node_count(&self) -> usize {
        fn count(node: &Option<Box<Node>>) -> usize {
            match node {
                None => 0,
                Some(n) => 1 + count(&n.children[0]) + count(&n.children[1]),
            }
        }
        count(&self.roots[0]) + count(&self.roots[1])
    }
}
