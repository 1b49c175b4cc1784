//! Merkle hash trees as returned in certificates.
//!
//! A hash tree is a partial view of the replicated state tree: labeled paths lead to
//! leaves, and whole subtrees can be replaced by their digest ([`HashTree::Pruned`]).
//! The root digest of the partial view is the same as the one of the full tree it was
//! cut from, which is what the certificate signature covers.

use hex::FromHexError;
use sha2::{Digest, Sha256};
use std::fmt;

/// Sha256 Digest: 32 bytes
pub type Sha256Digest = [u8; 32];

/// A label of a [`HashTree::Labeled`] node. Labels are compared byte for byte.
#[derive(Clone, Hash, Ord, PartialOrd, Eq, PartialEq)]
pub struct Label(Vec<u8>);

impl Label {
    /// Returns this label as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the label and returns the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Label {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}
impl<'a> From<&'a [u8]> for Label {
    fn from(v: &'a [u8]) -> Self {
        Self(v.to_vec())
    }
}
impl<const N: usize> From<[u8; N]> for Label {
    fn from(v: [u8; N]) -> Self {
        Self(v.to_vec())
    }
}
impl<'a, const N: usize> From<&'a [u8; N]> for Label {
    fn from(v: &'a [u8; N]) -> Self {
        Self(v.to_vec())
    }
}
impl<'a> From<&'a str> for Label {
    fn from(s: &'a str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}
impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Label {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Printable labels are shown as strings, anything else as hex.
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "\"{s}\""),
            _ => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A node of a hash tree.
///
/// cf <https://internetcomputer.org/docs/current/references/ic-interface-spec/#certification-encoding>
#[derive(Clone, PartialEq, Eq)]
pub enum HashTree {
    /// The empty tree.
    Empty,
    /// Two sibling subtrees.
    Fork(Box<(HashTree, HashTree)>),
    /// A subtree under a label.
    Labeled(Label, Box<HashTree>),
    /// A value.
    Leaf(Vec<u8>),
    /// A subtree that was elided, represented by its digest.
    Pruned(Sha256Digest),
}

impl HashTree {
    /// Recomputes the root digest of the full tree this tree was cut from.
    ///
    /// Pruned digests are used as they are.
    pub fn digest(&self) -> Sha256Digest {
        let mut hasher = Sha256::new();
        match self {
            HashTree::Empty => {
                domain_sep(&mut hasher, "ic-hashtree-empty");
            }
            HashTree::Fork(nodes) => {
                domain_sep(&mut hasher, "ic-hashtree-fork");
                hasher.update(nodes.0.digest());
                hasher.update(nodes.1.digest());
            }
            HashTree::Labeled(label, node) => {
                domain_sep(&mut hasher, "ic-hashtree-labeled");
                hasher.update(label.as_bytes());
                hasher.update(node.digest());
            }
            HashTree::Leaf(bytes) => {
                domain_sep(&mut hasher, "ic-hashtree-leaf");
                hasher.update(bytes);
            }
            HashTree::Pruned(digest) => return *digest,
        }
        hasher.finalize().into()
    }

    /// Returns the leaf bytes at `path`, or `None` if this tree does not contain them.
    ///
    /// A path leading into a pruned subtree is not found: pruned content cannot be
    /// inspected. An empty path only finds something if this node is a leaf.
    pub fn lookup_path<P>(&self, path: P) -> Option<&[u8]>
    where
        P: IntoIterator,
        P::Item: AsRef<[u8]>,
    {
        let mut node = self;
        for segment in path {
            node = node.find_label(segment.as_ref())?;
        }
        match node {
            HashTree::Leaf(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the subtree at `path`, or `None` if this tree does not contain it.
    pub fn lookup_subtree<P>(&self, path: P) -> Option<&HashTree>
    where
        P: IntoIterator,
        P::Item: AsRef<[u8]>,
    {
        let mut node = self;
        for segment in path {
            node = node.find_label(segment.as_ref())?;
        }
        Some(node)
    }

    /// The labeled children of this node, with nested forks flattened.
    pub fn children(&self) -> Vec<(&Label, &HashTree)> {
        self.flatten_forks()
            .into_iter()
            .filter_map(|node| match node {
                HashTree::Labeled(label, sub) => Some((label, sub.as_ref())),
                _ => None,
            })
            .collect()
    }

    /// Every labeled path to a leaf in this tree.
    pub fn list_paths(&self) -> Vec<Vec<Label>> {
        let mut paths = vec![];
        self.collect_paths(&mut vec![], &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &mut Vec<Label>, out: &mut Vec<Vec<Label>>) {
        match self {
            HashTree::Empty | HashTree::Pruned(_) => {}
            HashTree::Leaf(_) => out.push(prefix.clone()),
            HashTree::Fork(nodes) => {
                nodes.0.collect_paths(prefix, out);
                nodes.1.collect_paths(prefix, out);
            }
            HashTree::Labeled(label, node) => {
                prefix.push(label.clone());
                node.collect_paths(prefix, out);
                prefix.pop();
            }
        }
    }

    fn find_label(&self, label: &[u8]) -> Option<&HashTree> {
        self.flatten_forks().into_iter().find_map(|node| match node {
            HashTree::Labeled(l, sub) if l.as_bytes() == label => Some(sub.as_ref()),
            _ => None,
        })
    }

    fn flatten_forks(&self) -> Vec<&HashTree> {
        let mut out = vec![];
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                HashTree::Fork(nodes) => {
                    stack.push(&nodes.1);
                    stack.push(&nodes.0);
                }
                HashTree::Empty => {}
                other => out.push(other),
            }
        }
        out
    }
}

/// Update a hasher with the domain separator (byte(|s|) . s).
fn domain_sep(hasher: &mut Sha256, sep: &str) {
    hasher.update([sep.len() as u8]);
    hasher.update(sep.as_bytes());
}

impl fmt::Debug for HashTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn readable(f: &mut fmt::Formatter<'_>, v: &[u8]) -> fmt::Result {
            match std::str::from_utf8(v) {
                Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "\"{s}\""),
                _ if v.len() <= 32 => write!(f, "0x{}", hex::encode(v)),
                _ => write!(f, "{} bytes", v.len()),
            }
        }

        match self {
            HashTree::Empty => f.write_str("Empty"),
            HashTree::Fork(nodes) => f
                .debug_tuple("Fork")
                .field(&nodes.0)
                .field(&nodes.1)
                .finish(),
            HashTree::Labeled(l, node) => {
                f.write_str("Label(")?;
                readable(f, l.as_bytes())?;
                f.write_str(", ")?;
                node.fmt(f)?;
                f.write_str(")")
            }
            HashTree::Leaf(v) => {
                f.write_str("Leaf(")?;
                readable(f, v)?;
                f.write_str(")")
            }
            HashTree::Pruned(digest) => write!(f, "Pruned({})", hex::encode(digest)),
        }
    }
}

/// Create an empty hash tree.
#[inline]
pub fn empty() -> HashTree {
    HashTree::Empty
}

/// Create a forked tree from two trees.
#[inline]
pub fn fork(left: HashTree, right: HashTree) -> HashTree {
    HashTree::Fork(Box::new((left, right)))
}

/// Create a labeled hash tree.
#[inline]
pub fn label<L: Into<Label>>(label: L, node: HashTree) -> HashTree {
    HashTree::Labeled(label.into(), Box::new(node))
}

/// Create a leaf in the tree.
#[inline]
pub fn leaf<L: Into<Vec<u8>>>(leaf: L) -> HashTree {
    HashTree::Leaf(leaf.into())
}

/// Create a pruned tree node.
#[inline]
pub fn pruned<C: Into<Sha256Digest>>(content: C) -> HashTree {
    HashTree::Pruned(content.into())
}

/// Create a pruned tree node from a hex representation of the digest.
pub fn pruned_from_hex<C: AsRef<str>>(content: C) -> Result<HashTree, FromHexError> {
    let mut digest: Sha256Digest = [0; 32];
    hex::decode_to_slice(content.as_ref(), &mut digest)?;
    Ok(pruned(digest))
}

mod serde_impl {
    use super::{HashTree, Label};
    use serde::{
        de::{self, SeqAccess, Visitor},
        ser::SerializeSeq,
        Deserialize, Deserializer, Serialize, Serializer,
    };
    use serde_bytes::{ByteBuf, Bytes};
    use std::fmt;

    impl Serialize for Label {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            if serializer.is_human_readable() {
                serializer.serialize_str(&hex::encode(&self.0))
            } else {
                serializer.serialize_bytes(&self.0)
            }
        }
    }

    impl<'de> Deserialize<'de> for Label {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            ByteBuf::deserialize(deserializer).map(|b| Label(b.into_vec()))
        }
    }

    // hash-tree ::= [0] | [1 hash-tree hash-tree] | [2 bytes hash-tree] | [3 bytes] | [4 hash]
    impl Serialize for HashTree {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                HashTree::Empty => {
                    let mut seq = serializer.serialize_seq(Some(1))?;
                    seq.serialize_element(&0u8)?;
                    seq.end()
                }
                HashTree::Fork(nodes) => {
                    let mut seq = serializer.serialize_seq(Some(3))?;
                    seq.serialize_element(&1u8)?;
                    seq.serialize_element(&nodes.0)?;
                    seq.serialize_element(&nodes.1)?;
                    seq.end()
                }
                HashTree::Labeled(label, node) => {
                    let mut seq = serializer.serialize_seq(Some(3))?;
                    seq.serialize_element(&2u8)?;
                    seq.serialize_element(Bytes::new(label.as_bytes()))?;
                    seq.serialize_element(node)?;
                    seq.end()
                }
                HashTree::Leaf(bytes) => {
                    let mut seq = serializer.serialize_seq(Some(2))?;
                    seq.serialize_element(&3u8)?;
                    seq.serialize_element(Bytes::new(bytes))?;
                    seq.end()
                }
                HashTree::Pruned(digest) => {
                    let mut seq = serializer.serialize_seq(Some(2))?;
                    seq.serialize_element(&4u8)?;
                    seq.serialize_element(Bytes::new(digest))?;
                    seq.end()
                }
            }
        }
    }

    struct HashTreeVisitor;

    impl HashTreeVisitor {
        fn finish<'de, V: SeqAccess<'de>>(
            &self,
            mut seq: V,
            len: usize,
        ) -> Result<(), V::Error> {
            if let Some(de::IgnoredAny) = seq.next_element()? {
                return Err(de::Error::invalid_length(len + 1, self));
            }
            Ok(())
        }
    }

    impl<'de> Visitor<'de> for HashTreeVisitor {
        type Value = HashTree;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str(
                "HashTree encoded as a sequence of the form \
                 hash-tree ::= [0] | [1 hash-tree hash-tree] | [2 bytes hash-tree] | [3 bytes] | [4 hash]",
            )
        }

        fn visit_seq<V: SeqAccess<'de>>(self, mut seq: V) -> Result<Self::Value, V::Error> {
            let tag: u8 = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(0, &self))?;

            let tree = match tag {
                0 => {
                    self.finish(seq, 1)?;
                    HashTree::Empty
                }
                1 => {
                    let left: HashTree = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                    let right: HashTree = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                    self.finish(seq, 3)?;
                    HashTree::Fork(Box::new((left, right)))
                }
                2 => {
                    let label: ByteBuf = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                    let subtree: HashTree = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                    self.finish(seq, 3)?;
                    HashTree::Labeled(Label(label.into_vec()), Box::new(subtree))
                }
                3 => {
                    let bytes: ByteBuf = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                    self.finish(seq, 2)?;
                    HashTree::Leaf(bytes.into_vec())
                }
                4 => {
                    let digest: ByteBuf = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                    self.finish(seq, 2)?;
                    let digest = <[u8; 32]>::try_from(digest.as_slice()).map_err(|_| {
                        de::Error::invalid_length(digest.len(), &"a 32-byte digest")
                    })?;
                    HashTree::Pruned(digest)
                }
                _ => {
                    return Err(de::Error::custom(format!(
                        "Unknown tag: {tag}, expected the tag to be one of {{0, 1, 2, 3, 4}}"
                    )))
                }
            };
            Ok(tree)
        }
    }

    impl<'de> Deserialize<'de> for HashTree {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_seq(HashTreeVisitor)
        }
    }
}

#[cfg(test)]
mod tests;
