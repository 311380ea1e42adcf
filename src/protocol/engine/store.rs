use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::protocol::{
    aurora::decode::{decode, RegisterEncoding, RegisterValue},
    error::DecodeError,
};

#[derive(Debug, Default)]
struct StoreInner {
    words: HashMap<u16, u16>,
    values: HashMap<u16, RegisterValue>,
}

/// What one commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Every address the commit covered.
    pub committed: Vec<u16>,
    /// Addresses whose raw word differs from what was stored before.
    pub changed: Vec<u16>,
}

/// Last known good register contents.
///
/// Written only by the poll cycle; readers see either the previous or the new
/// value of a batch, never a mix. Faults never clear it.
#[derive(Debug, Default)]
pub struct RegisterStore {
    inner: RwLock<StoreInner>,
    encodings: BTreeMap<u16, RegisterEncoding>,
}

impl RegisterStore {
    /// A store that decodes each head address in `encodings` at commit time.
    pub fn new(encodings: BTreeMap<u16, RegisterEncoding>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            encodings,
        }
    }

    /// Commit one validated reply. `addresses[i]` carries `words[i]`.
    ///
    /// Values are decoded before anything is written: a decode failure leaves
    /// the store untouched.
    pub fn commit_batch(
        &self,
        addresses: &[u16],
        words: &[u16],
    ) -> Result<CommitSummary, DecodeError> {
        if addresses.len() != words.len() {
            return Err(DecodeError::Width {
                address: addresses.first().copied().unwrap_or_default(),
                needed: addresses.len(),
                available: words.len(),
            });
        }

        let incoming: HashMap<u16, u16> = addresses.iter().copied().zip(words.iter().copied()).collect();

        let mut staged = Vec::new();
        {
            let inner = self.inner.read();
            for &address in addresses {
                let Some(encoding) = self.encodings.get(&address) else {
                    continue;
                };
                let width = encoding.width();
                let span: Vec<u16> = (0..width)
                    .map_while(|i| {
                        let a = address.checked_add(i as u16)?;
                        incoming.get(&a).or_else(|| inner.words.get(&a)).copied()
                    })
                    .collect();
                staged.push((address, decode(address, &span, *encoding)?));
            }
        }

        let mut inner = self.inner.write();
        let mut summary = CommitSummary::default();
        for (&address, &word) in addresses.iter().zip(words) {
            if inner.words.insert(address, word) != Some(word) {
                summary.changed.push(address);
            }
            summary.committed.push(address);
        }
        for (address, value) in staged {
            inner.values.insert(address, value);
        }
        Ok(summary)
    }

    /// Decoded value of `address`. Unbound addresses read as their raw integer.
    pub fn get(&self, address: u16) -> RegisterValue {
        let inner = self.inner.read();
        if let Some(value) = inner.values.get(&address) {
            return value.clone();
        }
        inner
            .words
            .get(&address)
            .map_or(RegisterValue::Unset, |w| RegisterValue::Integer(*w as i64))
    }

    pub fn raw(&self, address: u16) -> Option<u16> {
        self.inner.read().words.get(&address).copied()
    }

    /// `n` consecutive raw words starting at `address`, if all have been read.
    pub fn words(&self, address: u16, n: usize) -> Option<Vec<u16>> {
        let inner = self.inner.read();
        (0..n)
            .map(|i| {
                address
                    .checked_add(i as u16)
                    .and_then(|a| inner.words.get(&a).copied())
            })
            .collect()
    }

    pub fn is_valid(&self, address: u16) -> bool {
        self.inner.read().words.contains_key(&address)
    }

    pub fn encoding(&self, address: u16) -> Option<RegisterEncoding> {
        self.encodings.get(&address).copied()
    }

    /// Raw words of every address read so far, in address order.
    pub fn snapshot(&self) -> BTreeMap<u16, u16> {
        self.inner
            .read()
            .words
            .iter()
            .map(|(a, w)| (*a, *w))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().words.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RegisterStore {
        let mut encodings = BTreeMap::new();
        encodings.insert(1111, RegisterEncoding::SignedTenths);
        encodings.insert(1146, RegisterEncoding::UnsignedInt32);
        RegisterStore::new(encodings)
    }

    #[test]
    fn test_commit_and_get() {
        let store = store();
        assert_eq!(store.get(1111), RegisterValue::Unset);

        let summary = store.commit_batch(&[1111, 30], &[0xFF9C, 5]).unwrap();
        assert_eq!(summary.changed, vec![1111, 30]);
        assert_eq!(store.get(1111), RegisterValue::Float(-10.0));
        assert_eq!(store.get(30), RegisterValue::Integer(5));
        assert_eq!(store.raw(30), Some(5));

        let summary = store.commit_batch(&[1111, 30], &[0xFF9C, 5]).unwrap();
        assert!(summary.changed.is_empty());
        assert_eq!(summary.committed.len(), 2);
    }

    #[test]
    fn test_32_bit_decode() {
        let store = store();
        store.commit_batch(&[1146, 1147], &[0x0001, 0x0000]).unwrap();
        assert_eq!(store.get(1146), RegisterValue::Integer(65536));
        assert_eq!(store.words(1146, 2), Some(vec![1, 0]));
        assert_eq!(store.words(1146, 3), None);
    }

    #[test]
    fn test_failed_decode_leaves_store_untouched() {
        let store = store();
        store.commit_batch(&[30], &[1]).unwrap();
        // Low word of the 32-bit pair missing
        let err = store.commit_batch(&[30, 1146], &[2, 7]).unwrap_err();
        assert!(matches!(err, DecodeError::Width { address: 1146, .. }));
        assert_eq!(store.raw(30), Some(1));
        assert!(!store.is_valid(1146));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let store = store();
        assert!(store.commit_batch(&[1, 2], &[1]).is_err());
        assert!(store.is_empty());
    }
}
