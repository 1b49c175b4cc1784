use rand::{rngs::OsRng, Rng};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A Factory for nonce blobs.
#[derive(Clone)]
pub struct NonceFactory {
    inner: Arc<dyn NonceGenerator>,
}

impl NonceFactory {
    /// Creates a nonce factory from any [`NonceGenerator`].
    pub fn from_generator(generator: impl NonceGenerator + 'static) -> Self {
        Self {
            inner: Arc::new(generator),
        }
    }

    /// Creates a nonce factory that generates random blobs using `OsRng`.
    pub fn random() -> NonceFactory {
        Self::from_generator(RandomBlobGenerator)
    }

    /// Creates a nonce factory that returns `None` every time.
    pub fn empty() -> NonceFactory {
        Self::from_generator(EmptyBlobGenerator)
    }

    /// Creates a nonce factory that generates incrementing blobs.
    pub fn incrementing() -> NonceFactory {
        Self::from_generator(IncrementingGenerator::default())
    }

    /// Creates a nonce factory from a closure.
    pub fn from_fn(f: impl Fn() -> Option<Vec<u8>> + Send + Sync + 'static) -> Self {
        Self::from_generator(FnGenerator(f))
    }

    /// Returns the next nonce, or `None` if requests should carry no nonce.
    pub fn generate(&self) -> Option<Vec<u8>> {
        self.inner.generate()
    }
}

impl std::fmt::Debug for NonceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NonceFactory")
    }
}

impl NonceGenerator for NonceFactory {
    fn generate(&self) -> Option<Vec<u8>> {
        NonceFactory::generate(self)
    }
}

/// An interface for generating nonces.
pub trait NonceGenerator: Send + Sync {
    /// Generates a nonce, if one is available. Otherwise, returns None.
    fn generate(&self) -> Option<Vec<u8>>;
}

struct RandomBlobGenerator;

impl NonceGenerator for RandomBlobGenerator {
    fn generate(&self) -> Option<Vec<u8>> {
        Some(OsRng.gen::<[u8; 16]>().to_vec())
    }
}

struct EmptyBlobGenerator;

impl NonceGenerator for EmptyBlobGenerator {
    fn generate(&self) -> Option<Vec<u8>> {
        None
    }
}

#[derive(Default)]
struct IncrementingGenerator {
    next: AtomicU64,
}

impl NonceGenerator for IncrementingGenerator {
    fn generate(&self) -> Option<Vec<u8>> {
        let val = self.next.fetch_add(1, Ordering::Relaxed);
        Some(val.to_le_bytes().to_vec())
    }
}

struct FnGenerator<F>(F);

impl<F: Fn() -> Option<Vec<u8>> + Send + Sync> NonceGenerator for FnGenerator<F> {
    fn generate(&self) -> Option<Vec<u8>> {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_nonces_are_16_bytes_and_distinct() {
        let factory = NonceFactory::random();
        let a = factory.generate().unwrap();
        let b = factory.generate().unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn incrementing_counts_up_and_is_shared_between_clones() {
        let factory = NonceFactory::incrementing();
        let clone = factory.clone();
        assert_eq!(factory.generate(), Some(0u64.to_le_bytes().to_vec()));
        assert_eq!(clone.generate(), Some(1u64.to_le_bytes().to_vec()));
    }

    #[test]
    fn empty_and_custom() {
        assert_eq!(NonceFactory::empty().generate(), None);
        assert_eq!(
            NonceFactory::from_fn(|| Some(b"fixed".to_vec())).generate(),
            Some(b"fixed".to_vec())
        );
    }
}
