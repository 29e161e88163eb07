//! Owned-or-borrowed references to shared assets
//!
//! Renderables either share ownership of an asset or borrow one owned
//! elsewhere (an asset library, a scene). The choice is made once, when
//! the reference is built, instead of at every access.

use std::sync::{Arc, Weak};

/// Reference to an asset of type `T`
pub enum AssetRef<T> {
    /// Ref-counted; keeps the asset alive
    Shared(Arc<T>),
    /// Owned elsewhere; resolves to `None` once the owner dropped it
    External(Weak<T>),
}

impl<T> AssetRef<T> {
    /// Share ownership of `asset`
    pub fn shared(asset: Arc<T>) -> Self {
        Self::Shared(asset)
    }

    /// Borrow `asset` without keeping it alive
    pub fn external(asset: &Arc<T>) -> Self {
        Self::External(Arc::downgrade(asset))
    }

    /// Resolve to a strong reference while the asset exists
    pub fn get(&self) -> Option<Arc<T>> {
        match self {
            Self::Shared(asset) => Some(asset.clone()),
            Self::External(asset) => asset.upgrade(),
        }
    }

    /// Whether this reference keeps the asset alive
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Whether this refers to `asset`
    pub fn refers_to(&self, asset: &Arc<T>) -> bool {
        match self {
            Self::Shared(own) => Arc::ptr_eq(own, asset),
            Self::External(own) => std::ptr::eq(own.as_ptr(), Arc::as_ptr(asset)),
        }
    }
}

impl<T> Clone for AssetRef<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Shared(asset) => Self::Shared(asset.clone()),
            Self::External(asset) => Self::External(asset.clone()),
        }
    }
}

impl<T> From<Arc<T>> for AssetRef<T> {
    fn from(asset: Arc<T>) -> Self {
        Self::Shared(asset)
    }
}

impl<T> std::fmt::Debug for AssetRef<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("AssetRef::Shared"),
            Self::External(asset) => write!(f, "AssetRef::External(alive: {})", asset.strong_count() > 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_does_not_keep_asset_alive() {
        let asset = Arc::new(String::from("font"));
        let borrowed = AssetRef::external(&asset);
        assert!(!borrowed.is_shared());
        assert!(borrowed.refers_to(&asset));
        assert_eq!(borrowed.get().as_deref().map(String::as_str), Some("font"));

        drop(asset);
        assert!(borrowed.get().is_none());
    }

    #[test]
    fn test_shared_keeps_asset_alive() {
        let asset = Arc::new(5u32);
        let owned = AssetRef::from(asset.clone());
        drop(asset);
        assert!(owned.is_shared());
        assert_eq!(owned.get().as_deref(), Some(&5));
    }
}
