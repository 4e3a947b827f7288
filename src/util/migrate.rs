//! Versioned, self-describing binary encoding for persisted state.
//!
//! Rather than relying on a language-native object serializer for whatever
//! happens to be on disk, every persisted type names its current on-disk
//! layout with a single-byte version tag and, where applicable, an older
//! layout that must still be read and upgraded in place. `Persister<T>`
//! (see `ringcoord_util::persister`) is the only consumer of this trait.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type with exactly one on-disk layout: there is no predecessor format to
/// migrate from. Blanket-implements `Migrate` with `Legacy = Self`.
pub trait InitialFormat: Serialize + DeserializeOwned {}

/// A type that can be saved to and loaded from a versioned binary blob.
pub trait Migrate: Serialize + DeserializeOwned + Sized {
	/// Tag byte prefixed to the current on-disk encoding.
	const VERSION_MARK: u8;

	/// The layout accepted on load when no (or a different) version tag is
	/// found, upgraded into `Self` via `Into`. For a type with a single
	/// layout, set this to `Self`.
	type Legacy: DeserializeOwned + Into<Self>;
}

impl<T: InitialFormat> Migrate for T {
	const VERSION_MARK: u8 = 1;
	type Legacy = T;
}
