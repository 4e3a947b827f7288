//! Generic persister for versioned, self-describing binary state, used by
//! `MembershipState::save`/`load` (see `ringcoord_cluster::membership`).
//!
//! Writes are single-writer and atomic: encode to a temp file created next
//! to the target (so the final `rename` stays on the same filesystem), then
//! rename over the destination. Reads accept either the current,
//! version-tagged layout or the type's declared legacy layout.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Error;
use crate::migrate::Migrate;

pub struct Persister<T> {
	path: PathBuf,
	_marker: std::marker::PhantomData<T>,
}

impl<T: Migrate> Persister<T> {
	/// `dir` is the directory the file lives in (`Config::directory`);
	/// `name` is the file stem, e.g. the local node's name.
	pub fn new(dir: &Path, name: &str) -> Self {
		Persister {
			path: dir.join(format!("{}.bin", name)),
			_marker: std::marker::PhantomData,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn load(&self) -> Result<T, Error> {
		let bytes = fs::read(&self.path)?;
		decode(&bytes, &self.path)
	}

	pub async fn load_async(&self) -> Result<T, Error> {
		let bytes = tokio::fs::read(&self.path).await?;
		decode(&bytes, &self.path)
	}

	pub fn save(&self, value: &T) -> Result<(), Error> {
		let bytes = encode(value)?;
		debug!(path = %self.path.display(), bytes = bytes.len(), "persisting state");
		atomic_write(&self.path, &bytes)
	}

	pub async fn save_async(&self, value: &T) -> Result<(), Error> {
		let bytes = encode(value)?;
		let path = self.path.clone();
		tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
			.await
			.map_err(|e| Error::message(format!("persister save task panicked: {}", e)))?
	}
}

fn encode<T: Migrate>(value: &T) -> Result<Vec<u8>, Error> {
	let mut buf = Vec::with_capacity(128);
	buf.push(T::VERSION_MARK);
	rmp_serde::encode::write(&mut buf, value)?;
	Ok(buf)
}

fn decode<T: Migrate>(bytes: &[u8], path: &Path) -> Result<T, Error> {
	match bytes.split_first() {
		Some((tag, rest)) if *tag == T::VERSION_MARK => {
			rmp_serde::from_slice(rest).map_err(Error::from)
		}
		_ => {
			warn!(path = %path.display(), "loading legacy (untagged) persisted layout, upgrading in place");
			let legacy: T::Legacy = rmp_serde::from_slice(bytes)
				.map_err(|e| Error::CorruptData(format!("unreadable legacy layout: {}", e)))?;
			Ok(legacy.into())
		}
	}
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), Error> {
	let dir = path.parent().unwrap_or_else(|| Path::new("."));
	fs::create_dir_all(dir)?;
	let tmp = mktemp::Temp::new_file_in(dir)
		.map_err(|e| Error::message(format!("could not create temp file for atomic save: {}", e)))?
		.release();
	fs::write(&tmp, bytes)?;
	fs::rename(&tmp, path)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::migrate::InitialFormat;
	use serde::{Deserialize, Serialize};

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Doc {
		n: u64,
	}
	impl InitialFormat for Doc {}

	#[test]
	fn save_then_load_roundtrips() {
		let dir = mktemp::Temp::new_dir().unwrap();
		let p: Persister<Doc> = Persister::new(dir.as_path(), "node-a");
		let doc = Doc { n: 42 };
		p.save(&doc).unwrap();
		let loaded = p.load().unwrap();
		assert_eq!(doc, loaded);
	}

	#[test]
	fn load_missing_file_errors() {
		let dir = mktemp::Temp::new_dir().unwrap();
		let p: Persister<Doc> = Persister::new(dir.as_path(), "node-a");
		assert!(p.load().is_err());
	}
}
