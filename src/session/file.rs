//! Single-principal session persisted to a JSON file, for scripts and command-line tools.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Character, Principal},
	session::Session,
	store::{StoreError, StoreFuture},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct FileContents {
	principal: Principal,
	character: Character,
	token: Option<AccessToken>,
}

/// Session stored as one JSON document; every token replacement rewrites the file.
#[derive(Debug)]
pub struct FileSession {
	path: PathBuf,
	principal: Principal,
	character: Character,
	token: RwLock<Option<AccessToken>>,
}
impl FileSession {
	/// Creates (or overwrites) the session file at `path`.
	pub fn create(
		path: impl Into<PathBuf>,
		principal: Principal,
		character: Character,
		token: Option<AccessToken>,
	) -> Result<Self, StoreError> {
		let session = Self { path: path.into(), principal, character, token: RwLock::new(token) };

		session.write_snapshot(&session.token.read())?;

		Ok(session)
	}

	/// Opens an existing session file.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();
		let bytes = fs::read(&path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;
		let contents: FileContents =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(Self {
			path,
			principal: contents.principal,
			character: contents.character,
			token: RwLock::new(contents.token),
		})
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create session directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn write_snapshot(&self, token: &Option<AccessToken>) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let contents = FileContents {
			principal: self.principal.clone(),
			character: self.character.clone(),
			token: token.clone(),
		};
		let serialized =
			serde_json::to_vec_pretty(&contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize session: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl Session for FileSession {
	fn principal(&self) -> &Principal {
		&self.principal
	}

	fn character(&self) -> Character {
		self.character.clone()
	}

	fn access_token(&self) -> Option<AccessToken> {
		self.token.read().clone()
	}

	fn replace_access_token(&self, token: Option<AccessToken>) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let mut guard = self.token.write();

			*guard = token;

			self.write_snapshot(&guard)
		})
	}
}
