//! JSON file stores for the `File` driver.
//!
//! Endpoints take the form `file://<path>`; the path may be relative to the
//! working directory. Writes go to a sibling temporary file that is renamed
//! over the target, so readers never observe a partial document.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::stored::{DocumentStore, StoreDocument};
use crate::backend::BackendError;
use crate::model::Endpoint;

/// Document persisted as pretty-printed JSON on disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JsonFileStore {
    path: Utf8PathBuf,
}

impl JsonFileStore {
    /// Creates a store writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store for a `file://` endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] when the endpoint names no file.
    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self, BackendError> {
        let path = Utf8Path::new(endpoint.target());
        if path.file_name().is_none() {
            return Err(BackendError::Unavailable {
                endpoint: endpoint.to_string(),
                message: String::from("endpoint does not name a file"),
            });
        }
        Ok(Self::new(path))
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn parent(&self) -> &Utf8Path {
        match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        }
    }

    fn file_name(&self) -> Result<&str, BackendError> {
        self.path.file_name().ok_or_else(|| BackendError::Unavailable {
            endpoint: self.path.to_string(),
            message: String::from("store path is missing a filename"),
        })
    }

    fn unavailable(&self, err: &io::Error) -> BackendError {
        BackendError::Unavailable {
            endpoint: self.path.to_string(),
            message: err.to_string(),
        }
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self) -> Result<Option<StoreDocument>, BackendError> {
        let file_name = self.file_name()?;
        let dir = match Dir::open_ambient_dir(self.parent(), ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.unavailable(&err)),
        };
        let contents = match dir.read_to_string(file_name) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.unavailable(&err)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|err| BackendError::Protocol {
                message: format!("{} is not a valid store document: {err}", self.path),
            })
    }

    fn save(&self, document: &StoreDocument, durable: bool) -> Result<(), BackendError> {
        let file_name = self.file_name()?;
        let parent = self.parent();
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| self.unavailable(&err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| self.unavailable(&err))?;

        let rendered =
            serde_json::to_vec_pretty(document).map_err(|err| BackendError::Protocol {
                message: format!("failed to encode store document: {err}"),
            })?;
        let staging = format!(".{file_name}.tmp");
        let mut file = dir
            .create(&staging)
            .map_err(|err| self.unavailable(&err))?;
        file.write_all(&rendered)
            .map_err(|err| self.unavailable(&err))?;
        if durable {
            file.sync_all().map_err(|err| self.unavailable(&err))?;
        }
        drop(file);
        dir.rename(&staging, &dir, file_name)
            .map_err(|err| self.unavailable(&err))
    }
}
