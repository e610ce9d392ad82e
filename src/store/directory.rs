use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

use crate::container::ContainerID;
use crate::fsutil;

use super::{ContainerStore, Error, Loaded, PersistedContainer, Result};

/// Stores one JSON file per container, named by the container id.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CreateDir`] if the directory does not exist and cannot
    /// be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            log::info!("{} does not exist and will be created now", dir.display());
            std::fs::create_dir_all(&dir).map_err(|source| Error::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, container_id: &ContainerID) -> PathBuf {
        self.dir.join(container_id.as_str())
    }

    fn load_file(&self, path: &Path) -> Result<PersistedContainer> {
        let reader = fsutil::open_file_reader(path)?;
        serde_json::from_reader(reader).map_err(|source| Error::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl ContainerStore for DirectoryStore {
    fn save(&self, record: &PersistedContainer) -> Result<()> {
        let data = serde_json::to_vec(record).map_err(|source| Error::Encode {
            container_id: record.container_id.clone(),
            source,
        })?;
        fsutil::write_atomic(self.path_for(&record.container_id), &data)?;

        Ok(())
    }

    fn delete(&self, container_id: &ContainerID) -> Result<()> {
        let path = self.path_for(container_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Delete { path, source }),
        }
    }

    fn load_all(&self) -> Result<Loaded> {
        let read_dir_err = |source: io::Error| Error::ReadDir {
            path: self.dir.clone(),
            source,
        };
        let mut loaded = Loaded::default();
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(&self.dir).map_err(read_dir_err)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    loaded.errors.push(read_dir_err(source));
                    continue;
                }
            };
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => continue,
                Ok(_) => paths.push(entry.path()),
                Err(source) => loaded.errors.push(read_dir_err(source)),
            }
        }
        paths.sort();

        for path in paths {
            match self.load_file(&path) {
                Ok(record) => {
                    if path.file_name() != Some(OsStr::new(record.container_id.as_str())) {
                        log::warn!(
                            "container file `{}` holds container `{}`",
                            path.display(),
                            record.container_id
                        );
                    }
                    loaded.records.push(record);
                }
                Err(err) => loaded.errors.push(err),
            }
        }

        Ok(loaded)
    }

    fn is_durable(&self) -> bool {
        true
    }
}
