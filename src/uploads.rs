use std::fs;
use std::io;
use std::path::PathBuf;

use log::{debug, error, info};
use sha1::{Digest, Sha1};

#[derive(Debug, PartialEq, Eq)]
pub enum StoreError {
    /// No usable extension on the original filename.
    MalformedFilename,
    Internal,
}

/// Content-addressed blob store for uploads. Identical bytes always land
/// under the same name, so re-uploads collapse to a single file.
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Persist `bytes` as `<hex(sha1)>.<ext>`, where `ext` is taken from
    /// the original filename. Writing a name that already exists is a
    /// no-op, not an error.
    pub async fn store(&self, bytes: &[u8], original_filename: &str) -> Result<String, StoreError> {
        let ext = extension(original_filename).ok_or(StoreError::MalformedFilename)?;

        let digest = Sha1::digest(bytes);
        let name = format!("{}.{ext}", hex::encode(digest));

        let path = self.dir.join(&name);
        if path.exists() {
            debug!("{name} already stored, skipping write");
            return Ok(name);
        }

        fs::write(&path, bytes).map_err(|e| {
            error!("write \"{path:?}\": {e:?}");
            StoreError::Internal
        })?;

        info!("stored {name} ({} bytes)", bytes.len());
        Ok(name)
    }

    pub async fn list(&self) -> Result<Vec<String>, ()> {
        let mut names = vec![];

        for ent in fs::read_dir(&self.dir).map_err(|e| {
            error!("read dir \"{:?}\": {e:?}", self.dir);
        })? {
            let ent = ent.map_err(|e| {
                error!("read dir entry: {e:?}");
            })?;

            match ent.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => {
                    error!("non-utf8 upload name: {name:?}");
                }
            }
        }

        names.sort();
        Ok(names)
    }
}

/// The extension is everything after the last dot. Must be non-empty
/// ASCII alphanumeric, and the filename must have a stem, so names like
/// `".jpg"`, `"photo."` or `"x.j/pg"` are all malformed.
fn extension(filename: &str) -> Option<&str> {
    let (stem, ext) = filename.rsplit_once('.')?;

    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    ext.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then_some(ext)
}
