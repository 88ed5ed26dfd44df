//! Uploaded image assets.
//!
//! Images are written to the configured directory as
//! `{unix-millis}-{random tag}-{original name}` and referenced from posts as
//! `images/{file name}`, which is also the path they are served under.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ServerError;

/// Path prefix of stored references and of the static route.
pub const IMAGE_PREFIX: &str = "images";

/// Content types accepted for upload. Anything else is ignored.
pub const ACCEPTED_CONTENT_TYPES: [&str; 3] = ["image/png", "image/jpg", "image/jpeg"];

/// Saves, resolves and removes uploaded images.
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
    public_url: String,
}

impl ImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns `true` if an upload with this content type should be stored.
    pub fn accepts(content_type: Option<&str>) -> bool {
        content_type.is_some_and(|ct| {
            ACCEPTED_CONTENT_TYPES
                .iter()
                .any(|accepted| ct.eq_ignore_ascii_case(accepted))
        })
    }

    /// Writes an upload to disk and returns its stored reference.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the file cannot be written.
    pub async fn save(&self, original_name: &str, bytes: &[u8]) -> Result<String, ServerError> {
        let tag = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            &tag[..8],
            sanitize_file_name(original_name)
        );

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ServerError::internal(format!("cannot create image dir: {e}")))?;
        tokio::fs::write(self.dir.join(&file_name), bytes)
            .await
            .map_err(|e| ServerError::internal(format!("cannot write image {file_name}: {e}")))?;

        debug!(file = %file_name, size = bytes.len(), "Image stored");
        Ok(format!("{IMAGE_PREFIX}/{file_name}"))
    }

    /// Fully-qualified URL for a stored reference.
    pub fn public_url(&self, reference: &str) -> String {
        format!("{}/{}", self.public_url, reference.trim_start_matches('/'))
    }

    /// Maps a fully-qualified image URL back to its stored reference.
    ///
    /// References that are not under the public URL are returned unchanged.
    pub fn normalize_reference(&self, reference: &str) -> String {
        reference
            .strip_prefix(&self.public_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(reference)
            .to_string()
    }

    /// Deletes a stored image in the background.
    ///
    /// Failures are logged and never reported to the caller.
    pub fn clear(&self, reference: &str) {
        let store = self.clone();
        let reference = reference.to_string();
        tokio::spawn(async move {
            if let Err(err) = store.remove(&reference).await {
                warn!(reference = %reference, error = %err, "Failed to delete image");
            }
        });
    }

    /// Deletes a stored image.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference does not name a file inside the
    /// image directory or if the file cannot be removed.
    pub async fn remove(&self, reference: &str) -> io::Result<()> {
        let path = self.resolve(reference).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not an image reference: {reference}"),
            )
        })?;
        tokio::fs::remove_file(&path).await?;
        debug!(path = %path.display(), "Image deleted");
        Ok(())
    }

    /// Resolves `images/{name}` to a path inside the image directory.
    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let normalized = self.normalize_reference(reference);
        let name = normalized.strip_prefix(IMAGE_PREFIX)?.strip_prefix('/')?;

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Some(self.dir.join(file)),
            _ => None,
        }
    }
}

/// Keeps only the final path component of a client-supplied file name.
fn sanitize_file_name(original: &str) -> String {
    let name = original.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        "upload".to_string()
    } else {
        name.replace(':', "-")
    }
}
