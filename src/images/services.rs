use anyhow::Context;
use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::storage::StorageClient;

const PREFIX: &str = "profile-pictures";

/// One uploaded file as it came off the multipart body.
#[derive(Debug, Clone)]
pub struct PictureUpload {
    pub body: Bytes,
    pub content_type: String,
    pub file_name: Option<String>,
}

impl PictureUpload {
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    fn extension(&self) -> &str {
        ext_from_mime(&self.content_type)
            .or_else(|| self.file_name.as_deref().and_then(ext_from_file_name))
            .unwrap_or("bin")
    }
}

/// Key for a picture uploaded with a create or update: a fresh random name.
pub fn random_key(upload: &PictureUpload) -> String {
    format!("{}/{}.{}", PREFIX, Uuid::new_v4(), upload.extension())
}

/// Key for a picture attached to an existing user: derived from id and file name.
pub fn key_for_user(user_id: i64, upload: &PictureUpload) -> String {
    let name = upload
        .file_name
        .as_deref()
        .map(sanitize_file_name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("upload.{}", upload.extension()));
    format!("{}/profile_{}_{}", PREFIX, user_id, name)
}

pub async fn store_picture(
    storage: &dyn StorageClient,
    key: &str,
    upload: PictureUpload,
) -> anyhow::Result<()> {
    storage
        .put_object(key, upload.body, &upload.content_type)
        .await
        .with_context(|| format!("store profile picture {}", key))
}

/// Best-effort removal of a picture no record ended up referencing.
pub async fn discard_picture(storage: &dyn StorageClient, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(key = %key, error = ?e, "failed to remove orphaned profile picture");
    }
}

pub async fn presign_picture(
    storage: &dyn StorageClient,
    key: &str,
    expires_seconds: u64,
) -> anyhow::Result<String> {
    storage
        .presign_get(key, expires_seconds)
        .await
        .with_context(|| format!("presign url for {}", key))
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn ext_from_file_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        "heic" => Some("heic"),
        _ => None,
    }
}

/// Last path component with anything outside `[A-Za-z0-9._-]` replaced.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}
