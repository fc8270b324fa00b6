use std::io::Cursor;

use anyhow::Context;
use bytes::Bytes;
use image::ImageReader;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, FieldErrors};
use crate::state::AppState;

pub const IMAGE_FIELD: &str = "image";
const MSG_NO_FILE: &str = "No file was submitted.";
const MSG_EMPTY_FILE: &str = "The submitted file is empty.";
const MSG_NOT_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

/// One file taken from a multipart body.
#[derive(Debug)]
pub struct UploadItem {
    pub body: Bytes,
    pub file_name: Option<String>,
}

/// Image formats accepted for recipe photos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    fn from_decoder(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// Detects the format from content and decodes the whole image.
/// `None` for unknown formats and for truncated or corrupt data.
pub fn decode_format(data: &[u8]) -> Option<ImageFormat> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?;
    let format = reader.format().and_then(ImageFormat::from_decoder)?;
    match reader.decode() {
        Ok(_) => Some(format),
        Err(e) => {
            debug!(error = %e, ?format, "image failed to decode");
            None
        }
    }
}

/// Object key for a recipe image. The extension follows the decoded format.
pub fn recipe_image_key(format: ImageFormat) -> String {
    format!("uploads/recipe/{}.{}", Uuid::new_v4(), format.extension())
}

/// Field-level validation of an upload; nothing is written on failure.
pub fn validate_image(upload: Option<UploadItem>) -> Result<(UploadItem, ImageFormat), AppError> {
    let reject = |msg: &str| AppError::Validation(FieldErrors::single(IMAGE_FIELD, msg));
    let Some(upload) = upload else {
        return Err(reject(MSG_NO_FILE));
    };
    if upload.body.is_empty() {
        return Err(reject(MSG_EMPTY_FILE));
    }
    let format = decode_format(&upload.body).ok_or_else(|| reject(MSG_NOT_IMAGE))?;
    Ok((upload, format))
}

/// Writes the image to object storage and returns its key.
pub async fn store_image(
    st: &AppState,
    upload: UploadItem,
    format: ImageFormat,
) -> anyhow::Result<String> {
    let key = recipe_image_key(format);
    st.storage
        .put_object(&key, upload.body, format.content_type())
        .await
        .with_context(|| format!("put_object {}", key))?;
    info!(%key, file_name = ?upload.file_name, "image stored");
    Ok(key)
}

/// Best effort: failures are logged, never returned.
pub async fn discard_image(st: &AppState, key: &str) {
    if let Err(e) = st.storage.delete_object(key).await {
        warn!(error = %format!("{e:#}"), %key, "failed to delete image object");
    }
}

/// Encodes a small solid image; shared by the upload tests.
#[cfg(test)]
pub(crate) fn sample_image(format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 80, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).unwrap();
    out.into_inner()
}

#[cfg(test)]
mod image_tests {
    use super::*;

    fn upload(body: Vec<u8>) -> UploadItem {
        UploadItem {
            body: Bytes::from(body),
            file_name: Some("photo.png".into()),
        }
    }

    fn image_message(result: Result<(UploadItem, ImageFormat), AppError>) -> String {
        match result {
            Err(AppError::Validation(errors)) => errors.get(IMAGE_FIELD).unwrap()[0].clone(),
            Err(other) => panic!("expected validation error, got {other:?}"),
            Ok((_, format)) => panic!("expected rejection, got {format:?}"),
        }
    }

    #[test]
    fn decodes_real_images() {
        let png = sample_image(image::ImageFormat::Png);
        let jpeg = sample_image(image::ImageFormat::Jpeg);
        assert_eq!(decode_format(&png), Some(ImageFormat::Png));
        assert_eq!(decode_format(&jpeg), Some(ImageFormat::Jpeg));
        assert_eq!(decode_format(b"notanimage"), None);
        assert_eq!(decode_format(b""), None);
    }

    #[test]
    fn header_only_and_truncated_images_are_rejected() {
        assert_eq!(decode_format(b"\xFF\xD8\xFFgarbage-not-a-jpeg"), None);
        assert_eq!(decode_format(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), None);

        let png = sample_image(image::ImageFormat::Png);
        assert_eq!(decode_format(&png[..png.len() / 2]), None);
    }

    #[test]
    fn key_extension_follows_format() {
        let key = recipe_image_key(ImageFormat::Jpeg);
        assert!(key.starts_with("uploads/recipe/"));
        assert!(key.ends_with(".jpg"));
        assert!(recipe_image_key(ImageFormat::Png).ends_with(".png"));
    }

    #[test]
    fn keys_are_unique() {
        assert_ne!(
            recipe_image_key(ImageFormat::Png),
            recipe_image_key(ImageFormat::Png)
        );
    }

    #[test]
    fn validate_image_errors() {
        assert_eq!(image_message(validate_image(None)), MSG_NO_FILE);
        assert_eq!(image_message(validate_image(Some(upload(Vec::new())))), MSG_EMPTY_FILE);
        assert_eq!(
            image_message(validate_image(Some(upload(b"notanimage".to_vec())))),
            MSG_NOT_IMAGE
        );

        let jpeg = sample_image(image::ImageFormat::Jpeg);
        let (item, format) = validate_image(Some(upload(jpeg))).unwrap();
        assert_eq!(format, ImageFormat::Jpeg);
        assert_eq!(format.content_type(), "image/jpeg");
        assert_eq!(item.file_name.as_deref(), Some("photo.png"));
    }
}
