/// Image formats recognized by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageKind {
    /// Guesses the format from magic bytes. Unrecognized content is treated as JPEG.
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => ImageKind::Jpeg,
            [0x89, b'P', b'N', b'G', ..] => ImageKind::Png,
            [b'G', b'I', b'F', ..] => ImageKind::Gif,
            [b'R', b'I', b'F', b'F', ..] => ImageKind::Webp,
            _ => ImageKind::Jpeg,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }

    /// Inline `Content-Disposition` value for serving a downloaded image.
    pub fn content_disposition(&self) -> String {
        format!("inline; filename=\"downloaded_image.{}\"", self.extension())
    }
}
