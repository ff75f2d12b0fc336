//! Allowed upload types and their magic-number signatures.
//!
//! Every MIME type the pipeline can accept is described by an [`AllowedType`]: the
//! file extensions that may carry it and one or more signature groups. A group matches
//! when all of its [`Signature`]s match; a type matches when any of its groups does.

use std::fmt;

/// A run of bytes expected at a fixed offset from the start of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub offset: usize,
    pub bytes: &'static [u8],
}

impl Signature {
    pub const fn at(offset: usize, bytes: &'static [u8]) -> Self {
        Self { offset, bytes }
    }

    pub fn matches(&self, head: &[u8]) -> bool {
        head.get(self.offset..self.offset + self.bytes.len()) == Some(self.bytes)
    }
}

/// A declared MIME type the pipeline knows how to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedType {
    pub mime: &'static str,
    /// Lowercase extensions without the leading dot. The first one is canonical.
    pub extensions: &'static [&'static str],
    pub signatures: &'static [&'static [Signature]],
    /// Whether the type is a raster image the `image` crate can read headers of.
    pub is_image: bool,
}

impl AllowedType {
    /// Returns true when `head` (the leading bytes of a file) carries this type's signature.
    pub fn matches(&self, head: &[u8]) -> bool {
        self.signatures
            .iter()
            .any(|group| group.iter().all(|sig| sig.matches(head)))
    }

    /// Extension used for stored artifacts, including the leading dot.
    pub fn canonical_extension(&self) -> String {
        self.extensions
            .first()
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default()
    }

    pub fn has_extension(&self, extension: &str) -> bool {
        let extension = extension.to_lowercase();
        self.extensions.iter().any(|ext| *ext == extension)
    }

    /// Number of leading bytes needed to evaluate every signature of this type.
    pub fn sniff_len(&self) -> usize {
        self.signatures
            .iter()
            .flat_map(|group| group.iter())
            .map(|sig| sig.offset + sig.bytes.len())
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for AllowedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime)
    }
}

/// Every type sift can recognise. Configuration selects the allowed subset.
pub const SIGNATURE_TABLE: &[AllowedType] = &[
    AllowedType {
        mime: "image/jpeg",
        extensions: &["jpg", "jpeg"],
        signatures: &[&[Signature::at(0, &[0xFF, 0xD8, 0xFF])]],
        is_image: true,
    },
    AllowedType {
        mime: "image/png",
        extensions: &["png"],
        signatures: &[&[Signature::at(
            0,
            &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
        )]],
        is_image: true,
    },
    AllowedType {
        mime: "image/gif",
        extensions: &["gif"],
        signatures: &[&[Signature::at(0, b"GIF87a")], &[Signature::at(0, b"GIF89a")]],
        is_image: true,
    },
    AllowedType {
        mime: "image/webp",
        extensions: &["webp"],
        signatures: &[&[Signature::at(0, b"RIFF"), Signature::at(8, b"WEBP")]],
        is_image: true,
    },
    AllowedType {
        mime: "application/pdf",
        extensions: &["pdf"],
        signatures: &[&[Signature::at(0, b"%PDF-")]],
        is_image: false,
    },
];

/// Longest prefix any entry of [`SIGNATURE_TABLE`] needs.
pub fn max_sniff_len() -> usize {
    SIGNATURE_TABLE
        .iter()
        .map(AllowedType::sniff_len)
        .max()
        .unwrap_or(0)
}

/// Look up a known type by MIME name (case-insensitive).
pub fn lookup(mime: &str) -> Option<&'static AllowedType> {
    let mime = mime.trim().to_lowercase();
    SIGNATURE_TABLE.iter().find(|t| t.mime == mime)
}
