//! Domain primitive types used across the hardbake workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HardbakeError, Result};

/// Unique identifier for a single build invocation.
///
/// Only used to correlate log lines; it never influences image content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(String);

impl BuildId {
    /// Generates a random build ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a container image.
///
/// Images are content-addressed, so the identifier is the hex digest of the
/// image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new image ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the 12-character prefix shown in listings.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA-256 hash digest used for content verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    /// Creates a hash from a hex-encoded string, with or without the
    /// `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        let bare = hex.strip_prefix("sha256:").unwrap_or(&hex);
        if bare.len() != crate::constants::SHA256_HEX_LENGTH
            || !bare.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(HardbakeError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self(bare.to_ascii_lowercase()))
    }

    /// Creates a hash from raw digest bytes.
    #[must_use]
    pub fn from_digest(bytes: &[u8]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(hex, "{b:02x}");
        }
        Self(hex)
    }

    /// Returns the hex-encoded hash string.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}

/// Reference to an image: `name[:tag][@sha256:<hex>]`.
///
/// A reference without a digest is mutable (a rolling tag); one with a
/// digest is pinned and must resolve to exactly that manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository name, possibly including a registry host and path.
    pub name: String,
    /// Tag, `latest` when omitted.
    pub tag: String,
    /// Pinned manifest digest.
    pub digest: Option<Sha256Hash>,
}

impl ImageRef {
    /// Parses a reference string.
    ///
    /// # Errors
    ///
    /// Returns `HardbakeError::Config` if the name, tag or digest is malformed.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => (rest, Some(Sha256Hash::from_hex(digest)?)),
            None => (input, None),
        };

        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => (&rest[..last_slash + i], &rest[last_slash + i + 1..]),
            None => (rest, crate::constants::DEFAULT_TAG),
        };

        if name.is_empty() || !name.chars().all(is_name_char) {
            return Err(HardbakeError::Config {
                message: format!("invalid image name in reference: {input}"),
            });
        }
        if tag.is_empty() || tag.len() > 128 || !tag.chars().all(is_tag_char) {
            return Err(HardbakeError::Config {
                message: format!("invalid image tag in reference: {input}"),
            });
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            digest,
        })
    }

    /// Returns `name:tag` without the digest.
    #[must_use]
    pub fn repo_tag(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }

    /// Whether this reference names an exact manifest.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }
}

const fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-' | '/' | ':')
}

const fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl FromStr for ImageRef {
    type Err = HardbakeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn sha256_from_hex_accepts_prefixed_and_bare() {
        let bare = Sha256Hash::from_hex(HEX).expect("bare");
        let prefixed = Sha256Hash::from_hex(format!("sha256:{HEX}")).expect("prefixed");
        assert_eq!(bare, prefixed);
        assert_eq!(bare.to_string(), format!("sha256:{HEX}"));
    }

    #[test]
    fn sha256_from_hex_rejects_short_input() {
        assert!(Sha256Hash::from_hex("abc").is_err());
    }

    #[test]
    fn sha256_from_digest_encodes_lowercase_hex() {
        let hash = Sha256Hash::from_digest(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hash.as_hex(), "deadbeef");
    }

    #[test]
    fn image_ref_parses_name_and_tag() {
        let r = ImageRef::parse("openjdk:17-jdk-slim-buster").expect("parse");
        assert_eq!(r.name, "openjdk");
        assert_eq!(r.tag, "17-jdk-slim-buster");
        assert!(!r.is_pinned());
    }

    #[test]
    fn image_ref_defaults_to_latest() {
        let r = ImageRef::parse("gcc").expect("parse");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.repo_tag(), "gcc:latest");
    }

    #[test]
    fn image_ref_keeps_registry_port_in_name() {
        let r = ImageRef::parse("localhost:5000/tools/jdk").expect("parse");
        assert_eq!(r.name, "localhost:5000/tools/jdk");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn image_ref_parses_pinned_digest() {
        let r = ImageRef::parse(&format!("openjdk:17@sha256:{HEX}")).expect("parse");
        assert!(r.is_pinned());
        assert_eq!(r.to_string(), format!("openjdk:17@sha256:{HEX}"));
    }

    #[test]
    fn image_ref_rejects_uppercase_name() {
        assert!(ImageRef::parse("OpenJDK:17").is_err());
    }

    #[test]
    fn image_ref_rejects_empty_tag() {
        assert!(ImageRef::parse("openjdk:").is_err());
    }

    #[test]
    fn image_id_short_prefix() {
        let id = ImageId::new(HEX);
        assert_eq!(id.short(), "0123456789ab");
    }
}
