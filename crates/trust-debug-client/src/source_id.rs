//! Content-derived source identities.
//! - SourceIdentity: opaque key shared by breakpoints and stack frames
//! - SourceRegistry::identify: hash code into an identity

use std::fmt::{self, Write as _};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Stable identifier of a block of code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceIdentity(SmolStr);

impl SourceIdentity {
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(SmolStr::new(path))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SourceIdentity {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Text wrapped around the content hash, e.g. a temp directory and `.py`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityFormat {
    pub prefix: String,
    pub suffix: String,
}

/// Derives identities for submitted code.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    format: RwLock<IdentityFormat>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new(format: IdentityFormat) -> Self {
        Self {
            format: RwLock::new(format),
        }
    }

    /// Identity is content-exact: editing the code yields a new identity.
    #[must_use]
    pub fn identify(&self, code: &str) -> SourceIdentity {
        let digest = Sha256::digest(code.as_bytes());
        let format = self.format.read();
        let mut path =
            String::with_capacity(format.prefix.len() + digest.len() * 2 + format.suffix.len());
        path.push_str(&format.prefix);
        for byte in digest.iter() {
            let _ = write!(path, "{byte:02x}");
        }
        path.push_str(&format.suffix);
        SourceIdentity::new(path)
    }

    #[must_use]
    pub fn format(&self) -> IdentityFormat {
        self.format.read().clone()
    }

    pub fn set_format(&self, format: IdentityFormat) {
        *self.format.write() = format;
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityFormat, SourceRegistry};

    #[test]
    fn identify_is_deterministic_and_content_exact() {
        let registry = SourceRegistry::default();
        let code = "i = 0\ni += 1\n";

        assert_eq!(registry.identify(code), registry.identify(code));
        assert_ne!(registry.identify(code), registry.identify("i = 0\ni += 2\n"));
        assert_ne!(registry.identify(code), registry.identify("i = 0\ni += 1"));
        assert_eq!(registry.identify(code).as_str().len(), 64);
    }

    #[test]
    fn identify_wraps_hash_in_configured_format() {
        let registry = SourceRegistry::new(IdentityFormat {
            prefix: "/tmp/ipykernel_1/".to_string(),
            suffix: ".py".to_string(),
        });
        let identity = registry.identify("print(1)");
        assert!(identity.as_str().starts_with("/tmp/ipykernel_1/"));
        assert!(identity.as_str().ends_with(".py"));

        registry.set_format(IdentityFormat::default());
        assert!(!registry.identify("print(1)").as_str().ends_with(".py"));
    }
}
