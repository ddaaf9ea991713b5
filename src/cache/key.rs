use std::fmt;

use sha2::{Digest, Sha256};

/// `<namespace>:<sha256 hex of the literal content>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_content(namespace: &str, content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Self(format!("{namespace}:{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Enough of the key to correlate log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(self.0.find(':').map_or(0, |i| i + 1) + 12);
        &self.0[..end]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
