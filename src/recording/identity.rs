use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::transport::SpeakingHandler;

/// Source tag → user identity, filled from speaking updates
#[derive(Debug, Clone, Default)]
pub struct SourceIdentities {
    map: Arc<RwLock<HashMap<u32, String>>>,
}

impl SourceIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ssrc: u32, user_id: impl Into<String>) {
        let user_id = user_id.into();
        debug!("Source {} belongs to {}", ssrc, user_id);
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ssrc, user_id);
    }

    pub fn resolve(&self, ssrc: u32) -> Option<String> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ssrc)
            .cloned()
    }

    /// File name stem for a source: its escaped identity, or `ssrc-<tag>`
    /// while no identity is known.
    ///
    /// Distinct identities always map to distinct stems, and no identity maps
    /// onto the `ssrc-<tag>` form.
    pub fn file_stem(&self, ssrc: u32) -> String {
        self.resolve(ssrc)
            .filter(|id| !id.is_empty())
            .map(|id| escape_identity(&id))
            .unwrap_or_else(|| format!("ssrc-{}", ssrc))
    }

    /// Handler to register on a voice connection
    pub fn speaking_handler(&self) -> SpeakingHandler {
        let identities = self.clone();
        Box::new(move |update| identities.insert(update.ssrc, update.user_id.clone()))
    }
}

/// `[A-Za-z0-9-]` pass through, every other byte becomes `%XX`.
/// A leading `s` is escaped when the identity starts with `ssrc-`.
fn escape_identity(identity: &str) -> String {
    let mut stem = String::with_capacity(identity.len());
    for (i, byte) in identity.bytes().enumerate() {
        let reserved_prefix = i == 0 && identity.starts_with(UNKNOWN_PREFIX);
        if (byte.is_ascii_alphanumeric() || byte == b'-') && !reserved_prefix {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}

const UNKNOWN_PREFIX: &str = "ssrc-";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SpeakingUpdate;

    #[test]
    fn test_unknown_source_falls_back_to_tag() {
        let identities = SourceIdentities::new();
        assert_eq!(identities.file_stem(42), "ssrc-42");
    }

    #[test]
    fn test_handler_populates_map() {
        let identities = SourceIdentities::new();
        let handler = identities.speaking_handler();
        handler(&SpeakingUpdate {
            ssrc: 7,
            user_id: "123456".to_string(),
            speaking: true,
        });
        assert_eq!(identities.file_stem(7), "123456");
    }

    #[test]
    fn test_identity_cannot_escape_output_dir() {
        let identities = SourceIdentities::new();
        identities.insert(1, "../../etc/passwd");
        assert_eq!(identities.file_stem(1), "%2E%2E%2F%2E%2E%2Fetc%2Fpasswd");
    }

    #[test]
    fn test_similar_identities_get_distinct_stems() {
        let identities = SourceIdentities::new();
        identities.insert(1, "a.b");
        identities.insert(2, "a_b");
        identities.insert(3, "a%2Eb");
        identities.insert(4, "ssrc-5");

        let stems: Vec<String> = (1..=4).map(|ssrc| identities.file_stem(ssrc)).collect();
        assert_eq!(stems, vec!["a%2Eb", "a%5Fb", "a%252Eb", "%73src-5"]);
        assert_ne!(identities.file_stem(4), identities.file_stem(5));
    }
}
