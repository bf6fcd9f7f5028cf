//! Seed identity loader.
//!
//! The seed list is a manually curated JSON array of researcher identity
//! records. Loading is the only dynamic behavior here; identities are
//! immutable afterwards.

use std::path::Path;

use tracing::info;

use crate::models::ResearcherIdentity;

/// Load the seed list, rejecting records without a usable name.
pub fn load_seed(path: &Path) -> anyhow::Result<Vec<ResearcherIdentity>> {
    if !path.exists() {
        anyhow::bail!("seed file not found: {}", path.display());
    }

    let content = std::fs::read_to_string(path)?;
    let identities: Vec<ResearcherIdentity> = serde_json::from_str(&content)?;

    for identity in &identities {
        if identity.name.trim().is_empty() {
            anyhow::bail!("seed entry with empty name (id: {:?})", identity.openalex_author_id);
        }
    }

    info!(n = identities.len(), path = %path.display(), "Seed list loaded");
    Ok(identities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_seed_roundtrip() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"[
                {{"name": "Rosalind Picard", "openalex_author_id": "A5023888391"}},
                {{"name": "Björn Schuller", "google_scholar": "abc123"}}
            ]"#
        )
        .unwrap();

        let seed = load_seed(f.path()).unwrap();
        assert_eq!(seed.len(), 2);
        assert_eq!(seed[0].key(), "A5023888391");
        assert!(seed[1].openalex_author_id.is_none());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        assert!(load_seed(Path::new("/nonexistent/researchers.json")).is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"[{{"name": "  "}}]"#).unwrap();
        assert!(load_seed(f.path()).is_err());
    }
}
