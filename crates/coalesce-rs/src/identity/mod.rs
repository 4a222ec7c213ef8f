//! Stable identities for result records.
//!
//! The same real-world entity (a trial, a patent, a paper) often comes back
//! from several tools and several queries within one conversation. An
//! [`ResultIdentity`] is computed from the strongest identifier a record
//! carries, so those copies can be recognized and suppressed.
//!
//! Resolution tiers, first match wins:
//!
//! 1. **Registry**: clinical-trial NCT id, patent publication number.
//! 2. **Scholarly**: PMID, then DOI, then arXiv id. A paper's own id
//!    fields win over ids found in its URL, which win over ids found in its
//!    content. Content is only scanned for papers.
//! 3. **Url**: the [normalized](url::normalize_url) source URL.
//! 4. **Fingerprint**: `title | source | date`, lowercased.
//!
//! A record with none of these is unresolvable and [`resolve`] returns
//! `None`. Resolution never panics on unusual input.
//!
//! # Submodules
//!
//! - [`record`]: [`RawRecord`] source-family sum type and JSON classifier.
//! - [`url`]: tracking-parameter-free URL normalization.
//! - [`scholarly`]: PMID / DOI / arXiv parsing.

pub mod record;
pub mod scholarly;
pub mod url;

pub use record::{RawRecord, RecordFields};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Opaque, fixed-width identity token for one real-world entity.
///
/// Derived from the first 16 bytes of the SHA-256 digest of the identity
/// string, laid out as an RFC 9562 version-8 UUID. Displays as a
/// 36-character dashed hex string usable as a UI key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultIdentity(Uuid);

impl ResultIdentity {
    /// Hash an identity string into a token.
    pub fn from_identity_string(identity: &str) -> Self {
        let digest = Sha256::digest(identity.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(Uuid::new_v8(bytes))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ResultIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Which resolution tier produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityTier {
    Registry,
    Scholarly,
    Url,
    Fingerprint,
}

/// The namespaced identity string chosen for a record, before hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBasis {
    pub tier: IdentityTier,
    /// e.g. `nct:NCT01234567`, `doi:10.1000/xyz`, `url:https://x.com/a`.
    pub key: String,
}

impl IdentityBasis {
    fn new(tier: IdentityTier, key: String) -> Self {
        Self { tier, key }
    }

    /// Hash the basis into its [`ResultIdentity`].
    pub fn identity(&self) -> ResultIdentity {
        ResultIdentity::from_identity_string(&self.key)
    }
}

/// Resolve a record to its identity, or `None` if nothing identifies it.
pub fn resolve(record: &RawRecord) -> Option<ResultIdentity> {
    identity_basis(record).map(|basis| basis.identity())
}

/// Choose the identity string for a record without hashing it.
pub fn identity_basis(record: &RawRecord) -> Option<IdentityBasis> {
    registry_basis(record)
        .or_else(|| scholarly_basis(record))
        .or_else(|| url_basis(record.fields()))
        .or_else(|| fingerprint_basis(record.fields()))
}

fn registry_basis(record: &RawRecord) -> Option<IdentityBasis> {
    match record {
        RawRecord::ClinicalTrial { nct_id, .. } => nct_id
            .as_deref()
            .map(|id| id.trim().to_ascii_uppercase())
            .filter(|id| !id.is_empty())
            .map(|id| IdentityBasis::new(IdentityTier::Registry, format!("nct:{id}"))),
        RawRecord::Patent {
            publication_number, ..
        } => publication_number
            .as_deref()
            .map(normalize_publication_number)
            .filter(|id| !id.is_empty())
            .map(|id| IdentityBasis::new(IdentityTier::Registry, format!("patent:{id}"))),
        RawRecord::Paper { .. } | RawRecord::Generic { .. } => None,
    }
}

fn scholarly_basis(record: &RawRecord) -> Option<IdentityBasis> {
    let fields = record.fields();
    let found = match record {
        RawRecord::Paper {
            pmid,
            doi,
            arxiv_id,
            ..
        } => dedicated_scholarly_id(pmid.as_deref(), doi.as_deref(), arxiv_id.as_deref())
            .or_else(|| fields.url.as_deref().and_then(extract_scholarly_id))
            // An abstract cites other papers, so it is the last resort.
            .or_else(|| fields.content.as_deref().and_then(extract_scholarly_id)),
        // A web page that mentions a DOI in its snippet is not that paper;
        // only its own URL can make it one.
        _ => fields.url.as_deref().and_then(extract_scholarly_id),
    };
    found.map(|key| IdentityBasis::new(IdentityTier::Scholarly, key))
}

/// PMID, then DOI, then arXiv id, from a paper's own identifier fields.
fn dedicated_scholarly_id(
    pmid: Option<&str>,
    doi: Option<&str>,
    arxiv: Option<&str>,
) -> Option<String> {
    pmid.and_then(scholarly::normalize_pmid)
        .map(|id| format!("pmid:{id}"))
        .or_else(|| doi.and_then(scholarly::normalize_doi).map(|id| format!("doi:{id}")))
        .or_else(|| {
            arxiv
                .and_then(scholarly::normalize_arxiv)
                .map(|id| format!("arxiv:{id}"))
        })
}

/// PMID, then DOI, then arXiv id, mentioned in a URL or free text.
fn extract_scholarly_id(text: &str) -> Option<String> {
    scholarly::extract_pmid(text)
        .map(|id| format!("pmid:{id}"))
        .or_else(|| scholarly::extract_doi(text).map(|id| format!("doi:{id}")))
        .or_else(|| scholarly::extract_arxiv(text).map(|id| format!("arxiv:{id}")))
}

fn url_basis(fields: &RecordFields) -> Option<IdentityBasis> {
    let normalized = url::normalize_url(fields.url.as_deref()?);
    if normalized.is_empty() {
        return None;
    }
    Some(IdentityBasis::new(
        IdentityTier::Url,
        format!("url:{normalized}"),
    ))
}

fn fingerprint_basis(fields: &RecordFields) -> Option<IdentityBasis> {
    let part = |s: &Option<String>| s.as_deref().map(str::trim).unwrap_or_default().to_string();
    let title = part(&fields.title).to_lowercase();
    let source = part(&fields.source).to_lowercase();
    let date = part(&fields.date);
    if title.is_empty() && source.is_empty() && date.is_empty() {
        return None;
    }
    Some(IdentityBasis::new(
        IdentityTier::Fingerprint,
        format!("fp:{title}|{source}|{date}"),
    ))
}

/// `US 10,123,456 B2` → `US10123456B2`.
fn normalize_publication_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '/' | ','))
        .collect::<String>()
        .to_ascii_uppercase()
}
