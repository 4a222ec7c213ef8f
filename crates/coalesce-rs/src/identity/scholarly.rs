//! PubMed, DOI, and arXiv identifier normalization and extraction.

use regex::Regex;
use std::sync::OnceLock;

fn pmid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:pubmed\.ncbi\.nlm\.nih\.gov/|ncbi\.nlm\.nih\.gov/pubmed/|\bpmid:?\s*)(\d{1,9})\b")
            .expect("pmid regex must compile")
    })
}

fn doi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(10\.\d{4,9}/[^\s"'<>?#]+)"#).expect("doi regex must compile")
    })
}

fn arxiv_bare_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(\d{4}\.\d{4,5})(?:v\d+)?(?:\.pdf)?$")
            .expect("bare arxiv regex must compile")
    })
}

fn arxiv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:arxiv\.org/(?:abs|pdf)/|\barxiv:\s*)(\d{4}\.\d{4,5})(?:v\d+)?")
            .expect("arxiv regex must compile")
    })
}

/// Normalize a PMID field value: digits only, leading zeros removed.
pub fn normalize_pmid(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("PMID:")
        .or_else(|| trimmed.strip_prefix("pmid:"))
        .unwrap_or(trimmed)
        .trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.to_string())
}

/// Normalize a DOI field value: resolver prefixes removed, lowercased.
pub fn normalize_doi(raw: &str) -> Option<String> {
    doi_re()
        .captures(raw.trim())
        .map(|caps| clean_doi(&caps[1]))
}

/// Normalize an arXiv field value: bare `yymm.nnnnn`, version suffix removed.
pub fn normalize_arxiv(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    arxiv_re()
        .captures(trimmed)
        .or_else(|| arxiv_bare_re().captures(trimmed))
        .map(|caps| caps[1].to_string())
}

/// Find a PMID mentioned in free text or a URL.
pub fn extract_pmid(text: &str) -> Option<String> {
    pmid_re()
        .captures(text)
        .and_then(|caps| normalize_pmid(&caps[1]))
}

/// Find a DOI mentioned in free text or a URL.
pub fn extract_doi(text: &str) -> Option<String> {
    normalize_doi(text)
}

/// Find an arXiv identifier mentioned in free text or a URL.
pub fn extract_arxiv(text: &str) -> Option<String> {
    arxiv_re().captures(text).map(|caps| caps[1].to_string())
}

fn clean_doi(doi: &str) -> String {
    doi.trim_end_matches(['.', ',', ';', ')'])
        .to_ascii_lowercase()
}
