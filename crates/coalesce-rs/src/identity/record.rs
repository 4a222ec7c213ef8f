//! Raw result records returned by search and execution tools.
//!
//! Backends return loosely-shaped JSON whose fields vary by source. Records
//! are classified into a small set of source families so identity resolution
//! can match on the family instead of probing optional fields ad hoc.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields shared by every source family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Publisher, journal, registry, or site name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Publication, filing, or registration date as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Abstract, snippet, or other free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Incidental fields (fetch timestamps, relevance scores, ...) kept
    /// verbatim. They never participate in identity.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// One result record, tagged by source family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRecord {
    /// A clinical-trial registry entry.
    ClinicalTrial {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nct_id: Option<String>,
        #[serde(flatten)]
        fields: RecordFields,
    },
    /// A patent or patent application.
    Patent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        publication_number: Option<String>,
        #[serde(flatten)]
        fields: RecordFields,
    },
    /// A paper or preprint from the academic literature.
    Paper {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pmid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        doi: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arxiv_id: Option<String>,
        #[serde(flatten)]
        fields: RecordFields,
    },
    /// Anything else: web pages, code execution output, charts.
    Generic {
        #[serde(flatten)]
        fields: RecordFields,
    },
}

const NCT_KEYS: &[&str] = &["nct_id", "nctId", "nct_number", "nctNumber"];
const PATENT_KEYS: &[&str] = &[
    "publication_number",
    "publicationNumber",
    "patent_number",
    "patentNumber",
    "patent_id",
    "patentId",
];
const PMID_KEYS: &[&str] = &["pmid", "pubmed_id", "pubmedId"];
const DOI_KEYS: &[&str] = &["doi", "DOI"];
const ARXIV_KEYS: &[&str] = &["arxiv_id", "arxivId", "arxiv"];
const TITLE_KEYS: &[&str] = &["title", "name"];
const URL_KEYS: &[&str] = &["url", "link", "href"];
const SOURCE_KEYS: &[&str] = &["source", "journal", "publisher", "site"];
const DATE_KEYS: &[&str] = &[
    "date",
    "published_date",
    "publishedDate",
    "publication_date",
    "publicationDate",
];
const CONTENT_KEYS: &[&str] = &["content", "snippet", "abstract", "summary", "text"];

impl RawRecord {
    /// Shared fields of any variant.
    pub fn fields(&self) -> &RecordFields {
        match self {
            RawRecord::ClinicalTrial { fields, .. }
            | RawRecord::Patent { fields, .. }
            | RawRecord::Paper { fields, .. }
            | RawRecord::Generic { fields } => fields,
        }
    }

    /// Convenience constructor for a [`RawRecord::Generic`] with a URL and title.
    pub fn generic(url: impl Into<String>, title: impl Into<String>) -> Self {
        RawRecord::Generic {
            fields: RecordFields {
                url: Some(url.into()),
                title: Some(title.into()),
                ..Default::default()
            },
        }
    }

    /// Classify an arbitrary JSON value into a source family.
    ///
    /// Never fails. Non-object values become an empty `Generic`. Fields with
    /// a non-string value (a numeric `url`, an object `title`) are treated
    /// as absent, except that numeric identifiers such as a PMID are
    /// accepted. Scholarly identifiers are also looked up in a nested
    /// `metadata` object.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return RawRecord::Generic {
                fields: RecordFields::default(),
            };
        };
        let metadata = obj.get("metadata").and_then(Value::as_object);

        let nct_id = lookup_id(obj, metadata, NCT_KEYS);
        let publication_number = lookup_id(obj, metadata, PATENT_KEYS);
        let pmid = lookup_id(obj, metadata, PMID_KEYS);
        let doi = lookup_id(obj, metadata, DOI_KEYS);
        let arxiv_id = lookup_id(obj, metadata, ARXIV_KEYS);

        let mut consumed: Vec<&str> = Vec::new();
        for keys in [
            NCT_KEYS,
            PATENT_KEYS,
            PMID_KEYS,
            DOI_KEYS,
            ARXIV_KEYS,
            TITLE_KEYS,
            URL_KEYS,
            SOURCE_KEYS,
            DATE_KEYS,
            CONTENT_KEYS,
        ] {
            consumed.extend(keys.iter().copied());
        }
        consumed.push("kind");

        let fields = RecordFields {
            title: first_string(obj, TITLE_KEYS),
            url: first_string(obj, URL_KEYS),
            source: first_string(obj, SOURCE_KEYS),
            date: first_string(obj, DATE_KEYS),
            content: first_string(obj, CONTENT_KEYS),
            extra: obj
                .iter()
                .filter(|(k, _)| !consumed.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        if nct_id.is_some() {
            RawRecord::ClinicalTrial { nct_id, fields }
        } else if publication_number.is_some() {
            RawRecord::Patent {
                publication_number,
                fields,
            }
        } else if pmid.is_some() || doi.is_some() || arxiv_id.is_some() {
            RawRecord::Paper {
                pmid,
                doi,
                arxiv_id,
                fields,
            }
        } else {
            RawRecord::Generic { fields }
        }
    }
}

/// First non-empty string value among `keys`.
fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifier lookup: top-level keys first, then `metadata`. Integer values
/// are accepted since some backends return PMIDs as numbers.
fn lookup_id(
    obj: &Map<String, Value>,
    metadata: Option<&Map<String, Value>>,
    keys: &[&str],
) -> Option<String> {
    let from = |map: &Map<String, Value>| {
        keys.iter()
            .filter_map(|k| map.get(*k))
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) if n.is_u64() => Some(n.to_string()),
                _ => None,
            })
            .find(|s| !s.is_empty())
    };
    from(obj).or_else(|| metadata.and_then(from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_clinical_trial() {
        let rec = RawRecord::from_value(&json!({
            "nctId": "NCT01234567",
            "title": "A Study of Things",
            "url": "https://clinicaltrials.gov/study/NCT01234567",
        }));
        match rec {
            RawRecord::ClinicalTrial { nct_id, fields } => {
                assert_eq!(nct_id.as_deref(), Some("NCT01234567"));
                assert_eq!(fields.title.as_deref(), Some("A Study of Things"));
            }
            other => panic!("expected clinical trial, got {other:?}"),
        }
    }

    #[test]
    fn classifies_patent() {
        let rec = RawRecord::from_value(&json!({"patent_number": "US 10,123,456 B2"}));
        assert!(matches!(rec, RawRecord::Patent { .. }));
    }

    #[test]
    fn metadata_identifiers_make_a_paper() {
        let rec = RawRecord::from_value(&json!({
            "title": "Deep nets",
            "metadata": {"doi": "10.1000/xyz123", "pmid": 3141592},
        }));
        match rec {
            RawRecord::Paper { pmid, doi, .. } => {
                assert_eq!(pmid.as_deref(), Some("3141592"));
                assert_eq!(doi.as_deref(), Some("10.1000/xyz123"));
            }
            other => panic!("expected paper, got {other:?}"),
        }
    }

    #[test]
    fn non_string_url_is_absent() {
        let rec = RawRecord::from_value(&json!({"url": 42, "title": "x"}));
        assert_eq!(rec.fields().url, None);
        assert_eq!(rec.fields().title.as_deref(), Some("x"));
    }

    #[test]
    fn non_object_becomes_empty_generic() {
        let rec = RawRecord::from_value(&json!("just a string"));
        assert_eq!(
            rec,
            RawRecord::Generic {
                fields: RecordFields::default()
            }
        );
    }

    #[test]
    fn incidental_fields_go_to_extra() {
        let rec = RawRecord::from_value(&json!({
            "url": "https://example.com",
            "fetched_at": "2024-01-01T00:00:00Z",
            "score": 0.9,
        }));
        let extra = &rec.fields().extra;
        assert_eq!(extra.len(), 2);
        assert!(extra.contains_key("fetched_at"));
        assert!(!extra.contains_key("url"));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let rec = RawRecord::generic("https://example.com", "Example");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["kind"], "generic");
        assert_eq!(json["url"], "https://example.com");
        let back: RawRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
    }
}
