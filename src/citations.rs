//! Citation discovery: finding the publications around a GEO dataset.
//!
//! Two strategies feed one merged result:
//!
//! - **Strategy A (citation-based):** for each original PMID, walk the
//!   citation graph - OpenAlex first, Semantic Scholar as fallback when
//!   OpenAlex is unavailable - and collect papers citing it, capped at
//!   `max_citing_per_dataset`.
//! - **Strategy B (mention-based):** free-text search PubMed for the
//!   accession string (`"GSE12345"`); hits not already found by Strategy A
//!   are treated as citing.
//!
//! Results deduplicate by PMID, then DOI, keeping the richer metadata when
//! both strategies return the same publication. A publication whose PMID
//! appears in `original_pmids` is forced to the origin set regardless of
//! which strategy surfaced it.
//!
//! Individual source failures are absorbed and logged; discovery returns
//! whatever the reachable sources produced.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::fetch::Fetcher;
use crate::model::{DatasetId, Publication, normalize_doi};

/// Default API hosts.
const OPENALEX_BASE_URL: &str = "https://api.openalex.org";
const SEMANTIC_SCHOLAR_BASE_URL: &str = "https://api.semanticscholar.org";
const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov";

/// How many mention-search hits are considered per dataset.
const MENTION_SEARCH_RETMAX: usize = 20;

/// Publications related to one dataset, split by role.
#[derive(Debug, Default)]
pub struct RelatedPublications {
    /// Publications that describe the dataset's creation.
    pub original: Vec<Publication>,
    /// Publications that reference the dataset.
    pub citing: Vec<Publication>,
}

/// Citation discovery over OpenAlex / Semantic Scholar / PubMed.
#[derive(Debug, Clone)]
pub struct CitationDiscovery {
    fetcher: Fetcher,
    openalex_base: String,
    semantic_scholar_base: String,
    eutils_base: String,
    mailto: String,
}

impl CitationDiscovery {
    /// Creates a discovery client with the public API hosts.
    #[must_use]
    pub fn new(fetcher: Fetcher, contact_email: &str) -> Self {
        Self {
            fetcher,
            openalex_base: OPENALEX_BASE_URL.to_string(),
            semantic_scholar_base: SEMANTIC_SCHOLAR_BASE_URL.to_string(),
            eutils_base: EUTILS_BASE_URL.to_string(),
            mailto: contact_email.to_string(),
        }
    }

    /// Overrides every API host (tests).
    #[must_use]
    pub fn with_base_urls(
        fetcher: Fetcher,
        contact_email: &str,
        openalex_base: impl Into<String>,
        semantic_scholar_base: impl Into<String>,
        eutils_base: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            openalex_base: openalex_base.into(),
            semantic_scholar_base: semantic_scholar_base.into(),
            eutils_base: eutils_base.into(),
            mailto: contact_email.to_string(),
        }
    }

    /// Finds the original and citing publications for one dataset.
    #[instrument(skip(self, original_pmids), fields(dataset_id = %dataset_id, originals = original_pmids.len()))]
    pub async fn find_related(
        &self,
        dataset_id: &DatasetId,
        original_pmids: &[String],
        max_citing: usize,
    ) -> RelatedPublications {
        let original_set: HashSet<&str> =
            original_pmids.iter().map(String::as_str).collect();

        // Metadata for the originals themselves.
        let mut original = self.fetch_pubmed_summaries(original_pmids).await;
        for pmid in original_pmids {
            if !original.iter().any(|p| p.id.pmid() == Some(pmid.as_str())) {
                // Keep the link even when esummary was unreachable.
                original.push(Publication::new(Some(pmid), None, String::new()));
            }
        }

        // Strategy A: citation graph per original.
        let mut citing: Vec<Publication> = Vec::new();
        for pmid in original_pmids {
            if citing.len() >= max_citing {
                break;
            }
            let budget = max_citing - citing.len();
            let found = self.citing_publications(pmid, budget).await;
            merge_publications(&mut citing, found);
        }

        // Strategy B: accession mention search.
        let mentions = self.mention_search(dataset_id).await;
        merge_publications(&mut citing, mentions);

        // Origin wins: anything listed as original leaves the citing set.
        citing.retain(|publication| {
            publication
                .id
                .pmid()
                .is_none_or(|pmid| !original_set.contains(pmid))
        });
        citing.truncate(max_citing);

        debug!(
            original = original.len(),
            citing = citing.len(),
            "citation discovery complete"
        );
        RelatedPublications { original, citing }
    }

    /// Strategy A: papers citing one PMID, OpenAlex first.
    async fn citing_publications(&self, pmid: &str, limit: usize) -> Vec<Publication> {
        match self.citing_via_openalex(pmid, limit).await {
            Ok(publications) => publications,
            Err(reason) => {
                warn!(pmid = %pmid, %reason, "openalex citation lookup failed; trying semantic scholar");
                match self.citing_via_semantic_scholar(pmid, limit).await {
                    Ok(publications) => publications,
                    Err(reason) => {
                        warn!(pmid = %pmid, %reason, "semantic scholar citation lookup failed");
                        Vec::new()
                    }
                }
            }
        }
    }

    async fn citing_via_openalex(
        &self,
        pmid: &str,
        limit: usize,
    ) -> Result<Vec<Publication>, String> {
        let work_url = format!(
            "{}/works/pmid:{}?mailto={}",
            self.openalex_base,
            urlencoding::encode(pmid),
            urlencoding::encode(&self.mailto)
        );
        let work: OpenAlexWorkId = match self.fetcher.get_json(&work_url).await {
            Ok(work) => work,
            Err(crate::fetch::FetchError::HttpStatus { status: 404, .. }) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.to_string()),
        };
        let Some(work_id) = work.id.rsplit('/').next().filter(|id| !id.is_empty()) else {
            return Ok(Vec::new());
        };

        let cites_url = format!(
            "{}/works?filter=cites:{}&per-page={}&mailto={}",
            self.openalex_base,
            work_id,
            limit.max(1),
            urlencoding::encode(&self.mailto)
        );
        let listing: OpenAlexListing = self
            .fetcher
            .get_json(&cites_url)
            .await
            .map_err(|e| e.to_string())?;

        Ok(listing
            .results
            .into_iter()
            .filter_map(openalex_to_publication)
            .collect())
    }

    async fn citing_via_semantic_scholar(
        &self,
        pmid: &str,
        limit: usize,
    ) -> Result<Vec<Publication>, String> {
        let url = format!(
            "{}/graph/v1/paper/PMID:{}/citations?fields=externalIds,title,year,venue&limit={}",
            self.semantic_scholar_base,
            urlencoding::encode(pmid),
            limit.max(1)
        );
        let listing: SemanticScholarCitations = match self.fetcher.get_json(&url).await {
            Ok(listing) => listing,
            Err(crate::fetch::FetchError::HttpStatus { status: 404, .. }) => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.to_string()),
        };

        Ok(listing
            .data
            .into_iter()
            .filter_map(|entry| entry.citing_paper)
            .filter_map(semantic_scholar_to_publication)
            .collect())
    }

    /// Strategy B: PubMed free-text search for the accession string.
    async fn mention_search(&self, dataset_id: &DatasetId) -> Vec<Publication> {
        let term = format!("\"{}\"", dataset_id.as_str());
        let url = format!(
            "{}/entrez/eutils/esearch.fcgi?db=pubmed&term={}&retmode=json&retmax={}",
            self.eutils_base,
            urlencoding::encode(&term),
            MENTION_SEARCH_RETMAX
        );

        let response: serde_json::Value = match self.fetcher.get_json(&url).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "pubmed mention search failed");
                return Vec::new();
            }
        };

        let pmids: Vec<String> = response["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if pmids.is_empty() {
            debug!(accession = %dataset_id, "no pubmed mentions");
            return Vec::new();
        }
        self.fetch_pubmed_summaries(&pmids).await
    }

    /// Builds publications from PubMed esummary records.
    async fn fetch_pubmed_summaries(&self, pmids: &[String]) -> Vec<Publication> {
        if pmids.is_empty() {
            return Vec::new();
        }
        let url = format!(
            "{}/entrez/eutils/esummary.fcgi?db=pubmed&id={}&retmode=json",
            self.eutils_base,
            pmids.join(",")
        );
        let response: serde_json::Value = match self.fetcher.get_json(&url).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "pubmed esummary failed");
                return Vec::new();
            }
        };

        let result = &response["result"];
        pmids
            .iter()
            .filter_map(|pmid| {
                let record = &result[pmid.as_str()];
                record.is_object().then(|| pubmed_record_to_publication(pmid, record))
            })
            .collect()
    }
}

// ==================== API response types ====================

#[derive(Debug, Deserialize)]
struct OpenAlexWorkId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OpenAlexListing {
    #[serde(default)]
    results: Vec<OpenAlexWork>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    doi: Option<String>,
    title: Option<String>,
    publication_year: Option<i32>,
    #[serde(default)]
    authorships: Vec<OpenAlexAuthorship>,
    ids: Option<OpenAlexIds>,
    primary_location: Option<OpenAlexLocation>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthorship {
    author: Option<OpenAlexAuthor>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthor {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexIds {
    pmid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexLocation {
    source: Option<OpenAlexSource>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexSource {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticScholarCitations {
    #[serde(default)]
    data: Vec<SemanticScholarEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemanticScholarEntry {
    citing_paper: Option<SemanticScholarPaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemanticScholarPaper {
    external_ids: Option<SemanticScholarIds>,
    title: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SemanticScholarIds {
    #[serde(rename = "PubMed")]
    pubmed: Option<String>,
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

// ==================== Mapping ====================

fn openalex_to_publication(work: OpenAlexWork) -> Option<Publication> {
    let pmid = work
        .ids
        .as_ref()
        .and_then(|ids| ids.pmid.as_deref())
        .and_then(trailing_numeric_id);
    let doi = work.doi.as_deref().map(normalize_doi);
    if pmid.is_none() && doi.is_none() {
        return None;
    }

    let mut publication = Publication::new(
        pmid.as_deref(),
        doi.as_deref(),
        work.title.unwrap_or_default(),
    );
    publication.year = work.publication_year;
    publication.journal = work
        .primary_location
        .and_then(|l| l.source)
        .and_then(|s| s.display_name);
    publication.authors = work
        .authorships
        .into_iter()
        .filter_map(|a| a.author.and_then(|author| author.display_name))
        .collect();
    Some(publication)
}

fn semantic_scholar_to_publication(paper: SemanticScholarPaper) -> Option<Publication> {
    let ids = paper.external_ids.as_ref();
    let pmid = ids.and_then(|ids| ids.pubmed.clone());
    let doi = ids.and_then(|ids| ids.doi.as_deref().map(normalize_doi));
    if pmid.is_none() && doi.is_none() {
        return None;
    }

    let mut publication = Publication::new(
        pmid.as_deref(),
        doi.as_deref(),
        paper.title.unwrap_or_default(),
    );
    publication.year = paper.year;
    publication.journal = paper.venue.filter(|v| !v.is_empty());
    Some(publication)
}

fn pubmed_record_to_publication(pmid: &str, record: &serde_json::Value) -> Publication {
    let doi = record["articleids"]
        .as_array()
        .and_then(|ids| {
            ids.iter().find_map(|entry| {
                (entry["idtype"].as_str() == Some("doi"))
                    .then(|| entry["value"].as_str().map(str::to_string))
                    .flatten()
            })
        })
        .map(|doi| normalize_doi(&doi));

    let mut publication = Publication::new(
        Some(pmid),
        doi.as_deref(),
        record["title"].as_str().unwrap_or_default(),
    );
    publication.journal = record["fulljournalname"].as_str().map(str::to_string);
    publication.year = record["pubdate"]
        .as_str()
        .and_then(|date| date.split_whitespace().next())
        .and_then(|year| year.parse().ok());
    publication.authors = record["authors"]
        .as_array()
        .map(|authors| {
            authors
                .iter()
                .filter_map(|a| a["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    publication
}

/// Extracts a trailing numeric id from URLs like
/// `https://pubmed.ncbi.nlm.nih.gov/38376465`.
fn trailing_numeric_id(url: &str) -> Option<String> {
    let id = url.trim_end_matches('/').rsplit('/').next()?;
    (!id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())).then(|| id.to_string())
}

/// Merges incoming publications, deduplicating by PMID then DOI and keeping
/// the richer record.
fn merge_publications(into: &mut Vec<Publication>, incoming: Vec<Publication>) {
    let mut by_pmid: HashMap<String, usize> = HashMap::new();
    let mut by_doi: HashMap<String, usize> = HashMap::new();
    for (index, publication) in into.iter().enumerate() {
        if let Some(pmid) = publication.id.pmid() {
            by_pmid.insert(pmid.to_string(), index);
        }
        if let Some(doi) = &publication.doi {
            by_doi.insert(doi.clone(), index);
        }
    }

    for publication in incoming {
        let existing = publication
            .id
            .pmid()
            .and_then(|pmid| by_pmid.get(pmid))
            .or_else(|| {
                publication
                    .doi
                    .as_ref()
                    .and_then(|doi| by_doi.get(doi))
            })
            .copied();

        match existing {
            Some(index) => {
                if publication.richness() > into[index].richness() {
                    into[index] = publication;
                }
            }
            None => {
                if let Some(pmid) = publication.id.pmid() {
                    by_pmid.insert(pmid.to_string(), into.len());
                }
                if let Some(doi) = &publication.doi {
                    by_doi.insert(doi.clone(), into.len());
                }
                into.push(publication);
            }
        }
    }
}
