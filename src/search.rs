//! Dataset search collaborator contract and the NCBI GEO implementation.
//!
//! The pipeline consumes search through the [`DatasetSearch`] trait: a
//! ranked list of dataset hits with lightweight metadata and the PMIDs of
//! the originating publications. Query expansion and NLP happen upstream;
//! the string arriving here is final.
//!
//! [`GeoDatasetSearch`] is the production implementation over the NCBI
//! E-utilities `gds` database (esearch + esummary).

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::fetch::Fetcher;
use crate::model::{Dataset, DatasetId};

/// Default NCBI E-utilities base URL.
const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov";

/// One search hit: dataset metadata plus its originating PMIDs.
#[derive(Debug, Clone)]
pub struct DatasetHit {
    pub dataset: Dataset,
    pub original_pmids: Vec<String>,
}

/// Inbound collaborator contract for GEO dataset search.
#[async_trait]
pub trait DatasetSearch: Send + Sync {
    /// Searches for datasets matching an already-expanded query.
    async fn search(&self, query: &str, max_datasets: usize) -> anyhow::Result<Vec<DatasetHit>>;
}

/// NCBI GEO (`db=gds`) search over esearch + esummary.
#[derive(Debug, Clone)]
pub struct GeoDatasetSearch {
    fetcher: Fetcher,
    base_url: String,
    api_key: Option<String>,
}

impl GeoDatasetSearch {
    /// Creates a search client against the public E-utilities host.
    #[must_use]
    pub fn new(fetcher: Fetcher, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key,
        }
    }

    /// Overrides the E-utilities host (tests).
    #[must_use]
    pub fn with_base_url(fetcher: Fetcher, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            api_key: None,
        }
    }

    fn key_suffix(&self) -> String {
        self.api_key
            .as_deref()
            .map(|key| format!("&api_key={}", urlencoding::encode(key)))
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatasetSearch for GeoDatasetSearch {
    #[instrument(skip(self), fields(query = %query))]
    async fn search(&self, query: &str, max_datasets: usize) -> anyhow::Result<Vec<DatasetHit>> {
        let term = format!("{query} AND gse[ETYP]");
        let esearch_url = format!(
            "{}/entrez/eutils/esearch.fcgi?db=gds&term={}&retmode=json&retmax={}{}",
            self.base_url,
            urlencoding::encode(&term),
            max_datasets,
            self.key_suffix()
        );

        let response: serde_json::Value = self.fetcher.get_json(&esearch_url).await?;
        let uids: Vec<String> = response["esearchresult"]["idlist"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if uids.is_empty() {
            debug!("geo search returned no series");
            return Ok(Vec::new());
        }

        let esummary_url = format!(
            "{}/entrez/eutils/esummary.fcgi?db=gds&id={}&retmode=json{}",
            self.base_url,
            uids.join(","),
            self.key_suffix()
        );
        let summaries: serde_json::Value = self.fetcher.get_json(&esummary_url).await?;
        let result = &summaries["result"];

        let mut hits = Vec::new();
        for uid in &uids {
            let record = &result[uid.as_str()];
            if !record.is_object() {
                continue;
            }
            let Some(accession) = record["accession"].as_str() else {
                continue;
            };
            let dataset_id: DatasetId = match accession.parse() {
                Ok(id) => id,
                Err(e) => {
                    warn!(accession = %accession, error = %e, "skipping non-series accession");
                    continue;
                }
            };

            let original_pmids: Vec<String> = record["pubmedids"]
                .as_array()
                .map(|ids| {
                    ids.iter()
                        .filter_map(|v| match v {
                            serde_json::Value::String(s) => Some(s.clone()),
                            serde_json::Value::Number(n) => Some(n.to_string()),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            hits.push(DatasetHit {
                dataset: Dataset {
                    id: dataset_id,
                    title: record["title"].as_str().unwrap_or_default().to_string(),
                    organism: record["taxon"].as_str().map(str::to_string),
                    platform: record["gpl"]
                        .as_str()
                        .filter(|gpl| !gpl.is_empty())
                        .map(|gpl| format!("GPL{gpl}")),
                    sample_count: record["n_samples"].as_i64(),
                    summary: record["summary"].as_str().map(str::to_string),
                    first_seen_at: Utc::now(),
                },
                original_pmids,
            });
        }

        debug!(hits = hits.len(), "geo search complete");
        Ok(hits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn search_for(server: &MockServer) -> GeoDatasetSearch {
        let fetcher = Fetcher::new(
            &FetcherConfig {
                retry_backoff_s: 0.01,
                ..FetcherConfig::default()
            },
            "test@example.org",
        )
        .unwrap();
        GeoDatasetSearch::with_base_url(fetcher, server.uri())
    }

    #[tokio::test]
    async fn test_search_builds_hits_with_original_pmids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esearch.fcgi"))
            .and(query_param("db", "gds"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"esearchresult": {"idlist": ["200012345"]}}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esummary.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"result": {"uids": ["200012345"], "200012345": {
                    "accession": "GSE12345",
                    "title": "Breast cancer RNA-seq",
                    "taxon": "Homo sapiens",
                    "gpl": "24676",
                    "n_samples": 42,
                    "summary": "Expression profiling",
                    "pubmedids": ["38376465"]
                }}}"#,
            ))
            .mount(&server)
            .await;

        let hits = search_for(&server)
            .search("breast cancer RNA-seq", 2)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dataset.id.as_str(), "GSE12345");
        assert_eq!(hits[0].dataset.organism.as_deref(), Some("Homo sapiens"));
        assert_eq!(hits[0].dataset.platform.as_deref(), Some("GPL24676"));
        assert_eq!(hits[0].dataset.sample_count, Some(42));
        assert_eq!(hits[0].original_pmids, vec!["38376465".to_string()]);
    }

    #[tokio::test]
    async fn test_search_empty_idlist_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esearch.fcgi"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"esearchresult": {"idlist": []}}"#),
            )
            .mount(&server)
            .await;

        let hits = search_for(&server).search("no such thing", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_skips_malformed_accessions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esearch.fcgi"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"esearchresult": {"idlist": ["1", "2"]}}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entrez/eutils/esummary.fcgi"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"result": {
                    "uids": ["1", "2"],
                    "1": {"accession": "GDS999", "title": "profile"},
                    "2": {"accession": "GSE77", "title": "series", "pubmedids": []}
                }}"#,
            ))
            .mount(&server)
            .await;

        let hits = search_for(&server).search("q", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dataset.id.as_str(), "GSE77");
    }
}
