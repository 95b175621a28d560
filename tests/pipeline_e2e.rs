//! End-to-end pipeline tests over mocked external services: full
//! enrichment, idempotent re-runs, source outages, and cancellation
//! hygiene.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geoharvest_core::acquire::{PdfDownloadManager, PdfLayout};
use geoharvest_core::citations::CitationDiscovery;
use geoharvest_core::config::{CoordinatorConfig, SourceConfig};
use geoharvest_core::db::Database;
use geoharvest_core::discover::UrlDiscovery;
use geoharvest_core::extract::{ParsedContentCache, PdfExtractor};
use geoharvest_core::hotcache::DatasetHotCache;
use geoharvest_core::model::{AcquisitionStatus, Dataset, PublicationRole};
use geoharvest_core::pipeline::{
    CancelToken, Coordinator, DatasetRunStatus, RunOptions,
};
use geoharvest_core::search::{DatasetHit, DatasetSearch};
use geoharvest_core::source::{
    CrossrefClient, InstitutionalClient, SourceClient, SourceRegistry, UnpaywallClient,
};
use geoharvest_core::store::{PublicationSubstatus, Store};

use support::{article_pdf_bytes, files_with_suffix, test_fetcher};

/// Search stub returning a fixed hit list.
#[derive(Clone)]
struct StubSearch {
    hits: Vec<DatasetHit>,
}

#[async_trait]
impl DatasetSearch for StubSearch {
    async fn search(&self, _query: &str, _max: usize) -> anyhow::Result<Vec<DatasetHit>> {
        Ok(self.hits.clone())
    }
}

fn dataset_hit(accession: &str, pmids: &[&str]) -> DatasetHit {
    DatasetHit {
        dataset: Dataset {
            id: accession.parse().unwrap(),
            title: "Breast cancer RNA-seq".to_string(),
            organism: Some("Homo sapiens".to_string()),
            platform: Some("GPL24676".to_string()),
            sample_count: Some(42),
            summary: Some("Expression profiling of tumors".to_string()),
            first_seen_at: Utc::now(),
        },
        original_pmids: pmids.iter().map(|p| (*p).to_string()).collect(),
    }
}

fn source_config(tier: u8, server: &MockServer) -> SourceConfig {
    SourceConfig {
        enabled: true,
        tier,
        rate_per_window: 100,
        window_seconds: 1,
        api_key: None,
        base_url: Some(server.uri()),
        url_template: None,
    }
}

/// Assembles a coordinator whose every external dependency points at the
/// mock server.
fn build_coordinator(
    server: &MockServer,
    dir: &TempDir,
    store: &Store,
    hits: Vec<DatasetHit>,
    clients: Vec<Arc<dyn SourceClient>>,
) -> Coordinator {
    let fetcher = test_fetcher();
    let hot_cache = Arc::new(DatasetHotCache::new(
        store.clone(),
        16,
        Duration::from_secs(3600),
    ));
    Coordinator::new(
        Arc::new(StubSearch { hits }),
        CitationDiscovery::with_base_urls(
            fetcher.clone(),
            "test@example.org",
            server.uri(),
            server.uri(),
            server.uri(),
        ),
        UrlDiscovery::new(
            Arc::new(SourceRegistry::from_clients(clients)),
            Duration::from_secs(5),
        ),
        PdfDownloadManager::new(fetcher, PdfLayout::new(dir.path().join("pdfs")), 3),
        PdfExtractor::new(),
        Arc::new(ParsedContentCache::new(dir.path().join("parsed"), 16)),
        store.clone(),
        hot_cache,
        CoordinatorConfig::default(),
    )
}

async fn mount_pubmed_summary(server: &MockServer, ids_param: &str, entries: &[(&str, &str)]) {
    let records: Vec<String> = entries
        .iter()
        .map(|(pmid, doi)| {
            format!(
                r#""{pmid}": {{
                    "title": "Paper {pmid}",
                    "fulljournalname": "Nature",
                    "pubdate": "2024 Feb 20",
                    "authors": [{{"name": "Doe J"}}],
                    "articleids": [{{"idtype": "doi", "value": "{doi}"}}]
                }}"#
            )
        })
        .collect();
    let uids: Vec<String> = entries
        .iter()
        .map(|(pmid, _)| format!(r#""{pmid}""#))
        .collect();

    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esummary.fcgi"))
        .and(query_param("id", ids_param))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"result": {{"uids": [{}], {}}}}}"#,
            uids.join(","),
            records.join(",")
        )))
        .mount(server)
        .await;
}

/// Scenario S1 mocks: four publications, Unpaywall covers two, the
/// institutional proxy covers the third, the fourth stays paywalled.
async fn mount_s1(server: &MockServer) {
    // Citation discovery: originals' metadata.
    mount_pubmed_summary(server, "38376465", &[("38376465", "10.1000/orig")]).await;
    // Strategy A finds nothing for the original.
    Mock::given(method("GET"))
        .and(path("/works/pmid:38376465"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    // Strategy B: three citing PMIDs.
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"esearchresult": {"idlist": ["201", "202", "203"]}}"#),
        )
        .mount(server)
        .await;
    mount_pubmed_summary(
        server,
        "201,202,203",
        &[
            ("201", "10.1000/c1"),
            ("202", "10.1000/c2"),
            ("203", "10.1000/c3"),
        ],
    )
    .await;

    // Unpaywall knows the original and the first citer.
    for doi_path in ["/v2/10.1000/orig", "/v2/10.1000/c1"] {
        let pdf_name = if doi_path.ends_with("orig") {
            "orig"
        } else {
            "c1"
        };
        Mock::given(method("GET"))
            .and(path(doi_path))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"best_oa_location": {{"url_for_pdf": "{}/pdfs/{pdf_name}.pdf",
                    "url": null}}, "oa_locations": []}}"#,
                server.uri()
            )))
            .mount(server)
            .await;
    }
    for doi_path in ["/v2/10.1000/c2", "/v2/10.1000/c3"] {
        Mock::given(method("GET"))
            .and(path(doi_path))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    // The PDFs themselves; each may be downloaded at most once across every
    // run against this server (idempotence).
    for name in ["orig", "c1"] {
        Mock::given(method("GET"))
            .and(path(format!("/pdfs/{name}.pdf")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
            .expect(1)
            .mount(server)
            .await;
    }

    // Institutional proxy: PDF for c2, a login page for c3, 404 otherwise.
    Mock::given(method("GET"))
        .and(path_regex(r"^/proxy/.*c2$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/proxy/.*c3$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>Please sign in via your library</body></html>".repeat(10)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/proxy/"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(u8::MAX)
        .mount(server)
        .await;
}

fn s1_clients(server: &MockServer) -> Vec<Arc<dyn SourceClient>> {
    let fetcher = test_fetcher();
    let institutional = InstitutionalClient::from_config(
        &SourceConfig {
            url_template: Some(format!("{}/proxy/{{doi}}", server.uri())),
            ..source_config(1, server)
        },
        fetcher.clone(),
    )
    .expect("institutional client builds");
    vec![
        Arc::new(institutional),
        Arc::new(UnpaywallClient::new(
            fetcher,
            &source_config(2, server),
            "test@example.org",
        )),
    ]
}

#[tokio::test]
async fn test_s1_full_enrichment_with_mixed_outcomes() {
    let server = MockServer::start().await;
    mount_s1(&server).await;

    let dir = TempDir::new().unwrap();
    let store = Store::new(Database::new_in_memory().await.unwrap());
    let coordinator = build_coordinator(
        &server,
        &dir,
        &store,
        vec![dataset_hit("GSE12345", &["38376465"])],
        s1_clients(&server),
    );

    let result = coordinator
        .run(
            "breast cancer RNA-seq",
            2,
            RunOptions::from_config(&CoordinatorConfig::default()),
        )
        .await
        .unwrap();

    assert_eq!(result.datasets.len(), 1);
    let dataset = &result.datasets[0];
    assert_eq!(dataset.status, DatasetRunStatus::Partial);
    assert_eq!(dataset.publications.len(), 4);

    let parsed = dataset
        .publications
        .iter()
        .filter(|p| p.substatus == PublicationSubstatus::Parsed)
        .count();
    let metadata_only = dataset
        .publications
        .iter()
        .filter(|p| p.substatus == PublicationSubstatus::MetadataOnly)
        .count();
    assert_eq!(parsed, 3, "three publications end parsed");
    assert_eq!(metadata_only, 1, "the paywalled one stays metadata-only");

    // Store-level assertions: 3 successes, 1 paywalled, 3 extractions.
    let dataset_id = dataset.dataset_id.clone();
    let view = store
        .get_complete_geo_data(&dataset_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.pdf_count(), 3);
    assert_eq!(view.parsed_count(), 3);

    let paywalled = view
        .publications
        .iter()
        .find(|p| p.pdf_status == Some(AcquisitionStatus::Paywalled))
        .expect("one publication is paywalled");
    assert_eq!(paywalled.substatus(), PublicationSubstatus::MetadataOnly);

    for publication_view in &view.publications {
        if publication_view.pdf_status == Some(AcquisitionStatus::Success) {
            let extraction = store
                .get_extracted_content(&publication_view.publication.id)
                .await
                .unwrap()
                .expect("extraction row exists for every acquired pdf");
            assert!(extraction.extraction_quality > 0.0);
        }
    }

    // The original kept its role even though the mention search returned it.
    let origin_count = view
        .publications
        .iter()
        .filter(|p| p.role == PublicationRole::Origin)
        .count();
    assert_eq!(origin_count, 1);

    // No tmp residue.
    assert!(files_with_suffix(dir.path(), ".tmp").is_empty());
}

#[tokio::test]
async fn test_s3_rerun_performs_no_new_downloads() {
    let server = MockServer::start().await;
    mount_s1(&server).await;

    let dir = TempDir::new().unwrap();
    let store = Store::new(Database::new_in_memory().await.unwrap());
    let coordinator = build_coordinator(
        &server,
        &dir,
        &store,
        vec![dataset_hit("GSE12345", &["38376465"])],
        s1_clients(&server),
    );
    let options = RunOptions::from_config(&CoordinatorConfig::default());

    let first = coordinator
        .run("breast cancer RNA-seq", 2, options.clone())
        .await
        .unwrap();
    let second = coordinator
        .run("breast cancer RNA-seq", 2, options)
        .await
        .unwrap();

    // The PDF endpoint mocks carry expect(1): a second download of any PDF
    // would fail server verification when `server` drops.
    let count = |result: &geoharvest_core::pipeline::RunResult, substatus| {
        result.datasets[0]
            .publications
            .iter()
            .filter(|p| p.substatus == substatus)
            .count()
    };
    assert_eq!(
        count(&first, PublicationSubstatus::Parsed),
        count(&second, PublicationSubstatus::Parsed),
        "re-run reproduces the same parsed set"
    );

    // Same stored state: still exactly 3 successes.
    let view = store
        .get_complete_geo_data(&first.datasets[0].dataset_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.pdf_count(), 3);
}

#[tokio::test]
async fn test_s4_source_outage_falls_through_and_records_event() {
    let server = MockServer::start().await;

    // One original, no citers.
    mount_pubmed_summary(&server, "38376465", &[("38376465", "10.1000/orig")]).await;
    Mock::given(method("GET"))
        .and(path("/works/pmid:38376465"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"esearchresult": {"idlist": []}}"#),
        )
        .mount(&server)
        .await;

    // Unpaywall is down hard; Crossref (next tier) has the PDF link.
    Mock::given(method("GET"))
        .and(path("/v2/10.1000/orig"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/works/10.1000/orig"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"status": "ok", "message": {{"link": [
                {{"URL": "{}/pdfs/orig.pdf", "content-type": "application/pdf",
                  "intended-application": "text-mining"}}
            ]}}}}"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pdfs/orig.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
        .mount(&server)
        .await;

    let fetcher = test_fetcher();
    let clients: Vec<Arc<dyn SourceClient>> = vec![
        Arc::new(UnpaywallClient::new(
            fetcher.clone(),
            &source_config(2, &server),
            "test@example.org",
        )),
        Arc::new(CrossrefClient::new(
            fetcher,
            &source_config(5, &server),
            "test@example.org",
        )),
    ];

    let dir = TempDir::new().unwrap();
    let store = Store::new(Database::new_in_memory().await.unwrap());
    let coordinator = build_coordinator(
        &server,
        &dir,
        &store,
        vec![dataset_hit("GSE12345", &["38376465"])],
        clients,
    );

    let result = coordinator
        .run(
            "q",
            1,
            RunOptions::from_config(&CoordinatorConfig::default()),
        )
        .await
        .unwrap();

    // The publication still ends parsed via the next-tier source.
    assert_eq!(result.datasets[0].status, DatasetRunStatus::Complete);
    assert_eq!(
        result.datasets[0].publications[0].substatus,
        PublicationSubstatus::Parsed
    );

    // And the outage left a url_discovery failure event naming unpaywall.
    let events = store
        .events_for_dataset(&result.datasets[0].dataset_id)
        .await
        .unwrap();
    assert!(
        events.iter().any(|(stage, outcome, detail)| {
            stage == "url_discovery"
                && outcome == "failed"
                && detail.as_deref().is_some_and(|d| d.contains("unpaywall"))
        }),
        "expected a failed url_discovery event for unpaywall, got {events:?}"
    );
}

#[tokio::test]
async fn test_cancelled_run_leaves_no_tmp_files_or_inflight_entries() {
    let server = MockServer::start().await;
    mount_pubmed_summary(&server, "38376465", &[("38376465", "10.1000/orig")]).await;
    Mock::given(method("GET"))
        .and(path("/works/pmid:38376465"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/entrez/eutils/esearch.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"esearchresult": {"idlist": []}}"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/10.1000/orig"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"best_oa_location": {{"url_for_pdf": "{}/pdfs/slow.pdf", "url": null}},
                "oa_locations": []}}"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    // The PDF is slow enough that cancellation lands mid-acquisition.
    Mock::given(method("GET"))
        .and(path("/pdfs/slow.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(10))
                .set_body_bytes(article_pdf_bytes()),
        )
        .mount(&server)
        .await;

    let fetcher = test_fetcher();
    let clients: Vec<Arc<dyn SourceClient>> = vec![Arc::new(UnpaywallClient::new(
        fetcher,
        &source_config(2, &server),
        "test@example.org",
    ))];

    let dir = TempDir::new().unwrap();
    let store = Store::new(Database::new_in_memory().await.unwrap());
    let coordinator = build_coordinator(
        &server,
        &dir,
        &store,
        vec![dataset_hit("GSE12345", &["38376465"])],
        clients,
    );

    let cancel = CancelToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        canceller.cancel();
    });

    let result = coordinator
        .run_with_cancel(
            "q",
            1,
            RunOptions::from_config(&CoordinatorConfig::default()),
            cancel,
        )
        .await
        .unwrap();

    assert!(result.cancelled);
    assert!(
        files_with_suffix(dir.path(), ".tmp").is_empty(),
        "no tmp files may survive a cancelled run"
    );
    assert_eq!(
        coordinator.download_manager().in_flight_count(),
        0,
        "the coalescing map must drain on cancellation"
    );

    // Whatever was persisted before cancellation stays persisted.
    let dataset = store
        .get_dataset(&"GSE12345".parse().unwrap())
        .await
        .unwrap();
    assert!(dataset.is_some(), "no rollback of persisted rows");
}
