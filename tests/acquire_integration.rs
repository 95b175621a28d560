//! Integration tests for PDF acquisition: magic-byte enforcement on the
//! final path, candidate fallback, and tmp hygiene.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geoharvest_core::acquire::{PdfDownloadManager, PdfLayout};
use geoharvest_core::discover::{CandidateStream, DiscoveryOptions, UrlDiscovery};
use geoharvest_core::model::{
    AcquisitionStatus, DatasetId, Publication, PublicationRole, UrlCandidate, UrlKind,
};
use geoharvest_core::source::SourceRegistry;

use support::{article_pdf_bytes, files_with_suffix, test_fetcher};

fn candidate(publication: &Publication, url: &str, kind: UrlKind, tier: u8) -> UrlCandidate {
    UrlCandidate {
        publication_id: publication.id.clone(),
        source_name: "unpaywall".to_string(),
        url: url.to_string(),
        kind,
        tier,
        discovered_at: Utc::now(),
    }
}

fn test_ids() -> (DatasetId, Publication) {
    (
        "GSE12345".parse().unwrap(),
        Publication::new(Some("38376465"), Some("10.1000/j.test.1"), "Paper"),
    )
}

#[tokio::test]
async fn test_no_invalid_file_ever_reaches_final_path() {
    // Scenario S6: HTTP 200 with an HTML body is classified invalid_content,
    // the next candidate is attempted, and nothing is left at the final path
    // from the bad attempt.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fake.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>There is no PDF here</body></html>".repeat(10)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/real.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = PdfDownloadManager::new(test_fetcher(), PdfLayout::new(dir.path()), 3);
    let (dataset_id, publication) = test_ids();

    let mut stream = CandidateStream::from_candidates(vec![
        candidate(
            &publication,
            &format!("{}/fake.pdf", server.uri()),
            UrlKind::Pdf,
            2,
        ),
        candidate(
            &publication,
            &format!("{}/real.pdf", server.uri()),
            UrlKind::Pdf,
            3,
        ),
    ]);

    let acquisition = manager
        .acquire(
            &dataset_id,
            PublicationRole::Origin,
            &publication,
            &mut stream,
            UrlKind::Pdf,
        )
        .await;

    assert_eq!(acquisition.status, AcquisitionStatus::Success);

    // Every file on disk under the root starts with %PDF.
    for pdf in files_with_suffix(dir.path(), ".pdf") {
        let bytes = std::fs::read(&pdf).unwrap();
        assert!(
            bytes.starts_with(b"%PDF"),
            "file {} does not start with %PDF",
            pdf.display()
        );
    }
    assert!(files_with_suffix(dir.path(), ".tmp").is_empty());
}

#[tokio::test]
async fn test_candidates_tried_in_stream_order_without_reordering() {
    let server = MockServer::start().await;
    // Both URLs work; only the first may be fetched.
    Mock::given(method("GET"))
        .and(path("/first.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/second.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = PdfDownloadManager::new(test_fetcher(), PdfLayout::new(dir.path()), 3);
    let (dataset_id, publication) = test_ids();

    let mut stream = CandidateStream::from_candidates(vec![
        candidate(
            &publication,
            &format!("{}/first.pdf", server.uri()),
            UrlKind::Pdf,
            2,
        ),
        candidate(
            &publication,
            &format!("{}/second.pdf", server.uri()),
            UrlKind::Pdf,
            3,
        ),
    ]);

    let acquisition = manager
        .acquire(
            &dataset_id,
            PublicationRole::Origin,
            &publication,
            &mut stream,
            UrlKind::Pdf,
        )
        .await;

    assert_eq!(acquisition.status, AcquisitionStatus::Success);
    assert!(acquisition.final_url.unwrap().ends_with("/first.pdf"));
}

#[tokio::test]
async fn test_acquire_from_live_waterfall_stops_remaining_sources() {
    // The manager consumes the stream until satisfied; the unpolled tier-5
    // source task is aborted when the stream drops.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/10.1000/j.test.1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"{{"best_oa_location": {{"url_for_pdf": "{}/tier2.pdf", "url": null}},
                "oa_locations": []}}"#,
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tier2.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(article_pdf_bytes()))
        .mount(&server)
        .await;
    // Crossref is slow; its result must never be needed.
    Mock::given(method("GET"))
        .and(path("/works/10.1000/j.test.1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_string(r#"{"status": "ok", "message": {"link": []}}"#),
        )
        .mount(&server)
        .await;

    let fetcher = test_fetcher();
    let source_config = |tier: u8| geoharvest_core::config::SourceConfig {
        enabled: true,
        tier,
        rate_per_window: 100,
        window_seconds: 1,
        api_key: None,
        base_url: Some(server.uri()),
        url_template: None,
    };
    let registry = Arc::new(SourceRegistry::from_clients(vec![
        Arc::new(geoharvest_core::source::UnpaywallClient::new(
            fetcher.clone(),
            &source_config(2),
            "test@example.org",
        )),
        Arc::new(geoharvest_core::source::CrossrefClient::new(
            fetcher.clone(),
            &source_config(5),
            "test@example.org",
        )),
    ]));
    let discovery = UrlDiscovery::new(registry, Duration::from_secs(10));

    let dir = TempDir::new().unwrap();
    let manager = PdfDownloadManager::new(fetcher, PdfLayout::new(dir.path()), 3);
    let (dataset_id, publication) = test_ids();

    let started = std::time::Instant::now();
    let mut stream = discovery.discover(&publication, DiscoveryOptions::default());
    let acquisition = manager
        .acquire(
            &dataset_id,
            PublicationRole::Origin,
            &publication,
            &mut stream,
            UrlKind::Pdf,
        )
        .await;
    drop(stream);

    assert_eq!(acquisition.status, AcquisitionStatus::Success);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "satisfied acquisition must not wait for the slow tier-5 source"
    );
}
