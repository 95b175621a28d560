//! Shared helpers for integration tests.

#![allow(dead_code)] // not every test file uses every helper

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};

use geoharvest_core::config::FetcherConfig;
use geoharvest_core::fetch::Fetcher;

/// A fetcher tuned for fast tests: short backoff, small minimum PDF size.
pub fn test_fetcher() -> Fetcher {
    Fetcher::new(
        &FetcherConfig {
            max_retries: 3,
            retry_backoff_s: 0.01,
            timeout_s: 5.0,
            min_pdf_bytes: 100,
            max_pdf_bytes: 10 * 1024 * 1024,
            cookie_file: None,
        },
        "test@example.org",
    )
    .expect("test fetcher must build")
}

/// Serializes a single-page PDF whose text layer shows one line per
/// text-showing operation. Section headers land at line starts, so both
/// extractors find them.
pub fn section_pdf_bytes(lines: &[&str]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![50.into(), 750.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = document.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("content encodes"),
    ));
    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).expect("pdf serializes");
    bytes
}

/// A full article-shaped PDF with all four expected sections.
pub fn article_pdf_bytes() -> Vec<u8> {
    section_pdf_bytes(&[
        "Abstract",
        "We profiled breast tumors with RNA sequencing.",
        "Methods",
        "Libraries were prepared and sequenced.",
        "Results",
        "We identified differentially expressed genes.",
        "Discussion",
        "Expression changes track tumor subtype.",
    ])
}

/// Recursively collects files with the given suffix under a directory.
pub fn files_with_suffix(root: &std::path::Path, suffix: &str) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
            {
                found.push(path);
            }
        }
    }
    found
}
