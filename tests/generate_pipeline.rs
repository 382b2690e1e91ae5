//! End-to-end pipeline tests against the mocked remote service.

use std::sync::Mutex;

use songbook_generator::contract::{DocumentDescriptor, MockSourceClient};
use songbook_generator::error::SongbookError;
use songbook_generator::filter::{FieldValue, FilterExpression};
use songbook_generator::pdf::test_support::labeled_pdf_bytes;
use songbook_generator::pdf::{generate_songbook, GenerateRequest};
use songbook_generator::progress::NullProgress;

use lopdf::{Document, Object};
use tempfile::tempdir;

fn song(id: &str, title: &str, year: f64) -> DocumentDescriptor {
    DocumentDescriptor::new(id, title).with_metadata("year", FieldValue::Number(year))
}

fn request_into(dir: &std::path::Path) -> GenerateRequest {
    let mut request = GenerateRequest::new(vec!["folder-1".to_string()], dir.join("songbook.pdf"));
    request.cover_cache_dir = Some(dir.join("covers"));
    request
}

fn page_count(path: &std::path::Path) -> usize {
    Document::load(path).unwrap().get_pages().len()
}

#[tokio::test]
async fn year_filter_and_limit_produce_single_song_book_with_toc() {
    let dir = tempdir().unwrap();
    let mut client = MockSourceClient::new();

    // Two overlapping source folders; A is too old, B wins by listing order.
    client
        .expect_list_documents()
        .withf(|folder| folder == "folder-1")
        .returning(|_| Ok(vec![song("a", "A", 1990.0), song("b", "B", 2005.0)]));
    client
        .expect_list_documents()
        .withf(|folder| folder == "folder-2")
        .returning(|_| Ok(vec![song("b", "B", 2005.0), song("c", "C", 2010.0)]));

    client
        .expect_copy_document()
        .returning(|_, _| Ok("cover-copy".to_string()));
    client
        .expect_batch_replace_text()
        .returning(|_, subs| Ok(subs.len()));
    client
        .expect_export_pdf()
        .withf(|id| id == "cover-copy")
        .returning(|_| Ok(labeled_pdf_bytes("cover", 1)));
    client
        .expect_export_pdf()
        .withf(|id| id == "b")
        .returning(|_| Ok(labeled_pdf_bytes("B", 2)));
    client
        .expect_delete_document()
        .times(1)
        .returning(|_| Ok(()));

    let mut request = request_into(dir.path());
    request.source_folders = vec!["folder-1".to_string(), "folder-2".to_string()];
    request.cover_template_id = Some("cover-template".to_string());
    request.filter = Some(FilterExpression::parse("year:gte:2000").unwrap());
    request.limit = Some(1);

    let events: Mutex<Vec<f64>> = Mutex::new(Vec::new());
    let progress = |fraction: f64, _message: Option<&str>| {
        events.lock().unwrap().push(fraction);
    };

    let path = generate_songbook(&client, &request, &progress)
        .await
        .unwrap();

    // cover (1) + toc (1) + B (2)
    assert_eq!(page_count(&path), 4);

    // The TOC page records B starting on page 3 of the final artifact.
    let mut doc = Document::load(&path).unwrap();
    doc.decompress();
    let pages = doc.get_pages();
    let toc_content = doc.get_page_content(pages[&2]).unwrap();
    let toc_text = String::from_utf8_lossy(&toc_content);
    assert!(toc_text.contains("Table of Contents"), "missing TOC title");
    assert!(toc_text.contains("(B)"), "missing TOC entry for B");
    assert!(toc_text.contains("(3)"), "TOC should point B at page 3");

    // The TOC page must still resolve its own fonts once it sits behind the
    // cover in the merged page tree.
    let (direct, resource_ids) = doc.get_page_resources(pages[&2]);
    let referenced = resource_ids
        .into_iter()
        .filter_map(|id| doc.get_object(id).and_then(Object::as_dict).ok());
    let toc_fonts: Vec<Vec<u8>> = direct
        .into_iter()
        .chain(referenced)
        .filter_map(|resources| resources.get(b"Font").and_then(Object::as_dict).ok())
        .flat_map(|fonts| fonts.iter().map(|(key, _)| key.clone()))
        .collect();
    assert!(
        toc_fonts.contains(&b"F2".to_vec()),
        "TOC heading font missing from the merged page's resources"
    );

    // Progress is monotonic and finishes at 100%.
    let events = events.lock().unwrap();
    assert!(
        events.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {events:?}"
    );
    assert_eq!(*events.last().unwrap(), 1.0);
}

#[tokio::test]
async fn corrupt_cover_export_aborts_without_output_file() {
    let dir = tempdir().unwrap();
    let mut client = MockSourceClient::new();

    client
        .expect_list_documents()
        .returning(|_| Ok(vec![song("a", "A", 2001.0)]));
    client
        .expect_copy_document()
        .returning(|_, _| Ok("cover-copy".to_string()));
    client.expect_batch_replace_text().returning(|_, _| Ok(1));
    // Zero-byte export: the cover fails its integrity check.
    client
        .expect_export_pdf()
        .withf(|id| id == "cover-copy")
        .returning(|_| Ok(Vec::new()));
    client
        .expect_delete_document()
        .times(1)
        .returning(|_| Ok(()));

    let mut request = request_into(dir.path());
    request.cover_template_id = Some("cover-template".to_string());

    let err = generate_songbook(&client, &request, &NullProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SongbookError::CorruptArtifact { .. }));
    assert!(
        !request.destination.exists(),
        "no output file may exist after a fatal error"
    );
}

#[tokio::test]
async fn failed_body_fetch_is_skipped_and_the_rest_survive() {
    let dir = tempdir().unwrap();
    let mut client = MockSourceClient::new();

    client.expect_list_documents().returning(|_| {
        Ok((1..=5)
            .map(|i| song(&format!("id-{i}"), &format!("Song {i}"), 2000.0))
            .collect())
    });
    client
        .expect_export_pdf()
        .withf(|id| id == "id-3")
        .returning(|_| Err("500 export backend sad".into()));
    client
        .expect_export_pdf()
        .withf(|id| id != "id-3")
        .returning(|_| Ok(labeled_pdf_bytes("song", 1)));

    let request = request_into(dir.path());
    let path = generate_songbook(&client, &request, &NullProgress)
        .await
        .unwrap();

    // toc (1) + four surviving single-page songs
    assert_eq!(page_count(&path), 5);

    // The outline has one bookmark per surviving song, in order.
    let doc = Document::load(&path).unwrap();
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .unwrap();
    let catalog = doc.get_object(catalog_id).and_then(Object::as_dict).unwrap();
    let outlines_id = catalog
        .get(b"Outlines")
        .and_then(Object::as_reference)
        .unwrap();
    let outlines = doc
        .get_object(outlines_id)
        .and_then(Object::as_dict)
        .unwrap();
    assert_eq!(
        outlines.get(b"Count").and_then(Object::as_i64).unwrap(),
        4
    );
}

#[tokio::test]
async fn all_body_fetches_failing_is_an_empty_songbook() {
    let dir = tempdir().unwrap();
    let mut client = MockSourceClient::new();

    client
        .expect_list_documents()
        .returning(|_| Ok(vec![song("a", "A", 2001.0), song("b", "B", 2002.0)]));
    client
        .expect_export_pdf()
        .returning(|_| Err("quota exceeded".into()));

    let request = request_into(dir.path());
    let err = generate_songbook(&client, &request, &NullProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SongbookError::EmptySongbook));
    assert!(!request.destination.exists());
}

#[tokio::test]
async fn no_matching_documents_is_an_empty_songbook() {
    let dir = tempdir().unwrap();
    let mut client = MockSourceClient::new();

    client
        .expect_list_documents()
        .returning(|_| Ok(vec![song("a", "A", 1960.0)]));

    let mut request = request_into(dir.path());
    request.filter = Some(FilterExpression::parse("year:gte:2000").unwrap());

    let err = generate_songbook(&client, &request, &NullProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SongbookError::EmptySongbook));
}

#[tokio::test]
async fn limit_never_truncates_preface_or_postface() {
    let dir = tempdir().unwrap();
    let mut client = MockSourceClient::new();

    client
        .expect_list_documents()
        .returning(|_| Ok(vec![song("a", "A", 2001.0), song("b", "B", 2002.0)]));
    client
        .expect_export_pdf()
        .withf(|id| id == "pre-1")
        .returning(|_| Ok(labeled_pdf_bytes("preface", 1)));
    client
        .expect_export_pdf()
        .withf(|id| id == "post-1")
        .returning(|_| Ok(labeled_pdf_bytes("postface", 1)));
    client
        .expect_export_pdf()
        .withf(|id| id == "a")
        .returning(|_| Ok(labeled_pdf_bytes("A", 1)));

    let mut request = request_into(dir.path());
    request.limit = Some(1);
    request.preface_ids = vec!["pre-1".to_string()];
    request.postface_ids = vec!["post-1".to_string()];

    let path = generate_songbook(&client, &request, &NullProgress)
        .await
        .unwrap();

    // preface (1) + toc (1) + body A (1) + postface (1)
    assert_eq!(page_count(&path), 4);

    // A starts after preface and TOC: page 3.
    let mut doc = Document::load(&path).unwrap();
    doc.decompress();
    let pages = doc.get_pages();
    let toc_text = String::from_utf8_lossy(&doc.get_page_content(pages[&2]).unwrap()).to_string();
    assert!(toc_text.contains("(A)"));
    assert!(toc_text.contains("(3)"));
}
