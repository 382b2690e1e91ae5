//! Page assembly: orders cover, preface pages, table of contents, body
//! documents and postface pages, and writes the merged songbook.
//!
//! The table of contents references final page numbers but is inserted
//! before the body pages, so assembly is two-pass: every surviving body
//! document is fetched and parsed first (fixing its page count), the TOC is
//! sized and rendered from those counts, and only then is the page stream
//! merged once, in final order. No page references are backpatched.

use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use tracing::{debug, info, warn};

use crate::contract::{DocumentDescriptor, SourceClient};
use crate::cover;
use crate::error::{Result, SongbookError};
use crate::filter::FilterExpression;
use crate::progress::ProgressSink;
use crate::source;

/// TOC lines per page at the layout constants below.
const TOC_ENTRIES_PER_PAGE: usize = 32;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;

// Progress fractions: the body-document loop owns the 0.10..0.90 band;
// listing/cover/preface and toc/merge/write get small fixed slices at the
// edges, per the reporter contract (monotonic, 1.0 on success).
const FRACTION_LISTING: f64 = 0.02;
const FRACTION_LISTED: f64 = 0.05;
const FRACTION_COVER: f64 = 0.08;
const FRACTION_BODY_START: f64 = 0.10;
const FRACTION_BODY_END: f64 = 0.90;
const FRACTION_TOC: f64 = 0.92;
const FRACTION_WRITE: f64 = 0.97;

/// Everything one songbook run needs, resolved by the CLI/config layer.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Remote folder IDs to list body documents from.
    pub source_folders: Vec<String>,
    /// Where to write the finished songbook.
    pub destination: PathBuf,
    /// Optional cap on the number of body documents (applied after the
    /// filter, never to cover/preface/postface/TOC).
    pub limit: Option<usize>,
    /// Cover template document; `None` skips the cover entirely.
    pub cover_template_id: Option<String>,
    /// Optional single metadata filter.
    pub filter: Option<FilterExpression>,
    /// Documents inserted after the cover, before the TOC, in this order.
    pub preface_ids: Vec<String>,
    /// Documents appended at the very end, in this order.
    pub postface_ids: Vec<String>,
    /// Override for the cover cache directory (tests); defaults to the
    /// user cache dir.
    pub cover_cache_dir: Option<PathBuf>,
}

impl GenerateRequest {
    pub fn new(source_folders: Vec<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_folders,
            destination: destination.into(),
            limit: None,
            cover_template_id: None,
            filter: None,
            preface_ids: Vec::new(),
            postface_ids: Vec::new(),
            cover_cache_dir: None,
        }
    }
}

/// One finalized table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    /// 1-based page number of the document's first page in the final output.
    pub start_page: usize,
}

/// Runs the whole pipeline and returns the destination path on success.
///
/// Per-document fetch failures are downgraded to warnings and the document
/// is skipped; the run only fails when no body document at all could be
/// fetched. No partial output file is left behind on a fatal error.
pub async fn generate_songbook<C, P>(
    client: &C,
    request: &GenerateRequest,
    progress: &P,
) -> Result<PathBuf>
where
    C: SourceClient + ?Sized,
    P: ProgressSink + ?Sized,
{
    info!(
        folders = request.source_folders.len(),
        destination = %request.destination.display(),
        "Starting songbook generation"
    );
    progress.report(FRACTION_LISTING, Some("Listing source folders"));

    let descriptors = source::list_body_documents(
        client,
        &request.source_folders,
        request.filter.as_ref(),
        request.limit,
    )
    .await?;
    progress.report(
        FRACTION_LISTED,
        Some(&format!("Found {} songs", descriptors.len())),
    );
    if descriptors.is_empty() {
        return Err(SongbookError::EmptySongbook);
    }

    let cover_doc = match &request.cover_template_id {
        Some(template_id) => {
            progress.report(FRACTION_COVER, Some("Generating cover page"));
            let cache_dir = cover::cover_cache_dir(request.cover_cache_dir.as_deref())?;
            let cover_path = cover::build_cover(
                client,
                template_id,
                &cover::default_substitutions(),
                &cache_dir,
            )
            .await?;
            Some(load_local_pdf(&cover_path)?)
        }
        None => {
            info!("No cover template configured, skipping cover generation");
            None
        }
    };

    let preface_docs = fetch_auxiliary_documents(client, &request.preface_ids, "preface").await;

    // First pass: fetch and parse every body document, fixing page counts.
    let total = descriptors.len();
    let mut body_docs: Vec<(DocumentDescriptor, Document)> = Vec::new();
    for (index, descriptor) in descriptors.into_iter().enumerate() {
        match fetch_pdf_document(client, &descriptor.id).await {
            Ok(doc) => {
                debug!(
                    id = %descriptor.id,
                    title = %descriptor.title,
                    pages = doc.get_pages().len(),
                    "Fetched body document"
                );
                let title = descriptor.title.clone();
                body_docs.push((descriptor, doc));
                report_body_progress(progress, index, total, &format!("Added {title}"));
            }
            Err(detail) => {
                warn!(
                    id = %descriptor.id,
                    title = %descriptor.title,
                    error = %detail,
                    "Skipping document that failed to fetch"
                );
                report_body_progress(
                    progress,
                    index,
                    total,
                    &format!("Skipped {} (fetch failed)", descriptor.title),
                );
            }
        }
    }
    if body_docs.is_empty() {
        return Err(SongbookError::EmptySongbook);
    }

    let postface_docs = fetch_auxiliary_documents(client, &request.postface_ids, "postface").await;

    progress.report(FRACTION_TOC, Some("Building table of contents"));

    // Second pass: page arithmetic is now exact, so the TOC can be rendered
    // up front and the final page stream emitted linearly.
    let front_pages: usize = cover_doc
        .iter()
        .chain(preface_docs.iter())
        .map(page_count)
        .sum();
    let toc_pages = toc_page_count(body_docs.len());

    let mut entries = Vec::with_capacity(body_docs.len());
    let mut next_page = front_pages + toc_pages + 1;
    for (descriptor, doc) in &body_docs {
        entries.push(TocEntry {
            title: descriptor.title.clone(),
            start_page: next_page,
        });
        next_page += page_count(doc);
    }
    let toc_doc = build_toc_document(&entries)?;

    let mut ordered: Vec<Document> = Vec::new();
    ordered.extend(cover_doc);
    ordered.extend(preface_docs);
    ordered.push(toc_doc);
    let body_count = body_docs.len();
    ordered.extend(body_docs.into_iter().map(|(_, doc)| doc));
    ordered.extend(postface_docs);

    let mut merged = merge_documents(ordered)?;
    add_outline_bookmarks(&mut merged, &entries)?;

    progress.report(FRACTION_WRITE, Some("Writing songbook"));
    write_atomically(&mut merged, &request.destination)?;

    info!(
        destination = %request.destination.display(),
        songs = body_count,
        pages = merged.get_pages().len(),
        "Songbook generation complete"
    );
    progress.report(
        1.0,
        Some(&format!(
            "Songbook written to {}",
            request.destination.display()
        )),
    );
    Ok(request.destination.clone())
}

fn report_body_progress<P: ProgressSink + ?Sized>(
    progress: &P,
    index: usize,
    total: usize,
    message: &str,
) {
    let done = (index + 1) as f64 / total as f64;
    let fraction = FRACTION_BODY_START + (FRACTION_BODY_END - FRACTION_BODY_START) * done;
    progress.report(fraction, Some(message));
}

/// Fetches preface/postface documents; a failure drops the document with a
/// warning, the same tolerance body documents get.
async fn fetch_auxiliary_documents<C>(client: &C, ids: &[String], role: &str) -> Vec<Document>
where
    C: SourceClient + ?Sized,
{
    let mut docs = Vec::with_capacity(ids.len());
    for id in ids {
        match fetch_pdf_document(client, id).await {
            Ok(doc) => docs.push(doc),
            Err(detail) => {
                warn!(id = %id, role = role, error = %detail, "Skipping auxiliary document that failed to fetch");
            }
        }
    }
    docs
}

async fn fetch_pdf_document<C>(client: &C, file_id: &str) -> std::result::Result<Document, String>
where
    C: SourceClient + ?Sized,
{
    let bytes = client
        .export_pdf(file_id)
        .await
        .map_err(|e| format!("export failed: {e}"))?;
    Document::load_mem(&bytes).map_err(|e| format!("unreadable PDF blob: {e}"))
}

fn load_local_pdf(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|source| SongbookError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Document::load_mem(&bytes).map_err(|_| SongbookError::CorruptArtifact {
        path: path.to_path_buf(),
    })
}

fn page_count(doc: &Document) -> usize {
    doc.get_pages().len()
}

/// Number of pages the TOC itself occupies for `entries` body documents.
pub fn toc_page_count(entries: usize) -> usize {
    entries.div_ceil(TOC_ENTRIES_PER_PAGE).max(1)
}

/// Renders the table of contents as a standalone document so it merges the
/// same way every other page source does.
fn build_toc_document(entries: &[TocEntry]) -> Result<Document> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let bold_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
            "F2" => bold_font_id,
        },
    });

    let mut page_ids: Vec<Object> = Vec::new();
    for (page_index, chunk) in entries.chunks(TOC_ENTRIES_PER_PAGE).enumerate() {
        let mut operations: Vec<Operation> = Vec::new();
        let mut y = 760;
        if page_index == 0 {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F2".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 770.into()]),
                Operation::new("Tj", vec![Object::string_literal("Table of Contents")]),
                Operation::new("ET", vec![]),
            ]);
            y = 720;
        }
        for entry in chunk {
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), y.into()]),
                Operation::new("Tj", vec![Object::string_literal(entry.title.as_str())]),
                Operation::new("ET", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![500.into(), y.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(entry.start_page.to_string())],
                ),
                Operation::new("ET", vec![]),
            ]);
            y -= 20;
        }

        let content = Content { operations };
        let encoded = content.encode().map_err(|e| SongbookError::Assembly {
            detail: format!("encoding TOC content failed: {e}"),
        })?;
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, encoded));
        // Resources and MediaBox live on the page itself, not the page tree,
        // so the page stays renderable after it is re-parented in the merge.
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        });
        page_ids.push(page_id.into());
    }

    let count = page_ids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids,
        "Count" => count,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    Ok(doc)
}

/// Page attributes a PDF reader resolves through the Pages ancestry.
const INHERITED_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Returns the page dictionary with every attribute it inherits from its
/// Pages ancestors copied onto the page itself. Re-parenting a page under
/// the merged tree severs its original ancestry, so inherited attributes
/// must travel with the page.
fn page_with_inherited_attributes(doc: &Document, page_id: ObjectId) -> Object {
    let mut dict = match doc.get_object(page_id).and_then(Object::as_dict) {
        Ok(dict) => dict.clone(),
        Err(_) => return Object::Null,
    };
    let mut ancestor = dict.get(b"Parent").and_then(Object::as_reference).ok();
    while let Some(parent_id) = ancestor {
        let parent = match doc.get_object(parent_id).and_then(Object::as_dict) {
            Ok(parent) => parent,
            Err(_) => break,
        };
        for key in INHERITED_PAGE_KEYS {
            if !dict.has(key) {
                if let Ok(value) = parent.get(key) {
                    dict.set(key, value.clone());
                }
            }
        }
        ancestor = parent.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Object::Dictionary(dict)
}

/// Concatenates documents into one, preserving page order.
///
/// Standard lopdf merge: renumber every input into a disjoint ID range,
/// pool their objects, rebuild a single Pages tree and Catalog, then
/// renumber and compress the result. Each page absorbs its inherited
/// attributes first; the rebuilt Pages tree deliberately carries none, so
/// inputs with different page-tree resources cannot clobber each other.
fn merge_documents(documents: Vec<Document>) -> Result<Document> {
    use std::collections::BTreeMap;

    let mut max_id = 1;
    let mut documents_pages: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut documents_objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
    let mut document = Document::with_version("1.5");

    for mut doc in documents {
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        documents_pages.extend(
            doc.get_pages()
                .into_values()
                .map(|object_id| (object_id, page_with_inherited_attributes(&doc, object_id))),
        );
        documents_objects.extend(doc.objects);
    }

    let mut catalog_object: Option<(ObjectId, Object)> = None;
    let mut pages_object: Option<(ObjectId, Object)> = None;

    for (object_id, object) in documents_objects.iter() {
        match object.type_name().unwrap_or("") {
            "Catalog" => {
                catalog_object = Some((
                    if let Some((id, _)) = catalog_object {
                        id
                    } else {
                        *object_id
                    },
                    object.clone(),
                ));
            }
            "Pages" => {
                if let Ok(dict) = object.as_dict() {
                    let mut dict = dict.clone();
                    if let Some((_, ref object)) = pages_object {
                        if let Ok(old_dict) = object.as_dict() {
                            dict.extend(old_dict);
                        }
                    }
                    pages_object = Some((
                        if let Some((id, _)) = pages_object {
                            id
                        } else {
                            *object_id
                        },
                        Object::Dictionary(dict),
                    ));
                }
            }
            // Page objects are re-parented below; stale outlines are dropped
            // (the merged outline is rebuilt from the TOC entries).
            "Page" | "Outlines" | "Outline" => {}
            _ => {
                document.objects.insert(*object_id, object.clone());
            }
        }
    }

    let pages_object = pages_object.ok_or_else(|| SongbookError::Assembly {
        detail: "no Pages tree found in any input document".to_string(),
    })?;
    let catalog_object = catalog_object.ok_or_else(|| SongbookError::Assembly {
        detail: "no Catalog found in any input document".to_string(),
    })?;

    for (object_id, object) in documents_pages.iter() {
        if let Ok(dict) = object.as_dict() {
            let mut dict = dict.clone();
            dict.set("Parent", pages_object.0);
            document.objects.insert(*object_id, Object::Dictionary(dict));
        }
    }

    if let Ok(dict) = pages_object.1.as_dict() {
        let mut dict = dict.clone();
        dict.set("Count", documents_pages.len() as u32);
        dict.set(
            "Kids",
            documents_pages
                .keys()
                .map(|id| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        // The surviving Pages dict belongs to one arbitrary input; its
        // inheritable attributes would be wrong for every other input's
        // pages, which now carry their own.
        for key in INHERITED_PAGE_KEYS {
            dict.remove(key);
        }
        document
            .objects
            .insert(pages_object.0, Object::Dictionary(dict));
    }

    if let Ok(dict) = catalog_object.1.as_dict() {
        let mut dict = dict.clone();
        dict.set("Pages", pages_object.0);
        dict.remove(b"Outlines");
        document
            .objects
            .insert(catalog_object.0, Object::Dictionary(dict));
    }

    document.trailer.set("Root", catalog_object.0);
    document.max_id = document.objects.len() as u32;
    document.renumber_objects();

    Ok(document)
}

/// Injects an `/Outlines` bookmark per TOC entry so readers can jump
/// straight to a song. Runs after the final renumbering so page object IDs
/// are stable.
fn add_outline_bookmarks(document: &mut Document, entries: &[TocEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let pages = document.get_pages();
    let outlines_id = document.new_object_id();

    let mut item_ids: Vec<ObjectId> = Vec::with_capacity(entries.len());
    for _ in entries {
        item_ids.push(document.new_object_id());
    }

    for (index, entry) in entries.iter().enumerate() {
        let page_ref = pages
            .get(&(entry.start_page as u32))
            .copied()
            .ok_or_else(|| SongbookError::Assembly {
                detail: format!(
                    "bookmark for {:?} points at missing page {}",
                    entry.title, entry.start_page
                ),
            })?;

        let mut dict = Dictionary::new();
        dict.set("Title", Object::string_literal(entry.title.as_str()));
        dict.set(
            "Dest",
            Object::Array(vec![
                Object::Reference(page_ref),
                Object::Name("Fit".into()),
            ]),
        );
        dict.set("Parent", Object::Reference(outlines_id));
        if index > 0 {
            dict.set("Prev", Object::Reference(item_ids[index - 1]));
        }
        if index + 1 < entries.len() {
            dict.set("Next", Object::Reference(item_ids[index + 1]));
        }
        document
            .objects
            .insert(item_ids[index], Object::Dictionary(dict));
    }

    let mut outlines = Dictionary::new();
    outlines.set("Type", Object::Name("Outlines".into()));
    outlines.set("Count", Object::Integer(entries.len() as i64));
    outlines.set("First", Object::Reference(item_ids[0]));
    outlines.set("Last", Object::Reference(item_ids[item_ids.len() - 1]));
    document
        .objects
        .insert(outlines_id, Object::Dictionary(outlines));

    let catalog_id = document
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|e| SongbookError::Assembly {
            detail: format!("merged document has no catalog: {e}"),
        })?;
    let catalog = document
        .get_object_mut(catalog_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| SongbookError::Assembly {
            detail: format!("merged catalog is not a dictionary: {e}"),
        })?;
    catalog.set("Outlines", Object::Reference(outlines_id));
    catalog.set("PageMode", Object::Name("UseOutlines".into()));
    Ok(())
}

/// Saves via a temporary file in the destination's directory so a fatal
/// error never leaves a partial songbook at the destination path.
fn write_atomically(document: &mut Document, destination: &Path) -> Result<()> {
    let parent = destination.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = parent.unwrap_or_else(|| Path::new("."));
    let write_error = |source: std::io::Error| SongbookError::WriteError {
        path: destination.to_path_buf(),
        source,
    };

    document.compress();

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    document
        .save_to(&mut tmp)
        .map_err(|e| SongbookError::WriteError {
            path: destination.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?;
    tmp.persist(destination)
        .map_err(|e| write_error(e.error))?;
    Ok(())
}

/// Small fixture builders shared by unit and integration tests.
#[cfg(any(test, feature = "test-export-mocks"))]
pub mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object};

    /// Builds an n-page PDF where page i shows "<label> page i".
    pub fn labeled_pdf_bytes(label: &str, pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for page in 1..=pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 14.into()]),
                    Operation::new("Td", vec![72.into(), 760.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("{label} page {page}"))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(lopdf::Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        let pages_dict = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    /// Single-label shorthand used by most tests.
    pub fn minimal_pdf_bytes(pages: usize) -> Vec<u8> {
        labeled_pdf_bytes("fixture", pages)
    }
}
