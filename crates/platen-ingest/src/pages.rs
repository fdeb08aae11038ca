// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF inspection for the ingestion pipeline, using the `lopdf` crate.

use std::path::Path;

use lopdf::Document;
use tracing::debug;

use platen_core::error::{PlatenError, Result};

/// Count the pages of a PDF on disk.
///
/// Failure means the file is unreadable as a PDF: truncated, still being
/// written, or not a PDF at all. Callers decide what that means; the
/// ingestion pipeline logs it and leaves the file in place for a later
/// attempt.
pub fn count_pages(path: &Path) -> Result<u32> {
    let document = Document::load(path)
        .map_err(|err| PlatenError::Pdf(format!("failed to open {}: {err}", path.display())))?;
    let pages = u32::try_from(document.get_pages().len())
        .map_err(|_| PlatenError::Pdf(format!("implausible page count in {}", path.display())))?;
    debug!(path = %path.display(), pages, "PDF inspected");
    Ok(pages)
}

/// Write a minimal but well-formed PDF with the given number of empty pages.
#[cfg(test)]
pub(crate) fn write_fixture_pdf(path: &Path, pages: usize) {
    use lopdf::{dictionary, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for _ in 0..pages {
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("write fixture pdf");
}
