// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF page counting using the `lopdf` crate.
//
// The gateway bills by page, so this is the one place the payload bytes are
// actually interpreted. Anything that `lopdf` cannot parse is an unsupported
// format; a document with an empty page tree yields zero, which the
// dispatcher turns into its empty-job path.

use lopdf::Document;
use tracing::{debug, instrument};

use zaehlwerk_core::error::{Result, ZaehlwerkError};
use zaehlwerk_core::traits::PageCounter;

/// Counts pages of PDF payloads.
#[derive(Debug, Default)]
pub struct PdfPageCounter;

impl PageCounter for PdfPageCounter {
    #[instrument(skip_all, fields(bytes_len = data.len()))]
    fn count_pages(&self, data: &[u8]) -> Result<u32> {
        let document = Document::load_mem(data)
            .map_err(|err| ZaehlwerkError::UnsupportedFormat(format!("not a readable PDF: {err}")))?;

        let count = document.get_pages().len() as u32;
        debug!(pages = count, "payload parsed");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Object, dictionary};

    /// Build a minimal but valid PDF with `n` pages.
    fn pdf_with_pages(n: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = (0..n)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                })
                .into()
            })
            .collect();

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => n as i64,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("serialize test PDF");
        buffer
    }

    #[test]
    fn counts_a_three_page_document() {
        let counter = PdfPageCounter;
        assert_eq!(counter.count_pages(&pdf_with_pages(3)).expect("count"), 3);
    }

    #[test]
    fn counts_a_single_page_document() {
        let counter = PdfPageCounter;
        assert_eq!(counter.count_pages(&pdf_with_pages(1)).expect("count"), 1);
    }

    #[test]
    fn empty_page_tree_counts_zero() {
        let counter = PdfPageCounter;
        assert_eq!(counter.count_pages(&pdf_with_pages(0)).expect("count"), 0);
    }

    #[test]
    fn garbage_bytes_are_an_unsupported_format() {
        let counter = PdfPageCounter;
        let err = counter.count_pages(b"%!PS-Adobe-3.0 not a pdf").unwrap_err();
        assert!(matches!(err, ZaehlwerkError::UnsupportedFormat(_)));
    }
}
