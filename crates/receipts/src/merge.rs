use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to parse PDF: {0}")]
    Parse(String),
    #[error("PDF has no document catalog")]
    MissingCatalog,
    #[error("PDF catalog has no page tree")]
    MissingPageTree,
    #[error("failed to write merged PDF: {0}")]
    Write(String),
}

/// Parses `bytes` as a PDF, rejecting payloads without a usable page tree.
pub fn parse_pdf(bytes: &[u8]) -> Result<Document, MergeError> {
    let doc = Document::load_mem(bytes).map_err(|e| MergeError::Parse(e.to_string()))?;
    page_tree_of(&doc)?;
    Ok(doc)
}

fn is_type(dict: &Dictionary, name: &[u8]) -> bool {
    matches!(dict.get(b"Type"), Ok(Object::Name(n)) if n.as_slice() == name)
}

/// Returns `(catalog_id, page_tree_root_id)`.
fn page_tree_of(doc: &Document) -> Result<(ObjectId, ObjectId), MergeError> {
    let (catalog_id, catalog) = doc
        .objects
        .iter()
        .find_map(|(id, obj)| match obj {
            Object::Dictionary(d) if is_type(d, b"Catalog") => Some((*id, d)),
            _ => None,
        })
        .ok_or(MergeError::MissingCatalog)?;
    let pages_id = catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|_| MergeError::MissingPageTree)?;
    Ok((catalog_id, pages_id))
}

/// Concatenates documents in the given order into one PDF.
///
/// Each input's page tree is kept whole and hung under a new root `Pages`
/// node, so inherited attributes (media box, resources) survive. Only the
/// per-input catalogs are dropped.
pub fn merge_pdfs(documents: Vec<Document>) -> Result<Vec<u8>, MergeError> {
    let mut merged = Document::with_version("1.5");
    let root_pages_id = merged.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(documents.len());
    let mut page_count: i64 = 0;

    for mut doc in documents {
        doc.renumber_objects_with(merged.max_id + 1);
        let (catalog_id, pages_id) = page_tree_of(&doc)?;
        page_count += doc.get_pages().len() as i64;

        doc.objects.remove(&catalog_id);
        if let Some(Object::Dictionary(tree)) = doc.objects.get_mut(&pages_id) {
            tree.set("Parent", root_pages_id);
        }

        let top = doc.objects.keys().map(|(n, _)| *n).max().unwrap_or(0);
        merged.max_id = merged.max_id.max(top);
        merged.objects.extend(doc.objects);
        kids.push(Object::Reference(pages_id));
    }

    merged.objects.insert(
        root_pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => root_pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    merged
        .save_to(&mut out)
        .map_err(|e| MergeError::Write(e.to_string()))?;
    Ok(out)
}

/// PDF fixtures for tests in this and downstream crates.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use lopdf::{dictionary, Document, Object, Stream};

    /// A one-page PDF whose content stream carries `marker` as a comment.
    pub fn one_page_pdf(marker: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            format!("% {marker}\n").into_bytes(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => Object::Integer(1),
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(595),
                    Object::Integer(842),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// Markers of each page of `pdf`, in page order.
    pub fn page_markers(pdf: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(pdf).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let content = doc.get_page_content(*id).unwrap();
                String::from_utf8_lossy(&content)
                    .trim()
                    .trim_start_matches('%')
                    .trim()
                    .to_string()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn merge_keeps_input_order() {
        let docs = ["first", "second", "third"]
            .iter()
            .map(|m| parse_pdf(&one_page_pdf(m)).unwrap())
            .collect();
        let merged = merge_pdfs(docs).unwrap();
        assert_eq!(page_markers(&merged), ["first", "second", "third"]);
    }

    #[test]
    fn merge_single_document() {
        let merged = merge_pdfs(vec![parse_pdf(&one_page_pdf("only")).unwrap()]).unwrap();
        assert_eq!(page_markers(&merged), ["only"]);
    }

    #[test]
    fn parse_rejects_non_pdf() {
        assert!(matches!(
            parse_pdf(b"<html>login</html>"),
            Err(MergeError::Parse(_))
        ));
    }
}
