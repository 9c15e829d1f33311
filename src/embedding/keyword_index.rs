/// Tantivy BM25 index over document text
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, DocId, Index, IndexReader, IndexWriter, ReloadPolicy, Score, SegmentReader, TantivyError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] TantivyError),
}

/// Lexical index with insertion-order tie breaking
///
/// Every document carries a monotonically increasing sequence number so
/// equal BM25 scores come back in insertion order.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    doc_id_field: Field,
    seq_field: Field,
    text_field: Field,
    next_seq: u64,
    index_path: Option<PathBuf>,
}

const WRITER_HEAP_BYTES: usize = 50_000_000;

fn build_schema() -> (Schema, Field, Field, Field) {
    let mut schema_builder = Schema::builder();
    let doc_id_field = schema_builder.add_text_field("doc_id", STRING | STORED);
    let seq_field = schema_builder.add_u64_field("seq", INDEXED | STORED | FAST);
    let text_field = schema_builder.add_text_field("text", TEXT | STORED);
    (schema_builder.build(), doc_id_field, seq_field, text_field)
}

impl KeywordIndex {
    /// Open the index stored in `index_path`, creating it when missing
    pub fn new(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        } else {
            std::fs::create_dir_all(&index_path)?;
            let (schema, ..) = build_schema();
            Index::create_in_dir(&index_path, schema)
                .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?
        };

        Self::from_index(index, Some(index_path))
    }

    /// Non-persistent index, used by tests and one-shot searches
    pub fn in_memory() -> Result<Self, KeywordIndexError> {
        let (schema, ..) = build_schema();
        Self::from_index(Index::create_in_ram(schema), None)
    }

    fn from_index(index: Index, index_path: Option<PathBuf>) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();
        let field = |name: &str| {
            schema.get_field(name).map_err(|_| {
                KeywordIndexError::InitializationError(format!("Missing '{}' field in schema", name))
            })
        };
        let doc_id_field = field("doc_id")?;
        let seq_field = field("seq")?;
        let text_field = field("text")?;

        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| KeywordIndexError::InitializationError(e.to_string()))?;

        // max_doc counts deleted documents too, so sequence numbers never repeat
        let next_seq = reader
            .searcher()
            .segment_readers()
            .iter()
            .map(|s| s.max_doc() as u64)
            .sum();

        Ok(Self {
            index,
            reader,
            writer,
            doc_id_field,
            seq_field,
            text_field,
            next_seq,
            index_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.index_path.as_deref()
    }

    /// Add or replace a document. Visible to searches after [`commit`](Self::commit).
    pub fn insert(&mut self, doc_id: &str, text: &str) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.doc_id_field, doc_id));

        let document = doc!(
            self.doc_id_field => doc_id,
            self.seq_field => self.next_seq,
            self.text_field => text,
        );
        self.writer
            .add_document(document)
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        self.next_seq += 1;

        Ok(())
    }

    pub fn insert_batch(&mut self, items: &[(String, String)]) -> Result<(), KeywordIndexError> {
        for (doc_id, text) in items {
            self.insert(doc_id, text)?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        Ok(())
    }

    /// BM25 search returning `(document_id, score)` pairs
    ///
    /// The query is parsed leniently: syntax errors in natural language
    /// input (unbalanced quotes, stray colons) are ignored rather than
    /// failing the search. Equal scores are ordered by insertion.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<(String, f32)>, KeywordIndexError> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (parsed, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} query syntax error(s)", errors.len());
        }

        // ranking by (score, earliest seq) happens inside the collector so
        // ties at the top_k boundary keep the earliest inserted documents
        let collector = TopDocs::with_limit(top_k).tweak_score(|segment_reader: &SegmentReader| {
            let seq_column = segment_reader.fast_fields().u64("seq").ok();
            move |doc: DocId, score: Score| {
                let seq = seq_column
                    .as_ref()
                    .and_then(|column| column.first(doc))
                    .unwrap_or(u64::MAX);
                (score, Reverse(seq))
            }
        });

        let top_docs = searcher
            .search(&parsed, &collector)
            .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for ((score, _), doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::SearchError(e.to_string()))?;

            let doc_id = retrieved
                .get_first(self.doc_id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| KeywordIndexError::SearchError("Missing doc_id field".to_string()))?
                .to_string();

            results.push((doc_id, score.max(0.0)));
        }

        Ok(results)
    }

    pub fn delete(&mut self, doc_id: &str) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.doc_id_field, doc_id));
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_all_documents()
            .map_err(|e| KeywordIndexError::InsertError(e.to_string()))?;
        self.commit()?;
        Ok(())
    }

    /// Number of committed, non-deleted documents
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn populated() -> KeywordIndex {
        let mut index = KeywordIndex::in_memory().unwrap();
        index
            .insert("doc-1", "Seoul cafe sales grew strongly in 2024")
            .unwrap();
        index
            .insert("doc-2", "Busan retail sales declined after the summer")
            .unwrap();
        index
            .insert("doc-3", "Industry overview for restaurants")
            .unwrap();
        index.commit().unwrap();
        index
    }

    #[test]
    fn test_insert_and_search() {
        let index = populated();
        assert_eq!(index.len(), 3);

        let results = index.search("sales", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, score)| *score >= 0.0));

        let results = index.search("restaurants", 10).unwrap();
        assert_eq!(results, vec![("doc-3".to_string(), results[0].1)]);
    }

    #[test]
    fn test_natural_language_punctuation() {
        let index = populated();
        let results = index.search("how were cafe sales in Seoul?", 10).unwrap();
        assert_eq!(results[0].0, "doc-1");

        assert!(index.search("what about \"cafe sales: (2024", 10).is_ok());
        assert!(index.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_ties_follow_insertion_order() {
        let mut index = KeywordIndex::in_memory().unwrap();
        for id in ["c", "a", "b"] {
            index.insert(id, "identical text body").unwrap();
        }
        index.commit().unwrap();

        let ids: Vec<String> = index
            .search("identical", 10)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_ties_across_segments_keep_earliest() {
        let mut index = KeywordIndex::in_memory().unwrap();
        for batch in 0..4 {
            for i in 0..50 {
                let id = format!("doc-{:03}", batch * 50 + i);
                index.insert(&id, "regional sales summary").unwrap();
            }
            index.commit().unwrap();
        }
        assert_eq!(index.len(), 200);

        let ids: Vec<String> = index
            .search("sales", 5)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["doc-000", "doc-001", "doc-002", "doc-003", "doc-004"]);
    }

    #[test]
    fn test_insert_replaces_existing_id() {
        let mut index = KeywordIndex::in_memory().unwrap();
        index.insert("doc-1", "old text about revenue").unwrap();
        index.insert("doc-1", "new text about footfall").unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.search("revenue", 10).unwrap().is_empty());
        assert_eq!(index.search("footfall", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let mut index = populated();
        index.delete("doc-1").unwrap();
        index.commit().unwrap();
        assert_eq!(index.len(), 2);

        index.clear().unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_reopen_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lexical");

        {
            let mut index = KeywordIndex::new(path.clone()).unwrap();
            index.insert("doc-1", "district footfall report").unwrap();
            index.commit().unwrap();
        }

        let mut index = KeywordIndex::new(path).unwrap();
        assert_eq!(index.len(), 1);
        index.insert("doc-2", "district rent report").unwrap();
        index.commit().unwrap();

        let ids: Vec<String> = index
            .search("district", 10)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids.len(), 2);
    }
}
