//! Corpus Loader
//!
//! Reads corpus documents `{id, content, category, section?}` from JSON,
//! JSON Lines or YAML files. JSON and YAML files may hold a bare array or a
//! `documents` array; the format is picked by file extension.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use medqa_core::Document;

use crate::RagError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorpusFile {
    Documents(Vec<Document>),
    Wrapped { documents: Vec<Document> },
}

impl CorpusFile {
    fn into_documents(self) -> Vec<Document> {
        match self {
            CorpusFile::Documents(docs) | CorpusFile::Wrapped { documents: docs } => docs,
        }
    }
}

/// Corpus file reader
pub struct KnowledgeLoader;

impl KnowledgeLoader {
    /// Load one corpus file
    ///
    /// Later duplicates of an id are dropped with a warning.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<Document>, RagError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RagError::NotFound(format!(
                "Corpus file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let documents = match extension {
            "json" => serde_json::from_str::<CorpusFile>(&content)
                .map_err(|e| RagError::Serialization(format!("JSON parse error: {}", e)))?
                .into_documents(),
            "jsonl" | "ndjson" => Self::parse_json_lines(&content)?,
            "yaml" | "yml" => serde_yaml::from_str::<CorpusFile>(&content)
                .map_err(|e| RagError::Serialization(format!("YAML parse error: {}", e)))?
                .into_documents(),
            _ => {
                return Err(RagError::Configuration(format!(
                    "Unsupported corpus file type: {}",
                    path.display()
                )))
            },
        };

        let documents = Self::dedup(documents);
        tracing::info!(file = %path.display(), documents = documents.len(), "Loaded corpus file");
        Ok(documents)
    }

    /// Load every supported file in a directory, in file-name order
    pub fn load_directory(dir: impl AsRef<Path>) -> Result<Vec<Document>, RagError> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("json" | "jsonl" | "ndjson" | "yaml" | "yml")
                )
            })
            .collect();
        paths.sort();

        let mut documents = Vec::new();
        for path in &paths {
            documents.extend(Self::load_file(path)?);
        }
        Ok(Self::dedup(documents))
    }

    /// A file loads as itself; a directory loads all corpus files inside it
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<Document>, RagError> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::load_directory(path)
        } else {
            Self::load_file(path)
        }
    }

    fn parse_json_lines(content: &str) -> Result<Vec<Document>, RagError> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str::<Document>(line).map_err(|e| {
                    RagError::Serialization(format!("JSONL parse error on line {}: {}", n + 1, e))
                })
            })
            .collect()
    }

    fn dedup(documents: Vec<Document>) -> Vec<Document> {
        let mut seen = HashSet::new();
        documents
            .into_iter()
            .filter(|doc| {
                let fresh = seen.insert(doc.id);
                if !fresh {
                    tracing::warn!(id = doc.id, "Duplicate corpus id, keeping first");
                }
                fresh
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_json_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(
            &path,
            r#"[{"id": 1, "content": "đau đầu chóng mặt", "category": "neurology"},
                {"id": 2, "text": "công thức làm bánh"}]"#,
        )
        .unwrap();

        let docs = KnowledgeLoader::load_file(&path).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].category, "neurology");
        assert_eq!(docs[1].content, "công thức làm bánh");
        assert_eq!(docs[1].category, "");
    }

    #[test]
    fn test_load_wrapped_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.yaml");
        std::fs::write(
            &path,
            "documents:\n  - id: 7\n    content: viêm họng\n    category: ent\n    section: Điều trị\n",
        )
        .unwrap();

        let docs = KnowledgeLoader::load_file(&path).unwrap();
        assert_eq!(docs, vec![Document::new(7, "viêm họng", "ent").with_section("Điều trị")]);
    }

    #[test]
    fn test_load_jsonl_and_dedup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.jsonl");
        std::fs::write(
            &path,
            "{\"id\": 1, \"content\": \"a\"}\n\n{\"id\": 1, \"content\": \"b\"}\n{\"id\": 2, \"content\": \"c\"}\n",
        )
        .unwrap();

        let docs = KnowledgeLoader::load_file(&path).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(docs[0].content, "a");
    }

    #[test]
    fn test_jsonl_error_reports_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"id\": 1, \"content\": \"a\"}\nnot json\n").unwrap();

        match KnowledgeLoader::load_file(&path) {
            Err(RagError::Serialization(msg)) => assert!(msg.contains("line 2")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_and_unsupported() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            KnowledgeLoader::load_file(dir.path().join("nope.json")),
            Err(RagError::NotFound(_))
        ));

        let txt = dir.path().join("corpus.txt");
        std::fs::write(&txt, "x").unwrap();
        assert!(matches!(
            KnowledgeLoader::load_file(&txt),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), r#"[{"id": 2, "content": "b"}]"#).unwrap();
        std::fs::write(dir.path().join("a.yml"), "- id: 1\n  content: a\n").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let docs = KnowledgeLoader::load(dir.path()).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
