use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Split};
use tracing::{info, warn};

use super::{DocumentStream, LegacyDocument, LegacySource, SourceError};

/// Legacy collections exported to a directory.
///
/// For collection `X` the source reads `X.ndjson` (one object per line,
/// streamed) or else `X.json` (an array of objects, or an object keyed by
/// document id). Document ids come from the map key or the `id`/`_id` field.
#[derive(Debug, Clone)]
pub struct ExportDirSource {
    root: PathBuf,
}

impl ExportDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl LegacySource for ExportDirSource {
    fn name(&self) -> &'static str {
        "export-dir"
    }

    async fn documents(&self, collection: &str) -> Result<DocumentStream, SourceError> {
        let ndjson = self.root.join(format!("{collection}.ndjson"));
        if is_file(&ndjson).await {
            info!(collection, path = %ndjson.display(), "streaming ndjson export");
            return ndjson_stream(collection, ndjson).await;
        }
        let json = self.root.join(format!("{collection}.json"));
        if is_file(&json).await {
            info!(collection, path = %json.display(), "reading json export");
            let raw = tokio::fs::read_to_string(&json)
                .await
                .map_err(|source| SourceError::Io {
                    path: json.clone(),
                    source,
                })?;
            let docs = parse_json_export(collection, &raw)?;
            return Ok(stream::iter(docs).boxed());
        }
        warn!(collection, root = %self.root.display(), "no export file for collection; treating as empty");
        Ok(stream::empty().boxed())
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

struct NdjsonState {
    lines: Split<BufReader<File>>,
    collection: String,
    path: PathBuf,
    position: usize,
    done: bool,
}

async fn ndjson_stream(collection: &str, path: PathBuf) -> Result<DocumentStream, SourceError> {
    let file = File::open(&path).await.map_err(|source| SourceError::Io {
        path: path.clone(),
        source,
    })?;
    let state = NdjsonState {
        lines: BufReader::new(file).split(b'\n'),
        collection: collection.to_string(),
        path,
        position: 0,
        done: false,
    };
    let stream = stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            match st.lines.next_segment().await {
                Ok(Some(raw)) => {
                    st.position += 1;
                    // Decoded per line; invalid UTF-8 fails only that entry.
                    let item = match String::from_utf8(raw) {
                        Ok(line) if line.trim().is_empty() => continue,
                        Ok(line) => parse_line(&st.collection, st.position, &line),
                        Err(_) => Err(SourceError::InvalidUtf8 {
                            collection: st.collection.clone(),
                            position: st.position,
                        }),
                    };
                    return Some((item, st));
                }
                Ok(None) => return None,
                Err(source) => {
                    st.done = true;
                    let err = SourceError::Io {
                        path: st.path.clone(),
                        source,
                    };
                    return Some((Err(err), st));
                }
            }
        }
    });
    Ok(stream.boxed())
}

fn parse_line(collection: &str, position: usize, line: &str) -> Result<LegacyDocument, SourceError> {
    let value: Value = serde_json::from_str(line).map_err(|source| SourceError::Parse {
        collection: collection.to_string(),
        position,
        source,
    })?;
    match value {
        Value::Object(fields) => Ok(with_embedded_id(collection, position, None, fields)),
        _ => Err(SourceError::NotAnObject {
            collection: collection.to_string(),
            position,
        }),
    }
}

fn parse_json_export(
    collection: &str,
    raw: &str,
) -> Result<Vec<Result<LegacyDocument, SourceError>>, SourceError> {
    let value: Value = serde_json::from_str(raw).map_err(|source| SourceError::Parse {
        collection: collection.to_string(),
        position: 0,
        source,
    })?;
    let not_object = |position| SourceError::NotAnObject {
        collection: collection.to_string(),
        position,
    };
    let docs = match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(fields) => Ok(with_embedded_id(collection, i + 1, None, fields)),
                _ => Err(not_object(i + 1)),
            })
            .collect(),
        Value::Object(by_id) => by_id
            .into_iter()
            .enumerate()
            .map(|(i, (key, item))| match item {
                Value::Object(fields) => {
                    Ok(with_embedded_id(collection, i + 1, Some(key), fields))
                }
                _ => Err(not_object(i + 1)),
            })
            .collect(),
        _ => return Err(not_object(0)),
    };
    Ok(docs)
}

fn with_embedded_id(
    collection: &str,
    position: usize,
    key: Option<String>,
    fields: Map<String, Value>,
) -> LegacyDocument {
    let embedded = ["id", "_id"].iter().find_map(|k| match fields.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });
    let id = key
        .or(embedded)
        .unwrap_or_else(|| format!("{collection}-{position}"));
    LegacyDocument::new(id, fields)
}
