//! Upload parsing: JSON Q&A lists, CSV tables, and plain-text Q/A blocks.

use serde::Deserialize;

use crate::error::PipelineError;

use super::staging::{ChunkScores, StagingChunk};

/// One uploaded file: name (the extension selects the parser) and content.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content: String,
}

#[derive(Deserialize)]
struct JsonPair {
    question: String,
    answer: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

fn chunk_from(
    source: &str,
    index: usize,
    question: String,
    answer: String,
    category: Option<String>,
    intent: Option<String>,
    language: Option<String>,
) -> StagingChunk {
    StagingChunk {
        chunk_id: format!("{}#{}", source, index),
        question,
        answer,
        category: category.unwrap_or_default(),
        intent: intent.unwrap_or_default(),
        language: language
            .and_then(|l| l.parse().ok())
            .unwrap_or_default(),
        requires_handoff: false,
        scores: ChunkScores::default(),
        source_file: source.to_string(),
    }
}

fn parse_json(file: &UploadFile) -> Result<Vec<StagingChunk>, PipelineError> {
    let pairs: Vec<JsonPair> = serde_json::from_str(&file.content)
        .map_err(|e| PipelineError::Validation(format!("{}: bad JSON: {}", file.name, e)))?;
    Ok(pairs
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            chunk_from(
                &file.name, i, p.question, p.answer, p.category, p.intent, p.language,
            )
        })
        .collect())
}

fn parse_csv(file: &UploadFile) -> Result<Vec<StagingChunk>, PipelineError> {
    let mut reader = csv::Reader::from_reader(file.content.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::Validation(format!("{}: bad CSV: {}", file.name, e)))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (Some(q_col), Some(a_col)) = (column("question"), column("answer")) else {
        return Err(PipelineError::Validation(format!(
            "{}: CSV needs question and answer columns",
            file.name
        )));
    };
    let cat_col = column("category");
    let intent_col = column("intent");
    let lang_col = column("language");

    let mut chunks = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row
            .map_err(|e| PipelineError::Validation(format!("{}: bad CSV row: {}", file.name, e)))?;
        let cell = |col: Option<usize>| {
            col.and_then(|c| row.get(c))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let (Some(question), Some(answer)) = (cell(Some(q_col)), cell(Some(a_col))) else {
            continue;
        };
        chunks.push(chunk_from(
            &file.name,
            i,
            question,
            answer,
            cell(cat_col),
            cell(intent_col),
            cell(lang_col),
        ));
    }
    Ok(chunks)
}

/// Plain text: `Q:` / `A:` prefixed blocks separated by blank lines.
fn parse_text(file: &UploadFile) -> Result<Vec<StagingChunk>, PipelineError> {
    let mut chunks = Vec::new();
    let mut question: Option<String> = None;
    let mut answer: Option<String> = None;

    let mut flush = |question: &mut Option<String>, answer: &mut Option<String>| {
        if let (Some(q), Some(a)) = (question.take(), answer.take()) {
            let index = chunks.len();
            chunks.push(chunk_from(&file.name, index, q, a, None, None, None));
        }
    };

    for line in file.content.lines() {
        let line = line.trim();
        if line.is_empty() {
            flush(&mut question, &mut answer);
        } else if let Some(q) = line.strip_prefix("Q:") {
            flush(&mut question, &mut answer);
            question = Some(q.trim().to_string());
        } else if let Some(a) = line.strip_prefix("A:") {
            answer = Some(a.trim().to_string());
        } else if let Some(current) = answer.as_mut() {
            current.push(' ');
            current.push_str(line);
        }
    }
    flush(&mut question, &mut answer);
    Ok(chunks)
}

/// Parses a multi-file payload into candidate chunks. Format is selected by
/// extension: `.json`, `.csv`, anything else is treated as plain text.
pub fn parse_upload(files: &[UploadFile]) -> Result<Vec<StagingChunk>, PipelineError> {
    if files.is_empty() {
        return Err(PipelineError::Validation("empty upload".into()));
    }
    let mut chunks = Vec::new();
    for file in files {
        let parsed = if file.name.ends_with(".json") {
            parse_json(file)?
        } else if file.name.ends_with(".csv") {
            parse_csv(file)?
        } else {
            parse_text(file)?
        };
        chunks.extend(parsed);
    }
    if chunks.is_empty() {
        return Err(PipelineError::Validation(
            "upload contained no usable question/answer pairs".into(),
        ));
    }
    Ok(chunks)
}
