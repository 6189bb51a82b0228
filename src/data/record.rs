//! Serialized training examples.
//!
//! The example store is a JSON Lines file, one [`ExampleRecord`] per line.

use super::vocab::{AnswerDictionary, Vocabulary};
use crate::error::{Result, VqaError};
use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleRecord {
    /// Number of question tokens.
    pub length: usize,
    /// Answer class id.
    pub answer: usize,
    /// Image path, relative to the image directory.
    pub image_file: String,
    /// Question token ids.
    pub words: Vec<usize>,
}

impl ExampleRecord {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.length == 0 {
            return Err("empty question".into());
        }
        if self.length != self.words.len() {
            return Err(format!(
                "length {} does not match {} words",
                self.length,
                self.words.len()
            ));
        }
        if self.image_file.is_empty() {
            return Err("missing image file".into());
        }
        Ok(())
    }

    /// Fails unless every word id is below `vocab_size` and the answer below `n_answers`.
    pub fn check_ids(&self, vocab_size: usize, n_answers: usize) -> Result<()> {
        let invalid = |reason: String| VqaError::InvalidRecord {
            image_file: self.image_file.clone(),
            reason,
        };
        if let Some(word) = self.words.iter().find(|&&id| id >= vocab_size) {
            return Err(invalid(format!(
                "word id {word} is outside a vocabulary of {vocab_size}"
            )));
        }
        if self.answer >= n_answers {
            return Err(invalid(format!(
                "answer id {} is outside {n_answers} answer classes",
                self.answer
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct QuestionFile {
    questions: Vec<QuestionEntry>,
}

#[derive(Deserialize)]
struct QuestionEntry {
    question: String,
    answer: String,
    image_filename: String,
}

/// Encodes every question of a `{ "questions": [...] }` file.
///
/// Answers get ids in order of first appearance. An out-of-vocabulary word aborts the run.
pub fn serialize_questions(
    json: &str,
    vocab: &Vocabulary,
) -> Result<(Vec<ExampleRecord>, AnswerDictionary)> {
    let file: QuestionFile = serde_json::from_str(json)?;
    let total = file.questions.len();
    tracing::info!("serializing {total} questions");

    let mut answers = AnswerDictionary::default();
    let mut records = Vec::with_capacity(total);
    for (i, entry) in file.questions.into_iter().enumerate() {
        let words = vocab.encode_question(&entry.question)?;
        let record = ExampleRecord {
            length: words.len(),
            answer: answers.insert(&entry.answer),
            image_file: entry.image_filename,
            words,
        };
        record
            .validate()
            .map_err(|reason| VqaError::MalformedRecord { line: i + 1, reason })?;
        records.push(record);
        if (i + 1) % 10_000 == 0 {
            tracing::info!("encoded {} of {total} questions", i + 1);
        }
    }
    tracing::info!("{} distinct answers", answers.len());
    Ok((records, answers))
}

pub fn write_examples(path: impl AsRef<Path>, records: &[ExampleRecord]) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path).map_err(|e| VqaError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n").map_err(|e| VqaError::io(path, e))?;
    }
    writer.flush().map_err(|e| VqaError::io(path, e))?;
    tracing::info!("wrote {} examples to {path:?}", records.len());
    Ok(())
}

/// Parses every line, failing on the first malformed record. Blank lines are ignored.
pub fn parse_examples(text: &str) -> Result<Vec<ExampleRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let record: ExampleRecord =
                serde_json::from_str(line).map_err(|e| VqaError::MalformedRecord {
                    line: i + 1,
                    reason: e.to_string(),
                })?;
            record
                .validate()
                .map_err(|reason| VqaError::MalformedRecord { line: i + 1, reason })?;
            Ok(record)
        })
        .collect()
}

/// All examples of a store, held in memory.
#[derive(Debug, Clone)]
pub struct ExampleStore {
    records: Vec<ExampleRecord>,
}

impl ExampleStore {
    pub fn new(records: Vec<ExampleRecord>) -> Self {
        Self { records }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| VqaError::io(path, e))?;
        let records = parse_examples(&text)?;
        tracing::info!("loaded {} examples from {path:?}", records.len());
        Ok(Self::new(records))
    }

    /// Checks the ids of every record, failing on the first bad one.
    pub fn check_ids(&self, vocab_size: usize, n_answers: usize) -> Result<()> {
        self.records
            .iter()
            .try_for_each(|record| record.check_ids(vocab_size, n_answers))
    }
}

impl Dataset<ExampleRecord> for ExampleStore {
    fn get(&self, index: usize) -> Option<ExampleRecord> {
        self.records.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUESTIONS: &str = r#"{"info": {}, "questions": [
        {"question": "Is it red?", "answer": "yes", "image_filename": "a.png", "question_index": 0},
        {"question": "Is it blue?", "answer": "No", "image_filename": "b.png"},
        {"question": "is it red;", "answer": "YES", "image_filename": "c.png"}
    ]}"#;

    fn vocab() -> Vocabulary {
        Vocabulary::parse("<pad>\nthe\nwhat\nsize\nis\nit\nred\nblue\n")
    }

    #[test]
    fn questions_become_records() {
        let (records, answers) = serialize_questions(QUESTIONS, &vocab()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].words, vec![4, 5, 6]);
        assert_eq!(records[1].words, vec![4, 5, 7]);
        assert_eq!(records[1].length, 3);
        assert_eq!(
            records.iter().map(|r| r.answer).collect::<Vec<_>>(),
            vec![0, 1, 0]
        );
        assert_eq!(answers.answer(1), Some("no"));
        assert_eq!(records[2].image_file, "c.png");
    }

    #[test]
    fn unknown_word_aborts_serialization() {
        let json = r#"{"questions": [{"question": "Is it green?", "answer": "no", "image_filename": "a.png"}]}"#;
        assert!(matches!(
            serialize_questions(json, &vocab()),
            Err(VqaError::OutOfVocabulary(_))
        ));
    }

    #[test]
    fn store_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_examples.jsonl");
        let (records, _) = serialize_questions(QUESTIONS, &vocab()).unwrap();
        write_examples(&path, &records).unwrap();

        let store = ExampleStore::load(&path).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(1), Some(records[1].clone()));
        assert_eq!(store.get(3), None);
    }

    #[test]
    fn ids_outside_the_model_are_rejected() {
        let (records, answers) = serialize_questions(QUESTIONS, &vocab()).unwrap();
        let store = ExampleStore::new(records.clone());
        assert!(store.check_ids(8, answers.len()).is_ok());

        // "red" and "blue" are ids 6 and 7
        assert!(matches!(
            store.check_ids(7, answers.len()),
            Err(VqaError::InvalidRecord { image_file, .. }) if image_file == "b.png"
        ));
        let mut record = records[0].clone();
        record.answer = 7;
        assert!(matches!(
            record.check_ids(8, 3),
            Err(VqaError::InvalidRecord { reason, .. }) if reason.contains("answer id 7")
        ));
    }

    #[test]
    fn malformed_line_fails_the_whole_read() {
        let text = concat!(
            r#"{"length": 1, "answer": 0, "image_file": "a.png", "words": [4]}"#,
            "\n\n",
            r#"{"length": 2, "answer": 0, "image_file": "b.png", "words": [4]}"#,
            "\n",
        );
        assert!(matches!(
            parse_examples(text),
            Err(VqaError::MalformedRecord { line: 3, .. })
        ));

        let text = "{\"length\": 1, \"answer\": 0}\n";
        assert!(matches!(
            parse_examples(text),
            Err(VqaError::MalformedRecord { line: 1, .. })
        ));
    }
}
