//! Word and answer dictionaries.

use crate::error::{Result, VqaError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const PAD_TOKEN: &str = "<PAD>";
pub const PAD_ID: usize = 0;

/// Question vocabulary. Ids are line numbers of the word list; line 0 is the padding slot.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Vocabulary {
    /// Builds the vocabulary from the lines of a word list.
    ///
    /// Whatever the first line holds, id 0 becomes [`PAD_TOKEN`].
    pub fn from_words<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words = vec![PAD_TOKEN.to_string()];
        words.extend(lines.into_iter().skip(1).map(|w| w.as_ref().trim().to_string()));
        let ids = words
            .iter()
            .enumerate()
            .map(|(id, word)| (word.to_lowercase(), id))
            .collect();
        Self { words, ids }
    }

    pub fn parse(text: &str) -> Self {
        Self::from_words(text.lines())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| VqaError::io(path, e))?;
        let vocab = Self::parse(&text);
        tracing::info!("loaded vocabulary of {} words from {path:?}", vocab.len());
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.len() <= 1
    }

    /// Id of a word, looked up in lowercase.
    pub fn id(&self, word: &str) -> Option<usize> {
        self.ids.get(&word.to_lowercase()).copied()
    }

    pub fn encode(&self, word: &str) -> Result<usize> {
        self.id(word)
            .ok_or_else(|| VqaError::OutOfVocabulary(word.to_string()))
    }

    pub fn decode(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    /// The word stored at every id, padding included.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Drops `;` and `?`, splits on whitespace and encodes every token.
    pub fn encode_question(&self, question: &str) -> Result<Vec<usize>> {
        question
            .replace([';', '?'], "")
            .split_whitespace()
            .map(|token| self.encode(token))
            .collect()
    }

    /// Renders ids back to text, skipping padding.
    pub fn decode_question(&self, ids: &[usize]) -> String {
        ids.iter()
            .filter(|&&id| id != PAD_ID)
            .map(|&id| self.decode(id).unwrap_or("<UNK>"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Dense word embeddings aligned with a [`Vocabulary`]; row 0 is all zeros.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    dim: usize,
    values: Vec<f32>,
}

impl EmbeddingTable {
    /// Parses a JSON object mapping each word to a list of vectors, of which the first is used.
    ///
    /// The dimension is taken from the entry of the word with id 1.
    pub fn from_json(json: &str, vocab: &Vocabulary) -> Result<Self> {
        let model: HashMap<String, Vec<Vec<f32>>> = serde_json::from_str(json)?;
        let first_vector = |word: &str| -> Result<&Vec<f32>> {
            model
                .get(word)
                .and_then(|vectors| vectors.first())
                .ok_or_else(|| VqaError::MissingEmbedding(word.to_string()))
        };

        let words = vocab.words();
        let dim = match words.get(1) {
            Some(word) => first_vector(word)?.len(),
            None => 0,
        };

        let mut values = vec![0f32; words.len() * dim];
        for (id, word) in words.iter().enumerate().skip(1) {
            let vector = first_vector(word)?;
            if vector.len() != dim {
                return Err(VqaError::ShapeMismatch {
                    what: "embedding vector",
                    expected: vec![dim],
                    actual: vec![vector.len()],
                });
            }
            values[id * dim..(id + 1) * dim].copy_from_slice(vector);
        }
        Ok(Self { dim, values })
    }

    pub fn load(path: impl AsRef<Path>, vocab: &Vocabulary) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| VqaError::io(path, e))?;
        let table = Self::from_json(&json, vocab)?;
        tracing::info!(
            "loaded {}x{} embedding table from {path:?}",
            table.rows(),
            table.dim
        );
        Ok(table)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn rows(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.values.len() / self.dim
        }
    }

    pub fn row(&self, id: usize) -> Option<&[f32]> {
        self.values.get(id * self.dim..(id + 1) * self.dim)
    }

    /// Row-major `[rows, dim]` values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// Answer strings to class ids, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerDictionary {
    answers: Vec<String>,
    ids: HashMap<String, usize>,
}

impl AnswerDictionary {
    /// Returns the id of `answer`, assigning the next free id on first sight.
    pub fn insert(&mut self, answer: &str) -> usize {
        let answer = answer.to_lowercase();
        if let Some(&id) = self.ids.get(&answer) {
            return id;
        }
        let id = self.answers.len();
        self.ids.insert(answer.clone(), id);
        self.answers.push(answer);
        id
    }

    pub fn id(&self, answer: &str) -> Option<usize> {
        self.ids.get(&answer.to_lowercase()).copied()
    }

    pub fn answer(&self, id: usize) -> Option<&str> {
        self.answers.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// The inverse map `{ "id": "answer" }`.
    pub fn to_json(&self) -> Result<String> {
        let inverse: BTreeMap<String, &str> = self
            .answers
            .iter()
            .enumerate()
            .map(|(id, answer)| (id.to_string(), answer.as_str()))
            .collect();
        Ok(serde_json::to_string(&inverse)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let inverse: HashMap<String, String> = serde_json::from_str(json)?;
        let mut answers = vec![None; inverse.len()];
        for (key, answer) in inverse {
            let id = key
                .parse::<usize>()
                .map_err(|_| VqaError::InvalidDictionary(format!("`{key}` is not an id")))?;
            let slot = answers.get_mut(id).ok_or_else(|| {
                VqaError::InvalidDictionary(format!("id {id} is out of the contiguous range"))
            })?;
            *slot = Some(answer);
        }

        let mut dictionary = Self::default();
        for (id, answer) in answers.into_iter().enumerate() {
            let answer =
                answer.ok_or_else(|| VqaError::InvalidDictionary(format!("id {id} is missing")))?;
            if dictionary.insert(&answer) != id {
                return Err(VqaError::InvalidDictionary(format!(
                    "answer `{answer}` appears twice"
                )));
            }
        }
        Ok(dictionary)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?).map_err(|e| VqaError::io(path, e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| VqaError::io(path, e))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::parse("</s>\nthe\nwhat\nsize\nis\nit\nred\nblue\n")
    }

    #[test]
    fn ids_follow_lines_with_padding_first() {
        let vocab = vocab();
        assert_eq!(vocab.len(), 8);
        assert_eq!(vocab.decode(0), Some(PAD_TOKEN));
        for id in 0..vocab.len() {
            let word = vocab.decode(id).unwrap();
            assert_eq!(vocab.id(word), Some(id));
        }
        assert_eq!(vocab.decode(8), None);
    }

    #[test]
    fn questions_are_normalized_before_lookup() {
        let vocab = vocab();
        assert_eq!(vocab.encode_question("Is it red?").unwrap(), vec![4, 5, 6]);
        assert_eq!(vocab.encode_question(" is\tit  blue;").unwrap(), vec![4, 5, 7]);
        assert_eq!(vocab.decode_question(&[4, 5, 7, 0, 0]), "is it blue");
    }

    #[test]
    fn out_of_vocabulary_is_an_error() {
        let vocab = vocab();
        assert!(matches!(
            vocab.encode_question("is it green"),
            Err(VqaError::OutOfVocabulary(word)) if word == "green"
        ));
    }

    #[test]
    fn embedding_rows_align_with_ids() {
        let vocab = Vocabulary::parse("pad\nred\nblue\n");
        let json = r#"{"red": [[1.0, 2.0]], "blue": [[3.0, 4.0], [9.0, 9.0]], "green": [[0.5, 0.5]]}"#;
        let table = EmbeddingTable::from_json(json, &vocab).unwrap();
        assert_eq!(table.dim(), 2);
        assert_eq!(table.rows(), 3);
        assert_eq!(table.row(0), Some(&[0.0, 0.0][..]));
        assert_eq!(table.row(2), Some(&[3.0, 4.0][..]));
    }

    #[test]
    fn missing_embedding_is_an_error() {
        let vocab = Vocabulary::parse("pad\nred\nblue\n");
        let json = r#"{"red": [[1.0, 2.0]]}"#;
        assert!(matches!(
            EmbeddingTable::from_json(json, &vocab),
            Err(VqaError::MissingEmbedding(word)) if word == "blue"
        ));
    }

    #[test]
    fn answers_keep_first_seen_order() {
        let mut answers = AnswerDictionary::default();
        assert_eq!(answers.insert("Yes"), 0);
        assert_eq!(answers.insert("2"), 1);
        assert_eq!(answers.insert("yes"), 0);
        assert_eq!(answers.answer(1), Some("2"));

        let json = answers.to_json().unwrap();
        assert_eq!(json, r#"{"0":"yes","1":"2"}"#);
        assert_eq!(AnswerDictionary::from_json(&json).unwrap(), answers);
    }

    #[test]
    fn sparse_answer_ids_are_rejected() {
        assert!(matches!(
            AnswerDictionary::from_json(r#"{"0": "yes", "2": "no"}"#),
            Err(VqaError::InvalidDictionary(_))
        ));
    }
}
