//! Training summaries written next to the checkpoints.
//!
//! Scalars and text go to JSON Lines files (`scalars.jsonl`, `text.jsonl`), one
//! event per line; images are written as PNG files under `images/`.

use crate::data::{AnswerDictionary, Vocabulary};
use crate::error::{Result, VqaError};
use image::RgbImage;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const SCALARS_NAME: &str = "scalars.jsonl";
pub const TEXT_NAME: &str = "text.jsonl";
pub const IMAGES_DIR: &str = "images";

#[derive(Serialize)]
struct Event<'a, T: Serialize> {
    step: usize,
    wall_time: f64,
    tag: &'a str,
    value: T,
}

pub struct SummaryWriter {
    dir: PathBuf,
    scalars: BufWriter<File>,
    text: BufWriter<File>,
}

impl SummaryWriter {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let images = dir.join(IMAGES_DIR);
        std::fs::create_dir_all(&images).map_err(|e| VqaError::io(&images, e))?;
        Ok(Self {
            scalars: append(&dir.join(SCALARS_NAME))?,
            text: append(&dir.join(TEXT_NAME))?,
            dir,
        })
    }

    pub fn scalar(&mut self, step: usize, tag: &str, value: f32) -> Result<()> {
        let path = self.dir.join(SCALARS_NAME);
        write_event(&mut self.scalars, &path, step, tag, value)
    }

    pub fn text(&mut self, step: usize, tag: &str, text: &str) -> Result<()> {
        let path = self.dir.join(TEXT_NAME);
        write_event(&mut self.text, &path, step, tag, text)
    }

    /// Writes `images/<tag>_<step>.png`.
    pub fn image(&mut self, step: usize, tag: &str, image: &RgbImage) -> Result<PathBuf> {
        let path = self.dir.join(IMAGES_DIR).join(format!("{tag}_{step}.png"));
        image.save(&path).map_err(|e| VqaError::ImageDecode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(path)
    }

    pub fn flush(&mut self) -> Result<()> {
        let scalars = self.dir.join(SCALARS_NAME);
        self.scalars.flush().map_err(|e| VqaError::io(&scalars, e))?;
        let text = self.dir.join(TEXT_NAME);
        self.text.flush().map_err(|e| VqaError::io(&text, e))
    }
}

fn append(path: &Path) -> Result<BufWriter<File>> {
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| VqaError::io(path, e))?;
    Ok(BufWriter::new(file))
}

fn write_event<T: Serialize>(
    writer: &mut BufWriter<File>,
    path: &Path,
    step: usize,
    tag: &str,
    value: T,
) -> Result<()> {
    let wall_time = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    serde_json::to_writer(&mut *writer, &Event { step, wall_time, tag, value })?;
    writer.write_all(b"\n").map_err(|e| VqaError::io(path, e))
}

/// A markdown table of the batch questions with their gold and predicted answers.
///
/// `questions` rows may carry trailing padding ids.
pub fn prediction_table(
    vocab: &Vocabulary,
    answers: &AnswerDictionary,
    questions: &[Vec<usize>],
    gold: &[usize],
    predicted: &[usize],
) -> String {
    let name = |id: usize| answers.answer(id).unwrap_or("?").to_owned();
    let mut table = String::from("Question | Answer | Prediction\n---|---|---\n");
    for ((question, &gold), &predicted) in questions.iter().zip(gold).zip(predicted) {
        table.push_str(&format!(
            "{} | {} | {}\n",
            vocab.decode_question(question),
            name(gold),
            name(predicted)
        ));
    }
    table
}
