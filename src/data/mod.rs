pub mod batcher;
pub mod image;
pub mod prefetch;
pub mod record;
pub mod vocab;

pub use batcher::{VqaBatch, VqaBatcher, VqaItem};
pub use self::image::{ImageLoader, attention_mask, attention_overlay};
pub use prefetch::{Decoder, PrefetchConfig, Prefetcher};
pub use record::{ExampleRecord, ExampleStore, parse_examples, serialize_questions, write_examples};
pub use vocab::{AnswerDictionary, EmbeddingTable, PAD_ID, PAD_TOKEN, Vocabulary};
