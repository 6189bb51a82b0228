use super::vocab::PAD_ID;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

/// A decoded example, ready to be batched.
#[derive(Debug, Clone, PartialEq)]
pub struct VqaItem {
    pub words: Vec<usize>,
    pub answer: usize,
    /// RGB pixels in `[0, 255]`.
    ///
    /// # Shape
    /// [side * side * 3], row major (HWC)
    pub image: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct VqaBatch<B: Backend> {
    /// # Shape
    /// [batch_size, 3, side, side]
    pub images: Tensor<B, 4>,
    /// Question ids, zero padded to the longest question of the batch.
    ///
    /// # Shape
    /// [batch_size, max_len]
    pub words: Tensor<B, 2, Int>,
    /// # Shape
    /// [batch_size]
    pub lengths: Tensor<B, 1, Int>,
    /// # Shape
    /// [batch_size]
    pub answers: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct VqaBatcher {
    pub image_side: usize,
}

impl VqaBatcher {
    pub fn new(image_side: usize) -> Self {
        Self { image_side }
    }
}

impl<B: Backend> Batcher<B, VqaItem, VqaBatch<B>> for VqaBatcher {
    fn batch(&self, items: Vec<VqaItem>, device: &B::Device) -> VqaBatch<B> {
        let batch_size = items.len();
        let side = self.image_side;
        let max_len = items
            .iter()
            .map(|item| item.words.len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut words = Vec::with_capacity(batch_size * max_len);
        let mut lengths = Vec::with_capacity(batch_size);
        let mut answers = Vec::with_capacity(batch_size);
        let mut pixels = Vec::with_capacity(batch_size * side * side * 3);
        for item in items {
            debug_assert_eq!(item.image.len(), side * side * 3);
            lengths.push(item.words.len() as i64);
            answers.push(item.answer as i64);
            words.extend(item.words.iter().map(|&id| id as i64));
            words.extend(std::iter::repeat_n(PAD_ID as i64, max_len - item.words.len()));
            pixels.extend(item.image);
        }

        let words = TensorData::new(words, [batch_size, max_len]).convert::<B::IntElem>();
        let lengths = TensorData::new(lengths, [batch_size]).convert::<B::IntElem>();
        let answers = TensorData::new(answers, [batch_size]).convert::<B::IntElem>();
        let images =
            TensorData::new(pixels, [batch_size, side, side, 3]).convert::<B::FloatElem>();

        // NHWC -> NCHW
        let images = Tensor::<B, 4>::from_data(images, device)
            .swap_dims(1, 3)
            .swap_dims(2, 3);

        VqaBatch {
            images,
            words: Tensor::from_data(words, device),
            lengths: Tensor::from_data(lengths, device),
            answers: Tensor::from_data(answers, device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn item(words: Vec<usize>, answer: usize, pixel: f32) -> VqaItem {
        VqaItem {
            words,
            answer,
            image: (0..2 * 2 * 3).map(|i| pixel + i as f32).collect(),
        }
    }

    #[test]
    fn questions_are_padded_to_the_longest() {
        let batcher = VqaBatcher::new(2);
        let batch: VqaBatch<B> = batcher.batch(
            vec![item(vec![4, 5, 6], 1, 0.), item(vec![4, 5], 0, 100.)],
            &Default::default(),
        );
        assert_eq!(batch.words.dims(), [2, 3]);
        let words: Vec<i64> = batch.words.to_data().iter::<i64>().collect();
        assert_eq!(words, vec![4, 5, 6, 4, 5, 0]);
        let lengths: Vec<i64> = batch.lengths.to_data().iter::<i64>().collect();
        assert_eq!(lengths, vec![3, 2]);
        let answers: Vec<i64> = batch.answers.to_data().iter::<i64>().collect();
        assert_eq!(answers, vec![1, 0]);
    }

    #[test]
    fn images_become_channel_first() {
        let batcher = VqaBatcher::new(2);
        let batch: VqaBatch<B> = batcher.batch(vec![item(vec![1], 0, 0.)], &Default::default());
        assert_eq!(batch.images.dims(), [1, 3, 2, 2]);
        // the green plane holds every third value starting at 1
        let green: Vec<f32> = batch
            .images
            .slice([0..1, 1..2, 0..2, 0..2])
            .to_data()
            .iter::<f32>()
            .collect();
        assert_eq!(green, vec![1., 4., 7., 10.]);
    }
}
