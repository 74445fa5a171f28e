//! Stacking labeled examples into tensors for burn's data loader.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};
use finetune_core::{CHANNELS, IMAGE_SIZE, NUM_CLASSES};

use crate::dataset::LabeledExample;

/// A batch of images with one-hot targets
#[derive(Clone, Debug)]
pub struct ClassifierBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width], values in [-1, 1]
    pub images: Tensor<B, 4>,
    /// One-hot targets with shape [batch_size, num_classes]
    pub targets: Tensor<B, 2>,
}

impl<B: Backend> ClassifierBatch<B> {
    pub fn new(images: Tensor<B, 4>, targets: Tensor<B, 2>) -> Self {
        Self { images, targets }
    }

    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batcher producing [`ClassifierBatch`]es on the loader's device
#[derive(Clone, Debug)]
pub struct ExampleBatcher {
    image_size: usize,
    num_classes: usize,
}

impl Default for ExampleBatcher {
    fn default() -> Self {
        Self::new(IMAGE_SIZE, NUM_CLASSES)
    }
}

impl ExampleBatcher {
    pub fn new(image_size: usize, num_classes: usize) -> Self {
        Self {
            image_size,
            num_classes,
        }
    }
}

impl<B: Backend> Batcher<B, LabeledExample, ClassifierBatch<B>> for ExampleBatcher {
    fn batch(&self, items: Vec<LabeledExample>, device: &B::Device) -> ClassifierBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(
                images_data,
                [batch_size, CHANNELS, self.image_size, self.image_size],
            ),
            device,
        );

        let targets_data: Vec<f32> = items.iter().flat_map(|item| item.one_hot.iter().copied()).collect();
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(targets_data, [batch_size, self.num_classes]),
            device,
        );

        ClassifierBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{ImageBuffer, Rgb};

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes_and_values() {
        let img = ImageBuffer::from_pixel(8, 8, Rgb([255u8, 128, 0]));
        let items = vec![
            LabeledExample::from_image(&img, 0, 4).unwrap(),
            LabeledExample::from_image(&img, 3, 4).unwrap(),
        ];

        let batcher = ExampleBatcher::new(8, 4);
        let device = Default::default();
        let batch: ClassifierBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2, 4]);
        assert_eq!(batch.len(), 2);

        let targets = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(targets, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);

        // channel planes: red saturated, green at midpoint, blue at minimum
        let images = batch.images.into_data().to_vec::<f32>().unwrap();
        assert!((images[0] - 0.9921875).abs() < 1e-6);
        assert_eq!(images[64], 0.0);
        assert_eq!(images[128], -1.0);
    }
}
