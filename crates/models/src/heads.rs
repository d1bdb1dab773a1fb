use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

const HEAD_INIT: Initializer = Initializer::Normal {
    mean: 0.0,
    std: 0.01,
};

#[derive(Debug, Clone)]
pub struct PointHeadConfig {
    pub in_channels: usize,
    pub channels: usize,
    /// Coordinates regressed per cell.
    pub dim: usize,
    pub classes: usize,
}

/// Raw per-cell outputs, still in `[batch, C, H, W]` layout.
#[derive(Debug, Clone)]
pub struct HeadOutput<B: Backend> {
    pub offsets: Tensor<B, 4>,
    pub logits: Tensor<B, 4>,
}

/// Shared 3x3 convolution followed by parallel 1x1 offset and class branches.
///
/// Stage 1 runs one on the coarse map with two classes (background/signal),
/// stage 2 one on the pooled ROI features with the full class count.
#[derive(Module, Debug)]
pub struct PointHead<B: Backend> {
    pub shared: Conv2d<B>,
    pub pixel_pred: Conv2d<B>,
    pub cls_score: Conv2d<B>,
}

impl<B: Backend> PointHead<B> {
    pub fn new(cfg: &PointHeadConfig, device: &B::Device) -> Self {
        let shared = Conv2dConfig::new([cfg.in_channels, cfg.channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .with_initializer(HEAD_INIT)
            .init(device);
        let pixel_pred = Conv2dConfig::new([cfg.channels, cfg.dim], [1, 1])
            .with_initializer(HEAD_INIT)
            .init(device);
        let cls_score = Conv2dConfig::new([cfg.channels, cfg.classes], [1, 1])
            .with_initializer(HEAD_INIT)
            .init(device);
        Self {
            shared,
            pixel_pred,
            cls_score,
        }
    }

    pub fn forward(&self, features: Tensor<B, 4>) -> HeadOutput<B> {
        let x = relu(self.shared.forward(features));
        HeadOutput {
            offsets: self.pixel_pred.forward(x.clone()),
            logits: self.cls_score.forward(x),
        }
    }
}
