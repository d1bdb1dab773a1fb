//! VGG16 feature extractor exposing the fine (pool 3) and coarse (pool 5) maps.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::config::{BackboneConfig, StrideContract};
use crate::error::{PpnError, PpnResult};

/// Convolutions per VGG16 stage.
const STAGE_DEPTHS: [usize; 5] = [2, 2, 3, 3, 3];
const FINE_STAGE: usize = 3;

/// Two feature maps at the strides declared by [`FeatureExtractor::strides`].
#[derive(Debug, Clone)]
pub struct FeatureMaps<B: Backend> {
    /// `[1, C_fine, N / fine, N / fine]`
    pub fine: Tensor<B, 4>,
    /// `[1, C_coarse, N / coarse, N / coarse]`
    pub coarse: Tensor<B, 4>,
}

/// What the detection heads need from a backbone.
pub trait FeatureExtractor<B: Backend> {
    fn strides(&self) -> StrideContract;
    fn fine_channels(&self) -> usize;
    fn coarse_channels(&self) -> usize;
    /// `image` is `[1, 3, N, N]`.
    fn extract(&self, image: Tensor<B, 4>) -> PpnResult<FeatureMaps<B>>;
}

#[derive(Module, Debug)]
pub struct VggStage<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VggStage<B> {
    fn new(in_channels: usize, out_channels: usize, depth: usize, device: &B::Device) -> Self {
        let convs = (0..depth)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([input, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Same)
                    .init(device)
            })
            .collect();
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { convs, pool }
    }

    fn forward(&self, mut x: Tensor<B, 4>) -> Tensor<B, 4> {
        for conv in &self.convs {
            x = relu(conv.forward(x));
        }
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct Vgg16Backbone<B: Backend> {
    stages: Vec<VggStage<B>>,
    fine_channels: usize,
    coarse_channels: usize,
}

impl<B: Backend> Vgg16Backbone<B> {
    pub fn new(cfg: &BackboneConfig, device: &B::Device) -> Self {
        let mut in_channels = 3;
        let mut stages = Vec::with_capacity(STAGE_DEPTHS.len());
        for (i, (&depth, &width)) in STAGE_DEPTHS.iter().zip(cfg.stage_channels.iter()).enumerate() {
            let stage = VggStage::new(in_channels, width, depth, device);
            stages.push(if cfg.freeze_early_stages && i < 2 {
                stage.no_grad()
            } else {
                stage
            });
            in_channels = width;
        }
        Self {
            stages,
            fine_channels: cfg.stage_channels[FINE_STAGE - 1],
            coarse_channels: in_channels,
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for Vgg16Backbone<B> {
    fn strides(&self) -> StrideContract {
        StrideContract {
            fine: 1 << FINE_STAGE,
            coarse: 1 << STAGE_DEPTHS.len(),
        }
    }

    fn fine_channels(&self) -> usize {
        self.fine_channels
    }

    fn coarse_channels(&self) -> usize {
        self.coarse_channels
    }

    fn extract(&self, image: Tensor<B, 4>) -> PpnResult<FeatureMaps<B>> {
        let [batch, channels, height, width] = image.dims();
        if batch != 1 {
            return Err(PpnError::BatchSize(batch));
        }
        if channels != 3 || height != width {
            return Err(PpnError::shape("image", &[1, 3, height, height], &[batch, channels, height, width]));
        }
        self.strides().validate_image(height)?;

        let mut x = image;
        let mut fine = None;
        for (i, stage) in self.stages.iter().enumerate() {
            x = stage.forward(x);
            if i + 1 == FINE_STAGE {
                fine = Some(x.clone());
            }
        }
        let fine = fine.ok_or(PpnError::Config("backbone has fewer than three stages".into()))?;
        Ok(FeatureMaps { fine, coarse: x })
    }
}
