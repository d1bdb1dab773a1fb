use burn::module::{Ignored, Module};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use data_contracts::ImageBlob;

use crate::assign::GroundTruth;
use crate::backbone::{FeatureExtractor, Vgg16Backbone};
use crate::config::{PpnConfig, StrideContract};
use crate::error::{PpnError, PpnResult};
use crate::heads::{PointHead, PointHeadConfig};
use crate::loss::PpnLosses;
use crate::roi::{crop_pool_2d, include_gt_neighbourhood};
use crate::stage::{stage1_loss, stage1_propose, stage2_loss, stage2_propose};

/// Intermediate tensors of a training step, read back to host values.
#[derive(Debug, Clone, Default)]
pub struct StepDiagnostics {
    pub ppn1_proposals: Vec<[f32; 2]>,
    pub ppn1_scores: Vec<f32>,
    pub ppn1_positives: Vec<bool>,
    /// ROI set fed to the cropper, forced neighbourhoods included.
    pub rois: Vec<[f32; 2]>,
    pub ppn2_proposals: Vec<[f32; 2]>,
    pub ppn2_scores: Vec<Vec<f32>>,
    pub ppn2_positives: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct TrainOutput<B: Backend> {
    pub losses: PpnLosses<B>,
    pub diagnostics: StepDiagnostics,
}

/// Stage-2 proposals in ROI-local frames plus the stage-1 ROIs they belong to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceOutput {
    pub rois: Vec<[f32; 2]>,
    pub proposals: Vec<[f32; 2]>,
    pub class_scores: Vec<Vec<f32>>,
    /// Proposals per ROI; consecutive runs of this length share a ROI.
    pub per_roi: usize,
}

/// VGG16 backbone with the two PPN stages on top.
#[derive(Module, Debug)]
pub struct PixelProposalNetwork<B: Backend> {
    backbone: Vgg16Backbone<B>,
    ppn1: PointHead<B>,
    ppn2: PointHead<B>,
    cfg: Ignored<PpnConfig>,
}

impl<B: Backend> PixelProposalNetwork<B> {
    pub fn new(cfg: PpnConfig, device: &B::Device) -> PpnResult<Self> {
        cfg.validate()?;
        let backbone = Vgg16Backbone::new(&cfg.backbone, device);
        let strides = backbone.strides();
        StrideContract::new(strides.fine, strides.coarse)?;
        strides.validate_image(cfg.image_size)?;
        let ppn1 = PointHead::new(
            &PointHeadConfig {
                in_channels: backbone.coarse_channels(),
                channels: cfg.ppn1_channels,
                dim: 2,
                classes: 2,
            },
            device,
        );
        let ppn2 = PointHead::new(
            &PointHeadConfig {
                in_channels: backbone.fine_channels(),
                channels: cfg.ppn2_channels,
                dim: 2,
                classes: cfg.num_classes,
            },
            device,
        );
        log::debug!(
            "ppn network: image {} strides {}/{} roi cap {}",
            cfg.image_size,
            strides.fine,
            strides.coarse,
            cfg.roi_cap
        );
        Ok(Self {
            backbone,
            ppn1,
            ppn2,
            cfg: Ignored(cfg),
        })
    }

    pub fn config(&self) -> &PpnConfig {
        &self.cfg.0
    }

    pub fn set_score_threshold(&mut self, threshold: f32) {
        self.cfg.0.ppn1_score_threshold = threshold;
    }

    pub fn strides(&self) -> StrideContract {
        self.backbone.strides()
    }

    /// `[1, 3, N, N]` image tensor from a channels-last blob.
    pub fn image_tensor(&self, blob: &ImageBlob, device: &B::Device) -> PpnResult<Tensor<B, 4>> {
        blob.data.validate()?;
        let size = self.config().image_size;
        let expected = [1, size, size, 3];
        if blob.data.shape != expected {
            return Err(PpnError::shape("image", &expected, &blob.data.shape));
        }
        Ok(Tensor::from_data(TensorData::new(blob.data.to_chw(), [1, 3, size, size]), device))
    }

    pub fn forward_train(&self, blob: &ImageBlob) -> PpnResult<TrainOutput<B>> {
        let cfg = self.config();
        let device = self.devices().into_iter().next().unwrap_or_default();
        let gt = GroundTruth::<2>::from_pixels(&blob.gt_pixels)?;
        if gt.is_empty() {
            return Err(PpnError::EmptyGroundTruth);
        }
        let strides = self.strides();
        let fine_extent = strides.fine_extent(cfg.image_size)?;

        let maps = self.backbone.extract(self.image_tensor(blob, &device)?)?;
        let stage1 = stage1_propose(self.ppn1.forward(maps.coarse), cfg)?;
        let loss1 = stage1_loss(&stage1, &gt, strides)?;

        let rois = include_gt_neighbourhood(
            &stage1.rois.proposals,
            &gt,
            strides,
            fine_extent,
            cfg.gt_neighbourhood,
        );
        let pooled = crop_pool_2d(maps.fine, &rois, strides.ratio_f32(), cfg.crop_size)?;
        let stage2 = stage2_propose(self.ppn2.forward(pooled), cfg)?;
        let loss2 = stage2_loss(&stage2, &gt, &rois, strides, cfg.ppn2_distance_threshold)?;

        Ok(TrainOutput {
            losses: PpnLosses {
                ppn1_point: loss1.point,
                ppn1_class: loss1.class,
                ppn2_point: loss2.point,
                ppn2_class: loss2.class,
            },
            diagnostics: StepDiagnostics {
                ppn1_proposals: stage1.proposal_rows,
                ppn1_scores: stage1.signal_scores,
                ppn1_positives: loss1.positives,
                rois,
                ppn2_proposals: stage2.proposal_rows,
                ppn2_scores: stage2.class_scores,
                ppn2_positives: loss2.positives,
            },
        })
    }

    /// Runs both stages without ground truth. No ROIs means no stage-2 work.
    pub fn forward_inference(&self, blob: &ImageBlob) -> PpnResult<InferenceOutput> {
        let cfg = self.config();
        let device = self.devices().into_iter().next().unwrap_or_default();
        let maps = self.backbone.extract(self.image_tensor(blob, &device)?)?;
        let stage1 = stage1_propose(self.ppn1.forward(maps.coarse), cfg)?;
        let rois = stage1.rois.proposals;
        if rois.is_empty() {
            return Ok(InferenceOutput::default());
        }
        let pooled = crop_pool_2d(maps.fine, &rois, self.strides().ratio_f32(), cfg.crop_size)?;
        let stage2 = stage2_propose(self.ppn2.forward(pooled), cfg)?;
        let per_roi = stage2.proposal_rows.len() / rois.len();
        Ok(InferenceOutput {
            rois,
            proposals: stage2.proposal_rows,
            class_scores: stage2.class_scores,
            per_roi,
        })
    }
}
