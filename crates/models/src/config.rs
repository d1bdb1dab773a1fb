use data_contracts::PointClass;
use serde::{Deserialize, Serialize};

use crate::error::{PpnError, PpnResult};

/// Strides of the two feature maps the backbone exposes, in image pixels per cell.
///
/// Stage 1 runs on the coarse map, ROIs are cropped from the fine map. The ratio
/// between the two is the factor every frame conversion in the network uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrideContract {
    pub fine: usize,
    pub coarse: usize,
}

impl StrideContract {
    pub fn new(fine: usize, coarse: usize) -> PpnResult<Self> {
        if fine == 0 || coarse < fine || coarse % fine != 0 {
            return Err(PpnError::InvalidStrides { fine, coarse });
        }
        Ok(Self { fine, coarse })
    }

    pub fn ratio(&self) -> usize {
        self.coarse / self.fine
    }

    pub fn ratio_f32(&self) -> f32 {
        self.ratio() as f32
    }

    pub fn validate_image(&self, size: usize) -> PpnResult<()> {
        if size == 0 || size % self.coarse != 0 {
            return Err(PpnError::ImageSize {
                size,
                stride: self.coarse,
            });
        }
        Ok(())
    }

    pub fn coarse_extent(&self, size: usize) -> PpnResult<usize> {
        self.validate_image(size)?;
        Ok(size / self.coarse)
    }

    pub fn fine_extent(&self, size: usize) -> PpnResult<usize> {
        self.validate_image(size)?;
        Ok(size / self.fine)
    }
}

/// What happens to decoded pixel proposals that leave their grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipPolicy {
    /// Proposals are left where the offsets put them.
    #[default]
    Identity,
    /// Proposals are clamped into `[0, extent]` of their frame.
    Clamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackboneConfig {
    /// Output channels of the five VGG16 stages.
    pub stage_channels: [usize; 5],
    /// Stop gradients through the first two stages.
    pub freeze_early_stages: bool,
}

impl Default for BackboneConfig {
    fn default() -> Self {
        Self {
            stage_channels: [64, 128, 256, 512, 512],
            freeze_early_stages: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpnConfig {
    /// Side length N of the square input image.
    pub image_size: usize,
    /// Class count including background.
    pub num_classes: usize,
    /// Maximum number of ROIs kept after stage 1.
    pub roi_cap: usize,
    /// Stage-1 signal probability a ROI must exceed.
    pub ppn1_score_threshold: f32,
    /// Stage-2 proposals within this many F3 cells of their ground truth are positives.
    pub ppn2_distance_threshold: f32,
    /// Side of the bilinear crop taken per ROI before max pooling.
    pub crop_size: usize,
    /// Half-width, in F3 cells, of the block forced around each ground-truth point.
    pub gt_neighbourhood: usize,
    pub ppn1_channels: usize,
    pub ppn2_channels: usize,
    pub clip: ClipPolicy,
    pub backbone: BackboneConfig,
}

impl Default for PpnConfig {
    fn default() -> Self {
        Self {
            image_size: 512,
            num_classes: 3,
            roi_cap: 20,
            ppn1_score_threshold: 0.5,
            ppn2_distance_threshold: 2.0,
            crop_size: 2,
            gt_neighbourhood: 1,
            ppn1_channels: 512,
            ppn2_channels: 512,
            clip: ClipPolicy::Identity,
            backbone: BackboneConfig::default(),
        }
    }
}

impl PpnConfig {
    /// Narrow variant for CPU smoke runs; same geometry, far fewer channels.
    pub fn compact(image_size: usize) -> Self {
        Self {
            image_size,
            ppn1_channels: 8,
            ppn2_channels: 8,
            backbone: BackboneConfig {
                stage_channels: [4, 4, 8, 8, 8],
                freeze_early_stages: true,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> PpnResult<()> {
        if self.num_classes != PointClass::ALL.len() {
            return Err(PpnError::Config(format!(
                "num_classes must match the {} point classes (background included), got {}",
                PointClass::ALL.len(),
                self.num_classes
            )));
        }
        if self.roi_cap == 0 {
            return Err(PpnError::Config("roi_cap must be at least 1".into()));
        }
        if self.crop_size == 0 {
            return Err(PpnError::Config("crop_size must be at least 1".into()));
        }
        if !(self.ppn2_distance_threshold.is_finite() && self.ppn2_distance_threshold >= 0.0) {
            return Err(PpnError::Config(format!(
                "ppn2_distance_threshold must be finite and non-negative, got {}",
                self.ppn2_distance_threshold
            )));
        }
        if self.ppn1_channels == 0 || self.ppn2_channels == 0 {
            return Err(PpnError::Config("head channels must be non-zero".into()));
        }
        if self.backbone.stage_channels.contains(&0) {
            return Err(PpnError::Config("backbone stage channels must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_must_nest() {
        assert!(StrideContract::new(8, 32).is_ok());
        assert!(matches!(
            StrideContract::new(8, 36),
            Err(PpnError::InvalidStrides { fine: 8, coarse: 36 })
        ));
        assert!(StrideContract::new(0, 32).is_err());
        assert!(StrideContract::new(32, 8).is_err());
    }

    #[test]
    fn extents_follow_image_size() {
        let strides = StrideContract::new(8, 32).unwrap();
        assert_eq!(strides.ratio(), 4);
        assert_eq!(strides.coarse_extent(512).unwrap(), 16);
        assert_eq!(strides.fine_extent(512).unwrap(), 64);
        assert!(matches!(
            strides.coarse_extent(500),
            Err(PpnError::ImageSize { size: 500, stride: 32 })
        ));
    }

    #[test]
    fn defaults_validate() {
        PpnConfig::default().validate().unwrap();
        PpnConfig::compact(64).validate().unwrap();
        let bad = PpnConfig {
            roi_cap: 0,
            ..PpnConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn class_count_matches_point_classes() {
        for num_classes in [2, 4] {
            let cfg = PpnConfig {
                num_classes,
                ..PpnConfig::compact(64)
            };
            assert!(matches!(cfg.validate(), Err(PpnError::Config(_))));
        }
    }
}
