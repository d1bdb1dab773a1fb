//! Pixel Proposal Network: a two-stage point detector on a VGG16 backbone.
//!
//! Stage 1 scores every cell of the coarse (stride 32) feature map and regresses
//! a point offset per cell; the best cells become ROIs. Stage 2 crops the fine
//! (stride 8) map around each ROI and refines the point with a class label.
//!
//! Geometry (anchors, selection, assignment, positive rules) works on host
//! values and is dimension-generic. Everything gradients must flow through
//! stays a burn tensor.
//!
//! The `inference` crate wraps [`PixelProposalNetwork`] into a `PointDetector`;
//! the `training` crate drives [`PixelProposalNetwork::forward_train`].

pub mod anchors;
pub mod assign;
pub mod backbone;
pub mod config;
pub mod error;
pub mod heads;
pub mod loss;
pub mod network;
pub mod proposals;
pub mod roi;
pub mod stage;
pub mod tensor_util;

pub use anchors::generate_anchors;
pub use assign::{assign_ground_truth, stage1_positives, stage2_positives, AssignFrame, Assignment, GroundTruth};
pub use backbone::{FeatureExtractor, FeatureMaps, Vgg16Backbone};
pub use config::{BackboneConfig, ClipPolicy, PpnConfig, StrideContract};
pub use error::{PpnError, PpnResult};
pub use heads::{HeadOutput, PointHead, PointHeadConfig};
pub use loss::{LossBreakdown, PpnLosses};
pub use network::{InferenceOutput, PixelProposalNetwork, StepDiagnostics, TrainOutput};
pub use proposals::{decode_proposals, top_r_pixels, Proposals, ScoreMode, Selection};
pub use roi::{crop_pool_2d, include_gt_neighbourhood};
