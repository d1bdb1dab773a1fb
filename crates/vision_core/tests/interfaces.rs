use data_contracts::{GtPixel, ImageBlob, ImageTensor, PointClass};
use vision_core::prelude::*;

struct FixedSource {
    emitted: usize,
}

impl BlobSource for FixedSource {
    fn forward(&mut self) -> anyhow::Result<ImageBlob> {
        self.emitted += 1;
        Ok(ImageBlob::new(
            ImageTensor::zeros_2d(32),
            vec![GtPixel::new(vec![4.0, 5.0], PointClass::TrackEdge)],
        ))
    }
}

#[test]
fn blob_source_is_object_safe() {
    let mut source: Box<dyn BlobSource> = Box::new(FixedSource { emitted: 0 });
    let blob = source.forward().unwrap();
    assert_eq!(blob.gt_pixels.len(), 1);
    assert!(blob.validate().is_ok());
}

#[test]
fn detection_distance_and_class_filter() {
    let result = DetectionResult {
        frame_id: 3,
        detections: vec![
            PointDetection {
                position: vec![3.0, 4.0],
                label: PointClass::TrackEdge,
                confidence: 0.9,
            },
            PointDetection {
                position: vec![10.0, 10.0],
                label: PointClass::ShowerStart,
                confidence: 0.6,
            },
        ],
        rois: Vec::new(),
    };
    assert_eq!(result.detections[0].distance_to(&[0.0, 0.0]), 5.0);
    assert_eq!(result.of_class(PointClass::ShowerStart).count(), 1);

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("shower_start"));
}
