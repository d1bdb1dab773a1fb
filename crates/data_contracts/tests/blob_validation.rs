use data_contracts::{GtPixel, ImageBlob, ImageTensor, PointClass, ValidationError};

fn blob_with(points: Vec<GtPixel>) -> ImageBlob {
    ImageBlob::new(ImageTensor::zeros_2d(64), points)
}

#[test]
fn valid_blob_passes() {
    let blob = blob_with(vec![
        GtPixel::new(vec![10.0, 12.5], PointClass::TrackEdge),
        GtPixel::new(vec![63.0, 0.0], PointClass::ShowerStart),
    ]);
    assert!(blob.validate().is_ok());
}

#[test]
fn point_outside_image_rejected() {
    let blob = blob_with(vec![GtPixel::new(vec![64.0, 1.0], PointClass::TrackEdge)]);
    let err = blob.validate().unwrap_err();
    assert!(matches!(err, ValidationError::OutOfImage { size: 64, .. }));
}

#[test]
fn negative_coordinate_rejected() {
    let blob = blob_with(vec![GtPixel::new(vec![-0.5, 1.0], PointClass::TrackEdge)]);
    assert!(matches!(
        blob.validate(),
        Err(ValidationError::InvalidCoordinate(_))
    ));
}

#[test]
fn background_ground_truth_rejected() {
    let blob = blob_with(vec![GtPixel::new(vec![5.0, 5.0], PointClass::Background)]);
    assert_eq!(
        blob.validate(),
        Err(ValidationError::NonSignalLabel(PointClass::Background))
    );
}

#[test]
fn dimension_mismatch_rejected() {
    let blob = blob_with(vec![GtPixel::new(vec![5.0, 5.0, 5.0], PointClass::TrackEdge)]);
    assert_eq!(
        blob.validate(),
        Err(ValidationError::DimensionMismatch {
            expected: 2,
            actual: 3
        })
    );
}

#[test]
fn truncated_image_buffer_rejected() {
    let mut blob = blob_with(Vec::new());
    blob.data.values.pop();
    assert!(matches!(
        blob.validate(),
        Err(ValidationError::ImageSizeMismatch { .. })
    ));
}

#[test]
fn chw_reorder_moves_channels_first() {
    let mut data = ImageTensor::zeros_2d(2);
    // pixel (row 0, col 1), channel 2
    data.values[(0 * 2 + 1) * 3 + 2] = 7.0;
    let chw = data.to_chw();
    approx::assert_relative_eq!(chw[2 * 4 + 1], 7.0);
    assert_eq!(chw.iter().filter(|v| **v != 0.0).count(), 1);
}

#[test]
fn blob_json_round_trip_keeps_passthrough_fields() {
    let mut blob = blob_with(vec![GtPixel::new(vec![1.0, 2.0], PointClass::TrackEdge)]);
    blob.weight = Some(vec![0.5; 3]);
    let json = serde_json::to_string(&blob).unwrap();
    let back: ImageBlob = serde_json::from_str(&json).unwrap();
    assert_eq!(back.weight, blob.weight);
    assert_eq!(back.gt_pixels, blob.gt_pixels);
    assert!(back.labels.is_none());
}

#[test]
fn gt_pixels_travel_as_rows_with_sentinel() {
    let json = serde_json::json!({
        "data": {"shape": [1, 4, 4, 3], "values": vec![0.0f32; 48]},
        "gt_pixels": [[1.0, 2.0, 1.0], [3.0, 0.5, 2.0], [-1.0, -1.0, -1.0], [2.0, 2.0, 1.0]],
    });
    let blob: ImageBlob = serde_json::from_value(json).unwrap();
    assert_eq!(
        blob.gt_pixels,
        vec![
            GtPixel::new(vec![1.0, 2.0], PointClass::TrackEdge),
            GtPixel::new(vec![3.0, 0.5], PointClass::ShowerStart),
        ]
    );
    assert!(blob.validate().is_ok());

    let value = serde_json::to_value(&blob).unwrap();
    assert_eq!(value["gt_pixels"], serde_json::json!([[1.0, 2.0, 1.0], [3.0, 0.5, 2.0]]));
}
