mod common;

use hcs_ngff::pixel::{ImageData, PixelType};
use hcs_ngff::source::assemble::OverlapPolicy;
use hcs_ngff::source::{DatabaseSource, FieldSelection, ImageSource, WellBounds};
use ndarray::ArrayD;

use common::{ExperimentBuilder, pattern, pattern_3d, plate};

fn open(index: &std::path::Path) -> DatabaseSource {
    let mut source = DatabaseSource::open(index).expect("open index");
    source.init_metadata().expect("read metadata");
    source
}

fn u16_image(image: &ImageData) -> &ArrayD<u16> {
    match image {
        ImageData::U16(a) => a,
        other => panic!("expected uint16 pixels, got {:?}", other.pixel_type()),
    }
}

#[test]
fn test_scenario_a_two_tiles_side_by_side() {
    let experiment = ExperimentBuilder::new("scenario a", (1, 1), &[(0, "DAPI", "#0000FF")])
        .well("B02", 7, true, None)
        .tile(7, 0, 0, (0, 0), (512, 512), 16)
        .tile(7, 0, 0, (512, 0), (512, 512), 16)
        .finish();
    let mut source = open(&experiment.index);
    source.select_well("B02").unwrap();

    let whole = source.get_image(FieldSelection::Whole).unwrap();
    assert_eq!(whole[0].shape(), &[1, 1, 1, 512, 1024]);
    let field = source.field_image(0).unwrap();
    assert_eq!(field, whole[0]);
    assert_eq!(u16_image(&field)[[0, 0, 0, 3, 700]] as u64, pattern(7, 0, 0, 700, 3));
}

#[test]
fn test_scenario_a_second_field_of_two_by_one_grid() {
    let experiment = ExperimentBuilder::new("scenario a2", (2, 1), &[(0, "DAPI", "#0000FF")])
        .well("B02", 7, true, None)
        .tile(7, 0, 0, (0, 0), (512, 512), 16)
        .tile(7, 0, 0, (512, 0), (512, 512), 16)
        .finish();
    let mut source = open(&experiment.index);
    source.select_well("B2").unwrap();

    let field = source.field_image(1).unwrap();
    assert_eq!(field.shape(), &[1, 1, 1, 512, 512]);
    let pixels = u16_image(&field);
    for (y, x) in [(0, 0), (511, 511), (100, 37)] {
        assert_eq!(pixels[[0, 0, 0, y, x]] as u64, pattern(7, 0, 0, 512 + x as u64, y as u64));
    }
}

#[test]
fn test_scenario_c_padded_label_resolves() {
    let experiment = ExperimentBuilder::new("scenario c", (1, 1), &[(0, "DAPI", "#0000FF")])
        .well("A01", 3, true, None)
        .tile(3, 0, 0, (0, 0), (4, 4), 8)
        .finish();
    let mut source = open(&experiment.index);
    assert_eq!(source.wells().unwrap(), vec!["A1".to_string()]);
    source.select_well("A1").unwrap();
    assert_eq!(source.current_well(), Some("A1"));
    source.select_well("A01").unwrap();
    assert_eq!(source.current_tiles()[0].zone_id, 3);
}

#[test]
fn test_plate_metadata() {
    let experiment = plate();
    let source = open(&experiment.index);
    let metadata = source.metadata().unwrap();

    assert_eq!(source.name(), "Plate 1");
    assert_eq!(metadata.experiment.creator, "tester");
    assert_eq!(
        metadata.experiment.created.to_string(),
        "2024-12-09 10:30:15"
    );
    assert_eq!(metadata.experiment.time_points, vec![0, 1]);
    assert_eq!(metadata.experiment.levels, vec![0]);
    assert_eq!(metadata.experiment.acquisitions.len(), 1);
    assert_eq!(metadata.experiment.acquisitions[0].description, None);

    assert_eq!(source.rows().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(source.columns().unwrap(), vec!["1", "2", "10"]);
    assert_eq!(source.wells().unwrap(), vec!["B2", "C10"]);
    assert_eq!(source.fields().unwrap(), vec!["0", "1", "2", "3"]);

    assert_eq!(source.pixel_type(), PixelType::U16);
    assert_eq!(source.dim_order(), "tczyx");
    assert_eq!(source.pixel_size_um()[&'x'], 0.5);
    let channels = source.channels();
    assert_eq!(channels[1].label, "GFP");
    assert_eq!(channels[1].color, "00FF00");

    let position = source.position_um(Some("B02")).unwrap();
    assert_eq!((position[&'x'], position[&'y']), (1000.0, 2000.0));
    assert!(source.position_um(Some("C10")).unwrap().is_empty());

    assert_eq!(metadata.field_shape, WellBounds { x: 4, y: 4, z: 1 });
    // 8×8 sensor, 2 wells, 4 fields, 2 channels, 2 timepoints, 2 bytes
    assert_eq!(metadata.max_data_size(), 64 * 2 * 4 * 2 * 2 * 2);
}

#[test]
fn test_plate_round_trip() {
    let experiment = plate();
    let mut source = open(&experiment.index);
    for (label, zone) in [("B2", 1), ("C10", 2)] {
        source.select_well(label).unwrap();
        let whole = source.get_image(FieldSelection::Whole).unwrap();
        let canvas = u16_image(&whole[0]);
        assert_eq!(canvas.shape(), &[2, 2, 1, 8, 8]);
        for (index, &value) in canvas.indexed_iter() {
            let (t, c, y, x) = (index[0], index[1], index[3], index[4]);
            let expected = pattern(zone, t as i64, c as i64 + 1, x as u64, y as u64);
            assert_eq!(value as u64, expected, "well {label} at t{t} c{c} y{y} x{x}");
        }

        let fields = source.get_image(FieldSelection::All).unwrap();
        assert_eq!(fields.len(), 4);
        let third = u16_image(&fields[2]);
        assert_eq!(third.shape(), &[2, 2, 1, 4, 4]);
        assert_eq!(third[[1, 0, 0, 0, 1]] as u64, pattern(zone, 1, 1, 1, 4));
    }
}

#[test]
fn test_well_matrix() {
    let experiment = plate();
    let source = open(&experiment.index);
    let matrix = source.well_matrix().unwrap();
    assert_eq!(
        matrix,
        vec![
            (0, vec!["B2".to_string(), "C10".to_string()]),
            (1, vec!["B2".to_string(), "C10".to_string()]),
        ]
    );
}

#[test]
fn test_channel_and_timepoint_filters() {
    let experiment = plate();
    let source = open(&experiment.index);
    assert_eq!(source.well_tiles("B2", Some(2), Some(1)).unwrap().len(), 4);
    assert!(source.well_tiles("B2", Some(9), None).unwrap().is_empty());
}

#[test]
fn test_unknown_well_is_not_found() {
    let experiment = plate();
    let mut source = open(&experiment.index);
    assert!(matches!(
        source.select_well("H12"),
        Err(hcs_ngff::Error::NotFound(_))
    ));
    // imaged flag unset
    assert!(matches!(
        source.select_well("A1"),
        Err(hcs_ngff::Error::NotFound(_))
    ));
    assert!(matches!(
        source.get_image(FieldSelection::Whole),
        Err(hcs_ngff::Error::NotFound(_))
    ));
}

#[test]
fn test_field_out_of_range() {
    let experiment = plate();
    let mut source = open(&experiment.index);
    source.select_well("B2").unwrap();
    assert!(matches!(
        source.field_image(4),
        Err(hcs_ngff::Error::NotFound(_))
    ));
}

#[test]
fn test_missing_blob_is_fatal() {
    let experiment = plate();
    std::fs::remove_file(experiment.blob(1)).unwrap();
    let mut source = open(&experiment.index);
    let err = source.select_well("B2").unwrap_err();
    assert!(matches!(err, hcs_ngff::Error::Io(_)));
    assert!(err.to_string().contains("images-1.db"));
    assert!(source.current_well().is_none());
}

#[test]
fn test_truncated_blob_is_fatal() {
    let experiment = plate();
    let blob = experiment.blob(0);
    let bytes = std::fs::read(&blob).unwrap();
    std::fs::write(&blob, &bytes[..bytes.len() / 2]).unwrap();
    let mut source = open(&experiment.index);
    // zone 2 tiles live in the second half of the blob
    assert!(source.select_well("B2").is_ok());
    assert!(matches!(
        source.select_well("C10"),
        Err(hcs_ngff::Error::Io(_))
    ));
}

#[test]
fn test_undeclared_channel_is_integrity_error() {
    let experiment = ExperimentBuilder::new("bad channel", (1, 1), &[(0, "DAPI", "#0000FF")])
        .well("B2", 1, true, None)
        .tile(1, 0, 0, (0, 0), (4, 4), 16)
        .tile(1, 0, 5, (0, 0), (4, 4), 16)
        .finish();
    let mut source = open(&experiment.index);
    assert!(matches!(
        source.select_well("B2"),
        Err(hcs_ngff::Error::Integrity(_))
    ));
}

#[test]
fn test_overlap_policy() {
    let build = |name: &str| {
        ExperimentBuilder::new(name, (1, 1), &[(0, "DAPI", "#0000FF")])
            .well("B2", 1, true, None)
            .tile(1, 0, 0, (0, 0), (4, 4), 16)
            .tile(1, 0, 0, (2, 0), (4, 4), 16)
            .finish()
    };

    let experiment = build("overwrite");
    let mut source = open(&experiment.index);
    source.select_well("B2").unwrap();
    let image = source.field_image(0).unwrap();
    let pixels = u16_image(&image);
    assert_eq!(pixels.shape(), &[1, 1, 1, 4, 6]);
    assert_eq!(pixels[[0, 0, 0, 0, 2]] as u64, pattern(1, 0, 0, 2, 0));

    let experiment = build("reject");
    let mut source = DatabaseSource::open(&experiment.index)
        .unwrap()
        .with_overlap_policy(OverlapPolicy::Reject);
    source.init_metadata().unwrap();
    assert!(matches!(
        source.select_well("B2"),
        Err(hcs_ngff::Error::Integrity(_))
    ));
}

#[test]
fn test_narrow_samples_are_promoted() {
    let experiment = ExperimentBuilder::new("eight bit", (1, 1), &[(0, "BF", "#FFFFFF")])
        .well("D4", 1, true, None)
        .tile(1, 0, 0, (0, 0), (3, 2), 8)
        .finish();
    let mut source = open(&experiment.index);
    assert_eq!(source.pixel_type(), PixelType::U8);
    source.select_well("D4").unwrap();
    let image = source.field_image(0).unwrap();
    let ImageData::U8(pixels) = image else {
        panic!("expected uint8 pixels");
    };
    let expected: Vec<u8> = (0..2)
        .flat_map(|y| (0..3).map(move |x| pattern(1, 0, 0, x, y) as u8))
        .collect();
    assert_eq!(pixels.into_raw_vec_and_offset().0, expected);
}

#[test]
fn test_missing_index_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("experiment.db");
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute_batch("CREATE TABLE Other (x INTEGER);")
        .unwrap();
    assert!(matches!(
        DatabaseSource::open(&path),
        Err(hcs_ngff::Error::NotFound(_))
    ));
}

#[test]
fn test_partially_imaged_well_keeps_plate_field_grid() {
    // 8×8 tiles on the 8×8 sensor grid; C3 only has its first site
    let experiment = ExperimentBuilder::new("partial", (2, 1), &[(0, "DAPI", "#0000FF")])
        .well("B2", 1, true, None)
        .well("C3", 2, true, None)
        .tile(1, 0, 0, (0, 0), (8, 8), 16)
        .tile(1, 0, 0, (8, 0), (8, 8), 16)
        .tile(2, 0, 0, (0, 0), (8, 8), 16)
        .finish();
    let mut source = open(&experiment.index);
    assert_eq!(
        source.metadata().unwrap().field_shape,
        WellBounds { x: 8, y: 8, z: 1 }
    );

    source.select_well("B2").unwrap();
    for field in source.get_image(FieldSelection::All).unwrap() {
        assert_eq!(field.shape(), &[1, 1, 1, 8, 8]);
    }

    source.select_well("C3").unwrap();
    let fields = source.get_image(FieldSelection::All).unwrap();
    let first = u16_image(&fields[0]);
    assert_eq!(first.shape(), &[1, 1, 1, 8, 8]);
    assert_eq!(first[[0, 0, 0, 7, 5]] as u64, pattern(2, 0, 0, 5, 7));
    let second = u16_image(&fields[1]);
    assert_eq!(second.shape(), &[1, 1, 1, 8, 8]);
    assert!(second.iter().all(|&v| v == 0));
}

#[test]
fn test_sensor_frame_is_the_minimum_field() {
    // no well reaches its second site
    let experiment = ExperimentBuilder::new("first sites", (2, 1), &[(0, "DAPI", "#0000FF")])
        .well("B2", 1, true, None)
        .tile(1, 0, 0, (0, 0), (8, 8), 16)
        .finish();
    let mut source = open(&experiment.index);
    source.select_well("B2").unwrap();
    let whole = source.get_image(FieldSelection::Whole).unwrap();
    assert_eq!(source.field_image(0).unwrap(), whole[0]);
    assert_eq!(source.field_image(1).unwrap().shape(), &[1, 1, 1, 8, 8]);
}

#[test]
fn test_z_stacks_split_into_z_fields() {
    let experiment = ExperimentBuilder::new_3d("stacks", (1, 1, 2), &[(0, "DAPI", "#0000FF")])
        .well("B2", 1, true, None)
        .tile_3d(1, 0, 0, (0, 0, 0), (4, 3, 2), 16)
        .tile_3d(1, 0, 0, (0, 0, 2), (4, 3, 2), 16)
        .finish();
    let mut source = open(&experiment.index);
    assert_eq!(source.metadata().unwrap().geometry.sites_z, 2);
    assert_eq!(source.fields().unwrap(), vec!["0", "1"]);
    source.select_well("B2").unwrap();

    let whole = source.get_image(FieldSelection::Whole).unwrap();
    let canvas = u16_image(&whole[0]);
    assert_eq!(canvas.shape(), &[1, 1, 4, 3, 4]);
    for (index, &value) in canvas.indexed_iter() {
        let (z, y, x) = (index[2], index[3], index[4]);
        assert_eq!(
            value as u64,
            pattern_3d(1, 0, 0, x as u64, y as u64, z as u64),
            "z{z} y{y} x{x}"
        );
    }

    let field = source.field_image(1).unwrap();
    let upper = u16_image(&field);
    assert_eq!(upper.shape(), &[1, 1, 2, 3, 4]);
    assert_eq!(upper[[0, 0, 1, 2, 3]] as u64, pattern_3d(1, 0, 0, 3, 2, 3));
}

#[test]
fn test_three_byte_samples_widen_to_u32() {
    // zone 300 puts sample values above 16 bits
    let experiment = ExperimentBuilder::new("wide", (1, 1), &[(0, "BF", "#FFFFFF")])
        .well("B2", 300, true, None)
        .tile(300, 0, 0, (0, 0), (3, 2), 24)
        .finish();
    let mut source = open(&experiment.index);
    assert_eq!(source.pixel_type(), PixelType::U32);
    source.select_well("B2").unwrap();
    let ImageData::U32(pixels) = source.field_image(0).unwrap() else {
        panic!("expected uint32 pixels");
    };
    assert_eq!(pixels.shape(), &[1, 1, 1, 2, 3]);
    for ((_, _, _, y, x), &value) in pixels
        .into_dimensionality::<ndarray::Ix5>()
        .unwrap()
        .indexed_iter()
    {
        assert!(value > u16::MAX as u32);
        assert_eq!(value as u64, pattern(300, 0, 0, x as u64, y as u64));
    }
}
