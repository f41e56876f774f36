mod common;

use aperture_core::error::ApertureError;
use aperture_core::io::raw::sample_size;
use aperture_core::io::{read_raw, write_raw};
use aperture_core::psf::Precision;
use aperture_core::volume::VolumeShape;

use common::pseudo_random;

const SHAPE: VolumeShape = VolumeShape {
    nx: 7,
    ny: 5,
    nz: 3,
};

#[test]
fn double_precision_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume.raw");
    let volume = pseudo_random(SHAPE.dim(), 61);

    write_raw(&path, &volume, Precision::Double).unwrap();
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        (SHAPE.voxel_count() * 8) as u64
    );
    let read = read_raw(&path, SHAPE, Precision::Double).unwrap();
    assert_eq!(read, volume);
}

#[test]
fn single_precision_narrows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("volume_f32.raw");
    let volume = pseudo_random(SHAPE.dim(), 62);

    write_raw(&path, &volume, Precision::Single).unwrap();
    assert_eq!(
        std::fs::metadata(&path).unwrap().len(),
        (SHAPE.voxel_count() * sample_size(Precision::Single)) as u64
    );
    let read = read_raw(&path, SHAPE, Precision::Single).unwrap();
    for (a, b) in read.iter().zip(volume.iter()) {
        assert_eq!(*a, *b as f32 as f64);
    }
}

#[test]
fn x_varies_fastest_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("order.raw");
    let mut volume = ndarray::Array3::<f64>::zeros(SHAPE.dim());
    volume[[0, 0, 1]] = 1.0;
    write_raw(&path, &volume, Precision::Double).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[8..16], &1.0f64.to_le_bytes());
}

#[test]
fn size_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.raw");
    std::fs::write(&path, vec![0u8; 10]).unwrap();
    assert!(matches!(
        read_raw(&path, SHAPE, Precision::Double),
        Err(ApertureError::InvalidArgument(_))
    ));
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        read_raw(&dir.path().join("absent.raw"), SHAPE, Precision::Single),
        Err(ApertureError::Io(_))
    ));
}
