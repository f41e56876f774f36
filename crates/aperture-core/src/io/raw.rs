use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array3;
use tracing::debug;

use crate::error::{ApertureError, Result};
use crate::psf::Precision;
use crate::volume::VolumeShape;

/// Bytes per stored sample.
pub fn sample_size(precision: Precision) -> usize {
    match precision {
        Precision::Single => 4,
        Precision::Double => 8,
    }
}

/// Read a headerless little-endian volume, x fastest then y then z.
pub fn read_raw(path: &Path, shape: VolumeShape, precision: Precision) -> Result<Array3<f64>> {
    let count = shape.voxel_count();
    let expected = (count * sample_size(precision)) as u64;
    let actual = std::fs::metadata(path)?.len();
    if actual != expected {
        return Err(ApertureError::InvalidArgument(format!(
            "{} holds {actual} bytes, a {shape} {precision}-precision volume needs {expected}",
            path.display()
        )));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let samples = match precision {
        Precision::Single => {
            let mut buf = vec![0f32; count];
            reader.read_f32_into::<LittleEndian>(&mut buf)?;
            buf.into_iter().map(f64::from).collect()
        }
        Precision::Double => {
            let mut buf = vec![0f64; count];
            reader.read_f64_into::<LittleEndian>(&mut buf)?;
            buf
        }
    };
    debug!(path = %path.display(), %shape, %precision, "Raw volume read");
    Ok(Array3::from_shape_vec(shape.dim(), samples)?)
}

/// Write `volume` in the layout [`read_raw`] expects, narrowing to `f32`
/// for single precision.
pub fn write_raw(path: &Path, volume: &Array3<f64>, precision: Precision) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for &v in volume.iter() {
        match precision {
            Precision::Single => writer.write_f32::<LittleEndian>(v as f32)?,
            Precision::Double => writer.write_f64::<LittleEndian>(v)?,
        }
    }
    writer.flush()?;
    debug!(
        path = %path.display(),
        shape = %VolumeShape::from_dim(volume.dim()),
        %precision,
        "Raw volume written"
    );
    Ok(())
}
