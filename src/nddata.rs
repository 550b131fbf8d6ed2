//! Subunit containers: typed pixel arrays plus their companion planes.
//!
//! An [`NdData`] bundles one pixel array with an optional variance plane,
//! an optional bit-flag quality mask, an optional world-coordinate
//! mapping, its own header, and any named auxiliary payloads attached to
//! it.

use bitflags::bitflags;
use indexmap::IndexMap;
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::header::Header;
use crate::table::Table;

// ── Pixel arrays ──

/// An n-dimensional pixel array in one of the storage types the on-disk
/// format can carry. The variant maps 1:1 to a BITPIX value.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelArray {
    /// BITPIX 8.
    UInt8(ArrayD<u8>),
    /// BITPIX 16.
    Int16(ArrayD<i16>),
    /// BITPIX 32.
    Int32(ArrayD<i32>),
    /// BITPIX 64.
    Int64(ArrayD<i64>),
    /// BITPIX -32.
    Float32(ArrayD<f32>),
    /// BITPIX -64.
    Float64(ArrayD<f64>),
}

impl PixelArray {
    /// The BITPIX value for this storage type.
    pub fn bitpix(&self) -> i64 {
        match self {
            PixelArray::UInt8(_) => 8,
            PixelArray::Int16(_) => 16,
            PixelArray::Int32(_) => 32,
            PixelArray::Int64(_) => 64,
            PixelArray::Float32(_) => -32,
            PixelArray::Float64(_) => -64,
        }
    }

    /// Short storage-type name used in structural summaries.
    pub fn type_name(&self) -> &'static str {
        match self {
            PixelArray::UInt8(_) => "uint8",
            PixelArray::Int16(_) => "int16",
            PixelArray::Int32(_) => "int32",
            PixelArray::Int64(_) => "int64",
            PixelArray::Float32(_) => "float32",
            PixelArray::Float64(_) => "float64",
        }
    }

    /// Array shape, slowest axis first.
    pub fn shape(&self) -> &[usize] {
        match self {
            PixelArray::UInt8(a) => a.shape(),
            PixelArray::Int16(a) => a.shape(),
            PixelArray::Int32(a) => a.shape(),
            PixelArray::Int64(a) => a.shape(),
            PixelArray::Float32(a) => a.shape(),
            PixelArray::Float64(a) => a.shape(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    /// Returns `true` for a zero-element array.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per element on disk.
    pub fn bytes_per_element(&self) -> usize {
        (self.bitpix().unsigned_abs() / 8) as usize
    }

    /// Build an array from big-endian bytes as stored on disk.
    ///
    /// `shape` is slowest axis first. The byte slice must hold exactly
    /// one element per shape cell at the width `bitpix` implies.
    pub fn from_be_bytes(bitpix: i64, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        let count: usize = shape.iter().product();
        let width = match bitpix {
            8 => 1,
            16 | -16 => 2,
            32 | -32 => 4,
            64 | -64 => 8,
            other => return Err(Error::InvalidBitpix(other)),
        };
        if bytes.len() < count * width {
            return Err(Error::UnexpectedEof);
        }
        let bytes = &bytes[..count * width];
        let dim = IxDyn(shape);
        let bad_shape = || Error::InvalidHeader("axis lengths do not match data size");
        match bitpix {
            8 => {
                let a = ArrayD::from_shape_vec(dim, bytes.to_vec()).map_err(|_| bad_shape())?;
                Ok(PixelArray::UInt8(a))
            }
            16 => {
                let raw: Vec<i16> = bytemuck::pod_collect_to_vec(bytes);
                let native: Vec<i16> = raw.into_iter().map(i16::from_be).collect();
                let a = ArrayD::from_shape_vec(dim, native).map_err(|_| bad_shape())?;
                Ok(PixelArray::Int16(a))
            }
            32 => {
                let raw: Vec<i32> = bytemuck::pod_collect_to_vec(bytes);
                let native: Vec<i32> = raw.into_iter().map(i32::from_be).collect();
                let a = ArrayD::from_shape_vec(dim, native).map_err(|_| bad_shape())?;
                Ok(PixelArray::Int32(a))
            }
            64 => {
                let raw: Vec<i64> = bytemuck::pod_collect_to_vec(bytes);
                let native: Vec<i64> = raw.into_iter().map(i64::from_be).collect();
                let a = ArrayD::from_shape_vec(dim, native).map_err(|_| bad_shape())?;
                Ok(PixelArray::Int64(a))
            }
            -32 => {
                let raw: Vec<u32> = bytemuck::pod_collect_to_vec(bytes);
                let native: Vec<f32> = raw
                    .into_iter()
                    .map(|x| f32::from_bits(u32::from_be(x)))
                    .collect();
                let a = ArrayD::from_shape_vec(dim, native).map_err(|_| bad_shape())?;
                Ok(PixelArray::Float32(a))
            }
            -64 => {
                let raw: Vec<u64> = bytemuck::pod_collect_to_vec(bytes);
                let native: Vec<f64> = raw
                    .into_iter()
                    .map(|x| f64::from_bits(u64::from_be(x)))
                    .collect();
                let a = ArrayD::from_shape_vec(dim, native).map_err(|_| bad_shape())?;
                Ok(PixelArray::Float64(a))
            }
            other => Err(Error::InvalidBitpix(other)),
        }
    }

    /// Serialize to big-endian bytes in row-major order.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            PixelArray::UInt8(a) => a.iter().copied().collect(),
            PixelArray::Int16(a) => {
                let be: Vec<i16> = a.iter().map(|x| x.to_be()).collect();
                bytemuck::pod_collect_to_vec(&be)
            }
            PixelArray::Int32(a) => {
                let be: Vec<i32> = a.iter().map(|x| x.to_be()).collect();
                bytemuck::pod_collect_to_vec(&be)
            }
            PixelArray::Int64(a) => {
                let be: Vec<i64> = a.iter().map(|x| x.to_be()).collect();
                bytemuck::pod_collect_to_vec(&be)
            }
            PixelArray::Float32(a) => {
                let be: Vec<u32> = a.iter().map(|x| x.to_bits().to_be()).collect();
                bytemuck::pod_collect_to_vec(&be)
            }
            PixelArray::Float64(a) => {
                let be: Vec<u64> = a.iter().map(|x| x.to_bits().to_be()).collect();
                bytemuck::pod_collect_to_vec(&be)
            }
        }
    }

    /// Element value as a float, row-major flat index.
    pub fn get_float(&self, index: usize) -> Option<f64> {
        // Arrays are always standard layout here, so the flat slice view
        // is available and the lookup is O(1).
        match self {
            PixelArray::UInt8(a) => a.as_slice().and_then(|s| s.get(index)).map(|x| *x as f64),
            PixelArray::Int16(a) => a.as_slice().and_then(|s| s.get(index)).map(|x| *x as f64),
            PixelArray::Int32(a) => a.as_slice().and_then(|s| s.get(index)).map(|x| *x as f64),
            PixelArray::Int64(a) => a.as_slice().and_then(|s| s.get(index)).map(|x| *x as f64),
            PixelArray::Float32(a) => a.as_slice().and_then(|s| s.get(index)).map(|x| *x as f64),
            PixelArray::Float64(a) => a.as_slice().and_then(|s| s.get(index)).copied(),
        }
    }
}

impl From<ArrayD<f32>> for PixelArray {
    fn from(a: ArrayD<f32>) -> Self {
        PixelArray::Float32(a)
    }
}

impl From<ArrayD<f64>> for PixelArray {
    fn from(a: ArrayD<f64>) -> Self {
        PixelArray::Float64(a)
    }
}

impl From<ArrayD<i16>> for PixelArray {
    fn from(a: ArrayD<i16>) -> Self {
        PixelArray::Int16(a)
    }
}

impl From<ArrayD<i32>> for PixelArray {
    fn from(a: ArrayD<i32>) -> Self {
        PixelArray::Int32(a)
    }
}

// ── Quality mask bits ──

bitflags! {
    /// Named bits of the data-quality plane. Planes combine with a
    /// bitwise OR, so a pixel accumulates every condition that ever
    /// applied to it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DqBits: u16 {
        const BAD_PIXEL     = 1;
        const NON_LINEAR    = 2;
        const SATURATED     = 4;
        const COSMIC_RAY    = 8;
        const NO_DATA       = 16;
        const OVERLAP       = 32;
        const UNILLUMINATED = 64;
    }
}

// ── WCS ──

/// World-coordinate mapping, carried as an opaque card bag. The handle
/// never interprets it; it travels with the subunit and survives a
/// write/reopen cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wcs {
    /// The coordinate-system cards, verbatim.
    pub cards: Header,
}

// ── Auxiliary payloads ──

/// A named auxiliary payload attached to a subunit or to the whole file.
#[derive(Debug, Clone, PartialEq)]
pub enum Extra {
    /// A pixel-array payload.
    Array(PixelArray),
    /// A tabular payload.
    Table(Table),
}

impl Extra {
    /// Short description for structural summaries.
    pub fn describe(&self) -> String {
        match self {
            Extra::Array(a) => format!("array {:?} {}", a.shape(), a.type_name()),
            Extra::Table(t) => format!("table ({} x {})", t.nrows(), t.ncols()),
        }
    }
}

// ── Subunit ──

/// One science subunit: the pixel data plus everything that travels with
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct NdData {
    /// Per-subunit header.
    pub header: Header,
    /// The science pixels.
    pub data: PixelArray,
    /// Per-pixel variance, same shape as `data`.
    variance: Option<PixelArray>,
    /// Bit-flag quality mask, same shape as `data`.
    mask: Option<ArrayD<u16>>,
    /// Opaque world-coordinate mapping.
    pub wcs: Option<Wcs>,
    /// Named auxiliary payloads scoped to this subunit.
    extras: IndexMap<String, Extra>,
}

impl NdData {
    /// Create a subunit from pixel data with an empty header.
    pub fn new(data: PixelArray) -> Self {
        NdData {
            header: Header::new(),
            data,
            variance: None,
            mask: None,
            wcs: None,
            extras: IndexMap::new(),
        }
    }

    /// Create a subunit from pixel data and its header.
    pub fn with_header(data: PixelArray, header: Header) -> Self {
        NdData {
            header,
            ..NdData::new(data)
        }
    }

    /// Shape of the science pixels, slowest axis first.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// The variance plane, if attached.
    pub fn variance(&self) -> Option<&PixelArray> {
        self.variance.as_ref()
    }

    /// Attach a variance plane. The shape must match the science pixels.
    pub fn set_variance(&mut self, variance: PixelArray) -> Result<()> {
        if variance.shape() != self.data.shape() {
            return Err(Error::InvalidOperation(
                "variance shape does not match the science pixels",
            ));
        }
        self.variance = Some(variance);
        Ok(())
    }

    /// The quality mask, if attached.
    pub fn mask(&self) -> Option<&ArrayD<u16>> {
        self.mask.as_ref()
    }

    /// Attach a quality mask. The shape must match the science pixels.
    pub fn set_mask(&mut self, mask: ArrayD<u16>) -> Result<()> {
        if mask.shape() != self.data.shape() {
            return Err(Error::InvalidOperation(
                "mask shape does not match the science pixels",
            ));
        }
        self.mask = Some(mask);
        Ok(())
    }

    /// OR further quality bits into the mask, creating it if absent.
    pub fn or_mask(&mut self, bits: &ArrayD<u16>) -> Result<()> {
        if bits.shape() != self.data.shape() {
            return Err(Error::InvalidOperation(
                "mask shape does not match the science pixels",
            ));
        }
        match &mut self.mask {
            Some(mask) => *mask |= bits,
            None => self.mask = Some(bits.clone()),
        }
        Ok(())
    }

    /// Attach or replace a named auxiliary payload.
    pub fn set_extra(&mut self, name: &str, payload: Extra) {
        self.extras.insert(String::from(name), payload);
    }

    /// Look up an auxiliary payload by name.
    pub fn extra(&self, name: &str) -> Option<&Extra> {
        self.extras.get(name)
    }

    /// Names of attached auxiliary payloads, in attachment order.
    pub fn extra_names(&self) -> impl Iterator<Item = &str> {
        self.extras.keys().map(String::as_str)
    }

    /// Iterate over `(name, payload)` pairs in attachment order.
    pub fn extras(&self) -> impl Iterator<Item = (&str, &Extra)> {
        self.extras.iter().map(|(n, e)| (n.as_str(), e))
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn pixels(rows: usize, cols: usize) -> PixelArray {
        let a = Array2::from_shape_fn((rows, cols), |(y, x)| (y * cols + x) as f32);
        PixelArray::Float32(a.into_dyn())
    }

    #[test]
    fn bitpix_mapping() {
        assert_eq!(pixels(2, 3).bitpix(), -32);
        let a = ArrayD::<i16>::zeros(IxDyn(&[4]));
        assert_eq!(PixelArray::Int16(a).bitpix(), 16);
    }

    #[test]
    fn be_bytes_round_trip_i16() {
        let a = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1i16, -2, 300, -400]).unwrap();
        let arr = PixelArray::Int16(a);
        let bytes = arr.to_be_bytes();
        assert_eq!(bytes.len(), 8);
        let back = PixelArray::from_be_bytes(16, &[2, 2], &bytes).unwrap();
        assert_eq!(back, arr);
    }

    #[test]
    fn be_bytes_round_trip_f64() {
        let a = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.5f64, -2.25, 0.0]).unwrap();
        let arr = PixelArray::Float64(a);
        let back = PixelArray::from_be_bytes(-64, &[3], &arr.to_be_bytes()).unwrap();
        assert_eq!(back, arr);
    }

    #[test]
    fn from_be_bytes_truncated_input() {
        let err = PixelArray::from_be_bytes(32, &[4], &[0u8; 10]);
        assert!(matches!(err, Err(Error::UnexpectedEof)));
    }

    #[test]
    fn from_be_bytes_bad_bitpix() {
        let err = PixelArray::from_be_bytes(12, &[1], &[0u8; 16]);
        assert!(matches!(err, Err(Error::InvalidBitpix(12))));
    }

    #[test]
    fn variance_shape_checked() {
        let mut nd = NdData::new(pixels(2, 3));
        assert!(nd.set_variance(pixels(3, 2)).is_err());
        assert!(nd.set_variance(pixels(2, 3)).is_ok());
        assert!(nd.variance().is_some());
    }

    #[test]
    fn masks_combine_with_or() {
        let mut nd = NdData::new(pixels(1, 2));
        let sat = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![DqBits::SATURATED.bits(), 0])
            .unwrap();
        let bad = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![DqBits::BAD_PIXEL.bits(), 0])
            .unwrap();
        nd.or_mask(&sat).unwrap();
        nd.or_mask(&bad).unwrap();
        let mask = nd.mask().unwrap();
        let combined = DqBits::from_bits_truncate(mask[[0, 0]]);
        assert!(combined.contains(DqBits::SATURATED));
        assert!(combined.contains(DqBits::BAD_PIXEL));
        assert_eq!(mask[[0, 1]], 0);
    }

    #[test]
    fn mask_shape_checked() {
        let mut nd = NdData::new(pixels(2, 2));
        let wrong = ArrayD::<u16>::zeros(IxDyn(&[3, 3]));
        assert!(nd.set_mask(wrong).is_err());
    }

    #[test]
    fn extras_keep_attachment_order() {
        let mut nd = NdData::new(pixels(1, 1));
        nd.set_extra("OBJCAT", Extra::Table(Table::new()));
        nd.set_extra("PROFILE", Extra::Array(pixels(1, 4)));
        let names: Vec<&str> = nd.extra_names().collect();
        assert_eq!(names, vec!["OBJCAT", "PROFILE"]);
        assert!(nd.extra("OBJCAT").is_some());
        assert!(nd.extra("NOPE").is_none());
    }

    #[test]
    fn flat_element_access() {
        let p = pixels(2, 2);
        assert_eq!(p.get_float(0), Some(0.0));
        assert_eq!(p.get_float(3), Some(3.0));
        assert!(p.get_float(4).is_none());
    }
}
