//! Zero-copy tensor views and typed element access.

use half::{bf16, f16};

use crate::error::Error;
use crate::models::DType;
use crate::utils::byte_size;

/// Rust element types that map one-to-one onto a [`DType`].
pub trait TensorElement: bytemuck::Pod {
    const DTYPE: DType;
}

macro_rules! impl_tensor_element {
    ($($t:ty => $d:expr),* $(,)?) => {
        $(impl TensorElement for $t {
            const DTYPE: DType = $d;
        })*
    };
}

impl_tensor_element!(
    f64 => DType::F64,
    f32 => DType::F32,
    f16 => DType::F16,
    bf16 => DType::BF16,
    i64 => DType::I64,
    i32 => DType::I32,
    i16 => DType::I16,
    i8 => DType::I8,
    u64 => DType::U64,
    u32 => DType::U32,
    u16 => DType::U16,
    u8 => DType::U8,
);

/// A read-only view of one tensor inside a shared byte buffer.
///
/// The view borrows its bytes; it never owns or copies them. Construction
/// checks that the slice length matches `shape` and `dtype` exactly, so every
/// `TensorView` in existence is consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorView<'data> {
    dtype: DType,
    shape: Vec<u64>,
    data: &'data [u8],
}

impl<'data> TensorView<'data> {
    /// Creates a view, failing with `ShapeMismatch` if `data` is not exactly
    /// `product(shape) * width(dtype)` bytes long.
    pub fn new(dtype: DType, shape: Vec<u64>, data: &'data [u8]) -> Result<Self, Error> {
        let expected = byte_size(&shape, dtype)?;
        if expected != data.len() as u64 {
            return Err(Error::ShapeMismatch {
                dtype,
                shape,
                len: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Builds a view from header entries that were already validated.
    pub(crate) fn from_validated(dtype: DType, shape: &[u64], data: &'data [u8]) -> Self {
        debug_assert_eq!(byte_size(shape, dtype).ok(), Some(data.len() as u64));
        Self {
            dtype,
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    /// Raw little-endian bytes of the tensor.
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Reinterprets the bytes as `T` without copying.
    ///
    /// Payload bytes are little-endian and are read in native order, so typed
    /// access is only available on little-endian hosts; big-endian hosts get
    /// `DataConversion` and must decode [`TensorView::data`] themselves.
    ///
    /// Fails if `T` does not match the dtype, or if the bytes are not aligned
    /// for `T` (which can happen for buffers not produced by this crate).
    pub fn as_slice<T: TensorElement>(&self) -> Result<&'data [T], Error> {
        self.check_type::<T>()?;
        bytemuck::try_cast_slice(self.data).map_err(|e| {
            Error::DataConversion(format!(
                "cannot view {} bytes as {}: {e}",
                self.data.len(),
                T::DTYPE
            ))
        })
    }

    /// Copies the elements out as `T`, regardless of alignment.
    ///
    /// Like [`TensorView::as_slice`], requires a little-endian host.
    pub fn to_vec<T: TensorElement>(&self) -> Result<Vec<T>, Error> {
        self.check_type::<T>()?;
        Ok(bytemuck::pod_collect_to_vec(self.data))
    }

    fn check_type<T: TensorElement>(&self) -> Result<(), Error> {
        if cfg!(target_endian = "big") && T::DTYPE.byte_size() > 1 {
            return Err(Error::DataConversion(format!(
                "typed access to little-endian {} data needs a little-endian host",
                T::DTYPE
            )));
        }
        if T::DTYPE != self.dtype {
            return Err(Error::TypeMismatch {
                expected: self.dtype.to_string(),
                found: std::any::type_name::<T>().to_string(),
                context: "tensor view".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_exact_length() {
        let data = [0u8; 24];
        let view = TensorView::new(DType::F32, vec![1, 2, 3], &data).unwrap();
        assert_eq!(view.dtype(), DType::F32);
        assert_eq!(view.shape(), &[1, 2, 3]);
        assert_eq!(view.data().as_ptr(), data.as_ptr());
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let data = [0u8; 25];
        match TensorView::new(DType::F32, vec![1, 2, 3], &data) {
            Err(Error::ShapeMismatch { dtype, len, .. }) => {
                assert_eq!(dtype, DType::F32);
                assert_eq!(len, 25);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
        assert!(TensorView::new(DType::F32, vec![1, 2, 3], &data[..23]).is_err());
    }

    #[test]
    fn test_scalar_and_zero_sized() {
        let data = [1u8, 0, 0, 0];
        assert!(TensorView::new(DType::I32, vec![], &data).is_ok());
        assert!(TensorView::new(DType::I32, vec![], &[]).is_err());
        assert!(TensorView::new(DType::I32, vec![2, 0], &[]).is_ok());
    }

    #[test]
    fn test_overflowing_shape() {
        assert!(matches!(
            TensorView::new(DType::U8, vec![u64::MAX, 2], &[]),
            Err(Error::Overflow { .. })
        ));
    }

    #[test]
    fn test_typed_access() {
        let values = [1.0f32, 2.5, -3.0, 4.25];
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let view = TensorView::new(DType::F32, vec![2, 2], bytes).unwrap();
        assert_eq!(view.as_slice::<f32>().unwrap(), &values);
        assert_eq!(view.to_vec::<f32>().unwrap(), values.to_vec());
        match view.as_slice::<i32>() {
            Err(Error::TypeMismatch { expected, .. }) => assert_eq!(expected, "F32"),
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_typed_access_reads_little_endian() {
        let raw = [0x01u8, 0x02, 0x03, 0x04, 0x00, 0x00, 0x80, 0x3f];
        let view = TensorView::new(DType::U32, vec![2], &raw).unwrap();
        assert_eq!(view.to_vec::<u32>().unwrap(), [0x0403_0201, 0x3f80_0000]);
        let view = TensorView::new(DType::F32, vec![2], &raw).unwrap();
        assert_eq!(view.to_vec::<f32>().unwrap()[1], 1.0);
    }

    #[test]
    #[cfg(target_endian = "big")]
    fn test_typed_access_rejected_on_big_endian() {
        let raw = [0u8; 8];
        let view = TensorView::new(DType::U32, vec![2], &raw).unwrap();
        assert!(matches!(view.to_vec::<u32>(), Err(Error::DataConversion(_))));
        let bytes = TensorView::new(DType::U8, vec![8], &raw).unwrap();
        assert_eq!(bytes.as_slice::<u8>().unwrap(), &raw);
    }

    #[test]
    fn test_unaligned_typed_access() {
        let values = [7u32, 8, 9];
        let mut raw = vec![0u8];
        raw.extend_from_slice(bytemuck::cast_slice(&values));
        let view = TensorView::new(DType::U32, vec![3], &raw[1..]).unwrap();
        assert!(matches!(view.as_slice::<u32>(), Err(Error::DataConversion(_))));
        assert_eq!(view.to_vec::<u32>().unwrap(), values.to_vec());
    }
}
