//! Zero-copy reading and writing of safetensors containers.
//!
//! A container is a little-endian `u64` header length, a JSON header
//! describing every tensor's dtype, shape and byte range, and the
//! concatenated tensor bytes. Decoding validates every offset before any of
//! it is trusted and hands out [`TensorView`]s that borrow the input.
//!
//! ```
//! use safeview::{DType, SafeTensors, TensorSource, TensorView, serialize};
//!
//! let values: Vec<u8> = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0]
//!     .iter()
//!     .flat_map(|v| v.to_le_bytes())
//!     .collect();
//! let view = TensorView::new(DType::F32, vec![1, 2, 3], &values)?;
//! let bytes = serialize([("foo", view)], None)?;
//! assert_eq!(bytes.len(), 96);
//!
//! let loaded = SafeTensors::deserialize(&bytes)?;
//! let foo = loaded.tensor("foo")?;
//! assert_eq!(foo.shape(), &[1, 2, 3]);
//! assert_eq!(foo.to_vec::<f32>()?[5], 5.0);
//! # Ok::<(), safeview::Error>(())
//! ```

pub mod error;
#[cfg(feature = "mmap")]
pub mod mapped;
pub mod metadata;
pub mod models;
pub mod reader;
pub mod utils;
pub mod view;
pub mod writer;

pub use error::Error;
#[cfg(feature = "mmap")]
pub use mapped::MappedFile;
pub use metadata::Metadata;
pub use models::{DType, HEADER_ALIGNMENT, MAX_HEADER_SIZE, METADATA_KEY, TensorInfo};
pub use reader::{SafeTensors, TensorSource, read_metadata};
pub use view::{TensorElement, TensorView};
pub use writer::{serialize, serialize_to_file, serialize_to_writer};
