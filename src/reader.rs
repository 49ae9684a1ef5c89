//! Decoding of safetensors containers from a buffer or a stream.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::error::{Error, IoContext};
use crate::metadata::Metadata;
use crate::models::{MAX_HEADER_SIZE, N_LEN, TensorInfo};
use crate::utils::read_full;
use crate::view::TensorView;

/// Read access shared by every decoded container.
///
/// Views returned here borrow the container, so the backing storage (buffer,
/// owned copies or memory map) cannot be released while any view is alive.
pub trait TensorSource {
    /// Parsed header, entries in payload order.
    fn metadata(&self) -> &Metadata;

    /// Payload bytes of the tensor at `index` in payload order.
    fn tensor_bytes(&self, index: usize) -> &[u8];

    fn len(&self) -> usize {
        self.metadata().len()
    }

    fn is_empty(&self) -> bool {
        self.metadata().is_empty()
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.metadata().names()
    }

    /// View of the tensor at `index` in payload order.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    fn view_at(&self, index: usize) -> TensorView<'_> {
        let (_, info) = &self.metadata().tensors()[index];
        TensorView::from_validated(info.dtype, &info.shape, self.tensor_bytes(index))
    }

    /// Looks up a tensor by name.
    fn tensor(&self, name: &str) -> Result<TensorView<'_>, Error> {
        let index = self
            .metadata()
            .position(name)
            .ok_or_else(|| Error::TensorNotFound(name.to_string()))?;
        Ok(self.view_at(index))
    }

    /// All tensors in payload order.
    fn tensors(&self) -> Vec<(&str, TensorView<'_>)> {
        self.metadata()
            .tensors()
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.as_str(), self.view_at(i)))
            .collect()
    }

    /// Re-encodes this container in canonical order.
    ///
    /// Returns the number of bytes written.
    fn write_to<W: io::Write>(&self, writer: W) -> Result<u64, Error> {
        crate::writer::serialize_to_writer(self.tensors(), self.metadata().attributes(), writer)
    }
}

/// Slices one tensor's bytes out of a validated payload.
pub(crate) fn slice_payload<'a>(payload: &'a [u8], info: &TensorInfo) -> &'a [u8] {
    // Validation tied every end offset to the payload length, so both fit in usize.
    &payload[info.start() as usize..info.end() as usize]
}

fn check_header_len(n: u64) -> Result<usize, Error> {
    if n > MAX_HEADER_SIZE {
        return Err(Error::HeaderTooLarge {
            size: n,
            limit: MAX_HEADER_SIZE,
        });
    }
    Ok(n as usize)
}

/// Parses the header of a complete container held in `buffer`.
///
/// Returns the header length (without the 8-byte prefix) and the validated
/// metadata. Fails unless the buffer is exactly prefix + header + payload.
pub fn read_metadata(buffer: &[u8]) -> Result<(usize, Metadata), Error> {
    let buffer_len = buffer.len();
    if buffer_len < N_LEN {
        return Err(Error::TooSmall { len: buffer_len });
    }
    let header_len = check_header_len(LittleEndian::read_u64(&buffer[..N_LEN]))?;
    let stop = N_LEN + header_len;
    if stop > buffer_len {
        return Err(Error::TruncatedHeader {
            expected: stop as u64,
            found: buffer_len as u64,
        });
    }

    let metadata = Metadata::from_json(&buffer[N_LEN..stop])?;
    let expected = (stop as u64).saturating_add(metadata.data_len());
    if expected != buffer_len as u64 {
        return Err(Error::IncompleteBuffer {
            expected,
            found: buffer_len as u64,
        });
    }
    Ok((header_len, metadata))
}

enum Payload<'data> {
    /// The whole payload region of the caller's buffer.
    Borrowed(&'data [u8]),
    /// One buffer per tensor, in payload order.
    Owned(Vec<Vec<u8>>),
}

/// A decoded container.
///
/// Built either over a caller-owned buffer (zero copy, see
/// [`SafeTensors::deserialize`]) or from a stream (one allocation per tensor,
/// see [`SafeTensors::read_from`]). Both expose the same [`TensorSource`] API.
pub struct SafeTensors<'data> {
    metadata: Metadata,
    header_len: usize,
    payload: Payload<'data>,
}

impl<'data> SafeTensors<'data> {
    /// Parses a byte buffer holding an entire container without copying any
    /// tensor data.
    pub fn deserialize(buffer: &'data [u8]) -> Result<Self, Error> {
        let (header_len, metadata) = read_metadata(buffer)?;
        debug!(
            tensors = metadata.len(),
            header_len, "parsed safetensors buffer"
        );
        Ok(Self {
            metadata,
            header_len,
            payload: Payload::Borrowed(&buffer[N_LEN + header_len..]),
        })
    }

    /// Header length in bytes, padding included, prefix excluded.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// Whether tensor data aliases the caller's buffer.
    pub fn is_zero_copy(&self) -> bool {
        matches!(self.payload, Payload::Borrowed(_))
    }
}

impl SafeTensors<'static> {
    /// Decodes a container from a stream, copying each tensor into its own
    /// buffer.
    ///
    /// The stream must end exactly where the payload does.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, Error> {
        let mut prefix = [0u8; N_LEN];
        let got = read_full(&mut reader, &mut prefix).context("reading header length")?;
        if got < N_LEN {
            return Err(Error::TooSmall { len: got });
        }
        let header_len = check_header_len(LittleEndian::read_u64(&prefix))?;

        let mut header = Vec::new();
        reader
            .by_ref()
            .take(header_len as u64)
            .read_to_end(&mut header)
            .context("reading header")?;
        if header.len() < header_len {
            return Err(Error::TruncatedHeader {
                expected: (N_LEN + header_len) as u64,
                found: (N_LEN + header.len()) as u64,
            });
        }

        let metadata = Metadata::from_json(&header)?;
        let mut consumed = (N_LEN + header_len) as u64;
        let expected = consumed.saturating_add(metadata.data_len());

        let mut buffers = Vec::with_capacity(metadata.len());
        for (name, info) in metadata.tensors() {
            let len = info.end() - info.start();
            let mut buf = Vec::new();
            let read = reader
                .by_ref()
                .take(len)
                .read_to_end(&mut buf)
                .with_context(|| format!("reading tensor '{name}'"))?;
            consumed += read as u64;
            if (read as u64) < len {
                return Err(Error::IncompleteBuffer {
                    expected,
                    found: consumed,
                });
            }
            buffers.push(buf);
        }

        let trailing = io::copy(&mut reader, &mut io::sink()).context("reading past payload")?;
        if trailing > 0 {
            return Err(Error::IncompleteBuffer {
                expected,
                found: consumed + trailing,
            });
        }

        debug!(
            tensors = metadata.len(),
            bytes = consumed,
            "read safetensors stream"
        );
        Ok(Self {
            metadata,
            header_len,
            payload: Payload::Owned(buffers),
        })
    }

    /// Opens a file and decodes it through a buffered stream.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::read_from(BufReader::new(file))
    }
}

impl TensorSource for SafeTensors<'_> {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tensor_bytes(&self, index: usize) -> &[u8] {
        match &self.payload {
            Payload::Borrowed(data) => slice_payload(data, &self.metadata.tensors()[index].1),
            Payload::Owned(buffers) => &buffers[index],
        }
    }
}
