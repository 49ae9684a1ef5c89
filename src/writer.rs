//! Encoding of safetensors containers.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use crate::error::{Error, IoContext};
use crate::metadata::Metadata;
use crate::models::{HEADER_ALIGNMENT, N_LEN, TensorInfo};
use crate::utils::align_offset_to;
use crate::view::TensorView;

/// Header bytes plus the views to emit after it, in canonical order.
struct Prepared<'a, 'data> {
    header: Vec<u8>,
    tensors: Vec<(&'a str, &'a TensorView<'data>)>,
}

/// Orders tensors canonically, assigns contiguous offsets and builds the
/// space-padded header. Nothing is written if this fails.
fn prepare<'a, 'data>(
    mut tensors: Vec<(&'a str, &'a TensorView<'data>)>,
    attributes: Option<&BTreeMap<String, String>>,
) -> Result<Prepared<'a, 'data>, Error> {
    // Widest dtypes first keeps every tensor aligned to its element size.
    tensors.sort_by(|(l_name, l), (r_name, r)| {
        r.dtype()
            .byte_size()
            .cmp(&l.dtype().byte_size())
            .then_with(|| l_name.cmp(r_name))
    });

    let mut offset = 0u64;
    let mut infos = Vec::with_capacity(tensors.len());
    for (name, view) in &tensors {
        let end = offset + view.data_len() as u64;
        infos.push((
            name.to_string(),
            TensorInfo {
                dtype: view.dtype(),
                shape: view.shape().to_vec(),
                data_offsets: [offset, end],
            },
        ));
        offset = end;
    }

    let metadata = Metadata::new(attributes.cloned(), infos)?;
    metadata.validate()?;

    let mut header = metadata.to_json()?;
    let (_, padding) = align_offset_to(header.len() as u64, HEADER_ALIGNMENT);
    header.resize(header.len() + padding as usize, b' ');

    Ok(Prepared { header, tensors })
}

/// Serializes tensors into a new buffer.
///
/// `tensors` yields `(name, view)` pairs in any order; names must be unique.
/// Accepts e.g. `Vec<(String, TensorView)>` or `&HashMap<String, TensorView>`.
pub fn serialize<'data, I, S, V>(
    tensors: I,
    attributes: Option<&BTreeMap<String, String>>,
) -> Result<Vec<u8>, Error>
where
    I: IntoIterator<Item = (S, V)>,
    S: AsRef<str>,
    V: Borrow<TensorView<'data>>,
{
    let mut out = Vec::new();
    serialize_to_writer(tensors, attributes, &mut out)?;
    Ok(out)
}

/// Serializes tensors into `writer`, returning the number of bytes written.
///
/// Layout: little-endian u64 header length, header padded with spaces to a
/// multiple of 8, then every tensor's bytes in header order.
pub fn serialize_to_writer<'data, I, S, V, W>(
    tensors: I,
    attributes: Option<&BTreeMap<String, String>>,
    mut writer: W,
) -> Result<u64, Error>
where
    I: IntoIterator<Item = (S, V)>,
    S: AsRef<str>,
    V: Borrow<TensorView<'data>>,
    W: Write,
{
    let items: Vec<(S, V)> = tensors.into_iter().collect();
    let entries = items
        .iter()
        .map(|(name, view)| (name.as_ref(), <V as Borrow<TensorView<'data>>>::borrow(view)))
        .collect();
    let Prepared { header, tensors } = prepare(entries, attributes)?;

    writer
        .write_u64::<LittleEndian>(header.len() as u64)
        .context("writing header length")?;
    writer.write_all(&header).context("writing header")?;
    let mut written = (N_LEN + header.len()) as u64;
    for (name, view) in &tensors {
        writer
            .write_all(view.data())
            .with_context(|| format!("writing tensor '{name}'"))?;
        written += view.data_len() as u64;
    }
    writer.flush().context("flushing output")?;

    debug!(
        tensors = tensors.len(),
        header_len = header.len(),
        bytes = written,
        "wrote safetensors"
    );
    Ok(written)
}

/// Serializes tensors into a new file at `path`.
pub fn serialize_to_file<'data, I, S, V>(
    tensors: I,
    attributes: Option<&BTreeMap<String, String>>,
    path: impl AsRef<Path>,
) -> Result<u64, Error>
where
    I: IntoIterator<Item = (S, V)>,
    S: AsRef<str>,
    V: Borrow<TensorView<'data>>,
{
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serialize_to_writer(
        tensors,
        attributes,
        BufWriter::with_capacity(256 * 1024, file),
    )
}
