//! Node tree serialization.
//!
//! `Array::write` emits a node and, when deep, every node it references,
//! children first. Refs in the written parent are replaced by the positions
//! the writer returned for the children, so the output is a self-contained
//! image that can be attached read-only.
//!
//! ```text
//! +------------+---------+---------+-----+---------+------------+
//! | header 24B | node    | node    | ... | root    | footer 24B |
//! +------------+---------+---------+-----+---------+------------+
//!              ^ first position = 24
//! ```

use std::path::Path;

use bytes::{BufMut, BytesMut};
use strata_alloc::{frame_image, FileHeader};
use strata_common::{is_ref_value, to_ref, Ref, Result};
use tracing::debug;

use crate::array::header::{calc_byte_size, NodeHeader};
use crate::array::width::setter_for;
use crate::array::{bit_width, Array, WidthType, HEADER_SIZE};

/// Sink for serialized nodes.
pub trait ArrayWriter {
    /// Appends one complete node (header included) and returns its
    /// position. Positions are 8-aligned.
    fn write_array(&mut self, node: &[u8]) -> Result<Ref>;
}

/// Collects nodes in memory, positioned after the file header.
#[derive(Debug, Default)]
pub struct MemoryArrayWriter {
    buf: BytesMut,
}

impl MemoryArrayWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position the next node will be written at.
    pub fn position(&self) -> Ref {
        FileHeader::SIZE + self.buf.len()
    }

    /// Node bytes written so far.
    pub fn nodes(&self) -> &[u8] {
        &self.buf
    }

    /// Frames the nodes into a complete file image rooted at `top_ref`.
    pub fn into_image(self, top_ref: Ref) -> Vec<u8> {
        frame_image(&self.buf, top_ref)
    }
}

impl ArrayWriter for MemoryArrayWriter {
    fn write_array(&mut self, node: &[u8]) -> Result<Ref> {
        let pos = self.position();
        self.buf.extend_from_slice(node);
        let padding = node.len().next_multiple_of(8) - node.len();
        self.buf.put_bytes(0, padding);
        Ok(pos)
    }
}

impl Array {
    /// Writes this node, and with `deep` every subtree it references.
    ///
    /// Returns the node's position in the writer.
    pub fn write(&self, writer: &mut dyn ArrayWriter, deep: bool) -> Result<Ref> {
        if !deep || !self.has_refs() {
            let used = self.byte_size();
            let mut node = vec![0u8; used];
            // SAFETY: the node covers byte_size bytes from its header.
            unsafe { std::ptr::copy_nonoverlapping(self.header_ptr(), node.as_mut_ptr(), used) };
            let mut header = NodeHeader::from_bytes(&node);
            header.capacity = used;
            node[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
            return writer.write_array(&node);
        }

        let mut values = Vec::with_capacity(self.size());
        for i in 0..self.size() {
            let v = self.get(i);
            if is_ref_value(v) {
                let child = Array::from_ref(self.get_alloc(), to_ref(v));
                values.push(child.write(writer, deep)? as i64);
            } else {
                values.push(v);
            }
        }
        let node = encode_node(self.is_inner_bptree_node(), self.context_flag(), &values);
        writer.write_array(&node)
    }
}

/// Writes a `has_refs` node whose slots are the already written `children`.
pub fn write_ref_node(writer: &mut dyn ArrayWriter, children: &[Ref]) -> Result<Ref> {
    let values: Vec<i64> = children.iter().map(|&r| r as i64).collect();
    writer.write_array(&encode_node(false, false, &values))
}

/// Packs `values` at their minimum width into a `has_refs` node.
fn encode_node(is_inner_bptree_node: bool, context_flag: bool, values: &[i64]) -> Vec<u8> {
    let width = values.iter().map(|&v| bit_width(v)).max().unwrap_or(0);
    let used = calc_byte_size(values.len(), width, WidthType::Bits);
    let header = NodeHeader {
        is_inner_bptree_node,
        has_refs: true,
        context_flag,
        wtype: WidthType::Bits,
        width,
        size: values.len(),
        capacity: used,
    };
    let mut node = vec![0u8; used];
    node[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    let set = setter_for(width);
    let data = node[HEADER_SIZE..].as_mut_ptr();
    for (i, &v) in values.iter().enumerate() {
        // SAFETY: the buffer holds `values.len()` elements at `width`.
        unsafe { set(data, i, v) };
    }
    node
}

/// Writes the tree rooted at `root` into a single-root file at `path`.
pub fn write_to_file(path: impl AsRef<Path>, root: &Array) -> Result<()> {
    let mut writer = MemoryArrayWriter::new();
    let top_ref = root.write(&mut writer, true)?;
    let image = writer.into_image(top_ref);
    std::fs::write(path.as_ref(), &image)?;
    debug!(path = %path.as_ref().display(), top_ref, bytes = image.len(), "wrote file");
    Ok(())
}
