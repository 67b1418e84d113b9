// ============================================================================
// TRANSFER POOL — reuse staging buffers instead of allocating every frame
// ============================================================================

use std::collections::HashMap;

/// Element type of a staged tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    F32,
}

impl ElementType {
    pub fn size_bytes(&self) -> usize {
        match self {
            ElementType::U8 => 1,
            ElementType::F32 => 4,
        }
    }
}

/// Key for pooled buffers: (shape, element type).
type PoolKey = (Vec<usize>, ElementType);

/// Staging buffers keyed by tensor shape and element type.
///
/// A render call copies its output through the buffer matching the output
/// shape, so steady-state dragging allocates nothing here. Entries are never
/// evicted: the set of shapes a process sees is small and fixed.
pub struct TransferPool {
    buffers: HashMap<PoolKey, Vec<u8>>,
}

impl TransferPool {
    pub fn new() -> Self {
        Self { buffers: HashMap::new() }
    }

    /// Borrow the staging buffer for `shape`/`dtype`, allocating it on first
    /// use. The returned slice holds exactly `numel * size_bytes` bytes.
    pub fn staging(&mut self, shape: &[usize], dtype: ElementType) -> &mut [u8] {
        let len = shape.iter().product::<usize>() * dtype.size_bytes();
        let buf = self
            .buffers
            .entry((shape.to_vec(), dtype))
            .or_insert_with(|| vec![0u8; len]);
        &mut buf[..]
    }

    /// Number of distinct buffers currently held.
    pub fn pooled_count(&self) -> usize {
        self.buffers.len()
    }

    /// Memory held by pooled buffers (bytes).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.buffers.values().map(|b| b.len()).sum()
    }
}

impl Default for TransferPool {
    fn default() -> Self {
        Self::new()
    }
}
