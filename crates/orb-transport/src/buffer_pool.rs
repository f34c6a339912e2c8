//! Byte buffers pooled by power-of-two size class

use bytes::BytesMut;
use parking_lot::Mutex;

const MIN_CLASS_SHIFT: u32 = 8;
const MAX_CLASS_SHIFT: u32 = 20;

/// Buffers from 256 bytes to 1 MiB; larger requests bypass the pool
pub struct ByteBufferPool {
    classes: Vec<Mutex<Vec<BytesMut>>>,
    max_per_class: usize,
}

impl Default for ByteBufferPool {
    fn default() -> Self {
        Self::new(32)
    }
}

impl ByteBufferPool {
    pub fn new(max_per_class: usize) -> Self {
        let classes = (MIN_CLASS_SHIFT..=MAX_CLASS_SHIFT)
            .map(|_| Mutex::new(Vec::new()))
            .collect();
        Self {
            classes,
            max_per_class,
        }
    }

    /// Size class that can hold `size` bytes
    pub fn size_class(size: usize) -> usize {
        size.max(1 << MIN_CLASS_SHIFT).next_power_of_two()
    }

    fn slot(class: usize) -> Option<usize> {
        if !class.is_power_of_two() {
            return None;
        }
        let shift = class.trailing_zeros();
        (MIN_CLASS_SHIFT..=MAX_CLASS_SHIFT)
            .contains(&shift)
            .then(|| (shift - MIN_CLASS_SHIFT) as usize)
    }

    /// An empty buffer with capacity for at least `size` bytes
    pub fn acquire(&self, size: usize) -> BytesMut {
        let class = Self::size_class(size);
        if let Some(slot) = Self::slot(class) {
            if let Some(buf) = self.classes[slot].lock().pop() {
                return buf;
            }
        }
        BytesMut::with_capacity(class)
    }

    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let capacity = buf.capacity();
        if capacity < (1 << MIN_CLASS_SHIFT) {
            return;
        }
        // Largest class the buffer still satisfies
        let class = 1usize << (usize::BITS - 1 - capacity.leading_zeros());
        if let Some(slot) = Self::slot(class) {
            let mut free = self.classes[slot].lock();
            if free.len() < self.max_per_class {
                free.push(buf);
            }
        }
    }

    /// Buffers currently pooled for `class`
    pub fn pooled(&self, class: usize) -> usize {
        Self::slot(class)
            .map(|slot| self.classes[slot].lock().len())
            .unwrap_or(0)
    }
}
