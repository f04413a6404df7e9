//! Heap allocator for the region of RAM between the data block and the
//! stack bottom.
//!
//! Three singly linked lists of block descriptors track the region: `free`
//! (available ranges, ascending by address), `used` (handed-out ranges, in
//! insertion order) and `fresh` (the unused descriptor pool). The descriptors
//! live in a fixed-size host-side arena and link to each other by index, so
//! allocator metadata can never collide with guest data.
//!
//! Allocation is first-fit with two twists: a free block that touches the
//! current top of the heap may be resized in place to the requested size,
//! and a block larger than the request by at least the split threshold is
//! split, with the tail returned to the free list. Freeing re-inserts in
//! address order and then compacts, merging adjacent ranges and releasing
//! the swallowed descriptors.

const NIL: u32 = u32::MAX;

#[derive(Clone, Copy, Default, Debug)]
struct Block {
    next: u32,
    addr: u32,
    size: u32,
}

#[derive(Debug)]
pub struct Heap {
    blocks: Vec<Block>,
    free: u32,
    used: u32,
    fresh: u32,
    base: u32,
    top: u32,
    limit: u32,
    split_threshold: u32,
    align: u32,
}

impl Heap {
    /// Creates an allocator managing `[base, limit)` with `block_count`
    /// descriptors.
    pub fn new(base: u32, limit: u32, block_count: u32, split_threshold: u32, align: u32) -> Heap {
        debug_assert!(align.is_power_of_two());

        let mut blocks = vec![
            Block {
                next: NIL,
                addr: 0,
                size: 0,
            };
            block_count as usize
        ];
        for i in 0..block_count.saturating_sub(1) {
            blocks[i as usize].next = i + 1;
        }

        Heap {
            blocks,
            free: NIL,
            used: NIL,
            fresh: if block_count > 0 { 0 } else { NIL },
            base,
            top: base,
            limit,
            split_threshold,
            align,
        }
    }

    /// Total number of managed bytes.
    pub fn capacity(&self) -> u32 {
        self.limit - self.base
    }

    /// Allocates `size` bytes rounded up to the alignment. Returns the
    /// address, or 0 when the heap or the descriptor pool is exhausted.
    pub fn alloc(&mut self, size: u32) -> u32 {
        let size = (size + self.align - 1) & !(self.align - 1);

        let mut prev = NIL;
        let mut ptr = self.free;
        while ptr != NIL {
            let block = self.blocks[ptr as usize];
            let is_top = block.addr + block.size >= self.top
                && block.addr.checked_add(size).map_or(false, |e| e <= self.limit);

            if is_top || block.size >= size {
                self.detach_free(prev, ptr);
                self.blocks[ptr as usize].next = self.used;
                self.used = ptr;

                if is_top {
                    self.blocks[ptr as usize].size = size;
                    self.top = block.addr + size;
                } else if self.fresh != NIL {
                    let excess = block.size - size;
                    if excess >= self.split_threshold {
                        self.blocks[ptr as usize].size = size;
                        let split = self.fresh;
                        self.fresh = self.blocks[split as usize].next;
                        self.blocks[split as usize].addr = block.addr + size;
                        self.blocks[split as usize].size = excess;
                        self.insert_free(split);
                        self.compact();
                    }
                }
                return self.blocks[ptr as usize].addr;
            }

            prev = ptr;
            ptr = block.next;
        }

        // No fit; grow the top of the heap.
        let new_top = match self.top.checked_add(size) {
            Some(t) => t,
            None => return 0,
        };
        if self.fresh != NIL && new_top <= self.limit {
            let idx = self.fresh;
            self.fresh = self.blocks[idx as usize].next;
            self.blocks[idx as usize] = Block {
                next: self.used,
                addr: self.top,
                size,
            };
            self.used = idx;
            self.top = new_top;
            return self.blocks[idx as usize].addr;
        }
        0
    }

    /// Releases the allocation at `addr`. Returns false when `addr` is null
    /// or not a live allocation; neither case disturbs the heap.
    pub fn free(&mut self, addr: u32) -> bool {
        if addr == 0 {
            return false;
        }

        let mut prev = NIL;
        let mut ptr = self.used;
        while ptr != NIL {
            let block = self.blocks[ptr as usize];
            if block.addr == addr {
                if prev != NIL {
                    self.blocks[prev as usize].next = block.next;
                } else {
                    self.used = block.next;
                }
                self.insert_free(ptr);
                self.compact();
                return true;
            }
            prev = ptr;
            ptr = block.next;
        }
        false
    }

    fn detach_free(&mut self, prev: u32, ptr: u32) {
        let next = self.blocks[ptr as usize].next;
        if prev != NIL {
            self.blocks[prev as usize].next = next;
        } else {
            self.free = next;
        }
    }

    /// Inserts a block into the free list, keeping it sorted by address.
    fn insert_free(&mut self, idx: u32) {
        let addr = self.blocks[idx as usize].addr;
        let mut prev = NIL;
        let mut ptr = self.free;
        while ptr != NIL {
            if addr <= self.blocks[ptr as usize].addr {
                break;
            }
            prev = ptr;
            ptr = self.blocks[ptr as usize].next;
        }
        if prev != NIL {
            self.blocks[prev as usize].next = idx;
        } else {
            self.free = idx;
        }
        self.blocks[idx as usize].next = ptr;
    }

    /// Merges runs of address-adjacent free blocks, releasing the swallowed
    /// descriptors back into the fresh pool.
    fn compact(&mut self) {
        let mut ptr = self.free;
        while ptr != NIL {
            let mut prev = ptr;
            let mut scan = self.blocks[ptr as usize].next;
            while scan != NIL {
                let p = self.blocks[prev as usize];
                if p.addr + p.size != self.blocks[scan as usize].addr {
                    break;
                }
                prev = scan;
                scan = self.blocks[scan as usize].next;
            }
            if prev != ptr {
                let last = self.blocks[prev as usize];
                self.blocks[ptr as usize].size =
                    last.addr - self.blocks[ptr as usize].addr + last.size;
                let next = last.next;
                self.release(self.blocks[ptr as usize].next, next);
                self.blocks[ptr as usize].next = next;
            }
            ptr = self.blocks[ptr as usize].next;
        }
    }

    /// Returns the descriptors in `[scan, to)` to the fresh pool.
    fn release(&mut self, mut scan: u32, to: u32) {
        while scan != to {
            let next = self.blocks[scan as usize].next;
            self.blocks[scan as usize] = Block {
                next: self.fresh,
                addr: 0,
                size: 0,
            };
            self.fresh = scan;
            scan = next;
        }
    }

    fn collect(&self, mut head: u32) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        while head != NIL {
            let block = self.blocks[head as usize];
            out.push((block.addr, block.size));
            head = block.next;
        }
        out
    }

    /// `(addr, size)` pairs of the free list, in list order.
    pub fn free_blocks(&self) -> Vec<(u32, u32)> {
        self.collect(self.free)
    }

    /// `(addr, size)` pairs of the used list, in list order.
    pub fn used_blocks(&self) -> Vec<(u32, u32)> {
        self.collect(self.used)
    }
}

#[cfg(test)]
mod test;
