use crate::utils::ceil_log2;

/// One DRAM-cache line's directory state. `nvm_addr` shadows the full
/// line-aligned backing address of the resident line so a victim write-back
/// can be synthesized without decoding the tag again.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagEntry {
    pub tag: u64,
    pub valid: bool,
    pub dirty: bool,
    pub nvm_addr: u64,
}

/// Outcome of probing the directory for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOutcome {
    Hit,
    CleanMiss,
    DirtyMiss,
}

/// Line evicted by an install: where its data lives in the backing tier and
/// whether it still needs a write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub addr: u64,
    pub dirty: bool,
}

/// Direct-mapped tag store for the DRAM tier used as a cache in front of
/// NVM. One entry per cache line; index and tag are plain address bit
/// slices. Invariant: dirty implies valid.
#[derive(Debug)]
pub struct TagStore {
    entries: Vec<TagEntry>,
    line_bits: u32,
    index_bits: u32,
}

impl TagStore {
    pub fn new(cache_bytes: u64, line_bytes: u64) -> Self {
        assert!(line_bytes.is_power_of_two(), "line size must be a power of two");
        assert!(cache_bytes >= line_bytes && cache_bytes % line_bytes == 0);
        let num_entries = (cache_bytes / line_bytes) as usize;
        assert!(num_entries.is_power_of_two(), "cache must hold a power-of-two line count");
        Self {
            entries: vec![TagEntry::default(); num_entries],
            line_bits: ceil_log2(line_bytes),
            index_bits: ceil_log2(num_entries as u64),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn index_of(&self, addr: u64) -> usize {
        ((addr >> self.line_bits) & ((1 << self.index_bits) - 1)) as usize
    }

    pub fn tag_of(&self, addr: u64) -> u64 {
        addr >> (self.line_bits + self.index_bits)
    }

    pub fn line_align(&self, addr: u64) -> u64 {
        addr & !((1u64 << self.line_bits) - 1)
    }

    pub fn entry(&self, addr: u64) -> &TagEntry {
        &self.entries[self.index_of(addr)]
    }

    pub fn classify(&self, addr: u64) -> TagOutcome {
        let entry = &self.entries[self.index_of(addr)];
        if !entry.valid {
            // invalid entries count as clean misses; there is nothing to evict
            TagOutcome::CleanMiss
        } else if entry.tag == self.tag_of(addr) {
            TagOutcome::Hit
        } else if entry.dirty {
            TagOutcome::DirtyMiss
        } else {
            TagOutcome::CleanMiss
        }
    }

    /// Install `addr`'s line at its index, returning the displaced resident
    /// line if there was one. Tag state changes here, at fill creation, so
    /// later packets aimed at the same index see the new occupant while the
    /// fill is still in flight (first writer wins on a collision).
    pub fn install(&mut self, addr: u64, dirty: bool) -> Option<Victim> {
        let tag = self.tag_of(addr);
        let line = self.line_align(addr);
        let idx = self.index_of(addr);
        let entry = &mut self.entries[idx];
        let victim = if entry.valid && entry.tag != tag {
            Some(Victim {
                addr: entry.nvm_addr,
                dirty: entry.dirty,
            })
        } else {
            None
        };
        let was_dirty = entry.valid && entry.tag == tag && entry.dirty;
        entry.tag = tag;
        entry.valid = true;
        // a re-install of the resident line never cleans it
        entry.dirty = dirty || was_dirty;
        entry.nvm_addr = line;
        victim
    }
}
