use std::collections::HashMap;

// a sparse line-granular byte store that reads back zeroes for anything
// never written; doubles as the reference model in the top-level checker
#[derive(Debug, Default)]
pub struct SparseMem {
    lines: HashMap<u64, Box<[u8; Self::LINE]>>,
}

impl SparseMem {
    pub const LINE: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, addr: u64, size: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(size as usize);
        for a in addr..addr + size as u64 {
            let line = a & !(Self::LINE as u64 - 1);
            let off = (a - line) as usize;
            out.push(self.lines.get(&line).map_or(0, |l| l[off]));
        }
        out
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            let a = addr + i as u64;
            let line = a & !(Self::LINE as u64 - 1);
            let off = (a - line) as usize;
            let entry = self
                .lines
                .entry(line)
                .or_insert_with(|| Box::new([0u8; Self::LINE]));
            entry[off] = *byte;
        }
    }

    pub fn reset(&mut self) {
        self.lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SparseMem;

    #[test]
    fn unwritten_memory_reads_zero() {
        let mem = SparseMem::new();
        assert_eq!(mem.read(0x1000, 4), vec![0, 0, 0, 0]);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut mem = SparseMem::new();
        mem.write(0x40, &[1, 2, 3, 4]);
        assert_eq!(mem.read(0x40, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn writes_spanning_a_line_boundary() {
        let mut mem = SparseMem::new();
        let data: Vec<u8> = (0..128).collect();
        mem.write(0x20, &data);
        assert_eq!(mem.read(0x20, 128), data);
        assert_eq!(mem.read(0x5f, 2), vec![63, 64]);
    }

    #[test]
    fn partial_overwrite_keeps_neighbors() {
        let mut mem = SparseMem::new();
        mem.write(0, &[0xaa; 8]);
        mem.write(2, &[0xbb; 2]);
        assert_eq!(mem.read(0, 8), vec![0xaa, 0xaa, 0xbb, 0xbb, 0xaa, 0xaa, 0xaa, 0xaa]);
    }
}
