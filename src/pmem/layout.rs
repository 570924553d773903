//! Little-endian byte codec shared by the durable structures that live
//! inside a [`crate::pmem::Pool`]'s root bytes: the slab pool's page log
//! ([`crate::class_table`]) and the active-slab tracker's descriptor table
//! ([`crate::tracker`]). Both are encoded as plain byte offsets rather than
//! raw pointer casts, since a pool can be remapped at a different base
//! address on every reopen — a repeated struct-cast would need the mapping
//! to land at the same address every time, which `mmap` never promises.

pub fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

pub fn write_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

pub fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_roundtrips() {
        let mut buf = [0u8; 8];
        write_u64(&mut buf, 0, 0xdead_beef_1234_5678);
        assert_eq!(read_u64(&buf, 0), 0xdead_beef_1234_5678);
    }

    #[test]
    fn u32_roundtrips() {
        let mut buf = [0u8; 4];
        write_u32(&mut buf, 0, 0xabcd_1234);
        assert_eq!(read_u32(&buf, 0), 0xabcd_1234);
    }
}
