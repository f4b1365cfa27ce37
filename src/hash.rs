use crc32c::crc32c_append;

// Keep the checksum api similiar to the hasher crates: new/update/finalize
pub struct Checksum(u32);

impl Checksum {
    pub fn new() -> Checksum {
        Checksum(0)
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0 = crc32c_append(self.0, data);
    }

    // Running value, the accumulator stays usable afterward
    pub fn finalize(&self) -> u32 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }
}
