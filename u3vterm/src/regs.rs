//! Typed register accessors layered on the transport.
//!
//! Register traffic is whole little-endian 32-bit words at word-aligned
//! addresses. Byte-window traffic (TTY data, file data, the path and
//! password staging areas) goes through [`Transport::write_memory`] and
//! [`Transport::read_memory`] directly.

use crate::error::Result;
use crate::transport::{BulkChannel, Transport};

impl<C: BulkChannel> Transport<C> {
    /// Reads one 32-bit register.
    pub fn read_u32(&mut self, addr: u32) -> Result<u32> {
        debug_assert_eq!(addr % 4, 0, "register access must be word-aligned");
        let raw = self.read_memory(addr, 4)?;
        // unwrap: read_memory enforces payload length == requested size
        Ok(u32::from_le_bytes(raw[..].try_into().unwrap()))
    }

    /// Reads a 64-bit value as two word reads, high word at `addr + 4`.
    pub fn read_u64(&mut self, addr: u32) -> Result<u64> {
        let low = self.read_u32(addr)?;
        let high = self.read_u32(addr + 4)?;
        Ok(u64::from(high) << 32 | u64::from(low))
    }

    /// Reads `count` consecutive registers in one transaction.
    pub fn read_regs(&mut self, addr: u32, count: u16) -> Result<Vec<u32>> {
        debug_assert_eq!(addr % 4, 0, "register access must be word-aligned");
        if count == 0 {
            return Ok(Vec::new());
        }
        let raw = self.read_memory(addr, count * 4)?;
        Ok(raw
            .chunks_exact(4)
            // unwrap: chunks_exact yields 4-byte windows
            .map(|w| u32::from_le_bytes(w.try_into().unwrap()))
            .collect())
    }

    /// Writes one 32-bit register.
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        debug_assert_eq!(addr % 4, 0, "register access must be word-aligned");
        self.write_memory(addr, &value.to_le_bytes())
    }

    /// Writes consecutive registers in one transaction.
    pub fn write_regs(&mut self, addr: u32, values: &[u32]) -> Result<()> {
        debug_assert_eq!(addr % 4, 0, "register access must be word-aligned");
        if values.is_empty() {
            return Ok(());
        }
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.write_memory(addr, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::Transport;
    use crate::transport::testing::Scripted;
    use u3vterm_proto::{self as proto, HostCommand};

    #[test]
    fn read_u32_decodes_little_endian() {
        let chan = Scripted::new([proto::encode_read_mem_ack(1, &0x5445_524Du32.to_le_bytes()).unwrap()]);
        let mut t = Transport::new(chan);
        assert_eq!(t.read_u32(0x30000).unwrap(), 0x5445_524D);
    }

    #[test]
    fn read_u64_combines_low_then_high() {
        let chan = Scripted::new([
            proto::encode_read_mem_ack(1, &0xDDCC_BBAAu32.to_le_bytes()).unwrap(),
            proto::encode_read_mem_ack(2, &0x0000_0001u32.to_le_bytes()).unwrap(),
        ]);
        let mut t = Transport::new(chan);
        assert_eq!(t.read_u64(0x3004C).unwrap(), 0x0000_0001_DDCC_BBAA);
    }

    #[test]
    fn read_regs_is_one_batched_transaction() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x11u32.to_le_bytes());
        payload.extend_from_slice(&0x22u32.to_le_bytes());
        let chan = Scripted::new([proto::encode_read_mem_ack(1, &payload).unwrap()]);
        let mut t = Transport::new(chan);
        assert_eq!(t.read_regs(0x30000, 2).unwrap(), [0x11, 0x22]);
        assert_eq!(t.channel().sent.len(), 1);
        let (_, cmd) = proto::parse_command(&t.channel().sent[0]).unwrap();
        assert_eq!(cmd, HostCommand::ReadMem { address: 0x30000, size: 8 });
    }

    #[test]
    fn write_regs_packs_words_in_order() {
        let chan = Scripted::new([proto::encode_write_mem_ack(1, 8)]);
        let mut t = Transport::new(chan);
        t.write_regs(0x30008, &[0x31, 0x32]).unwrap();
        let (_, cmd) = proto::parse_command(&t.channel().sent[0]).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&0x31u32.to_le_bytes());
        expected.extend_from_slice(&0x32u32.to_le_bytes());
        assert_eq!(
            cmd,
            HostCommand::WriteMem {
                address: 0x30008,
                data: &expected
            }
        );
    }
}
