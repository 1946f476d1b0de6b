//! Decoder totality: every possible header byte either decodes to a
//! well-formed instruction that advances PC by a bounded amount, or is
//! rejected outright. There is no input that panics or loops.

use proptest::prelude::*;
use vm64_core::decode::decode_readonly;
use vm64_core::mmio::MmioFabric;
use vm64_core::ram::Ram;
use vm64_core::reg::RegisterFile;

/// Longest legal encoding is RM/RI/OA-address/OA-imm: 1 header + 1 reg + 8
/// byte address-or-immediate.
const MAX_INSTRUCTION_LEN: u64 = 10;

proptest! {
    #[test]
    fn every_header_byte_either_decodes_or_is_rejected(
        header in any::<u8>(),
        trailing in prop::collection::vec(any::<u8>(), MAX_INSTRUCTION_LEN as usize - 1),
    ) {
        let ram = Ram::new(4096).unwrap();
        let mut bytes = vec![header];
        bytes.extend_from_slice(&trailing);
        ram.write(0, &bytes).unwrap();

        let regs = RegisterFile::new();
        let mut mmio = MmioFabric::new();
        let result = decode_readonly(&regs, &ram, &mut mmio, 0).unwrap();

        match result {
            Some((_, next_pc)) => {
                prop_assert!(next_pc > 0);
                prop_assert!(next_pc <= MAX_INSTRUCTION_LEN);
            }
            None => {}
        }
    }
}

#[test]
fn exhaustive_header_byte_sweep_never_panics() {
    let ram = Ram::new(4096).unwrap();
    let regs = RegisterFile::new();
    let mut mmio = MmioFabric::new();

    for header in 0u16..=255 {
        ram.write(0, &[header as u8, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let result = decode_readonly(&regs, &ram, &mut mmio, 0).unwrap();
        if let Some((_, next_pc)) = result {
            assert!(next_pc >= 1 && next_pc <= MAX_INSTRUCTION_LEN);
        }
    }
}
