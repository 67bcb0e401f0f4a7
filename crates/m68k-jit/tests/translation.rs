//! Translation-level checks for the documented block behaviours: PC
//! batching, dead-flag elision, the condition-code protocols and the
//! seed guest sequences.

use arm_asm as arm;
use m68k_jit::{translate, CompiledBlock, HelperTable, JitConfig, REG_PC, REG_SR};
use m68k_state::FlatMemory;

fn translate_at(bytes: &[u8], pc: u32) -> CompiledBlock {
    let mut mem = FlatMemory::new(0x10000);
    mem.load(pc, bytes);
    translate(JitConfig::default(), &mem, pc)
}

fn is_sr_flag_update(w: u32) -> bool {
    // bic/orr with the cached SR as both destination and operand.
    let rd = (w >> 12) & 0xf;
    let rn = (w >> 16) & 0xf;
    let op = (w >> 21) & 0xf;
    rd == u32::from(REG_SR.0) && rn == u32::from(REG_SR.0) && (op == 0xc || op == 0xe) && w & 0x0200_0000 != 0
}

#[test]
fn scenario_a_add_and_loop() {
    // ADD.W D0,D0; ADDQ.W #1,D0; DBF D0,-4; RTS
    let block = translate_at(&[0xd0, 0x40, 0x52, 0x40, 0x51, 0xc8, 0xff, 0xfc, 0x4e, 0x75], 0x1000);
    assert_eq!(block.insn_count, 4);
    assert_eq!(block.lo, 0x1000);
    assert_eq!(block.hi, 0x100a);
    // The DBF decrement probes the 0 → -1 wrap with a 0x10000 subtract.
    let sub_64k = arm::encode_imm12(0x1_0000).expect("encodes");
    assert!(block.code.iter().any(|&w| w & 0x0ff0_0fff == 0x0240_0000 | u32::from(sub_64k)));
    // Two exits: the loop-taken epilogue and the final RTS epilogue.
    let pops = block.code.iter().filter(|&&w| w & 0xffff_0000 == 0xe8bd_0000).count();
    assert_eq!(pops, 2);
}

#[test]
fn dead_flags_are_elided_between_overwriting_instructions() {
    // ADD.W D0,D0; ADD.W D1,D1; RTS — the first ADD's flags all die at
    // the second, which must keep its own (RTS hides the consumer).
    let block = translate_at(&[0xd0, 0x40, 0xd2, 0x41, 0x4e, 0x75], 0x1000);
    let first = block.checkpoints[0].host_offset as usize..block.checkpoints[1].host_offset as usize;
    let second = block.checkpoints[1].host_offset as usize..block.checkpoints[2].host_offset as usize;
    assert!(
        !block.code[first].iter().copied().any(is_sr_flag_update),
        "first ADD must not update flags"
    );
    assert!(
        block.code[second].iter().copied().any(is_sr_flag_update),
        "second ADD must update flags"
    );
}

#[test]
fn flags_stay_live_on_both_sides_of_a_branch() {
    // ADD.W D0,D0; BEQ +2; MOVEQ #0,D0; RTS — the branch target is not
    // followed, so the ADD's flags must all be treated as live.
    let block = translate_at(&[0xd0, 0x40, 0x67, 0x02, 0x70, 0x00, 0x4e, 0x75], 0x1000);
    let first = block.checkpoints[0].host_offset as usize..block.checkpoints[1].host_offset as usize;
    assert!(
        block.code[first].iter().copied().any(is_sr_flag_update),
        "flags feeding a branch may not be elided"
    );
}

#[test]
fn straight_line_pc_updates_batch_to_the_exit() {
    // Ten ADDQ.L #1,D0 then JMP (A0): no guest-PC add inside the block.
    let mut bytes = vec![0x52, 0x80].repeat(10);
    bytes.extend_from_slice(&[0x4e, 0xd0]);
    let block = translate_at(&bytes, 0x1000);
    let pc_adds = block
        .code
        .iter()
        .filter(|&&w| w & 0x0fff_f000 == 0x0280_0000 | (u32::from(REG_PC.0) << 16) | (u32::from(REG_PC.0) << 12))
        .count();
    assert_eq!(pc_adds, 0, "PC increments must batch away");
}

#[test]
fn pc_relative_source_materialises_the_pc() {
    // MOVE.W (4,PC),D0; RTS: the operand load addresses off the guest
    // PC register directly.
    let block = translate_at(&[0x30, 0x3a, 0x00, 0x04, 0x4e, 0x75], 0x1000);
    assert!(
        block
            .code
            .iter()
            .any(|&w| w & 0x0ff0_00f0 == 0x01d0_00b0 && (w >> 16) & 0xf == u32::from(REG_PC.0)),
        "halfword load from the PC register expected"
    );
}

#[test]
fn scenario_f_scc_sets_only_the_low_byte() {
    // SEQ D0; RTS.
    let block = translate_at(&[0x57, 0xc0, 0x4e, 0x75], 0x1000);
    // Set path: conditional orr #0xff. Clear path: conditional bfc of
    // eight bits.
    assert!(block
        .code
        .iter()
        .any(|&w| w & 0x0ff0_00ff == 0x0380_00ff && (w >> 28) != 0xe));
    assert!(block
        .code
        .iter()
        .any(|&w| w & 0x0fff_007f == 0x07c7_001f && (w >> 28) != 0xe));
}

#[test]
fn scenario_b_move_to_sr_gates_on_privilege() {
    let helpers = HelperTable {
        raise_exception: 0xdead_0010,
        write_sr: 0xdead_0020,
        ..HelperTable::default()
    };
    let cfg = JitConfig { helpers, ..JitConfig::default() };
    let mut mem = FlatMemory::new(0x10000);
    mem.load(0x2000, &[0x46, 0xfc, 0x27, 0x00, 0x4e, 0x75]);
    let block = translate(cfg, &mem, 0x2000);
    // The supervisor test probes the S bit of the cached SR.
    let s_imm = arm::encode_imm12(0x2000).expect("S bit encodes");
    assert!(block
        .code
        .iter()
        .any(|&w| w == arm::tst_imm(REG_SR, s_imm)));
    // Both helper addresses appear as literal words: the user path
    // raises the privilege violation, the supervisor path writes SR.
    assert!(block.code.contains(&0xdead_0010));
    assert!(block.code.contains(&0xdead_0020));
}

#[test]
fn scenario_c_fmovecr_loads_pi() {
    // FMOVECR #0,FP0; RTS.
    let block = translate_at(&[0xf2, 0x00, 0x5c, 0x00, 0x4e, 0x75], 0x3000);
    let pi = core::f64::consts::PI.to_bits();
    let halves = [
        (pi & 0xffff) as u16,
        ((pi >> 16) & 0xffff) as u16,
        ((pi >> 32) & 0xffff) as u16,
        ((pi >> 48) & 0xffff) as u16,
    ];
    for (i, &h) in halves.iter().enumerate() {
        // movw for the low half of each word, movt for the high.
        let pattern = if i % 2 == 0 { 0x0300_0000u32 } else { 0x0340_0000 };
        let imm = (u32::from(h) & 0xfff) | ((u32::from(h) >> 12) << 16);
        assert!(
            block.code.iter().any(|&w| w & 0x0fff_0fff == pattern | imm),
            "half {i} ({h:#06x}) of pi must be materialised"
        );
    }
    // The value lands in a VFP register.
    assert!(block.code.iter().any(|&w| w & 0x0ff0_0ff0 == 0x0c40_0b10));
}

#[test]
fn memory_to_memory_move_uses_both_autoincrements() {
    // MOVE.L (A0)+,(A1)+; RTS.
    let block = translate_at(&[0x22, 0xd8, 0x4e, 0x75], 0x1000);
    // Post-indexed load by 4 and post-indexed store by 4.
    assert!(block.code.iter().any(|&w| w & 0x0ff0_0fff == 0x0490_0004));
    assert!(block.code.iter().any(|&w| w & 0x0ff0_0fff == 0x0480_0004));
}

#[test]
fn predecrement_byte_store_on_a7_keeps_alignment() {
    // MOVE.B D0,-(A7); RTS.
    let block = translate_at(&[0x1f, 0x00, 0x4e, 0x75], 0x1000);
    // strb with pre-index writeback of 2.
    assert!(block.code.iter().any(|&w| w & 0x0ff0_0fff == 0x0560_0002));
}

#[test]
fn dbt_does_nothing_but_advance() {
    // DBT D0,-4; RTS.
    let block = translate_at(&[0x50, 0xc8, 0xff, 0xfc, 0x4e, 0x75], 0x1000);
    assert_eq!(block.insn_count, 2);
    // No decrement machinery at all.
    let sub_64k = arm::encode_imm12(0x1_0000).expect("encodes");
    assert!(!block.code.iter().any(|&w| w & 0x0ff0_0fff == 0x0240_0000 | u32::from(sub_64k)));
}

#[test]
fn division_checks_for_zero_divisor() {
    let helpers = HelperTable { raise_exception: 0xdead_0030, uidivmod: 0xdead_0040, ..HelperTable::default() };
    let cfg = JitConfig { helpers, ..JitConfig::default() };
    let mut mem = FlatMemory::new(0x10000);
    // DIVU.W D1,D0; RTS.
    mem.load(0x1000, &[0x80, 0xc1, 0x4e, 0x75]);
    let block = translate(cfg, &mem, 0x1000);
    assert!(block.code.contains(&0xdead_0030), "divide-by-zero raise path");
    assert!(block.code.contains(&0xdead_0040), "division helper call");
}

#[test]
fn movem_predecrement_reverses_register_order() {
    // MOVEM.L D0/A6,-(A7); RTS. Mask for predec: bit0=A7..bit15=D0.
    // D0 = bit 15, A6 = bit 1 → 0x8002.
    let block = translate_at(&[0x48, 0xe7, 0x80, 0x02, 0x4e, 0x75], 0x1000);
    // Two pre-indexed stores by -4.
    let stores = block.code.iter().filter(|&&w| w & 0x0ff0_0fff == 0x0520_0004).count();
    assert_eq!(stores, 2);
}

#[test]
fn cinv_stages_a_request_and_ends_the_block() {
    // CINVL DC,(A0); RTS never reached — block ends at the CINV.
    let block = translate_at(&[0xf4, 0x48, 0x4e, 0x75], 0x1000);
    assert_eq!(block.insn_count, 1);
    let cache_op_off = core::mem::offset_of!(m68k_state::GuestState, cache_op) as u32;
    // A store to the staged-request cell.
    assert!(block
        .code
        .iter()
        .any(|&w| w & 0x0fff_0fff == 0x0580_0000 | (11 << 16) | cache_op_off));
}
