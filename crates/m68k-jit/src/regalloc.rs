//! Register allocation: guest register file ↔ host registers.
//!
//! The integer pool is r0..r9; r10-r12 are pinned (SR, state base, guest
//! PC). A mapping is protected while its lock count is non-zero; lowerings
//! map a register, use it, then free it, which unlocks the mapping but
//! keeps it live for later instructions in the block. When the pool is
//! exhausted the least-recently-touched unlocked mapping is spilled, with
//! a write-back if dirty.
//!
//! The FPU allocator is structurally identical over VFP d0..d7.

use arm_asm as arm;
use arm_asm::{DReg, Reg};
use m68k_state::GuestState;

use crate::ctx::{BlockCtx, REG_CTX};

/// Guest integer register: 0-7 are D0-D7, 8-15 are A0-A7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestReg(pub u8);

impl GuestReg {
    /// Data register Dn.
    #[must_use]
    pub const fn d(n: u8) -> Self {
        Self(n & 7)
    }

    /// Address register An.
    #[must_use]
    pub const fn a(n: u8) -> Self {
        Self(8 + (n & 7))
    }

    /// Is this an address register?
    #[must_use]
    pub const fn is_addr(self) -> bool {
        self.0 >= 8
    }

    /// Byte offset of the backing cell in [`GuestState`].
    #[must_use]
    pub const fn offset(self) -> i16 {
        if self.0 < 8 {
            (core::mem::offset_of!(GuestState, d) + 4 * self.0 as usize) as i16
        } else {
            (core::mem::offset_of!(GuestState, a) + 4 * (self.0 as usize - 8)) as i16
        }
    }
}

/// Guest FPU register FP0-FP7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpReg(pub u8);

impl FpReg {
    /// Byte offset of the backing cell in [`GuestState`].
    #[must_use]
    pub const fn offset(self) -> i16 {
        (core::mem::offset_of!(GuestState, fp) + 8 * (self.0 & 7) as usize) as i16
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// Mapped guest register index, if any.
    guest: Option<u8>,
    /// Allocated as a scratch temporary.
    temp: bool,
    dirty: bool,
    lock: u8,
    stamp: u32,
}

impl Slot {
    const fn busy(&self) -> bool {
        self.temp || self.guest.is_some()
    }
}

const POOL: usize = 10; // r0..r9

/// Integer allocator state.
#[derive(Debug)]
pub(crate) struct RaState {
    slots: [Slot; POOL],
    tick: u32,
    changed: u16,
}

impl RaState {
    pub(crate) fn new() -> Self {
        Self { slots: [Slot::default(); POOL], tick: 0, changed: 0 }
    }
}

impl BlockCtx<'_> {
    fn ra_touch(&mut self, i: usize) {
        self.ra.tick += 1;
        self.ra.slots[i].stamp = self.ra.tick;
    }

    /// Pick a slot: free first, else spill the least-recently-touched
    /// unlocked mapping (with write-back when dirty).
    fn ra_pick(&mut self) -> usize {
        if let Some(i) = (0..POOL).find(|&i| !self.ra.slots[i].busy()) {
            return i;
        }
        let victim = (0..POOL)
            .filter(|&i| self.ra.slots[i].guest.is_some() && self.ra.slots[i].lock == 0)
            .min_by_key(|&i| self.ra.slots[i].stamp)
            .expect("register pool exhausted: all host registers locked");
        let guest = GuestReg(self.ra.slots[victim].guest.expect("victim is mapped"));
        if self.ra.slots[victim].dirty {
            self.buf.emit(arm::str_offset(Reg(victim as u8), REG_CTX, guest.offset()));
        }
        self.ra.slots[victim] = Slot::default();
        victim
    }

    /// Allocate a scratch register, locked until freed.
    pub fn ra_alloc(&mut self) -> Reg {
        let i = self.ra_pick();
        self.ra.slots[i] = Slot { guest: None, temp: true, dirty: false, lock: 1, stamp: 0 };
        self.ra_touch(i);
        self.ra.changed |= 1 << i;
        Reg(i as u8)
    }

    /// Release a register returned by any of the mapping or allocation
    /// calls. Temporaries are freed; mappings are unlocked but stay live.
    pub fn ra_free(&mut self, reg: Reg) {
        let i = reg.0 as usize;
        if i >= POOL {
            return;
        }
        let slot = &mut self.ra.slots[i];
        if slot.temp {
            *slot = Slot::default();
        } else if slot.lock > 0 {
            slot.lock -= 1;
        }
    }

    /// Host register currently holding `guest`, if mapped.
    #[must_use]
    pub fn ra_mapping(&self, guest: GuestReg) -> Option<Reg> {
        (0..POOL)
            .find(|&i| self.ra.slots[i].guest == Some(guest.0))
            .map(|i| Reg(i as u8))
    }

    /// Map `guest` for reading: loads from `GuestState` on miss.
    pub fn map_read(&mut self, guest: GuestReg) -> Reg {
        if let Some(reg) = self.ra_mapping(guest) {
            let i = reg.0 as usize;
            self.ra.slots[i].lock += 1;
            self.ra_touch(i);
            return reg;
        }
        let i = self.ra_pick();
        self.ra.slots[i] = Slot { guest: Some(guest.0), temp: false, dirty: false, lock: 1, stamp: 0 };
        self.ra_touch(i);
        self.ra.changed |= 1 << i;
        self.buf.emit(arm::ldr_offset(Reg(i as u8), REG_CTX, guest.offset()));
        Reg(i as u8)
    }

    /// Map `guest` for a full-width overwrite: skips the load on miss and
    /// marks the mapping dirty.
    pub fn map_write(&mut self, guest: GuestReg) -> Reg {
        if let Some(reg) = self.ra_mapping(guest) {
            let i = reg.0 as usize;
            self.ra.slots[i].lock += 1;
            self.ra.slots[i].dirty = true;
            self.ra_touch(i);
            return reg;
        }
        let i = self.ra_pick();
        self.ra.slots[i] = Slot { guest: Some(guest.0), temp: false, dirty: true, lock: 1, stamp: 0 };
        self.ra_touch(i);
        self.ra.changed |= 1 << i;
        Reg(i as u8)
    }

    /// A fresh scratch register initialised with a copy of `guest`, for
    /// destructive operations on a source operand.
    pub fn copy_from(&mut self, guest: GuestReg) -> Reg {
        if let Some(src) = self.ra_mapping(guest) {
            let tmp = self.ra_alloc();
            self.buf.emit(arm::mov_reg(tmp, src));
            tmp
        } else {
            let tmp = self.ra_alloc();
            self.buf.emit(arm::ldr_offset(tmp, REG_CTX, guest.offset()));
            tmp
        }
    }

    /// Re-map `host` (a temporary) as the new home of `guest`, dirty.
    /// Any previous mapping of `guest` is dropped without write-back.
    pub fn ra_assign(&mut self, guest: GuestReg, host: Reg) {
        if let Some(old) = self.ra_mapping(guest) {
            self.ra.slots[old.0 as usize] = Slot::default();
        }
        let i = host.0 as usize;
        self.ra.slots[i] = Slot { guest: Some(guest.0), temp: false, dirty: true, lock: 0, stamp: 0 };
        self.ra_touch(i);
        self.ra.changed |= 1 << i;
    }

    /// Mark a mapped register as modified.
    pub fn set_dirty(&mut self, guest: GuestReg) {
        if let Some(reg) = self.ra_mapping(guest) {
            self.ra.slots[reg.0 as usize].dirty = true;
        }
    }

    /// Drop the mapping of `guest` without write-back.
    pub fn ra_discard(&mut self, guest: GuestReg) {
        if let Some(reg) = self.ra_mapping(guest) {
            self.ra.slots[reg.0 as usize] = Slot::default();
        }
    }

    /// Write every dirty mapping back but keep all mappings. Used at
    /// conditional block exits.
    pub fn ra_store_dirty(&mut self) {
        for i in 0..POOL {
            if let Some(g) = self.ra.slots[i].guest {
                if self.ra.slots[i].dirty {
                    self.buf.emit(arm::str_offset(Reg(i as u8), REG_CTX, GuestReg(g).offset()));
                }
            }
        }
    }

    /// Write dirty mappings back and unmap everything. Called before the
    /// final block exit.
    pub fn ra_flush_all(&mut self) {
        for i in 0..POOL {
            if let Some(g) = self.ra.slots[i].guest {
                if self.ra.slots[i].dirty {
                    self.buf.emit(arm::str_offset(Reg(i as u8), REG_CTX, GuestReg(g).offset()));
                }
                self.ra.slots[i] = Slot::default();
            }
        }
    }

    /// Drop every mapping without write-back. Only valid when the code
    /// path being emitted can never rejoin straight-line execution (an
    /// unconditional exception raise).
    pub fn ra_invalidate_all(&mut self) {
        for slot in &mut self.ra.slots {
            if slot.guest.is_some() {
                *slot = Slot::default();
            }
        }
    }

    /// Host registers touched so far, as a push/pop mask.
    #[must_use]
    pub fn ra_changed_mask(&self) -> u16 {
        self.ra.changed
    }

    // --- FPU allocator ---

    fn fra_touch(&mut self, i: usize) {
        self.fra.tick += 1;
        self.fra.slots[i].stamp = self.fra.tick;
    }

    fn fra_pick(&mut self) -> usize {
        if let Some(i) = (0..FP_POOL).find(|&i| !self.fra.slots[i].busy()) {
            return i;
        }
        let victim = (0..FP_POOL)
            .filter(|&i| self.fra.slots[i].guest.is_some() && self.fra.slots[i].lock == 0)
            .min_by_key(|&i| self.fra.slots[i].stamp)
            .expect("FPU register pool exhausted: all host registers locked");
        let guest = FpReg(self.fra.slots[victim].guest.expect("victim is mapped"));
        if self.fra.slots[victim].dirty {
            self.buf.emit(arm::vstr64(DReg(victim as u8), REG_CTX, guest.offset()));
        }
        self.fra.slots[victim] = Slot::default();
        victim
    }

    /// Allocate a scratch FPU register.
    pub fn fra_alloc(&mut self) -> DReg {
        let i = self.fra_pick();
        self.fra.slots[i] = Slot { guest: None, temp: true, dirty: false, lock: 1, stamp: 0 };
        self.fra_touch(i);
        DReg(i as u8)
    }

    /// Release an FPU register; mirrors [`BlockCtx::ra_free`].
    pub fn fra_free(&mut self, reg: DReg) {
        let i = reg.0 as usize;
        if i >= FP_POOL {
            return;
        }
        let slot = &mut self.fra.slots[i];
        if slot.temp {
            *slot = Slot::default();
        } else if slot.lock > 0 {
            slot.lock -= 1;
        }
    }

    /// Host FPU register currently holding `guest`, if mapped.
    #[must_use]
    pub fn fra_mapping(&self, guest: FpReg) -> Option<DReg> {
        (0..FP_POOL)
            .find(|&i| self.fra.slots[i].guest == Some(guest.0))
            .map(|i| DReg(i as u8))
    }

    /// Map an FP register for reading.
    pub fn map_fp_read(&mut self, guest: FpReg) -> DReg {
        if let Some(reg) = self.fra_mapping(guest) {
            let i = reg.0 as usize;
            self.fra.slots[i].lock += 1;
            self.fra_touch(i);
            return reg;
        }
        let i = self.fra_pick();
        self.fra.slots[i] = Slot { guest: Some(guest.0), temp: false, dirty: false, lock: 1, stamp: 0 };
        self.fra_touch(i);
        self.buf.emit(arm::vldr64(DReg(i as u8), REG_CTX, guest.offset()));
        DReg(i as u8)
    }

    /// Map an FP register for a full overwrite.
    pub fn map_fp_write(&mut self, guest: FpReg) -> DReg {
        if let Some(reg) = self.fra_mapping(guest) {
            let i = reg.0 as usize;
            self.fra.slots[i].lock += 1;
            self.fra.slots[i].dirty = true;
            self.fra_touch(i);
            return reg;
        }
        let i = self.fra_pick();
        self.fra.slots[i] = Slot { guest: Some(guest.0), temp: false, dirty: true, lock: 1, stamp: 0 };
        self.fra_touch(i);
        DReg(i as u8)
    }

    /// Mark a mapped FP register as modified.
    pub fn set_fp_dirty(&mut self, guest: FpReg) {
        if let Some(reg) = self.fra_mapping(guest) {
            self.fra.slots[reg.0 as usize].dirty = true;
        }
    }

    /// Write dirty FP mappings back, keeping them.
    pub fn fra_store_dirty(&mut self) {
        for i in 0..FP_POOL {
            if let Some(g) = self.fra.slots[i].guest {
                if self.fra.slots[i].dirty {
                    self.buf.emit(arm::vstr64(DReg(i as u8), REG_CTX, FpReg(g).offset()));
                }
            }
        }
    }

    /// Write dirty FP mappings back and unmap everything. VFP d0..d7 are
    /// caller-saved, so this also runs before any emitted helper call.
    pub fn fra_flush_all(&mut self) {
        for i in 0..FP_POOL {
            if let Some(g) = self.fra.slots[i].guest {
                if self.fra.slots[i].dirty {
                    self.buf.emit(arm::vstr64(DReg(i as u8), REG_CTX, FpReg(g).offset()));
                }
            }
            self.fra.slots[i] = Slot::default();
        }
    }
}

const FP_POOL: usize = 8; // d0..d7

/// FPU allocator state.
#[derive(Debug)]
pub(crate) struct FpState {
    slots: [Slot; FP_POOL],
    tick: u32,
}

impl FpState {
    pub(crate) fn new() -> Self {
        Self { slots: [Slot::default(); FP_POOL], tick: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::JitConfig;
    use m68k_state::FlatMemory;

    fn ctx_over(mem: &FlatMemory) -> BlockCtx<'_> {
        BlockCtx::new(JitConfig::default(), mem, 0)
    }

    #[test]
    fn map_read_loads_once() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let r1 = ctx.map_read(GuestReg::d(3));
        ctx.ra_free(r1);
        let r2 = ctx.map_read(GuestReg::d(3));
        ctx.ra_free(r2);
        assert_eq!(r1, r2);
        assert_eq!(ctx.buf.len(), 1);
        assert_eq!(ctx.buf.word(0), arm::ldr_offset(r1, REG_CTX, GuestReg::d(3).offset()));
    }

    #[test]
    fn map_write_skips_load() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let r = ctx.map_write(GuestReg::a(2));
        ctx.ra_free(r);
        assert!(ctx.buf.is_empty());
        ctx.ra_flush_all();
        assert_eq!(ctx.buf.len(), 1);
        assert_eq!(ctx.buf.word(0), arm::str_offset(r, REG_CTX, GuestReg::a(2).offset()));
    }

    #[test]
    fn spill_picks_least_recently_used_and_writes_back() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        // Fill the pool with ten mappings; D0 becomes the LRU victim.
        let mut regs = Vec::new();
        for n in 0..8 {
            regs.push(ctx.map_read(GuestReg::d(n)));
        }
        for n in 0..2 {
            regs.push(ctx.map_read(GuestReg::a(n)));
        }
        for r in regs {
            ctx.ra_free(r);
        }
        ctx.set_dirty(GuestReg::d(0));
        let emitted = ctx.buf.len();
        let fresh = ctx.map_read(GuestReg::a(5));
        ctx.ra_free(fresh);
        // The spill stored D0, then the miss loaded A5 into its slot.
        assert_eq!(ctx.buf.len(), emitted + 2);
        assert_eq!(ctx.buf.word(emitted), arm::str_offset(Reg(0), REG_CTX, GuestReg::d(0).offset()));
        assert_eq!(ctx.ra_mapping(GuestReg::d(0)), None);
        assert_eq!(ctx.ra_mapping(GuestReg::a(5)), Some(Reg(0)));
    }

    #[test]
    fn locked_registers_survive_spill_pressure() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let locked = ctx.map_read(GuestReg::d(0)); // lock held
        for n in 1..8 {
            let r = ctx.map_read(GuestReg::d(n));
            ctx.ra_free(r);
        }
        for n in 0..2 {
            let r = ctx.map_read(GuestReg::a(n));
            ctx.ra_free(r);
        }
        let fresh = ctx.ra_alloc();
        assert_ne!(fresh, locked);
        assert_eq!(ctx.ra_mapping(GuestReg::d(0)), Some(locked));
    }

    #[test]
    fn assign_renames_without_store() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let src = ctx.map_read(GuestReg::d(1));
        ctx.ra_free(src);
        let tmp = ctx.ra_alloc();
        ctx.ra_assign(GuestReg::d(2), tmp);
        assert_eq!(ctx.ra_mapping(GuestReg::d(2)), Some(tmp));
        let before = ctx.buf.len();
        ctx.ra_flush_all();
        // Only the dirty D2 mapping is stored.
        assert_eq!(ctx.buf.len(), before + 1);
    }

    #[test]
    fn store_dirty_keeps_mappings() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let r = ctx.map_write(GuestReg::d(4));
        ctx.ra_free(r);
        ctx.ra_store_dirty();
        assert_eq!(ctx.ra_mapping(GuestReg::d(4)), Some(r));
        ctx.ra_store_dirty();
        assert_eq!(ctx.buf.len(), 2); // still dirty: stored again
    }

    #[test]
    fn changed_mask_tracks_every_touched_register() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let a = ctx.ra_alloc();
        let b = ctx.ra_alloc();
        assert_eq!(ctx.ra_changed_mask(), a.mask_bit() | b.mask_bit());
    }

    #[test]
    fn fp_allocator_round_trip() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let d = ctx.map_fp_read(FpReg(2));
        ctx.fra_free(d);
        assert_eq!(ctx.buf.word(0), arm::vldr64(d, REG_CTX, FpReg(2).offset()));
        ctx.set_fp_dirty(FpReg(2));
        ctx.fra_flush_all();
        assert_eq!(ctx.buf.word(1), arm::vstr64(d, REG_CTX, FpReg(2).offset()));
        assert_eq!(ctx.fra_mapping(FpReg(2)), None);
    }
}
