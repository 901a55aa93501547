use std::cell::RefCell;
use std::rc::Rc;

use forge::bytecode::*;
use forge::memory::{MmioOps, MmioWindow};
use forge::{Vm, VmConfig, VmError};

#[test]
fn test_read_write_roundtrip_every_aligned_address() {
    let mut arena = [0u8; 64];
    let mut vm = Vm::new(VmConfig::new(&mut arena));

    for addr in (0..64u32 - 3).step_by(4) {
        let v = addr as i32 * 3 - 7;
        vm.mem_write32(addr, v).unwrap();
        assert_eq!(vm.mem_read32(addr).unwrap(), v);
    }
}

#[test]
fn test_writes_are_little_endian() {
    let mut arena = [0u8; 16];
    {
        let mut vm = Vm::new(VmConfig::new(&mut arena));
        vm.mem_write32(0, 0x0102_0304).unwrap();
    }
    assert_eq!(&arena[0..4], &[0x04, 0x03, 0x02, 0x01]);
}

#[test]
fn test_unaligned_access_rejected() {
    let mut arena = [0u8; 16];
    let mut vm = Vm::new(VmConfig::new(&mut arena));

    for addr in [1u32, 2, 3, 5, 7] {
        assert_eq!(vm.mem_read32(addr), Err(VmError::Unaligned));
        assert_eq!(vm.mem_write32(addr, 0), Err(VmError::Unaligned));
    }
}

#[test]
fn test_out_of_bounds_rejected() {
    let mut arena = [0u8; 16];
    let mut vm = Vm::new(VmConfig::new(&mut arena));

    assert_eq!(vm.mem_read32(16), Err(VmError::OutOfBounds));
    assert_eq!(vm.mem_write32(16, 0), Err(VmError::OutOfBounds));
    // The last word must fit entirely.
    assert!(vm.mem_read32(12).is_ok());
    assert_eq!(vm.mem_read32(0xFFFF_FFFC), Err(VmError::OutOfBounds));
}

// A fake peripheral that logs writes and serves reads from a register file.
struct FakePort {
    regs: Rc<RefCell<[i32; 4]>>,
    writes: Rc<RefCell<Vec<(u32, i32)>>>,
}

impl MmioOps for FakePort {
    fn read32(&mut self, offset: u32) -> i32 {
        self.regs.borrow()[(offset / 4) as usize]
    }

    fn write32(&mut self, offset: u32, value: i32) {
        self.regs.borrow_mut()[(offset / 4) as usize] = value;
        self.writes.borrow_mut().push((offset, value));
    }
}

#[test]
fn test_mmio_window_routing() {
    let regs = Rc::new(RefCell::new([0i32; 4]));
    let writes = Rc::new(RefCell::new(Vec::new()));
    let port = FakePort {
        regs: regs.clone(),
        writes: writes.clone(),
    };

    let mut arena = [0u8; 0x200];
    let cfg = VmConfig::new(&mut arena)
        .with_window(MmioWindow::new("port0", 0x100, 16, Box::new(port)));
    let mut vm = Vm::new(cfg);

    // Inside the window: routed to the peripheral, arena untouched.
    vm.mem_write32(0x104, 77).unwrap();
    assert_eq!(writes.borrow().as_slice(), &[(4, 77)]);
    assert_eq!(vm.mem_read32(0x104).unwrap(), 77);

    // Outside the window: plain arena access.
    vm.mem_write32(0x90, 5).unwrap();
    assert_eq!(vm.mem_read32(0x90).unwrap(), 5);
    assert!(writes.borrow().len() == 1);

    // Window accesses still obey alignment.
    assert_eq!(vm.mem_read32(0x102), Err(VmError::Unaligned));
}

#[test]
fn test_mmio_reachable_from_bytecode() {
    let regs = Rc::new(RefCell::new([0i32; 4]));
    regs.borrow_mut()[0] = 1234;
    let writes = Rc::new(RefCell::new(Vec::new()));
    let port = FakePort {
        regs: regs.clone(),
        writes: writes.clone(),
    };

    // port0[0] @ 2 * port0[4] !
    let mut a = Asm::new();
    a.lit(0x100);
    a.op(OP_LOAD);
    a.lit(2);
    a.op(OP_MUL);
    a.lit(0x104);
    a.op(OP_STORE);
    a.op(OP_RET);
    let code = a.into_bytes();

    let mut arena = [0u8; 0x200];
    let cfg = VmConfig::new(&mut arena)
        .with_window(MmioWindow::new("port0", 0x100, 16, Box::new(port)));
    let mut vm = Vm::new(cfg);

    vm.exec_raw(&code).unwrap();
    assert_eq!(regs.borrow()[1], 2468);
    assert_eq!(writes.borrow().as_slice(), &[(4, 2468)]);
}
