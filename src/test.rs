use crate::constants::*;
use crate::instr::{self, *};
use crate::vm::{Fault, Vm};
use cynfile::{CodeHeader, CodeImage};
use matches::assert_matches;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

const MEM: u64 = 64 * 1024;
const STACK: u64 = 8 * 1024;

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn image(data: &[u8], instrs: &[Instruction]) -> CodeImage {
    let mut bytes = vec![0u8; cynfile::HEADER_SIZE as usize];
    bytes.extend_from_slice(data);
    let db = bytes.len() as u32;

    for instr in instrs {
        instr::encode(&mut bytes, instr);
    }

    CodeHeader {
        size: bytes.len() as u32,
        db,
        main: db,
    }
    .write_to(&mut bytes);

    CodeImage::from_bytes(bytes).unwrap()
}

fn run_program(data: &[u8], instrs: &[Instruction]) -> (Vm, String) {
    let buf = SharedBuf::default();
    let mut vm = Vm::with_output(image(data, instrs), MEM, STACK, Box::new(buf.clone())).unwrap();
    vm.run(&[]).unwrap();
    let output = buf.contents();
    (vm, output)
}

fn run_fault(data: &[u8], instrs: &[Instruction]) -> Fault {
    let mut vm = Vm::with_output(
        image(data, instrs),
        MEM,
        STACK,
        Box::new(SharedBuf::default()),
    )
    .unwrap();
    vm.run(&[]).unwrap_err()
}

#[test]
fn program_halt() {
    let (vm, out) = run_program(&[], &[instr_0(Opcode::Halt)]);
    assert!(out.is_empty());
    assert_eq!(vm.register(Register::R0).u(), 0);
}

#[test]
fn ret_from_main_stops_cleanly() {
    // The entry frame's dummy return address points one past the stream.
    let (_, out) = run_program(&[], &[instr_imm(Opcode::Ret, Mode::Byte, 0)]);
    assert!(out.is_empty());
}

#[test]
fn narrow_write_preserves_upper_bits() {
    let (vm, _) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Mov, Register::R0, Mode::Quad, 0xAAAA_AAAA_AAAA_AA00u64 as i64),
            instr_reg_imm(Opcode::Mov, Register::R0, Mode::Byte, 0xFF).with_dsz(Mode::Byte),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(vm.register(Register::R0).u(), 0xAAAA_AAAA_AAAA_AAFF);
}

#[test]
fn narrow_read_takes_low_bits() {
    let (vm, _) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Mov, Register::R0, Mode::Quad, 0x1122_3344_5566_77FFu64 as i64),
            // mov.b r1, r0 copies the low byte only.
            instr_reg_reg(Opcode::Mov, Register::R1, Register::R0).with_dsz(Mode::Byte),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(vm.register(Register::R1).u(), 0xFF);
}

#[test]
fn cmp_sets_exactly_one_flag() {
    let cases: &[(i64, i64, u64)] = &[
        (0, 0, FLG_ZERO),
        (1, 0, FLG_GREATER),
        (-1, 0, FLG_LESS),
        (i64::MIN, i64::MAX, FLG_LESS),
    ];

    for &(a, b, expected) in cases {
        let (vm, _) = run_program(
            &[],
            &[
                instr_reg_imm(Opcode::Mov, Register::R0, Mode::Quad, a),
                instr_reg_imm(Opcode::Mov, Register::R1, Mode::Quad, b),
                instr_reg_reg(Opcode::Cmp, Register::R0, Register::R1),
                instr_0(Opcode::Halt),
            ],
        );
        assert_eq!(vm.register(Register::Flg).u(), expected);
    }
}

#[test]
fn arithmetic_on_registers() {
    let (vm, _) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Mov, Register::R0, Mode::Byte, 100),
            instr_reg_imm(Opcode::Add, Register::R0, Mode::Byte, 28),
            instr_reg_imm(Opcode::Mov, Register::R1, Mode::Byte, 3),
            instr_reg_reg(Opcode::Mul, Register::R1, Register::R0),
            instr_reg_imm(Opcode::Mod, Register::R1, Mode::Byte, 100),
            instr_reg_imm(Opcode::Sub, Register::R1, Mode::Byte, 4),
            instr_reg_imm(Opcode::Sal, Register::R1, Mode::Byte, 2),
            instr_0(Opcode::Halt),
        ],
    );
    // ((128 * 3) % 100 - 4) << 2
    assert_eq!(vm.register(Register::R0).i(), 128);
    assert_eq!(vm.register(Register::R1).i(), 320);
}

#[test]
fn memory_operands_round_trip() {
    let (vm, _) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Alloc, Register::R0, Mode::Byte, 16),
            // mov [r0], 0x1234
            Instruction {
                ra: Register::R0,
                iam: true,
                rmd: AddrMode::Imm,
                ims: Mode::Short,
                imm: 0x1234,
                ..Instruction::new(Opcode::Mov)
            },
            instr_reg_mem(Opcode::Mov, Register::R1, Register::R0),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(vm.register(Register::R1).i(), 0x1234);
}

#[test]
fn loop_and_print() {
    // main:  mov.q r0, 3
    // loop:  cmp r0, 0 ; jmpz done ; puti r0 ; putc ' ' ; dec r0 ; jmp loop
    // done:  putc '\n' ; halt
    let (_, out) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Mov, Register::R0, Mode::Byte, 3),
            instr_reg_imm(Opcode::Cmp, Register::R0, Mode::Byte, 0),
            instr_imm(Opcode::Jmpz, Mode::Byte, 13),
            instr_reg(Opcode::Puti, Register::R0),
            instr_imm(Opcode::Putc, Mode::Byte, b' ' as i64),
            instr_reg(Opcode::Dec, Register::R0),
            instr_imm(Opcode::Jmp, Mode::Byte, -14),
            instr_imm(Opcode::Putc, Mode::Byte, b'\n' as i64),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(out, "3 2 1 \n");
}

#[test]
fn call_and_return() {
    // main:   push 7 ; push 1 ; call square ; pop r0 ; pop r1 ; puti r1 ; halt
    // square: mov r1, [bp + argv] ; mul r1, r1 ; push r1 ; ret 1
    let (vm, out) = run_program(
        &[],
        &[
            instr_imm(Opcode::Push, Mode::Byte, 7),
            instr_imm(Opcode::Push, Mode::Byte, 1),
            instr_imm(Opcode::Call, Mode::Byte, 10),
            instr_reg(Opcode::Pop, Register::R0),
            instr_reg(Opcode::Pop, Register::R1),
            instr_reg(Opcode::Puti, Register::R1),
            instr_0(Opcode::Halt),
            instr_reg_ea(Opcode::Mov, Register::R1, Register::Bp, Mode::Byte, 24),
            instr_reg_reg(Opcode::Mul, Register::R1, Register::R1),
            instr_reg(Opcode::Push, Register::R1),
            instr_imm(Opcode::Ret, Mode::Byte, 1),
        ],
    );

    assert_eq!(out, "49");
    // r0 holds the return-value count.
    assert_eq!(vm.register(Register::R0).u(), 1);
    assert_eq!(vm.register(Register::R1).i(), 49);

    // After the two pops sp is back at its pre-push value, which is the
    // entry frame base bp points at for the whole run.
    assert_eq!(
        vm.register(Register::Sp).u(),
        vm.register(Register::Bp).u()
    );
}

#[test]
fn call_frame_restores_bp() {
    // Nested call: f calls g, both return 0 values.
    let (vm, _) = run_program(
        &[],
        &[
            instr_imm(Opcode::Push, Mode::Byte, 0), // argc for f
            instr_imm(Opcode::Call, Mode::Byte, 6), // -> f
            instr_reg(Opcode::Pop, Register::R2),   // ret count 0
            instr_0(Opcode::Halt),
            // f: push argc for g ; call g ; pop r3 ; ret 0
            instr_imm(Opcode::Push, Mode::Byte, 0),
            instr_imm(Opcode::Call, Mode::Byte, 8), // -> g
            instr_reg(Opcode::Pop, Register::R3),
            instr_imm(Opcode::Ret, Mode::Byte, 0),
            // g: ret 0
            instr_imm(Opcode::Ret, Mode::Byte, 0),
        ],
    );
    assert_eq!(vm.register(Register::R2).u(), 0);
    assert_eq!(vm.register(Register::R3).u(), 0);
}

#[test]
fn hello_and_puti_byte() {
    // $msg = "HI\n" ; main: puts msg ; puti.b 0 ; halt
    let (_, out) = run_program(
        b"HI\n",
        &[
            instr_imm(Opcode::Puts, Mode::Byte, i64::from(cynfile::HEADER_SIZE)),
            instr_imm(Opcode::Puti, Mode::Byte, 0).with_dsz(Mode::Byte),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(out, "HI\n0");
}

#[test]
fn putc_encodes_utf8() {
    let (_, out) = run_program(
        &[],
        &[
            instr_imm(Opcode::Putc, Mode::Byte, b'A' as i64),
            instr_imm(Opcode::Putc, Mode::Short, 0xE9),
            instr_imm(Opcode::Putc, Mode::Word, 0x1F600),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(out, "A\u{E9}\u{1F600}");
}

#[test]
fn heap_alloc_free_compact() {
    let (vm, _) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Alloc, Register::R0, Mode::Byte, 64),
            instr_reg_imm(Opcode::Alloc, Register::R1, Mode::Byte, 32),
            instr_reg(Opcode::Dlloc, Register::R0),
            instr_reg(Opcode::Dlloc, Register::R1),
            instr_reg_imm(Opcode::Alloc, Register::R2, Mode::Byte, 96),
            instr_0(Opcode::Halt),
        ],
    );

    let first = vm.register(Register::R0).u();
    assert_ne!(first, 0);
    assert_eq!(first % VM_ALIGNMENT, 0);
    assert_eq!(vm.register(Register::R1).u(), first + 64);
    // Compaction merged both freed ranges.
    assert_eq!(vm.register(Register::R2).u(), first);
}

#[test]
fn alloca_reserves_stack() {
    let (vm, _) = run_program(
        &[],
        &[
            instr_reg_imm(Opcode::Alloca, Register::R0, Mode::Byte, 24),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(vm.register(Register::R0).u(), vm.register(Register::Sp).u());
}

#[test]
fn native_call_getpid() {
    // push 0 (argc) ; ncall __getpid ; pop r0 (count) ; pop r1 (pid) ; halt
    let (vm, _) = run_program(
        &[],
        &[
            instr_imm(Opcode::Push, Mode::Byte, 0),
            instr_imm(Opcode::Ncall, Mode::Byte, 13),
            instr_reg(Opcode::Pop, Register::R0),
            instr_reg(Opcode::Pop, Register::R1),
            instr_0(Opcode::Halt),
        ],
    );
    assert_eq!(vm.register(Register::R0).u(), 1);
    assert!(vm.register(Register::R1).i() > 0);
}

#[test]
fn division_by_zero_faults() {
    let fault = run_fault(
        &[],
        &[
            instr_reg_imm(Opcode::Mov, Register::R1, Mode::Byte, 10),
            instr_reg_reg(Opcode::Div, Register::R1, Register::R0),
            instr_0(Opcode::Halt),
        ],
    );
    assert_matches!(fault, Fault::DivisionByZero);
}

#[test]
fn stack_overflow_faults() {
    let fault = run_fault(
        &[],
        &[
            instr_reg_imm(Opcode::Alloca, Register::R0, Mode::Word, 10_000_000),
            instr_0(Opcode::Halt),
        ],
    );
    assert_matches!(fault, Fault::StackOverflow);
}

#[test]
fn stack_underflow_faults() {
    let fault = run_fault(
        &[],
        &[
            instr_imm(Opcode::Popn, Mode::Byte, 16),
            instr_0(Opcode::Halt),
        ],
    );
    assert_matches!(fault, Fault::StackUnderflow);
}

#[test]
fn wild_jump_faults() {
    let fault = run_fault(&[], &[instr_imm(Opcode::Jmp, Mode::Short, 1000)]);
    assert_matches!(fault, Fault::CodeOutOfBounds { .. });
}

#[test]
fn out_of_bounds_memory_access_faults() {
    let fault = run_fault(
        &[],
        &[
            instr_reg_imm(Opcode::Mov, Register::R0, Mode::Quad, i64::MAX),
            instr_reg_mem(Opcode::Mov, Register::R1, Register::R0),
            instr_0(Opcode::Halt),
        ],
    );
    assert_matches!(fault, Fault::BadMemoryAccess { .. });
}

#[test]
fn invalid_opcode_faults() {
    let mut bytes = vec![0u8; cynfile::HEADER_SIZE as usize];
    bytes.push(0x3F);
    CodeHeader {
        size: bytes.len() as u32,
        db: cynfile::HEADER_SIZE,
        main: cynfile::HEADER_SIZE,
    }
    .write_to(&mut bytes);

    let mut vm = Vm::with_output(
        CodeImage::from_bytes(bytes).unwrap(),
        MEM,
        STACK,
        Box::new(SharedBuf::default()),
    )
    .unwrap();
    assert_matches!(vm.run(&[]), Err(Fault::IllegalInstruction { .. }));
}

#[test]
fn unknown_native_call_faults() {
    let fault = run_fault(
        &[],
        &[
            instr_imm(Opcode::Push, Mode::Byte, 0),
            instr_imm(Opcode::Ncall, Mode::Byte, 99),
            instr_0(Opcode::Halt),
        ],
    );
    assert_matches!(fault, Fault::UnknownNativeCall { id: 99 });
}

#[test]
fn native_arity_mismatch_faults() {
    // __read wants 3 arguments; hand it none.
    let fault = run_fault(
        &[],
        &[
            instr_imm(Opcode::Push, Mode::Byte, 0),
            instr_imm(Opcode::Ncall, Mode::Byte, 0),
            instr_0(Opcode::Halt),
        ],
    );
    assert_matches!(fault, Fault::NativeCall { name: "read", .. });
}

#[test]
fn argv_strings_reach_the_guest() {
    // main: mov r1, [bp + 24] ; puts r1 ; halt
    // With one argument, [bp + 24] holds the address of args[0].
    let buf = SharedBuf::default();
    let mut vm = Vm::with_output(
        image(
            &[],
            &[
                instr_reg_ea(Opcode::Mov, Register::R1, Register::Bp, Mode::Byte, 24),
                instr_reg(Opcode::Puts, Register::R1),
                instr_0(Opcode::Halt),
            ],
        ),
        MEM,
        STACK,
        Box::new(buf.clone()),
    )
    .unwrap();

    vm.run(&["hello-arg"]).unwrap();
    assert_eq!(vm.register(Register::R0).u(), 1);
    assert_eq!(buf.contents(), "hello-arg");
}
