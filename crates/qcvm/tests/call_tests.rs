//! Integration tests for the calling convention and the builtin bridge.
//!
//! Tests validate:
//! - parameter windows for 0..=8 arguments, host- and bytecode-driven
//! - recursion with per-activation local save/restore
//! - call-depth and spill-stack overflow as defined errors
//! - builtin name resolution happening once per function
//! - fixed-index builtins, missing builtins, host errors
//! - recoverable errors unwinding every frame the run entered
//! - builtins dispatched by a host that drives `step` itself
//! - reentrant `run` from inside a builtin
//! - identical results on a simulated opposite-endian host

use qcvm::{Step, Vm, VmConfig, VmError};
use qcvm_image::format::{parm_offset, OFS_RETURN};
use qcvm_image::{ByteOrder, Image, ImageBuilder, Opcode};

const RET: u16 = OFS_RETURN as u16;

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn parm(i: usize) -> u16 {
    parm_offset(i) as u16
}

fn instance(bytes: &[u8]) -> Vm {
    Vm::from_bytes(bytes, VmConfig::default()).expect("image should load")
}

/// `sum(p0..pn)` plus a `main` that calls it with 1..=n.
fn sum_image(n: usize) -> Vec<u8> {
    let mut b = ImageBuilder::new();

    let (sum, parms) = b.function("sum", &vec![1u8; n]);
    let acc = b.local();
    let zero = b.float(0.0);
    b.emit(Opcode::StoreF, zero, acc, 0);
    for p in &parms {
        b.emit(Opcode::AddF, acc, *p, acc);
    }
    b.emit(Opcode::Return, acc, 0, 0);
    b.end_function();

    b.function("main", &[]);
    let target = b.function_constant(sum);
    for i in 0..n {
        let k = b.float((i + 1) as f32);
        b.emit(Opcode::StoreF, k, parm(i), 0);
    }
    b.emit(Opcode::call(n).unwrap(), target, 0, 0);
    b.emit(Opcode::Return, RET, 0, 0);
    b.end_function();

    b.build()
}

/// Recursive `fact(n)`.
fn factorial_image() -> Vec<u8> {
    let mut b = ImageBuilder::new();
    let (fact, parms) = b.function("fact", &[1]);
    let n = parms[0];
    let one = b.float(1.0);
    let this = b.function_constant(fact);
    let t = b.local();
    let r = b.local();

    b.emit(Opcode::Le, n, one, t);
    let branch = b.emit_raw(Opcode::IfNot as u16, t as i16, 0, 0);
    b.emit(Opcode::Return, one, 0, 0);
    let recurse = b.next_statement();
    b.patch_branch(branch, recurse);
    b.emit(Opcode::SubF, n, one, t);
    b.emit(Opcode::StoreF, t, parm(0), 0);
    b.emit(Opcode::Call1, this, 0, 0);
    b.emit(Opcode::MulF, n, RET, r);
    b.emit(Opcode::Return, r, 0, 0);
    b.end_function();
    b.build()
}

fn factorial(vm: &mut Vm, n: f32) -> f32 {
    vm.set_parm_float(0, n).unwrap();
    vm.run("fact").unwrap();
    vm.get_return_float().unwrap()
}

/// `main(x)` calls the builtin behind `callee` twice: `callee(callee(x))`.
fn twice_image(declare: impl FnOnce(&mut ImageBuilder) -> i32) -> Vec<u8> {
    let mut b = ImageBuilder::new();
    let callee = declare(&mut b);
    let (_, parms) = b.function("main", &[1]);
    let f = b.function_constant(callee);
    b.emit(Opcode::StoreF, parms[0], parm(0), 0);
    b.emit(Opcode::Call1, f, 0, 0);
    b.emit(Opcode::StoreF, RET, parm(0), 0);
    b.emit(Opcode::Call1, f, 0, 0);
    b.emit(Opcode::Return, RET, 0, 0);
    b.end_function();
    b.build()
}

// ══════════════════════════════════════════════════════════════════════════════
// Parameter ABI
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn host_call_abi_for_every_arity() {
    for n in 0..=8 {
        let mut vm = instance(&sum_image(n));
        for i in 0..n {
            vm.set_parm_float(i, (i + 1) as f32).unwrap();
        }
        vm.run("sum").unwrap();
        let expected = (n * (n + 1) / 2) as f32;
        assert_eq!(vm.get_return_float().unwrap(), expected, "arity {n}");
        assert_eq!(vm.argc(), 0, "argc restored after run");
    }
}

#[test]
fn bytecode_call_abi_for_every_arity() {
    for n in 0..=8 {
        let mut vm = instance(&sum_image(n));
        vm.run("main").unwrap();
        let expected = (n * (n + 1) / 2) as f32;
        assert_eq!(vm.get_return_float().unwrap(), expected, "arity {n}");
        assert_eq!(vm.depth(), 0);
    }
}

#[test]
fn vector_parameters_take_three_words() {
    let mut b = ImageBuilder::new();
    let (_, parms) = b.function("pick", &[1, 3, 1]);
    let t = b.local();
    b.emit(Opcode::AddF, parms[0], parms[2], t);
    b.emit(Opcode::Return, t, 0, 0);
    b.end_function();
    b.function("pickv", &[1, 3]);
    b.emit(Opcode::Return, parm(1), 0, 0);
    b.end_function();

    let mut vm = instance(&b.build());
    vm.set_parm_float(0, 1.5).unwrap();
    vm.set_parm_vector(1, [9.0, 9.0, 9.0]).unwrap();
    vm.set_parm_float(2, 2.0).unwrap();
    vm.run("pick").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 3.5);

    vm.set_parm_vector(1, [1.0, 2.0, 3.0]).unwrap();
    vm.run("pickv").unwrap();
    assert_eq!(vm.get_return_vector().unwrap(), [1.0, 2.0, 3.0]);
}

#[test]
fn unknown_function_is_recoverable() {
    let mut vm = instance(&sum_image(1));
    let err = vm.run("nope").unwrap_err();
    assert_eq!(err, VmError::FunctionNotFound("nope".into()));
    assert!(!err.is_fatal());
    assert!(matches!(vm.run(0usize), Err(VmError::FunctionNotFound(_))));

    vm.set_parm_float(0, 4.0).unwrap();
    vm.run("sum").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 4.0);
}

// ══════════════════════════════════════════════════════════════════════════════
// Recursion
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn recursive_factorial() {
    let mut vm = instance(&factorial_image());
    assert_eq!(factorial(&mut vm, 5.0), 120.0);
    assert_eq!(factorial(&mut vm, 1.0), 1.0);
    assert_eq!(factorial(&mut vm, 10.0), 3_628_800.0);
    assert_eq!(vm.depth(), 0);
}

#[test]
fn recursion_leaves_window_pristine() {
    let bytes = factorial_image();
    let mut vm = instance(&bytes);
    let before: Vec<_> = (0..vm.image().globals.len())
        .skip(28)
        .map(|i| vm.global(i).unwrap())
        .collect();
    factorial(&mut vm, 6.0);
    let after: Vec<_> = (0..vm.image().globals.len())
        .skip(28)
        .map(|i| vm.global(i).unwrap())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn runaway_recursion_overflows() {
    let mut b = ImageBuilder::new();
    let (dive, _) = b.function("dive", &[]);
    let this = b.function_constant(dive);
    b.emit(Opcode::Call0, this, 0, 0);
    b.emit(Opcode::Return, 0, 0, 0);
    b.end_function();

    let mut vm = instance(&b.build());
    let err = vm.run("dive").unwrap_err();
    assert_eq!(err, VmError::StackOverflow);
    assert!(err.is_fatal());
    // not unwound
    assert_eq!(vm.depth(), VmConfig::DEFAULT_CALL_DEPTH);
}

#[test]
fn spill_stack_overflows() {
    let mut b = ImageBuilder::new();
    let (dive, _) = b.function("dive", &[]);
    let this = b.function_constant(dive);
    for _ in 0..20 {
        b.local();
    }
    b.emit(Opcode::Call0, this, 0, 0);
    b.emit(Opcode::Return, 0, 0, 0);
    b.end_function();

    let config = VmConfig {
        local_stack_size: 100,
        ..VmConfig::default()
    };
    let mut vm = Vm::from_bytes(&b.build(), config).unwrap();
    assert_eq!(vm.run("dive"), Err(VmError::StackOverflow));
    // 21 words per frame
    assert_eq!(vm.depth(), 4);
}

// ══════════════════════════════════════════════════════════════════════════════
// Builtins
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn builtin_resolved_by_name_once() {
    let bytes = twice_image(|b| b.builtin("double", &[1]));
    let mut vm = instance(&bytes);
    vm.builtins_mut().register("halve", |vm| {
        let x = vm.get_parm_float(0)?;
        vm.return_float(x / 2.0)
    });
    vm.builtins_mut().register("double", |vm| {
        let x = vm.get_parm_float(0)?;
        vm.return_float(x * 2.0)
    });

    vm.set_parm_float(0, 3.0).unwrap();
    vm.run("main").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 12.0);
    assert_eq!(vm.builtins().name_searches(), 1);

    vm.set_parm_float(0, 1.0).unwrap();
    vm.run("main").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 4.0);
    assert_eq!(vm.builtins().name_searches(), 1);
}

#[test]
fn builtin_at_fixed_index_skips_search() {
    let bytes = twice_image(|b| b.builtin_at("triple", 5, &[1]));
    let mut vm = instance(&bytes);
    vm.builtins_mut().register_at(5, "triple", |vm| {
        let x = vm.get_parm_float(0)?;
        vm.return_float(x * 3.0)
    });

    vm.set_parm_float(0, 2.0).unwrap();
    vm.run("main").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 18.0);
    assert_eq!(vm.builtins().name_searches(), 0);
}

#[test]
fn missing_builtins() {
    let mut vm = instance(&twice_image(|b| b.builtin("missing", &[1])));
    let err = vm.run("main").unwrap_err();
    assert_eq!(err, VmError::BuiltinNotFound("missing".into()));
    assert!(!err.is_fatal());

    let mut vm = instance(&twice_image(|b| b.builtin_at("gap", 3, &[1])));
    vm.builtins_mut().register_at(4, "other", |_| Ok(()));
    assert!(matches!(vm.run("main"), Err(VmError::BuiltinNotFound(_))));
}

#[test]
fn builtin_sees_argument_count() {
    let bytes = twice_image(|b| b.builtin("count", &[1]));
    let mut vm = instance(&bytes);
    vm.builtins_mut().register("count", |vm| {
        let argc = vm.argc() as f32;
        vm.return_float(argc)
    });
    vm.run("main").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 1.0);
}

#[test]
fn builtin_error_aborts_run() {
    let mut vm = instance(&twice_image(|b| b.builtin("fail", &[1])));
    vm.builtins_mut()
        .register("fail", |_| Err(VmError::Host("boom".into())));
    assert_eq!(vm.run("main"), Err(VmError::Host("boom".into())));
}

#[test]
fn recoverable_errors_unwind_the_run() {
    let mut vm = instance(&twice_image(|b| b.builtin("double", &[1])));
    let main = vm.find_function("main").unwrap();
    let window = vm.image().functions[main].first_parm as usize;

    for _ in 0..40 {
        vm.set_parm_float(0, 5.0).unwrap();
        assert_eq!(
            vm.run("main"),
            Err(VmError::BuiltinNotFound("double".into()))
        );
        assert_eq!(vm.depth(), 0);
        assert_eq!(vm.global_float(window).unwrap(), 0.0);
    }

    vm.builtins_mut().register("double", |vm| {
        let x = vm.get_parm_float(0)?;
        vm.return_float(x * 2.0)
    });
    vm.set_parm_float(0, 5.0).unwrap();
    vm.run("main").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 20.0);
}

#[test]
fn host_errors_unwind_nested_frames() {
    let mut b = ImageBuilder::new();
    let fail = b.builtin("fail", &[]);
    let (inner, _) = b.function("inner", &[1]);
    let f = b.function_constant(fail);
    b.emit(Opcode::Call0, f, 0, 0);
    b.emit(Opcode::Done, 0, 0, 0);
    b.end_function();
    b.function("main", &[]);
    let g = b.function_constant(inner);
    b.emit(Opcode::Call1, g, 0, 0);
    b.emit(Opcode::Done, 0, 0, 0);
    b.end_function();

    let mut vm = instance(&b.build());
    vm.builtins_mut()
        .register("fail", |vm| Err(VmError::Host(format!("depth {}", vm.depth()))));
    assert_eq!(vm.run("main"), Err(VmError::Host("depth 2".into())));
    assert_eq!(vm.depth(), 0);
    assert_eq!(vm.step(), Err(VmError::NotRunning));
}

#[test]
fn stepping_host_dispatches_builtins() {
    let mut b = ImageBuilder::new();
    let sum = b.builtin("sum", &[]);
    b.function("main", &[]);
    let f = b.function_constant(sum);
    for i in 0..3 {
        let k = b.float((i + 1) as f32);
        b.emit(Opcode::StoreF, k, parm(i), 0);
    }
    b.emit(Opcode::Call3, f, 0, 0);
    b.emit(Opcode::Return, RET, 0, 0);
    b.end_function();

    let mut vm = instance(&b.build());
    vm.builtins_mut().register("sum", |vm| {
        let mut total = 0.0;
        for i in 0..vm.argc() {
            total += vm.get_parm_float(i)?;
        }
        vm.return_float(total)
    });

    vm.load("main").unwrap();
    let mut calls = Vec::new();
    loop {
        match vm.step().unwrap() {
            Step::Continue => {}
            Step::Finished => break,
            Step::Builtin { function, argc } => {
                calls.push((function, argc));
                vm.call_builtin(function, argc).unwrap();
            }
            Step::State { .. } => unreachable!(),
        }
    }
    assert_eq!(calls, vec![(sum as usize, 3)]);
    assert_eq!(vm.get_return_float().unwrap(), 6.0);
    assert_eq!(vm.depth(), 0);
}

#[test]
fn call_builtin_rejects_bytecode_functions() {
    let mut vm = instance(&sum_image(2));
    let main = vm.find_function("main").unwrap();
    assert_eq!(
        vm.call_builtin(main, 0),
        Err(VmError::InvalidFunction(main as i32))
    );
    assert_eq!(vm.call_builtin(99, 0), Err(VmError::InvalidFunction(99)));
    assert_eq!(vm.call_builtin(0, 0), Err(VmError::InvalidFunction(0)));
}

#[test]
fn builtin_run_directly() {
    let mut vm = instance(&twice_image(|b| b.builtin("double", &[1])));
    vm.builtins_mut().register("double", |vm| {
        let x = vm.get_parm_float(0)?;
        vm.return_float(x * 2.0)
    });
    vm.set_parm_float(0, 8.0).unwrap();
    vm.run("double").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 16.0);
}

#[test]
fn builtin_reenters_run() {
    let mut b = ImageBuilder::new();
    let callback = b.builtin("callback", &[]);
    b.function("inner", &[]);
    let k = b.float(21.0);
    b.emit(Opcode::Return, k, 0, 0);
    b.end_function();
    b.function("main", &[]);
    let f = b.function_constant(callback);
    let two = b.float(2.0);
    let t = b.local();
    b.emit(Opcode::Call0, f, 0, 0);
    b.emit(Opcode::MulF, RET, two, t);
    b.emit(Opcode::Return, t, 0, 0);
    b.end_function();

    let mut vm = instance(&b.build());
    vm.builtins_mut().register("callback", |vm| {
        let depth = vm.depth();
        vm.run("inner")?;
        assert_eq!(vm.depth(), depth);
        let v = vm.get_return_float()?;
        vm.return_float(v)
    });

    vm.run("main").unwrap();
    assert_eq!(vm.get_return_float().unwrap(), 42.0);
    assert_eq!(vm.depth(), 0);
}

// ══════════════════════════════════════════════════════════════════════════════
// Byte order
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn opposite_endian_host_executes_identically() {
    let bytes = factorial_image();
    let native = Image::parse_as(&bytes, ByteOrder::Little).unwrap();
    let swapped = Image::parse_as(&bytes, ByteOrder::Big).unwrap();
    let again = Image::parse_as(&bytes, ByteOrder::Big).unwrap();
    assert!(swapped.swapped_fields > 0);
    assert_eq!(swapped.swapped_fields, again.swapped_fields);

    let mut a = Vm::new(native, VmConfig::default());
    let mut b = Vm::new(swapped, VmConfig::default());
    let mut c = Vm::new(again, VmConfig::default());
    for n in [1.0, 5.0, 7.0] {
        let expected = factorial(&mut a, n);
        assert_eq!(factorial(&mut b, n), expected);
        assert_eq!(factorial(&mut c, n), expected);
    }
    assert_eq!(factorial(&mut b, 5.0), 120.0);
}
