//! The builtins the command-line host provides, and logging setup.

use std::io::Write;

use qcvm::{Builtins, Signature, ValueType, Vm, VmError, VmResult};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// `trace` additionally enables per-statement tracing.
pub fn init_logging(trace: bool) {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,qcvm=info"));
    if trace {
        if let Ok(directive) = "qcvm=trace".parse() {
            filter = filter.add_directive(directive);
        }
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Concatenate every string argument of the current call.
pub fn message(vm: &Vm) -> VmResult<String> {
    let mut out = String::new();
    for i in 0..vm.argc() {
        out.push_str(&vm.get_parm_string(i)?);
    }
    Ok(out)
}

/// `print(...)` writes to stdout; `dprint(...)` goes to the log.
pub fn register(builtins: &mut Builtins) {
    let variadic = || Signature::new(ValueType::Void).variadic();
    builtins.register_typed("print", variadic(), |vm| {
        let text = message(vm)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| VmError::Host(e.to_string()))
    });
    builtins.register_typed("dprint", variadic(), |vm| {
        let text = message(vm)?;
        info!(target: "qcvm::script", "{}", text.trim_end());
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use qcvm::VmConfig;
    use qcvm_image::format::{parm_offset, OFS_RETURN};
    use qcvm_image::{ImageBuilder, Opcode};

    use super::*;

    #[test]
    fn host_builtins_dump_as_prototypes() {
        let mut table = Builtins::new();
        register(&mut table);
        let mut out = Vec::new();
        table.dump_qc(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "void print(...) = #0 : print;\nvoid dprint(...) = #0 : dprint;\n"
        );
    }

    #[test]
    fn message_joins_arguments() {
        let mut b = ImageBuilder::new();
        let join = b.builtin("join", &[1, 1, 1]);
        b.function("main", &[]);
        let f = b.function_constant(join);
        let parts = ["a", "bc", "!"].map(|s| b.string_constant(s));
        for (i, p) in parts.iter().enumerate() {
            b.emit(Opcode::StoreS, *p, parm_offset(i) as u16, 0);
        }
        b.emit(Opcode::Call3, f, 0, 0);
        b.emit(Opcode::Return, OFS_RETURN as u16, 0, 0);
        b.end_function();

        let mut vm = Vm::from_bytes(&b.build(), VmConfig::default()).unwrap();
        register(vm.builtins_mut());
        vm.builtins_mut().register("join", |vm| {
            let s = message(vm)?;
            vm.return_string(&s)
        });
        vm.run("main").unwrap();
        assert_eq!(vm.get_return_string().unwrap(), "abc!");
        assert_eq!(
            vm.builtins().names().map(|(_, n)| n).collect::<Vec<_>>(),
            ["print", "dprint", "join"]
        );
    }
}
