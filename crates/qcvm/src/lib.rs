//! QCVM: an embeddable QuakeC "progs" virtual machine.
//!
//! A [`Vm`] owns one loaded image and every buffer the program touches:
//! globals, entities, tempstrings and the call/spill stacks.
//!
//! # Usage
//!
//! ```text
//! let mut vm = Vm::from_bytes(&bytes, VmConfig::default())?;
//! vm.builtins_mut().register("print", |vm| { ... ; Ok(()) });
//! vm.set_parm_float(0, 2.0)?;
//! vm.run("main")?;
//! let result = vm.get_return_float()?;
//! ```

pub mod builtins;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod memory;
pub mod stack;
pub mod strings;
pub mod vm;

pub use builtins::{Builtin, BuiltinEntry, Builtins, Signature, ValueType};
pub use config::VmConfig;
pub use dispatch::Step;
pub use error::{VmError, VmResult};
pub use host::FunctionRef;
pub use stack::Frame;
pub use vm::{StateHandler, Vm};

pub use qcvm_image::{DefType, EntityLayout, Image, Slot};
