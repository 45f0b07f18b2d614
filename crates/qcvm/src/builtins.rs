//! Host-native functions reachable from bytecode.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use qcvm_image::format::MAX_PARMS;

use crate::error::VmResult;
use crate::vm::Vm;

/// A native function callable from bytecode.
///
/// Arguments are read from and results written to the VM's reserved slots
/// through the host API. Any state the builtin needs is whatever the
/// implementor carries.
pub trait Builtin: Send + Sync {
    fn call(&self, vm: &mut Vm) -> VmResult<()>;
}

impl<F> Builtin for F
where
    F: Fn(&mut Vm) -> VmResult<()> + Send + Sync,
{
    fn call(&self, vm: &mut Vm) -> VmResult<()> {
        self(vm)
    }
}

/// Types a builtin may declare for its result and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Void,
    Float,
    Int,
    Entity,
    String,
    Vector,
}

impl ValueType {
    /// QuakeC type keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            ValueType::Void => "void",
            ValueType::Float => "float",
            ValueType::Int => "int",
            ValueType::Entity => "entity",
            ValueType::String => "string",
            ValueType::Vector => "vector",
        }
    }
}

/// Declared QuakeC prototype of a builtin.
///
/// ```
/// use qcvm::{Signature, ValueType};
///
/// let sig = Signature::new(ValueType::Float)
///     .param("x", ValueType::Float)
///     .variadic();
/// assert_eq!(sig.prototype("max"), "float max(float x, ...) = #0 : max;");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub returns: ValueType,
    pub params: Vec<(String, ValueType)>,
    pub variadic: bool,
}

impl Signature {
    pub fn new(returns: ValueType) -> Self {
        Self {
            returns,
            params: Vec::new(),
            variadic: false,
        }
    }

    /// Add a named parameter. Parameters past the eighth are ignored.
    pub fn param(mut self, name: &str, ty: ValueType) -> Self {
        if self.params.len() < MAX_PARMS {
            self.params.push((name.to_string(), ty));
        }
        self
    }

    /// Accept any number of trailing arguments.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// The declaration a QuakeC program uses to bind builtin `name` by name.
    pub fn prototype(&self, name: &str) -> String {
        let mut params: Vec<String> = self
            .params
            .iter()
            .map(|(n, ty)| format!("{} {n}", ty.keyword()))
            .collect();
        if self.variadic {
            params.push("...".to_string());
        }
        format!(
            "{} {name}({}) = #0 : {name};",
            self.returns.keyword(),
            params.join(", ")
        )
    }
}

#[derive(Clone)]
pub struct BuiltinEntry {
    pub name: String,
    pub signature: Option<Signature>,
    pub func: Arc<dyn Builtin>,
}

impl fmt::Debug for BuiltinEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// The host builtin table.
///
/// Indices are stable: images may encode them directly as `-(index + 1)`
/// in a function's body marker.
#[derive(Debug, Clone, Default)]
pub struct Builtins {
    entries: Vec<Option<BuiltinEntry>>,
    name_searches: u64,
}

impl Builtins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a builtin; returns its index.
    pub fn register<F>(&mut self, name: &str, func: F) -> usize
    where
        F: Fn(&mut Vm) -> VmResult<()> + Send + Sync + 'static,
    {
        self.entries.push(Some(BuiltinEntry {
            name: name.to_string(),
            signature: None,
            func: Arc::new(func),
        }));
        self.entries.len() - 1
    }

    /// Append a builtin with a declared prototype; returns its index.
    pub fn register_typed<F>(&mut self, name: &str, signature: Signature, func: F) -> usize
    where
        F: Fn(&mut Vm) -> VmResult<()> + Send + Sync + 'static,
    {
        let index = self.register(name, func);
        if let Some(Some(entry)) = self.entries.get_mut(index) {
            entry.signature = Some(signature);
        }
        index
    }

    /// Place a builtin at a fixed index, leaving any gap empty.
    pub fn register_at<F>(&mut self, index: usize, name: &str, func: F)
    where
        F: Fn(&mut Vm) -> VmResult<()> + Send + Sync + 'static,
    {
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(BuiltinEntry {
            name: name.to_string(),
            signature: None,
            func: Arc::new(func),
        });
    }

    /// Table size, including empty slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BuiltinEntry> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Find a builtin by exact name.
    pub fn search(&mut self, name: &[u8]) -> Option<usize> {
        self.name_searches += 1;
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.name.as_bytes() == name))
    }

    /// How many times [`Builtins::search`] has run.
    pub fn name_searches(&self) -> u64 {
        self.name_searches
    }

    pub fn names(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e.name.as_str())))
    }

    /// Write a QuakeC prototype for every builtin with a declared
    /// signature, one per line, in table order.
    pub fn dump_qc(&self, out: &mut impl Write) -> io::Result<()> {
        for entry in self.entries.iter().flatten() {
            if let Some(sig) = &entry.signature {
                writeln!(out, "{}", sig.prototype(&entry.name))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Vm) -> VmResult<()> {
        Ok(())
    }

    #[test]
    fn register_and_search() {
        let mut table = Builtins::new();
        assert_eq!(table.register("print", noop), 0);
        assert_eq!(table.register("spawn", noop), 1);
        assert_eq!(table.search(b"spawn"), Some(1));
        assert_eq!(table.search(b"spaw"), None);
        assert_eq!(table.name_searches(), 2);
    }

    #[test]
    fn prototypes() {
        assert_eq!(
            Signature::new(ValueType::Void).prototype("traceon"),
            "void traceon() = #0 : traceon;"
        );
        let sig = Signature::new(ValueType::Vector)
            .param("v", ValueType::Vector)
            .param("e", ValueType::Entity);
        assert_eq!(
            sig.prototype("normalize"),
            "vector normalize(vector v, entity e) = #0 : normalize;"
        );

        let mut wide = Signature::new(ValueType::Void);
        for i in 0..10 {
            wide = wide.param(&format!("p{i}"), ValueType::Int);
        }
        assert_eq!(wide.params.len(), 8);
    }

    #[test]
    fn dump_skips_untyped_builtins() {
        let mut table = Builtins::new();
        table.register_typed(
            "print",
            Signature::new(ValueType::Void)
                .param("s", ValueType::String)
                .variadic(),
            noop,
        );
        table.register("hidden", noop);
        table.register_typed("random", Signature::new(ValueType::Float), noop);

        let mut out = Vec::new();
        table.dump_qc(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "void print(string s, ...) = #0 : print;\nfloat random() = #0 : random;\n"
        );
        assert_eq!(table.get(1).map(|e| e.signature.is_none()), Some(true));
    }

    #[test]
    fn fixed_indices_leave_gaps() {
        let mut table = Builtins::new();
        table.register_at(3, "traceon", noop);
        assert_eq!(table.len(), 4);
        assert!(table.get(0).is_none());
        assert_eq!(table.get(3).map(|e| e.name.as_str()), Some("traceon"));
        assert_eq!(table.names().collect::<Vec<_>>(), vec![(3, "traceon")]);
    }
}
