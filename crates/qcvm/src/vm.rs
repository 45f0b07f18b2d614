//! The VM instance: owned memory, run loop and builtin bridge.

use std::sync::Arc;

use qcvm_image::{EntityLayout, Image};
use tracing::{debug, warn};

use crate::builtins::Builtins;
use crate::config::VmConfig;
use crate::dispatch::Step;
use crate::error::{VmError, VmResult};
use crate::host::FunctionRef;
use crate::memory::{Entities, Globals};
use crate::stack::{CallStack, Frame};
use crate::strings::TempStrings;

/// Callback for the `STATE` opcode: `(vm, frame, think_function)`.
pub type StateHandler = Arc<dyn Fn(&mut Vm, f32, i32) -> VmResult<()> + Send + Sync>;

/// One independent program instance.
///
/// Owns every mutable buffer a program touches; instances share nothing and
/// may coexist freely. A single instance is driven by one thread at a time.
pub struct Vm {
    pub(crate) image: Image,
    pub(crate) globals: Globals,
    pub(crate) entities: Entities,
    pub(crate) temp: TempStrings,
    pub(crate) stack: CallStack,
    pub(crate) builtins: Builtins,
    /// Builtin table index per function, filled on first name resolution.
    pub(crate) resolved: Vec<Option<usize>>,
    pub(crate) profile: Vec<u64>,
    pub(crate) state_handler: Option<StateHandler>,
    pub(crate) active: Frame,
    pub(crate) running: bool,
    pub(crate) argc: usize,
    pub(crate) exit_depth: usize,
    pub(crate) executed: u64,
    pub(crate) config: VmConfig,
}

impl Vm {
    pub fn new(image: Image, config: VmConfig) -> Self {
        let functions = image.functions.len();
        Self {
            globals: Globals::new(image.globals.clone()),
            entities: Entities::new(image.entity_fields(), config.max_entities),
            temp: TempStrings::new(config.tempstrings_size),
            stack: CallStack::new(config.max_call_depth, config.local_stack_size),
            builtins: Builtins::new(),
            resolved: vec![None; functions],
            profile: vec![0; functions],
            state_handler: None,
            active: Frame::default(),
            running: false,
            argc: 0,
            exit_depth: 0,
            executed: 0,
            image,
            config,
        }
    }

    /// Load and validate an image, then build a VM around it.
    pub fn from_bytes(bytes: &[u8], config: VmConfig) -> VmResult<Self> {
        let image = Image::parse(bytes)?;
        Ok(Self::new(image, config))
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn entity_layout(&self) -> EntityLayout {
        EntityLayout {
            fields: self.entities.fields(),
            size: self.entities.entity_size(),
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// The builtin table; register entries before the first run.
    pub fn builtins_mut(&mut self) -> &mut Builtins {
        &mut self.builtins
    }

    pub fn set_builtins(&mut self, builtins: Builtins) {
        self.builtins = builtins;
        self.resolved.fill(None);
    }

    pub fn set_state_handler<F>(&mut self, handler: F)
    where
        F: Fn(&mut Vm, f32, i32) -> VmResult<()> + Send + Sync + 'static,
    {
        self.state_handler = Some(Arc::new(handler));
    }

    /// Allocate the next entity of the entity buffer.
    pub fn add_entity(&mut self) -> VmResult<i32> {
        self.entities.allocate()
    }

    /// Entities allocated with [`Vm::add_entity`].
    pub fn num_entities(&self) -> usize {
        self.entities.allocated()
    }

    /// Current frame-stack depth.
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Statements executed by this instance since creation.
    pub fn statements_executed(&self) -> u64 {
        self.executed
    }

    /// Statements executed while `function` was active.
    pub fn profile(&self, function: usize) -> u64 {
        self.profile.get(function).copied().unwrap_or(0)
    }

    /// The active return point: current statement and function.
    pub fn active_frame(&self) -> Frame {
        self.active
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Enter a bytecode function without executing it; drive it with
    /// [`Vm::step`]. Parameters must already be set.
    ///
    /// Returns the function index.
    pub fn load<'a>(&mut self, function: impl Into<FunctionRef<'a>>) -> VmResult<usize> {
        let index = self.resolve_function(function.into())?;
        let func = self.image.functions[index];
        if !func.has_body() {
            return Err(VmError::InvalidFunction(index as i32));
        }
        debug!(
            function = %self.image.string_lossy(func.name),
            index,
            depth = self.stack.depth(),
            "entering function"
        );
        let next = self.stack.enter(&mut self.globals, self.active, &func)?;
        self.argc = func.parm_widths().len();
        self.active = Frame {
            statement: next,
            function: index,
        };
        self.running = true;
        Ok(index)
    }

    /// Execute `function` until it returns.
    ///
    /// Reentrant: a builtin may call `run` on the instance that invoked it.
    /// Builtin functions may be run directly as well.
    pub fn run<'a>(&mut self, function: impl Into<FunctionRef<'a>>) -> VmResult<()> {
        let function = function.into();
        let index = self.resolve_function(function)?;
        if !self.image.functions[index].has_body() {
            let argc = self.image.functions[index].parm_widths().len();
            return self.call_builtin(index, argc);
        }

        let saved_exit = self.exit_depth;
        let saved_argc = self.argc;
        self.exit_depth = self.stack.depth();
        let mut result = self.load(index).and_then(|_| self.execute());
        if let Err(e) = &result {
            if !e.is_fatal() {
                debug!(error = %e, depth = self.stack.depth(), "unwinding");
                if let Err(fatal) = self.unwind() {
                    result = Err(fatal);
                }
            }
        }
        self.exit_depth = saved_exit;
        self.argc = saved_argc;
        result
    }

    /// Leave every frame entered since the current run began, restoring
    /// each function's local window.
    ///
    /// Hosts driving [`Vm::step`] themselves call this to abandon a
    /// function after an error.
    pub fn unwind(&mut self) -> VmResult<()> {
        while self.stack.depth() > self.exit_depth {
            let record = self
                .image
                .functions
                .get(self.active.function)
                .copied()
                .ok_or(VmError::InvalidFunction(self.active.function as i32))?;
            self.active = self.stack.leave(&mut self.globals, &record)?;
        }
        self.running = self.stack.depth() > 0;
        Ok(())
    }

    fn execute(&mut self) -> VmResult<()> {
        let mut executed: u64 = 0;
        loop {
            if let Some(limit) = self.config.statement_limit {
                if executed >= limit {
                    return Err(VmError::StatementLimit(limit));
                }
            }
            executed += 1;

            match self.step()? {
                Step::Continue => {}
                Step::Finished => {
                    debug!(executed, depth = self.stack.depth(), "run finished");
                    return Ok(());
                }
                Step::Builtin { function, argc } => self.call_builtin(function, argc)?,
                Step::State { frame, think } => {
                    if let Some(handler) = self.state_handler.clone() {
                        handler(self, frame, think)?;
                    }
                }
            }
        }
    }

    // ── Builtin bridge ───────────────────────────────────────────────────────

    /// Invoke the builtin behind a bodiless function record with `argc`
    /// arguments already in the parameter slots.
    ///
    /// This is how a host driving [`Vm::step`] answers
    /// [`Step::Builtin`]; stepping resumes after the call statement.
    pub fn call_builtin(&mut self, function: usize, argc: usize) -> VmResult<()> {
        let Some(&record) = self.image.functions.get(function).filter(|_| function > 0) else {
            return Err(VmError::InvalidFunction(function as i32));
        };
        if record.has_body() {
            return Err(VmError::InvalidFunction(function as i32));
        }
        self.argc = argc;
        let name = self.image.string(record.name);

        let index = match self.resolved[function] {
            Some(index) => index,
            None if record.first_statement == 0 => match self.builtins.search(name) {
                Some(index) => {
                    debug!(
                        builtin = %String::from_utf8_lossy(name),
                        function,
                        index,
                        "resolved builtin"
                    );
                    self.resolved[function] = Some(index);
                    index
                }
                None => {
                    let name = String::from_utf8_lossy(name).into_owned();
                    warn!(builtin = %name, function, "builtin not found");
                    return Err(VmError::BuiltinNotFound(name));
                }
            },
            None => match record.builtin_index() {
                Some(index) => index,
                None => return Err(VmError::InvalidFunction(function as i32)),
            },
        };

        let Some(entry) = self.builtins.get(index) else {
            return Err(VmError::BuiltinNotFound(format!(
                "{} (#{index})",
                String::from_utf8_lossy(name)
            )));
        };
        let func = Arc::clone(&entry.func);
        func.call(self)
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("functions", &self.image.functions.len())
            .field("globals", &self.globals.len())
            .field("depth", &self.stack.depth())
            .field("active", &self.active)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}
