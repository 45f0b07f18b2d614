//! Single-statement execution.
//!
//! [`Vm::step`] advances the statement index, fetches, and executes one
//! instruction. Anything the dispatcher cannot finish on its own (native
//! calls, `STATE` callbacks) is handed back to the caller as a [`Step`].

use qcvm_image::format::OFS_RETURN;
use qcvm_image::{Opcode, Slot};
use tracing::trace;

use crate::error::{VmError, VmResult};
use crate::stack::Frame;
use crate::strings;
use crate::vm::Vm;

/// Outcome of one [`Vm::step`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Keep stepping.
    Continue,
    /// The function entered by the outermost `load` / `run` returned.
    Finished,
    /// A call targeted a function without a bytecode body.
    Builtin { function: usize, argc: usize },
    /// A `STATE` instruction wants the host to update the current entity.
    State { frame: f32, think: i32 },
}

/// Operand as a global slot index.
fn slot(operand: i16) -> usize {
    usize::from(operand as u16)
}

impl Vm {
    /// Execute one statement.
    pub fn step(&mut self) -> VmResult<Step> {
        if !self.running {
            return Err(VmError::NotRunning);
        }

        self.active.statement += 1;
        let at = self.active.statement;
        let st = usize::try_from(at)
            .ok()
            .and_then(|i| self.image.statements.get(i))
            .copied()
            .ok_or(VmError::StatementOutOfRange(at))?;
        if let Some(count) = self.profile.get_mut(self.active.function) {
            *count += 1;
        }
        self.executed += 1;

        let op = Opcode::from_u16(st.opcode).ok_or(VmError::InvalidOpcode {
            opcode: st.opcode,
            statement: at,
        })?;
        trace!(statement = at, op = op.name(), a = st.a, b = st.b, c = st.c);

        let (a, b, c) = (slot(st.a), slot(st.b), slot(st.c));
        let g = &mut self.globals;

        match op {
            // ── Arithmetic ──
            Opcode::MulF => g.set_float(c, g.float(a)? * g.float(b)?)?,
            Opcode::DivF => g.set_float(c, g.float(a)? / g.float(b)?)?,
            Opcode::AddF => g.set_float(c, g.float(a)? + g.float(b)?)?,
            Opcode::SubF => g.set_float(c, g.float(a)? - g.float(b)?)?,
            Opcode::MulV => {
                let (x, y) = (g.vector(a)?, g.vector(b)?);
                g.set_float(c, x[0] * y[0] + x[1] * y[1] + x[2] * y[2])?;
            }
            Opcode::MulFV => {
                let (f, v) = (g.float(a)?, g.vector(b)?);
                g.set_vector(c, v.map(|x| f * x))?;
            }
            Opcode::MulVF => {
                let (v, f) = (g.vector(a)?, g.float(b)?);
                g.set_vector(c, v.map(|x| x * f))?;
            }
            Opcode::AddV => {
                let (x, y) = (g.vector(a)?, g.vector(b)?);
                g.set_vector(c, [x[0] + y[0], x[1] + y[1], x[2] + y[2]])?;
            }
            Opcode::SubV => {
                let (x, y) = (g.vector(a)?, g.vector(b)?);
                g.set_vector(c, [x[0] - y[0], x[1] - y[1], x[2] - y[2]])?;
            }

            // ── Comparison ──
            Opcode::EqF => g.set(c, Slot::from_bool(g.float(a)? == g.float(b)?))?,
            Opcode::NeF => g.set(c, Slot::from_bool(g.float(a)? != g.float(b)?))?,
            Opcode::EqV => g.set(c, Slot::from_bool(g.vector(a)? == g.vector(b)?))?,
            Opcode::NeV => g.set(c, Slot::from_bool(g.vector(a)? != g.vector(b)?))?,
            Opcode::EqE | Opcode::EqFnc => g.set(c, Slot::from_bool(g.int(a)? == g.int(b)?))?,
            Opcode::NeE | Opcode::NeFnc => g.set(c, Slot::from_bool(g.int(a)? != g.int(b)?))?,
            Opcode::EqS | Opcode::NeS => {
                let x = strings::resolve(&self.image, &self.temp, g.int(a)?);
                let y = strings::resolve(&self.image, &self.temp, g.int(b)?);
                let equal = x == y;
                g.set(c, Slot::from_bool(equal == (op == Opcode::EqS)))?;
            }
            Opcode::Le => g.set(c, Slot::from_bool(g.float(a)? <= g.float(b)?))?,
            Opcode::Ge => g.set(c, Slot::from_bool(g.float(a)? >= g.float(b)?))?,
            Opcode::Lt => g.set(c, Slot::from_bool(g.float(a)? < g.float(b)?))?,
            Opcode::Gt => g.set(c, Slot::from_bool(g.float(a)? > g.float(b)?))?,

            // ── Logic ──
            Opcode::And => g.set(
                c,
                Slot::from_bool(g.get(a)?.is_true_float() && g.get(b)?.is_true_float()),
            )?,
            Opcode::Or => g.set(
                c,
                Slot::from_bool(g.get(a)?.is_true_float() || g.get(b)?.is_true_float()),
            )?,
            Opcode::BitAnd => g.set_float(c, ((g.float(a)? as i32) & (g.float(b)? as i32)) as f32)?,
            Opcode::BitOr => g.set_float(c, ((g.float(a)? as i32) | (g.float(b)? as i32)) as f32)?,
            Opcode::NotF => g.set(c, Slot::from_bool(!g.get(a)?.is_true_float()))?,
            Opcode::NotV => g.set(c, Slot::from_bool(g.vector(a)? == [0.0; 3]))?,
            Opcode::NotS => {
                let ofs = g.int(a)?;
                let empty = ofs == 0 || strings::resolve(&self.image, &self.temp, ofs).is_empty();
                g.set(c, Slot::from_bool(empty))?;
            }
            Opcode::NotEnt | Opcode::NotFnc => g.set(c, Slot::from_bool(g.int(a)? == 0))?,

            // ── Entity fields ──
            Opcode::LoadF
            | Opcode::LoadS
            | Opcode::LoadEnt
            | Opcode::LoadFld
            | Opcode::LoadFnc
            | Opcode::LoadV => {
                let width = if op == Opcode::LoadV { 3 } else { 1 };
                let word = self.entities.field_word(g.int(a)?, g.int(b)?, width)?;
                g.write(c, self.entities.read(word, width))?;
            }
            Opcode::Address => {
                let address = self.entities.address(g.int(a)?, g.int(b)?)?;
                g.set_int(c, address)?;
            }
            Opcode::StorePF
            | Opcode::StorePS
            | Opcode::StorePEnt
            | Opcode::StorePFld
            | Opcode::StorePFnc
            | Opcode::StorePV => {
                let width = if op == Opcode::StorePV { 3 } else { 1 };
                let word = self.entities.pointer_word(g.int(b)?, width)?;
                self.entities.write(word, g.words(a, width)?);
            }

            // ── Globals ──
            Opcode::StoreF
            | Opcode::StoreS
            | Opcode::StoreEnt
            | Opcode::StoreFld
            | Opcode::StoreFnc => g.copy(a, b, 1)?,
            Opcode::StoreV => g.copy(a, b, 3)?,

            // ── Control flow ──
            Opcode::If => {
                if g.int(a)? != 0 {
                    self.active.statement += i32::from(st.b) - 1;
                }
            }
            Opcode::IfNot => {
                if g.int(a)? == 0 {
                    self.active.statement += i32::from(st.b) - 1;
                }
            }
            Opcode::Goto => self.active.statement += i32::from(st.a) - 1,

            Opcode::Call0
            | Opcode::Call1
            | Opcode::Call2
            | Opcode::Call3
            | Opcode::Call4
            | Opcode::Call5
            | Opcode::Call6
            | Opcode::Call7
            | Opcode::Call8 => {
                let argc = op.call_argc().unwrap_or(0);
                let target = g.int(a)?;
                let function = usize::try_from(target)
                    .ok()
                    .filter(|&f| f >= 1 && f < self.image.functions.len())
                    .ok_or(VmError::InvalidFunction(target))?;
                self.argc = argc;
                let record = self.image.functions[function];
                if !record.has_body() {
                    return Ok(Step::Builtin { function, argc });
                }
                let next = self.stack.enter(&mut self.globals, self.active, &record)?;
                self.active = Frame {
                    statement: next,
                    function,
                };
            }

            Opcode::Done | Opcode::Return => {
                // scalar returns may sit in the last global slots
                let n = 3.min(g.len().saturating_sub(a));
                if n == 0 {
                    return Err(VmError::InvalidAddress(format!("return value at {a}")));
                }
                let mut value = [Slot::ZERO; 3];
                value[..n].copy_from_slice(g.words(a, n)?);
                g.write(OFS_RETURN, &value)?;

                let record = self.image.functions[self.active.function];
                self.active = self.stack.leave(&mut self.globals, &record)?;
                if self.stack.depth() == self.exit_depth {
                    self.running = self.stack.depth() > 0;
                    return Ok(Step::Finished);
                }
            }

            Opcode::State => {
                return Ok(Step::State {
                    frame: g.float(a)?,
                    think: g.int(b)?,
                });
            }
        }

        Ok(Step::Continue)
    }
}
