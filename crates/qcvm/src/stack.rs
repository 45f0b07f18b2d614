//! Call stack manager.
//!
//! Every function's parameters and locals live in a fixed window of the
//! global array, shared by all activations of that function. Entering a
//! function saves its window onto the spill stack before the parameters
//! are copied in; leaving restores it. Frames and spill segments are
//! pushed and popped in strict LIFO order.

use qcvm_image::format::parm_offset;
use qcvm_image::{Function, Slot};

use crate::error::{VmError, VmResult};
use crate::memory::Globals;

/// A return point: the statement to resume after (the dispatcher
/// pre-increments) and the function that owns it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    pub statement: i32,
    pub function: usize,
}

#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<Frame>,
    spill: Vec<Slot>,
    max_depth: usize,
    spill_size: usize,
}

/// Local window `(first_parm, num_locals)` of a function record.
fn window(function: &Function) -> (usize, usize) {
    (
        usize::try_from(function.first_parm).unwrap_or(0),
        usize::try_from(function.num_locals).unwrap_or(0),
    )
}

impl CallStack {
    pub fn new(max_depth: usize, spill_size: usize) -> Self {
        Self {
            frames: Vec::with_capacity(max_depth),
            spill: Vec::with_capacity(spill_size),
            max_depth,
            spill_size,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Words currently saved on the spill stack.
    pub fn spilled(&self) -> usize {
        self.spill.len()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Push `caller`, save `function`'s window and copy the argument
    /// triples into its parameters.
    ///
    /// Returns the statement index to resume from, biased by -1.
    pub fn enter(
        &mut self,
        globals: &mut Globals,
        caller: Frame,
        function: &Function,
    ) -> VmResult<i32> {
        if self.frames.len() >= self.max_depth {
            return Err(VmError::StackOverflow);
        }
        let (first, len) = window(function);
        if self.spill.len() + len > self.spill_size {
            return Err(VmError::StackOverflow);
        }
        let saved = globals.words(first, len)?;
        self.spill.extend_from_slice(saved);
        self.frames.push(caller);

        let mut dst = first;
        for (i, &width) in function.parm_widths().iter().enumerate() {
            let width = usize::from(width);
            globals.copy(parm_offset(i), dst, width)?;
            dst += width;
        }
        Ok(function.first_statement - 1)
    }

    /// Restore `active`'s window and pop the frame that called it.
    pub fn leave(&mut self, globals: &mut Globals, active: &Function) -> VmResult<Frame> {
        let Some(&frame) = self.frames.last() else {
            return Err(VmError::StackUnderflow);
        };
        let (first, len) = window(active);
        if len > self.spill.len() {
            return Err(VmError::StackUnderflow);
        }
        let start = self.spill.len() - len;
        globals.write(first, &self.spill[start..])?;
        self.spill.truncate(start);
        self.frames.pop();
        Ok(frame)
    }
}
