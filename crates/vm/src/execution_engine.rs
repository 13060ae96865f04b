//! The gas-metered dispatch loop.

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::{BigInt, Sign as BigSign};
use num_traits::{One, Signed, ToPrimitive, Zero};
use tracing::debug;

use crate::call_flags::CallFlags;
use crate::error::{VmError, VmResult};
use crate::execution_context::{
    ExceptionHandlingContext, ExecutionContext, Slot, TryState,
};
use crate::interop_service::InteropService;
use crate::op_code::OpCode;
use crate::reference_counter::{count_reachable, ReferenceCounter};
use crate::script::{Instruction, Script};
use crate::stack_item::{
    check_integer, StackItem, StackItemType, MAX_ITEM_SIZE,
};

/// Overall machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VMState {
    /// Loaded but not yet running.
    Break,
    /// Running.
    None,
    /// Finished cleanly; results are on the result stack.
    Halt,
    /// Stopped on an uncaught exception or a limit breach.
    Fault,
}

/// What a single step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// An ordinary instruction ran.
    Continue,
    /// A `SYSCALL` passed its gas and flag checks; the host must handle it.
    Syscall(u32),
    /// The machine reached `Halt` or `Fault`.
    Finished,
}

/// Hard resource bounds of the machine.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    /// Reachable stack items across all stacks and slots.
    pub max_stack_size: usize,
    /// Depth of the invocation stack.
    pub max_invocation_depth: usize,
    /// Nesting of try frames per context.
    pub max_try_nesting: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_stack_size: 2048,
            max_invocation_depth: 1024,
            max_try_nesting: 16,
        }
    }
}

/// The stack machine.
pub struct ExecutionEngine {
    state: VMState,
    invocation_stack: Vec<ExecutionContext>,
    result_stack: Vec<StackItem>,
    reference_counter: ReferenceCounter,
    interop_service: InteropService,
    limits: ExecutionLimits,
    gas_consumed: i64,
    gas_limit: i64,
    exec_fee_factor: i64,
    uncaught_exception: Option<StackItem>,
    fault_reason: Option<VmError>,
}

impl ExecutionEngine {
    pub fn new(interop_service: InteropService) -> Self {
        Self {
            state: VMState::Break,
            invocation_stack: Vec::new(),
            result_stack: Vec::new(),
            reference_counter: ReferenceCounter::new(),
            interop_service,
            limits: ExecutionLimits::default(),
            gas_consumed: 0,
            gas_limit: i64::MAX,
            exec_fee_factor: 30,
            uncaught_exception: None,
            fault_reason: None,
        }
    }

    pub fn with_limits(interop_service: InteropService, limits: ExecutionLimits) -> Self {
        let mut engine = Self::new(interop_service);
        engine.limits = limits;
        engine
    }

    pub fn state(&self) -> VMState {
        self.state
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn reference_counter(&self) -> &ReferenceCounter {
        &self.reference_counter
    }

    pub fn gas_consumed(&self) -> i64 {
        self.gas_consumed
    }

    /// Sets the gas budget; execution faults when it is exceeded.
    pub fn set_gas_limit(&mut self, limit: i64) {
        self.gas_limit = limit;
    }

    /// Sets the multiplier applied to base opcode and syscall prices.
    pub fn set_exec_fee_factor(&mut self, factor: i64) {
        self.exec_fee_factor = factor.max(1);
    }

    /// Charges `base * fee factor` gas.
    pub fn add_gas(&mut self, base: i64) -> VmResult<()> {
        self.add_gas_unscaled(base.saturating_mul(self.exec_fee_factor))
    }

    /// Charges an already-denominated gas amount, bypassing the fee factor.
    pub fn add_gas_unscaled(&mut self, amount: i64) -> VmResult<()> {
        self.gas_consumed = self.gas_consumed.saturating_add(amount);
        if self.gas_consumed > self.gas_limit {
            return Err(VmError::GasExhausted {
                limit: self.gas_limit,
                consumed: self.gas_consumed,
            });
        }
        Ok(())
    }

    /// Remaining gas budget; `i64::MAX` means effectively unlimited.
    pub fn gas_left(&self) -> i64 {
        self.gas_limit.saturating_sub(self.gas_consumed)
    }

    /// The exception that faulted the machine, if any.
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    /// Why the machine faulted, if it did.
    pub fn fault_reason(&self) -> Option<&VmError> {
        self.fault_reason.as_ref()
    }

    pub fn invocation_depth(&self) -> usize {
        self.invocation_stack.len()
    }

    pub fn current_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.last()
    }

    pub fn current_context_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.invocation_stack.last_mut()
    }

    /// Items left after a `Halt`, bottom first.
    pub fn result_stack(&self) -> &[StackItem] {
        &self.result_stack
    }

    /// Removes and returns the top of the result stack.
    pub fn pop_result(&mut self) -> Option<StackItem> {
        let item = self.result_stack.pop();
        if let Some(item) = &item {
            self.reference_counter.remove_stack_reference(item);
        }
        item
    }

    /// Loads a script as a new entry context.
    pub fn load_script(
        &mut self,
        script: Script,
        rv_count: i32,
        call_flags: CallFlags,
    ) -> VmResult<()> {
        let mut context = ExecutionContext::new(
            Rc::new(script),
            rv_count,
            self.reference_counter.clone(),
        );
        context.call_flags = call_flags;
        self.load_context(context)
    }

    fn load_context(&mut self, context: ExecutionContext) -> VmResult<()> {
        if self.invocation_stack.len() >= self.limits.max_invocation_depth {
            return Err(VmError::InvocationOverflow);
        }
        self.invocation_stack.push(context);
        Ok(())
    }

    fn context(&self) -> VmResult<&ExecutionContext> {
        self.invocation_stack
            .last()
            .ok_or_else(|| VmError::InvalidOperation("no executing context".into()))
    }

    fn context_mut(&mut self) -> VmResult<&mut ExecutionContext> {
        self.invocation_stack
            .last_mut()
            .ok_or_else(|| VmError::InvalidOperation("no executing context".into()))
    }

    /// Pushes onto the current context's evaluation stack.
    pub fn push(&mut self, item: StackItem) -> VmResult<()> {
        self.context()?.evaluation_stack.borrow_mut().push(item);
        Ok(())
    }

    /// Pops from the current context's evaluation stack.
    pub fn pop(&mut self) -> VmResult<StackItem> {
        self.context()?.evaluation_stack.borrow_mut().pop()
    }

    /// Clones the item `index` positions from the top.
    pub fn peek(&self, index: usize) -> VmResult<StackItem> {
        Ok(self
            .context()?
            .evaluation_stack
            .borrow()
            .peek(index)?
            .clone())
    }

    pub fn pop_integer(&mut self) -> VmResult<BigInt> {
        self.pop()?.try_integer()
    }

    pub fn pop_bool(&mut self) -> VmResult<bool> {
        self.pop()?.try_bool()
    }

    pub fn pop_bytes(&mut self) -> VmResult<Vec<u8>> {
        self.pop()?.try_bytes()
    }

    /// Pops a non-negative count bounded by the stack size limit.
    fn pop_count(&mut self) -> VmResult<usize> {
        let value = self.pop()?.try_i64()?;
        if value < 0 || value as usize > self.limits.max_stack_size {
            return Err(VmError::IndexOutOfRange(value));
        }
        Ok(value as usize)
    }

    /// Runs to completion; any `SYSCALL` faults because no host is attached.
    pub fn execute(&mut self) -> VMState {
        self.execute_with(|_, id| Err(VmError::UnknownSyscall(id)))
    }

    /// Runs to completion, delegating syscalls to `on_syscall`.
    pub fn execute_with<F>(&mut self, mut on_syscall: F) -> VMState
    where
        F: FnMut(&mut ExecutionEngine, u32) -> VmResult<()>,
    {
        loop {
            match self.step() {
                StepOutcome::Finished => break,
                StepOutcome::Continue => {}
                StepOutcome::Syscall(id) => {
                    if let Err(err) = on_syscall(self, id) {
                        self.fault(err);
                        break;
                    }
                }
            }
        }
        self.state
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> StepOutcome {
        if matches!(self.state, VMState::Halt | VMState::Fault) {
            return StepOutcome::Finished;
        }
        if self.state == VMState::Break {
            self.state = VMState::None;
        }
        match self.try_step() {
            Ok(outcome) => outcome,
            Err(err) => {
                self.fault(err);
                StepOutcome::Finished
            }
        }
    }

    fn fault(&mut self, err: VmError) {
        debug!(error = %err, "vm fault");
        self.fault_reason = Some(err);
        self.state = VMState::Fault;
    }

    fn try_step(&mut self) -> VmResult<StepOutcome> {
        if self.invocation_stack.is_empty() {
            self.state = VMState::Halt;
            return Ok(StepOutcome::Finished);
        }
        // Running off the end of a script is an implicit RET.
        {
            let context = self.context()?;
            if context.instruction_pointer >= context.script.len() {
                self.unload_current_context()?;
                if self.invocation_stack.is_empty() {
                    self.state = VMState::Halt;
                    return Ok(StepOutcome::Finished);
                }
                return Ok(StepOutcome::Continue);
            }
        }
        let instruction = self.context()?.current_instruction()?;
        self.add_gas(instruction.opcode.price())?;

        if instruction.opcode == OpCode::Syscall {
            let id = instruction.operand_i32()? as u32;
            let descriptor = self
                .interop_service
                .get(id)
                .cloned()
                .ok_or(VmError::UnknownSyscall(id))?;
            let current = self.context()?.call_flags;
            if !current.contains(descriptor.required_call_flags) {
                return Err(VmError::MissingCallFlags {
                    required: descriptor.required_call_flags.bits(),
                    current: current.bits(),
                });
            }
            self.add_gas(descriptor.price)?;
            self.context_mut()?.move_next(&instruction);
            return Ok(StepOutcome::Syscall(id));
        }

        let jumped = self.execute_instruction(&instruction)?;
        if !jumped {
            if let Some(context) = self.invocation_stack.last_mut() {
                context.move_next(&instruction);
            }
        }
        self.check_stack_size()?;
        if self.invocation_stack.is_empty() {
            self.state = VMState::Halt;
            return Ok(StepOutcome::Finished);
        }
        Ok(StepOutcome::Continue)
    }

    fn check_stack_size(&mut self) -> VmResult<()> {
        if self.reference_counter.count() <= self.limits.max_stack_size {
            return Ok(());
        }
        // The running total can include edges of dropped containers; only an
        // exact recount decides the breach.
        let exact = self.recount_references();
        self.reference_counter.reset_to(exact);
        if exact > self.limits.max_stack_size {
            return Err(VmError::StackOverflow(exact));
        }
        Ok(())
    }

    fn recount_references(&self) -> usize {
        let mut roots: Vec<StackItem> = Vec::new();
        let mut stacks_seen: Vec<*const ()> = Vec::new();
        let mut statics_seen: Vec<*const ()> = Vec::new();
        for context in &self.invocation_stack {
            let stack_ptr = Rc::as_ptr(&context.evaluation_stack) as *const ();
            if !stacks_seen.contains(&stack_ptr) {
                stacks_seen.push(stack_ptr);
                roots.extend(context.evaluation_stack.borrow().iter().cloned());
            }
            if let Some(statics) = &context.static_fields {
                let ptr = Rc::as_ptr(statics) as *const ();
                if !statics_seen.contains(&ptr) {
                    statics_seen.push(ptr);
                    roots.extend(statics.borrow().iter().cloned());
                }
            }
            if let Some(slot) = &context.local_variables {
                roots.extend(slot.iter().cloned());
            }
            if let Some(slot) = &context.arguments {
                roots.extend(slot.iter().cloned());
            }
        }
        roots.extend(self.result_stack.iter().cloned());
        count_reachable(roots.iter())
    }

    /// Raises a catchable exception carrying `item`.
    pub fn throw_with(&mut self, item: StackItem) -> VmResult<()> {
        self.uncaught_exception = Some(item);
        if self.handle_exception()? {
            return Ok(());
        }
        let message = self
            .uncaught_exception
            .as_ref()
            .and_then(|e| e.try_bytes().ok())
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        Err(VmError::InvalidOperation(format!(
            "uncaught exception: {message}"
        )))
    }

    /// Unwinds try frames until a handler accepts the pending exception.
    fn handle_exception(&mut self) -> VmResult<bool> {
        while let Some(context) = self.invocation_stack.last_mut() {
            loop {
                let Some(frame) = context.try_stack.last_mut() else {
                    break;
                };
                match frame.state {
                    TryState::Try if frame.catch_pointer.is_some() => {
                        frame.state = TryState::Catch;
                        let catch = frame.catch_pointer.expect("checked above");
                        context.jump_to(catch)?;
                        let exception =
                            self.uncaught_exception.take().unwrap_or(StackItem::Null);
                        context.evaluation_stack.borrow_mut().push(exception);
                        return Ok(true);
                    }
                    TryState::Try | TryState::Catch if frame.finally_pointer.is_some() => {
                        frame.state = TryState::Finally;
                        let finally = frame.finally_pointer.expect("checked above");
                        context.jump_to(finally)?;
                        // The exception stays pending; ENDFINALLY rethrows.
                        return Ok(true);
                    }
                    _ => {
                        context.try_stack.pop();
                    }
                }
            }
            let mut unhandled = self
                .invocation_stack
                .pop()
                .expect("loop guard saw a context");
            let shared = self
                .invocation_stack
                .last()
                .map_or(false, |caller| unhandled.shares_stack_with(caller));
            unhandled.release(shared);
        }
        Ok(false)
    }

    fn unload_current_context(&mut self) -> VmResult<()> {
        let mut context = self
            .invocation_stack
            .pop()
            .ok_or_else(|| VmError::InvalidOperation("no context to unload".into()))?;
        let shared = self
            .invocation_stack
            .last()
            .map_or(false, |caller| context.shares_stack_with(caller));
        if !shared {
            let available = context.evaluation_stack.borrow().len();
            let count = if context.rv_count < 0 {
                available
            } else {
                context.rv_count as usize
            };
            if available != count {
                return Err(VmError::InvalidOperation(format!(
                    "return value count {count} does not match stack depth {available}"
                )));
            }
            let mut items = Vec::with_capacity(count);
            {
                let mut stack = context.evaluation_stack.borrow_mut();
                for _ in 0..count {
                    items.push(stack.pop()?);
                }
            }
            items.reverse();
            match self.invocation_stack.last_mut() {
                Some(caller) => {
                    let mut caller_stack = caller.evaluation_stack.borrow_mut();
                    for item in items {
                        caller_stack.push(item);
                    }
                }
                None => {
                    for item in items {
                        self.reference_counter.add_stack_reference(&item);
                        self.result_stack.push(item);
                    }
                }
            }
        }
        context.release(shared);
        Ok(())
    }

    fn execute_instruction(&mut self, ins: &Instruction) -> VmResult<bool> {
        use OpCode::*;
        let opcode = ins.opcode;
        match opcode {
            // Constants
            PushInt8 | PushInt16 | PushInt32 | PushInt64 | PushInt128 | PushInt256 => {
                let value = ins.operand_integer();
                check_integer(&value)?;
                self.push(StackItem::Integer(value))?;
            }
            PushTrue => self.push(StackItem::Boolean(true))?,
            PushFalse => self.push(StackItem::Boolean(false))?,
            PushNull => self.push(StackItem::Null)?,
            PushA => {
                let context = self.context()?;
                let target = context.jump_target(ins.position, ins.operand_i32()?)?;
                let script = Rc::clone(&context.script);
                self.push(StackItem::Pointer {
                    script,
                    position: target,
                })?;
            }
            PushData1 | PushData2 | PushData4 => {
                self.push(StackItem::byte_string(ins.operand.clone()))?;
            }
            PushM1 | Push0 | Push1 | Push2 | Push3 | Push4 | Push5 | Push6 | Push7 | Push8
            | Push9 | Push10 | Push11 | Push12 | Push13 | Push14 | Push15 | Push16 => {
                let value = opcode as i64 - Push0 as i64;
                self.push(StackItem::integer(value))?;
            }

            // Flow control
            Nop => {}
            Jmp | JmpL | JmpIf | JmpIfL | JmpIfNot | JmpIfNotL | JmpEq | JmpEqL | JmpNe
            | JmpNeL | JmpGt | JmpGtL | JmpGe | JmpGeL | JmpLt | JmpLtL | JmpLe | JmpLeL => {
                return self.execute_jump(ins);
            }
            Call | CallL => {
                let offset = if opcode == Call {
                    i32::from(ins.operand_i8()?)
                } else {
                    ins.operand_i32()?
                };
                let context = self.context()?;
                let target = context.jump_target(ins.position, offset)?;
                let callee = context.fork(target);
                self.load_context(callee)?;
                return Ok(true);
            }
            CallA => {
                let item = self.pop()?;
                let StackItem::Pointer { script, position } = item else {
                    return Err(VmError::InvalidCast("pointer expected"));
                };
                let context = self.context()?;
                if !Rc::ptr_eq(&script, &context.script) {
                    return Err(VmError::InvalidOperation(
                        "pointer belongs to another script".into(),
                    ));
                }
                let callee = context.fork(position);
                self.load_context(callee)?;
                return Ok(true);
            }
            CallT => {
                return Err(VmError::InvalidOperation(
                    "method token calls need a deployed contract context".into(),
                ));
            }
            Abort => return Err(VmError::Abort),
            Assert => {
                if !self.pop_bool()? {
                    return Err(VmError::AssertFailed);
                }
            }
            Throw => {
                let exception = self.pop()?;
                self.throw_with(exception)?;
                return Ok(true);
            }
            Try | TryL => {
                let (catch_offset, finally_offset) = if opcode == Try {
                    (
                        i32::from(ins.operand_u8(0)? as i8),
                        i32::from(ins.operand_u8(1)? as i8),
                    )
                } else {
                    let bytes: [u8; 4] = ins.operand[0..4]
                        .try_into()
                        .map_err(|_| VmError::InvalidOperation("short TRY operand".into()))?;
                    let catch = i32::from_le_bytes(bytes);
                    let bytes: [u8; 4] = ins.operand[4..8]
                        .try_into()
                        .map_err(|_| VmError::InvalidOperation("short TRY operand".into()))?;
                    (catch, i32::from_le_bytes(bytes))
                };
                if catch_offset == 0 && finally_offset == 0 {
                    return Err(VmError::InvalidOperation(
                        "TRY with neither catch nor finally".into(),
                    ));
                }
                let max_nesting = self.limits.max_try_nesting;
                let context = self.context_mut()?;
                if context.try_stack.len() >= max_nesting {
                    return Err(VmError::InvalidOperation("try nesting too deep".into()));
                }
                let catch_pointer = if catch_offset == 0 {
                    None
                } else {
                    Some(context.jump_target(ins.position, catch_offset)?)
                };
                let finally_pointer = if finally_offset == 0 {
                    None
                } else {
                    Some(context.jump_target(ins.position, finally_offset)?)
                };
                context.try_stack.push(ExceptionHandlingContext {
                    catch_pointer,
                    finally_pointer,
                    end_pointer: 0,
                    state: TryState::Try,
                });
            }
            EndTry | EndTryL => {
                let offset = if opcode == EndTry {
                    i32::from(ins.operand_i8()?)
                } else {
                    ins.operand_i32()?
                };
                let context = self.context_mut()?;
                let target = context.jump_target(ins.position, offset)?;
                let frame = context
                    .try_stack
                    .last_mut()
                    .ok_or_else(|| VmError::InvalidOperation("ENDTRY outside try".into()))?;
                if frame.state == TryState::Finally {
                    return Err(VmError::InvalidOperation("ENDTRY inside finally".into()));
                }
                if let Some(finally) = frame.finally_pointer {
                    frame.state = TryState::Finally;
                    frame.end_pointer = target;
                    context.jump_to(finally)?;
                } else {
                    context.try_stack.pop();
                    context.jump_to(target)?;
                }
                return Ok(true);
            }
            EndFinally => {
                let context = self.context_mut()?;
                let frame = context
                    .try_stack
                    .pop()
                    .ok_or_else(|| VmError::InvalidOperation("ENDFINALLY outside try".into()))?;
                if self.uncaught_exception.is_some() {
                    if !self.handle_exception()? {
                        return Err(VmError::InvalidOperation(
                            "uncaught exception after finally".into(),
                        ));
                    }
                } else {
                    self.context_mut()?.jump_to(frame.end_pointer)?;
                }
                return Ok(true);
            }
            Ret => {
                self.unload_current_context()?;
                return Ok(true);
            }
            Syscall => unreachable!("SYSCALL is dispatched by the step loop"),

            // Stack
            Depth => {
                let depth = self.context()?.evaluation_stack.borrow().len();
                self.push(StackItem::integer(depth as i64))?;
            }
            Drop => {
                self.pop()?;
            }
            Nip => {
                self.context()?.evaluation_stack.borrow_mut().remove(1)?;
            }
            XDrop => {
                let n = self.pop_count()?;
                self.context()?.evaluation_stack.borrow_mut().remove(n)?;
            }
            Clear => self.context()?.evaluation_stack.borrow_mut().clear(),
            Dup => {
                let top = self.peek(0)?;
                self.push(top)?;
            }
            Over => {
                let item = self.peek(1)?;
                self.push(item)?;
            }
            Pick => {
                let n = self.pop_count()?;
                let item = self.peek(n)?;
                self.push(item)?;
            }
            Tuck => {
                let top = self.peek(0)?;
                self.context()?
                    .evaluation_stack
                    .borrow_mut()
                    .insert(2, top)?;
            }
            Swap => {
                let second = self.context()?.evaluation_stack.borrow_mut().remove(1)?;
                self.push(second)?;
            }
            Rot => {
                let third = self.context()?.evaluation_stack.borrow_mut().remove(2)?;
                self.push(third)?;
            }
            Roll => {
                let n = self.pop_count()?;
                if n > 0 {
                    let item = self.context()?.evaluation_stack.borrow_mut().remove(n)?;
                    self.push(item)?;
                }
            }
            Reverse3 => self.context()?.evaluation_stack.borrow_mut().reverse(3)?,
            Reverse4 => self.context()?.evaluation_stack.borrow_mut().reverse(4)?,
            ReverseN => {
                let n = self.pop_count()?;
                self.context()?.evaluation_stack.borrow_mut().reverse(n)?;
            }

            // Slots
            InitSSlot => {
                let size = ins.operand_u8(0)? as usize;
                if size == 0 {
                    return Err(VmError::InvalidOperation("empty static slot".into()));
                }
                let counter = self.reference_counter.clone();
                let context = self.context_mut()?;
                if context.static_fields.is_some() {
                    return Err(VmError::InvalidOperation(
                        "static slot already initialized".into(),
                    ));
                }
                context.static_fields =
                    Some(Rc::new(RefCell::new(Slot::new(size, counter))));
            }
            InitSlot => {
                let locals = ins.operand_u8(0)? as usize;
                let args = ins.operand_u8(1)? as usize;
                if locals == 0 && args == 0 {
                    return Err(VmError::InvalidOperation("empty INITSLOT".into()));
                }
                if self.context()?.local_variables.is_some()
                    || self.context()?.arguments.is_some()
                {
                    return Err(VmError::InvalidOperation(
                        "slots already initialized".into(),
                    ));
                }
                let counter = self.reference_counter.clone();
                let mut popped = Vec::with_capacity(args);
                for _ in 0..args {
                    popped.push(self.pop()?);
                }
                let context = self.context_mut()?;
                if locals > 0 {
                    context.local_variables = Some(Slot::new(locals, counter.clone()));
                }
                if args > 0 {
                    context.arguments = Some(Slot::from_items(popped, counter));
                }
            }
            LdSFld0 | LdSFld1 | LdSFld2 | LdSFld3 | LdSFld4 | LdSFld5 | LdSFld6 | LdSFld => {
                let index = slot_index(opcode, LdSFld0, LdSFld, ins)?;
                let item = {
                    let context = self.context()?;
                    let statics = context
                        .static_fields
                        .as_ref()
                        .ok_or_else(|| VmError::InvalidOperation("no static slot".into()))?;
                    let item = statics.borrow().get(index)?;
                    item
                };
                self.push(item)?;
            }
            StSFld0 | StSFld1 | StSFld2 | StSFld3 | StSFld4 | StSFld5 | StSFld6 | StSFld => {
                let index = slot_index(opcode, StSFld0, StSFld, ins)?;
                let item = self.pop()?;
                let context = self.context()?;
                let statics = context
                    .static_fields
                    .as_ref()
                    .ok_or_else(|| VmError::InvalidOperation("no static slot".into()))?;
                statics.borrow_mut().set(index, item)?;
            }
            LdLoc0 | LdLoc1 | LdLoc2 | LdLoc3 | LdLoc4 | LdLoc5 | LdLoc6 | LdLoc => {
                let index = slot_index(opcode, LdLoc0, LdLoc, ins)?;
                let item = self
                    .context()?
                    .local_variables
                    .as_ref()
                    .ok_or_else(|| VmError::InvalidOperation("no local slot".into()))?
                    .get(index)?;
                self.push(item)?;
            }
            StLoc0 | StLoc1 | StLoc2 | StLoc3 | StLoc4 | StLoc5 | StLoc6 | StLoc => {
                let index = slot_index(opcode, StLoc0, StLoc, ins)?;
                let item = self.pop()?;
                self.context_mut()?
                    .local_variables
                    .as_mut()
                    .ok_or_else(|| VmError::InvalidOperation("no local slot".into()))?
                    .set(index, item)?;
            }
            LdArg0 | LdArg1 | LdArg2 | LdArg3 | LdArg4 | LdArg5 | LdArg6 | LdArg => {
                let index = slot_index(opcode, LdArg0, LdArg, ins)?;
                let item = self
                    .context()?
                    .arguments
                    .as_ref()
                    .ok_or_else(|| VmError::InvalidOperation("no argument slot".into()))?
                    .get(index)?;
                self.push(item)?;
            }
            StArg0 | StArg1 | StArg2 | StArg3 | StArg4 | StArg5 | StArg6 | StArg => {
                let index = slot_index(opcode, StArg0, StArg, ins)?;
                let item = self.pop()?;
                self.context_mut()?
                    .arguments
                    .as_mut()
                    .ok_or_else(|| VmError::InvalidOperation("no argument slot".into()))?
                    .set(index, item)?;
            }

            // Splice
            NewBuffer => {
                let size = self.pop()?.try_i64()?;
                if size < 0 || size as usize > MAX_ITEM_SIZE {
                    return Err(VmError::ItemTooLarge);
                }
                self.push(StackItem::buffer(vec![0u8; size as usize]))?;
            }
            MemCpy => {
                let count = self.pop()?.try_i64()?;
                let src_index = self.pop()?.try_i64()?;
                let src = self.pop_bytes()?;
                let dst_index = self.pop()?.try_i64()?;
                let dst = self.pop()?;
                let StackItem::Buffer(buffer) = dst else {
                    return Err(VmError::InvalidCast("buffer expected"));
                };
                if count < 0 || src_index < 0 || dst_index < 0 {
                    return Err(VmError::IndexOutOfRange(count));
                }
                let (count, si, di) = (count as usize, src_index as usize, dst_index as usize);
                let mut dst = buffer.borrow_mut();
                if si + count > src.len() || di + count > dst.len() {
                    return Err(VmError::IndexOutOfRange(count as i64));
                }
                dst[di..di + count].copy_from_slice(&src[si..si + count]);
            }
            Cat => {
                let right = self.pop_bytes()?;
                let mut left = self.pop_bytes()?;
                if left.len() + right.len() > MAX_ITEM_SIZE {
                    return Err(VmError::ItemTooLarge);
                }
                left.extend_from_slice(&right);
                self.push(StackItem::buffer(left))?;
            }
            SubStr => {
                let count = self.pop()?.try_i64()?;
                let index = self.pop()?.try_i64()?;
                let bytes = self.pop_bytes()?;
                if index < 0 || count < 0 || (index + count) as usize > bytes.len() {
                    return Err(VmError::IndexOutOfRange(index));
                }
                let slice = bytes[index as usize..(index + count) as usize].to_vec();
                self.push(StackItem::buffer(slice))?;
            }
            Left => {
                let count = self.pop()?.try_i64()?;
                let bytes = self.pop_bytes()?;
                if count < 0 || count as usize > bytes.len() {
                    return Err(VmError::IndexOutOfRange(count));
                }
                self.push(StackItem::buffer(bytes[..count as usize].to_vec()))?;
            }
            Right => {
                let count = self.pop()?.try_i64()?;
                let bytes = self.pop_bytes()?;
                if count < 0 || count as usize > bytes.len() {
                    return Err(VmError::IndexOutOfRange(count));
                }
                let start = bytes.len() - count as usize;
                self.push(StackItem::buffer(bytes[start..].to_vec()))?;
            }

            // Bitwise
            Invert => {
                let x = self.pop_integer()?;
                self.push(StackItem::Integer(-(x + BigInt::one())))?;
            }
            And => self.binary_integer_op(|a, b| a & b)?,
            Or => self.binary_integer_op(|a, b| a | b)?,
            Xor => self.binary_integer_op(|a, b| a ^ b)?,
            Equal | NotEqual => {
                let b = self.pop()?;
                let a = self.pop()?;
                let equal = a.equals(&b)?;
                self.push(StackItem::Boolean(if opcode == Equal {
                    equal
                } else {
                    !equal
                }))?;
            }

            // Arithmetic
            Sign => {
                let x = self.pop_integer()?;
                let sign = match x.sign() {
                    BigSign::Minus => -1,
                    BigSign::NoSign => 0,
                    BigSign::Plus => 1,
                };
                self.push(StackItem::integer(sign))?;
            }
            Abs => {
                let x = self.pop_integer()?;
                self.push_integer(x.abs())?;
            }
            Negate => {
                let x = self.pop_integer()?;
                self.push_integer(-x)?;
            }
            Inc => {
                let x = self.pop_integer()?;
                self.push_integer(x + BigInt::one())?;
            }
            Dec => {
                let x = self.pop_integer()?;
                self.push_integer(x - BigInt::one())?;
            }
            Add => self.binary_checked_op(|a, b| Ok(a + b))?,
            Sub => self.binary_checked_op(|a, b| Ok(a - b))?,
            Mul => self.binary_checked_op(|a, b| Ok(a * b))?,
            Div => self.binary_checked_op(|a, b| {
                if b.is_zero() {
                    Err(VmError::DivisionByZero)
                } else {
                    Ok(a / b)
                }
            })?,
            Mod => self.binary_checked_op(|a, b| {
                if b.is_zero() {
                    Err(VmError::DivisionByZero)
                } else {
                    Ok(a % b)
                }
            })?,
            Pow => {
                let exponent = self.pop()?.try_i64()?;
                let base = self.pop_integer()?;
                if !(0..=u32::MAX as i64).contains(&exponent) {
                    return Err(VmError::IndexOutOfRange(exponent));
                }
                self.push_integer(base.pow(exponent as u32))?;
            }
            Sqrt => {
                let x = self.pop_integer()?;
                if x.sign() == BigSign::Minus {
                    return Err(VmError::InvalidOperation("sqrt of negative".into()));
                }
                self.push_integer(bigint_sqrt(&x))?;
            }
            Shl => {
                let shift = self.pop()?.try_i64()?;
                let x = self.pop_integer()?;
                check_shift(shift)?;
                self.push_integer(x << shift as usize)?;
            }
            Shr => {
                let shift = self.pop()?.try_i64()?;
                let x = self.pop_integer()?;
                check_shift(shift)?;
                self.push_integer(x >> shift as usize)?;
            }
            Not => {
                let x = self.pop_bool()?;
                self.push(StackItem::Boolean(!x))?;
            }
            BoolAnd => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(StackItem::Boolean(a && b))?;
            }
            BoolOr => {
                let b = self.pop_bool()?;
                let a = self.pop_bool()?;
                self.push(StackItem::Boolean(a || b))?;
            }
            Nz => {
                let x = self.pop_integer()?;
                self.push(StackItem::Boolean(!x.is_zero()))?;
            }
            NumEqual => self.binary_compare(|a, b| a == b)?,
            NumNotEqual => self.binary_compare(|a, b| a != b)?,
            Lt | Le | Gt | Ge => {
                let b = self.pop()?;
                let a = self.pop()?;
                let result = if a.is_null() || b.is_null() {
                    false
                } else {
                    let a = a.try_integer()?;
                    let b = b.try_integer()?;
                    match opcode {
                        Lt => a < b,
                        Le => a <= b,
                        Gt => a > b,
                        _ => a >= b,
                    }
                };
                self.push(StackItem::Boolean(result))?;
            }
            Min => self.binary_checked_op(|a, b| Ok(a.min(b)))?,
            Max => self.binary_checked_op(|a, b| Ok(a.max(b)))?,
            Within => {
                let upper = self.pop_integer()?;
                let lower = self.pop_integer()?;
                let x = self.pop_integer()?;
                self.push(StackItem::Boolean(lower <= x && x < upper))?;
            }

            // Compound types
            PackMap => {
                let count = self.pop_count()?;
                let map = StackItem::map();
                if let StackItem::Map(entries) = &map {
                    let mut entries = entries.borrow_mut();
                    for _ in 0..count {
                        let key = self.pop()?;
                        if !key.is_valid_map_key() {
                            return Err(VmError::InvalidCast("map key"));
                        }
                        let value = self.pop()?;
                        self.reference_counter.add_reference();
                        self.reference_counter.add_reference();
                        entries.push((key, value));
                    }
                }
                self.push(map)?;
            }
            Pack | PackStruct => {
                let count = self.pop_count()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.pop()?);
                    self.reference_counter.add_reference();
                }
                let packed = if opcode == Pack {
                    StackItem::array(items)
                } else {
                    StackItem::struct_(items)
                };
                self.push(packed)?;
            }
            Unpack => {
                let item = self.pop()?;
                let items = match &item {
                    StackItem::Array(items) | StackItem::Struct(items) => items.borrow().clone(),
                    _ => return Err(VmError::InvalidCast("array expected")),
                };
                let count = items.len();
                for element in items.into_iter().rev() {
                    self.push(element)?;
                }
                self.push(StackItem::integer(count as i64))?;
            }
            NewArray0 => self.push(StackItem::array(Vec::new()))?,
            NewStruct0 => self.push(StackItem::struct_(Vec::new()))?,
            NewArray | NewArrayT | NewStruct => {
                let count = self.pop_count()?;
                for _ in 0..count {
                    self.reference_counter.add_reference();
                }
                let items = vec![StackItem::Null; count];
                let packed = if opcode == NewStruct {
                    StackItem::struct_(items)
                } else {
                    StackItem::array(items)
                };
                self.push(packed)?;
            }
            NewMap => self.push(StackItem::map())?,
            Size => {
                let item = self.pop()?;
                let size = match &item {
                    StackItem::Array(items) | StackItem::Struct(items) => items.borrow().len(),
                    StackItem::Map(entries) => entries.borrow().len(),
                    StackItem::ByteString(bytes) => bytes.len(),
                    StackItem::Buffer(buffer) => buffer.borrow().len(),
                    _ => return Err(VmError::InvalidCast("sized item expected")),
                };
                self.push(StackItem::integer(size as i64))?;
            }
            HasKey => {
                let key = self.pop()?;
                let collection = self.pop()?;
                let found = match &collection {
                    StackItem::Map(entries) => {
                        let entries = entries.borrow();
                        let mut found = false;
                        for (k, _) in entries.iter() {
                            if k.equals(&key)? {
                                found = true;
                                break;
                            }
                        }
                        found
                    }
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        let index = key.try_i64()?;
                        if index < 0 {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        (index as usize) < items.borrow().len()
                    }
                    StackItem::ByteString(bytes) => {
                        let index = key.try_i64()?;
                        if index < 0 {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        (index as usize) < bytes.len()
                    }
                    StackItem::Buffer(buffer) => {
                        let index = key.try_i64()?;
                        if index < 0 {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        (index as usize) < buffer.borrow().len()
                    }
                    _ => return Err(VmError::InvalidCast("collection expected")),
                };
                self.push(StackItem::Boolean(found))?;
            }
            Keys => {
                let item = self.pop()?;
                let StackItem::Map(entries) = &item else {
                    return Err(VmError::InvalidCast("map expected"));
                };
                let keys: Vec<StackItem> =
                    entries.borrow().iter().map(|(k, _)| k.clone()).collect();
                for _ in 0..keys.len() {
                    self.reference_counter.add_reference();
                }
                self.push(StackItem::array(keys))?;
            }
            Values => {
                let item = self.pop()?;
                let values: Vec<StackItem> = match &item {
                    StackItem::Map(entries) => {
                        entries.borrow().iter().map(|(_, v)| v.clone()).collect()
                    }
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        items.borrow().clone()
                    }
                    _ => return Err(VmError::InvalidCast("collection expected")),
                };
                for _ in 0..values.len() {
                    self.reference_counter.add_reference();
                }
                self.push(StackItem::array(values))?;
            }
            PickItem => {
                let key = self.pop()?;
                let collection = self.pop()?;
                let picked = match &collection {
                    StackItem::Map(entries) => {
                        let entries = entries.borrow();
                        let mut picked = None;
                        for (k, v) in entries.iter() {
                            if k.equals(&key)? {
                                picked = Some(v.clone());
                                break;
                            }
                        }
                        picked.ok_or(VmError::KeyNotFound)?
                    }
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        let index = key.try_i64()?;
                        let items = items.borrow();
                        if index < 0 || index as usize >= items.len() {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        items[index as usize].clone()
                    }
                    StackItem::ByteString(bytes) => {
                        byte_at(bytes, key.try_i64()?)?
                    }
                    StackItem::Buffer(buffer) => {
                        byte_at(&buffer.borrow(), key.try_i64()?)?
                    }
                    _ => return Err(VmError::InvalidCast("collection expected")),
                };
                self.push(picked)?;
            }
            Append => {
                let value = self.pop()?;
                let target = self.pop()?;
                let (StackItem::Array(items) | StackItem::Struct(items)) = &target else {
                    return Err(VmError::InvalidCast("array expected"));
                };
                let value = if matches!(value, StackItem::Struct(_)) {
                    value.deep_copy()
                } else {
                    value
                };
                self.reference_counter.add_reference();
                items.borrow_mut().push(value);
            }
            SetItem => {
                let value = self.pop()?;
                let key = self.pop()?;
                let collection = self.pop()?;
                let value = if matches!(value, StackItem::Struct(_)) {
                    value.deep_copy()
                } else {
                    value
                };
                match &collection {
                    StackItem::Map(entries) => {
                        if !key.is_valid_map_key() {
                            return Err(VmError::InvalidCast("map key"));
                        }
                        let mut entries = entries.borrow_mut();
                        let mut replaced = false;
                        for entry in entries.iter_mut() {
                            if entry.0.equals(&key)? {
                                entry.1 = value.clone();
                                replaced = true;
                                break;
                            }
                        }
                        if !replaced {
                            self.reference_counter.add_reference();
                            self.reference_counter.add_reference();
                            entries.push((key, value));
                        }
                    }
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        let index = key.try_i64()?;
                        let mut items = items.borrow_mut();
                        if index < 0 || index as usize >= items.len() {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        items[index as usize] = value;
                    }
                    StackItem::Buffer(buffer) => {
                        let index = key.try_i64()?;
                        let byte = value.try_integer()?;
                        let byte = byte
                            .to_u8()
                            .ok_or_else(|| VmError::InvalidOperation("byte out of range".into()))?;
                        let mut buffer = buffer.borrow_mut();
                        if index < 0 || index as usize >= buffer.len() {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        buffer[index as usize] = byte;
                    }
                    _ => return Err(VmError::InvalidCast("collection expected")),
                }
            }
            ReverseItems => {
                let item = self.pop()?;
                match &item {
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        items.borrow_mut().reverse();
                    }
                    StackItem::Buffer(buffer) => buffer.borrow_mut().reverse(),
                    _ => return Err(VmError::InvalidCast("array expected")),
                }
            }
            Remove => {
                let key = self.pop()?;
                let collection = self.pop()?;
                match &collection {
                    StackItem::Map(entries) => {
                        let mut entries = entries.borrow_mut();
                        let mut found = None;
                        for (i, (k, _)) in entries.iter().enumerate() {
                            if k.equals(&key)? {
                                found = Some(i);
                                break;
                            }
                        }
                        if let Some(i) = found {
                            entries.remove(i);
                            self.reference_counter.remove_reference();
                            self.reference_counter.remove_reference();
                        }
                    }
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        let index = key.try_i64()?;
                        let mut items = items.borrow_mut();
                        if index < 0 || index as usize >= items.len() {
                            return Err(VmError::IndexOutOfRange(index));
                        }
                        items.remove(index as usize);
                        self.reference_counter.remove_reference();
                    }
                    _ => return Err(VmError::InvalidCast("collection expected")),
                }
            }
            ClearItems => {
                let item = self.pop()?;
                match &item {
                    StackItem::Map(entries) => {
                        let mut entries = entries.borrow_mut();
                        for _ in 0..entries.len() * 2 {
                            self.reference_counter.remove_reference();
                        }
                        entries.clear();
                    }
                    StackItem::Array(items) | StackItem::Struct(items) => {
                        let mut items = items.borrow_mut();
                        for _ in 0..items.len() {
                            self.reference_counter.remove_reference();
                        }
                        items.clear();
                    }
                    _ => return Err(VmError::InvalidCast("collection expected")),
                }
            }
            PopItem => {
                let item = self.pop()?;
                let (StackItem::Array(items) | StackItem::Struct(items)) = &item else {
                    return Err(VmError::InvalidCast("array expected"));
                };
                let popped = items
                    .borrow_mut()
                    .pop()
                    .ok_or(VmError::IndexOutOfRange(-1))?;
                self.reference_counter.remove_reference();
                self.push(popped)?;
            }

            // Type checks
            IsNull => {
                let item = self.pop()?;
                self.push(StackItem::Boolean(item.is_null()))?;
            }
            IsType => {
                let target = StackItemType::from_byte(ins.operand_u8(0)?)
                    .ok_or(VmError::InvalidCast("unknown type"))?;
                if target == StackItemType::Any {
                    return Err(VmError::InvalidCast("ISTYPE with Any"));
                }
                let item = self.pop()?;
                self.push(StackItem::Boolean(item.item_type() == target))?;
            }
            Convert => {
                let target = StackItemType::from_byte(ins.operand_u8(0)?)
                    .ok_or(VmError::InvalidCast("unknown type"))?;
                let item = self.pop()?;
                self.push(item.convert_to(target)?)?;
            }
        }
        Ok(false)
    }

    fn execute_jump(&mut self, ins: &Instruction) -> VmResult<bool> {
        use OpCode::*;
        let long = matches!(
            ins.opcode,
            JmpL | JmpIfL | JmpIfNotL | JmpEqL | JmpNeL | JmpGtL | JmpGeL | JmpLtL | JmpLeL
        );
        let offset = if long {
            ins.operand_i32()?
        } else {
            i32::from(ins.operand_i8()?)
        };
        let take = match ins.opcode {
            Jmp | JmpL => true,
            JmpIf | JmpIfL => self.pop_bool()?,
            JmpIfNot | JmpIfNotL => !self.pop_bool()?,
            _ => {
                let b = self.pop_integer()?;
                let a = self.pop_integer()?;
                match ins.opcode {
                    JmpEq | JmpEqL => a == b,
                    JmpNe | JmpNeL => a != b,
                    JmpGt | JmpGtL => a > b,
                    JmpGe | JmpGeL => a >= b,
                    JmpLt | JmpLtL => a < b,
                    _ => a <= b,
                }
            }
        };
        if take {
            let context = self.context_mut()?;
            let target = context.jump_target(ins.position, offset)?;
            context.jump_to(target)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn push_integer(&mut self, value: BigInt) -> VmResult<()> {
        check_integer(&value)?;
        self.push(StackItem::Integer(value))
    }

    fn binary_integer_op(&mut self, op: impl FnOnce(BigInt, BigInt) -> BigInt) -> VmResult<()> {
        let b = self.pop_integer()?;
        let a = self.pop_integer()?;
        self.push_integer(op(a, b))
    }

    fn binary_checked_op(
        &mut self,
        op: impl FnOnce(BigInt, BigInt) -> VmResult<BigInt>,
    ) -> VmResult<()> {
        let b = self.pop_integer()?;
        let a = self.pop_integer()?;
        self.push_integer(op(a, b)?)
    }

    fn binary_compare(&mut self, cmp: impl FnOnce(&BigInt, &BigInt) -> bool) -> VmResult<()> {
        let b = self.pop_integer()?;
        let a = self.pop_integer()?;
        self.push(StackItem::Boolean(cmp(&a, &b)))
    }
}

fn slot_index(opcode: OpCode, base: OpCode, wide: OpCode, ins: &Instruction) -> VmResult<usize> {
    if opcode == wide {
        Ok(ins.operand_u8(0)? as usize)
    } else {
        Ok(opcode as usize - base as usize)
    }
}

fn byte_at(bytes: &[u8], index: i64) -> VmResult<StackItem> {
    if index < 0 || index as usize >= bytes.len() {
        return Err(VmError::IndexOutOfRange(index));
    }
    Ok(StackItem::integer(i64::from(bytes[index as usize])))
}

fn check_shift(shift: i64) -> VmResult<()> {
    if !(0..=256).contains(&shift) {
        return Err(VmError::IndexOutOfRange(shift));
    }
    Ok(())
}

/// Integer square root by Newton's method.
fn bigint_sqrt(value: &BigInt) -> BigInt {
    if value.is_zero() {
        return BigInt::zero();
    }
    let mut x = value.clone();
    let mut y: BigInt = (&x + BigInt::one()) >> 1;
    while y < x {
        x = y.clone();
        y = (&x + value / &x) >> 1;
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptBuilder;

    fn run(build: impl FnOnce(&mut ScriptBuilder)) -> ExecutionEngine {
        let mut builder = ScriptBuilder::new();
        build(&mut builder);
        builder.emit(OpCode::Ret);
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine
            .load_script(builder.to_script(), -1, CallFlags::ALL)
            .unwrap();
        engine.execute();
        engine
    }

    #[test]
    fn arithmetic_halts_with_result() {
        let engine = run(|b| {
            b.emit_push_i64(20).emit_push_i64(22).emit(OpCode::Add);
        });
        assert_eq!(engine.state(), VMState::Halt);
        assert_eq!(engine.result_stack()[0].try_i64().unwrap(), 42);
    }

    #[test]
    fn division_by_zero_faults() {
        let engine = run(|b| {
            b.emit_push_i64(1).emit_push_i64(0).emit(OpCode::Div);
        });
        assert_eq!(engine.state(), VMState::Fault);
        assert!(matches!(
            engine.fault_reason(),
            Some(VmError::DivisionByZero)
        ));
    }

    #[test]
    fn gas_limit_faults() {
        let mut builder = ScriptBuilder::new();
        for _ in 0..100 {
            builder.emit_push_i64(1).emit(OpCode::Drop);
        }
        builder.emit(OpCode::Ret);
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine.set_gas_limit(100);
        engine
            .load_script(builder.to_script(), -1, CallFlags::ALL)
            .unwrap();
        assert_eq!(engine.execute(), VMState::Fault);
        assert!(matches!(
            engine.fault_reason(),
            Some(VmError::GasExhausted { .. })
        ));
    }

    #[test]
    fn conditional_jump_taken() {
        // if true { push 1 } else { push 2 }
        let engine = run(|b| {
            b.emit_push_bool(true); // 0
            b.emit_with_operand(OpCode::JmpIf, &[5]); // 1..3 → 6
            b.emit_push_i64(2); // 3
            b.emit_with_operand(OpCode::Jmp, &[3]); // 4..6 → 7 (RET)
            b.emit_push_i64(1); // 6
        });
        assert_eq!(engine.state(), VMState::Halt);
        assert_eq!(engine.result_stack()[0].try_i64().unwrap(), 1);
    }

    #[test]
    fn throw_without_try_faults() {
        let engine = run(|b| {
            b.emit_push_bytes(b"boom").emit(OpCode::Throw);
        });
        assert_eq!(engine.state(), VMState::Fault);
        assert_eq!(
            engine.uncaught_exception().unwrap().try_bytes().unwrap(),
            b"boom"
        );
    }

    #[test]
    fn try_catch_recovers() {
        // TRY { THROW "x" } CATCH { DROP; PUSH 7 } → HALT with 7
        let mut b = ScriptBuilder::new();
        b.emit_with_operand(OpCode::Try, &[8, 0]); // 0..3, catch at 8
        b.emit_push_bytes(b"x"); // 3..6
        b.emit(OpCode::Throw); // 6
        b.emit(OpCode::Nop); // 7
        b.emit(OpCode::Drop); // 8 (catch handler, drops the exception)
        b.emit_push_i64(7); // 9
        b.emit_with_operand(OpCode::EndTry, &[2]); // 10..12 → 12
        b.emit(OpCode::Ret); // 12
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine
            .load_script(b.to_script(), -1, CallFlags::ALL)
            .unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        assert_eq!(engine.result_stack()[0].try_i64().unwrap(), 7);
    }

    #[test]
    fn finally_runs_on_clean_exit() {
        // TRY { } FINALLY { PUSH 5 } then PUSH 1 → results [5, 1]
        let mut b = ScriptBuilder::new();
        b.emit_with_operand(OpCode::Try, &[0, 5]); // 0..3, finally at 5
        b.emit_with_operand(OpCode::EndTry, &[5]); // 3..5, resume at 8
        b.emit_push_i64(5); // 5 (finally body)
        b.emit(OpCode::EndFinally); // 6
        b.emit(OpCode::Nop); // 7
        b.emit_push_i64(1); // 8
        b.emit(OpCode::Ret); // 9
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine
            .load_script(b.to_script(), -1, CallFlags::ALL)
            .unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        let results: Vec<i64> = engine
            .result_stack()
            .iter()
            .map(|i| i.try_i64().unwrap())
            .collect();
        assert_eq!(results, vec![5, 1]);
    }

    #[test]
    fn call_shares_evaluation_stack() {
        // PUSH 2, PUSH 3, CALL add, RET; add: ADD, RET
        let mut b = ScriptBuilder::new();
        b.emit_push_i64(2); // 0
        b.emit_push_i64(3); // 1
        b.emit_with_operand(OpCode::Call, &[3]); // 2..4, target 5
        b.emit(OpCode::Ret); // 4
        b.emit(OpCode::Add); // 5
        b.emit(OpCode::Ret); // 6
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine
            .load_script(b.to_script(), -1, CallFlags::ALL)
            .unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        assert_eq!(engine.result_stack()[0].try_i64().unwrap(), 5);
    }

    #[test]
    fn stack_size_limit_faults() {
        // Duplicate an ever-growing array beyond the reachable limit.
        let mut b = ScriptBuilder::new();
        b.emit_push_i64(3000);
        b.emit(OpCode::NewArray);
        b.emit(OpCode::Ret);
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine
            .load_script(b.to_script(), -1, CallFlags::ALL)
            .unwrap();
        assert_eq!(engine.execute(), VMState::Fault);
    }

    #[test]
    fn pack_and_pickitem() {
        let engine = run(|b| {
            b.emit_push_i64(30)
                .emit_push_i64(20)
                .emit_push_i64(10)
                .emit_push_i64(3)
                .emit(OpCode::Pack)
                .emit_push_i64(2)
                .emit(OpCode::PickItem);
        });
        assert_eq!(engine.state(), VMState::Halt);
        // PACK pops top-first: element 0 = 10, element 2 = 30.
        assert_eq!(engine.result_stack()[0].try_i64().unwrap(), 30);
    }

    #[test]
    fn slots_round_trip() {
        let mut b = ScriptBuilder::new();
        b.emit_with_operand(OpCode::InitSlot, &[1, 0]);
        b.emit_push_i64(11);
        b.emit(OpCode::StLoc0);
        b.emit(OpCode::LdLoc0);
        b.emit(OpCode::Ret);
        let mut engine = ExecutionEngine::new(InteropService::new());
        engine
            .load_script(b.to_script(), -1, CallFlags::ALL)
            .unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        assert_eq!(engine.result_stack()[0].try_i64().unwrap(), 11);
    }
}
