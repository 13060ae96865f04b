//! The application engine: the VM embedded in node state.
//!
//! Owns a speculative DAO cache, charges gas through the VM's meter, and
//! resolves every syscall the machine yields. Native contracts are reached
//! through `System.Contract.Call` exactly like deployed code.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, info};

use neo3_config::ProtocolSettings;
use neo3_core::crypto::hash160;
use neo3_core::{Block, ECPoint, Transaction, UInt160};
use neo3_persistence::DataCache;
use neo3_vm::{
    CallFlags, ExecutionEngine, InteropDescriptor, InteropService, Script, StackItem, VMState,
    VmError, VmResult,
};

use crate::contract::signature_address;
use crate::contract_state::{get_contract, get_contract_id};
use crate::exec_result::{AppExecResult, AppStackItem, NotificationEvent};
use crate::interop::InteropContext;
use crate::native::NativeRegistry;

/// Execution mode, selecting allowed behavior and persisted side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Trigger {
    OnPersist = 0x01,
    PostPersist = 0x02,
    Verification = 0x20,
    Application = 0x40,
}

impl Trigger {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::OnPersist),
            0x02 => Some(Self::PostPersist),
            0x20 => Some(Self::Verification),
            0x40 => Some(Self::Application),
            _ => None,
        }
    }
}

/// Well-known syscall kinds behind the interop ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syscall {
    RuntimePlatform,
    RuntimeGetTrigger,
    RuntimeGetTime,
    RuntimeGetNetwork,
    RuntimeCheckWitness,
    RuntimeNotify,
    RuntimeLog,
    RuntimeGasLeft,
    StorageGetContext,
    StorageGetReadOnlyContext,
    StorageGet,
    StoragePut,
    StorageDelete,
    StorageFind,
    ContractCall,
    CryptoCheckSig,
    CryptoCheckMultisig,
}

// Interop base prices, one place to restabilize against deployments.
const PRICE_CHEAP: i64 = 1 << 3;
const PRICE_COUNTED: i64 = 1 << 4;
const PRICE_WITNESS: i64 = 1 << 10;
const PRICE_STANDARD: i64 = 1 << 15;

/// Builds the interop hook table and the id-to-kind dispatch map.
fn interop_table() -> (InteropService, HashMap<u32, Syscall>) {
    let mut service = InteropService::new();
    let mut kinds = HashMap::new();
    let mut add = |name: &'static str, price: i64, flags: CallFlags, kind: Syscall| {
        let descriptor = InteropDescriptor::new(name, price, flags);
        kinds.insert(descriptor.id, kind);
        service.register(descriptor);
    };
    add(
        "System.Runtime.Platform",
        PRICE_CHEAP,
        CallFlags::NONE,
        Syscall::RuntimePlatform,
    );
    add(
        "System.Runtime.GetTrigger",
        PRICE_CHEAP,
        CallFlags::NONE,
        Syscall::RuntimeGetTrigger,
    );
    add(
        "System.Runtime.GetTime",
        PRICE_CHEAP,
        CallFlags::NONE,
        Syscall::RuntimeGetTime,
    );
    add(
        "System.Runtime.GetNetwork",
        PRICE_CHEAP,
        CallFlags::NONE,
        Syscall::RuntimeGetNetwork,
    );
    add(
        "System.Runtime.CheckWitness",
        PRICE_WITNESS,
        CallFlags::NONE,
        Syscall::RuntimeCheckWitness,
    );
    add(
        "System.Runtime.Notify",
        PRICE_STANDARD,
        CallFlags::ALLOW_NOTIFY,
        Syscall::RuntimeNotify,
    );
    add(
        "System.Runtime.Log",
        PRICE_STANDARD,
        CallFlags::ALLOW_NOTIFY,
        Syscall::RuntimeLog,
    );
    add(
        "System.Runtime.GasLeft",
        PRICE_COUNTED,
        CallFlags::NONE,
        Syscall::RuntimeGasLeft,
    );
    add(
        "System.Storage.GetContext",
        PRICE_COUNTED,
        CallFlags::READ_STATES,
        Syscall::StorageGetContext,
    );
    add(
        "System.Storage.GetReadOnlyContext",
        PRICE_COUNTED,
        CallFlags::READ_STATES,
        Syscall::StorageGetReadOnlyContext,
    );
    add(
        "System.Storage.Get",
        PRICE_STANDARD,
        CallFlags::READ_STATES,
        Syscall::StorageGet,
    );
    add(
        "System.Storage.Put",
        PRICE_STANDARD,
        CallFlags::WRITE_STATES,
        Syscall::StoragePut,
    );
    add(
        "System.Storage.Delete",
        PRICE_STANDARD,
        CallFlags::WRITE_STATES,
        Syscall::StorageDelete,
    );
    add(
        "System.Storage.Find",
        PRICE_STANDARD,
        CallFlags::READ_STATES,
        Syscall::StorageFind,
    );
    add(
        "System.Contract.Call",
        PRICE_STANDARD,
        CallFlags::ALLOW_CALL,
        Syscall::ContractCall,
    );
    add(
        "System.Crypto.CheckSig",
        PRICE_STANDARD,
        CallFlags::NONE,
        Syscall::CryptoCheckSig,
    );
    add(
        "System.Crypto.CheckMultisig",
        0,
        CallFlags::NONE,
        Syscall::CryptoCheckMultisig,
    );
    (service, kinds)
}

/// Storage handle passed to scripts as an interop interface.
#[derive(Debug, Clone, Copy)]
struct StorageContext {
    contract_id: i32,
    read_only: bool,
}

struct HostState {
    trigger: Trigger,
    settings: Arc<ProtocolSettings>,
    natives: Arc<NativeRegistry>,
    dao: Option<DataCache>,
    tx: Option<Transaction>,
    persisting_block: Option<Block>,
    /// The bytes signatures in this execution cover.
    sign_data: Vec<u8>,
    notifications: Vec<NotificationEvent>,
    /// Script hashes by the VM depth they were loaded at.
    script_stack: Vec<(usize, UInt160)>,
    syscalls: HashMap<u32, Syscall>,
}

/// The VM plus everything it is allowed to see.
pub struct ApplicationEngine {
    vm: ExecutionEngine,
    host: HostState,
}

impl ApplicationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trigger: Trigger,
        tx: Option<Transaction>,
        persisting_block: Option<Block>,
        dao: DataCache,
        settings: Arc<ProtocolSettings>,
        natives: Arc<NativeRegistry>,
        gas_limit: i64,
    ) -> Self {
        let (service, syscalls) = interop_table();
        let mut vm = ExecutionEngine::new(service);
        vm.set_gas_limit(gas_limit);
        vm.set_exec_fee_factor(natives.policy.exec_fee_factor(&dao));
        let sign_data = tx
            .as_ref()
            .map(|tx| tx.sign_data(settings.magic))
            .unwrap_or_default();
        Self {
            vm,
            host: HostState {
                trigger,
                settings,
                natives,
                dao: Some(dao),
                tx,
                persisting_block,
                sign_data,
                notifications: Vec::new(),
                script_stack: Vec::new(),
                syscalls,
            },
        }
    }

    /// Overrides the signed payload, for witnesses over non-transaction
    /// containers (blocks, extensible payloads).
    pub fn set_sign_data(&mut self, sign_data: Vec<u8>) {
        self.host.sign_data = sign_data;
    }

    pub fn gas_consumed(&self) -> i64 {
        self.vm.gas_consumed()
    }

    pub fn dao(&self) -> &DataCache {
        self.host.dao.as_ref().expect("dao present until consumed")
    }

    pub fn dao_mut(&mut self) -> &mut DataCache {
        self.host.dao.as_mut().expect("dao present until consumed")
    }

    /// Loads a script without running it; later loads run first.
    pub fn load_script(&mut self, script: Vec<u8>, flags: CallFlags) -> VmResult<()> {
        let hash = hash160(&script);
        self.vm.load_script(Script::new(script), -1, flags)?;
        self.host
            .script_stack
            .push((self.vm.invocation_depth(), hash));
        Ok(())
    }

    /// Runs whatever is loaded to completion.
    pub fn execute(&mut self) -> VMState {
        let Self { vm, host } = self;
        vm.execute_with(|engine, id| host.handle_syscall(engine, id))
    }

    /// Loads and runs one script.
    pub fn run(&mut self, script: Vec<u8>, flags: CallFlags) -> VMState {
        if let Err(err) = self.load_script(script, flags) {
            debug!(error = %err, "script load failed");
            return VMState::Fault;
        }
        self.execute()
    }

    /// The top of the result stack after a halt.
    pub fn result(&self) -> Option<&StackItem> {
        self.vm.result_stack().last()
    }

    /// Consumes the engine, returning the DAO cache and the recorded result.
    pub fn finish(mut self) -> (DataCache, AppExecResult) {
        let exception = self
            .vm
            .uncaught_exception()
            .and_then(|e| e.try_bytes().ok())
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .or_else(|| self.vm.fault_reason().map(|e| e.to_string()));
        let result = AppExecResult {
            trigger: self.host.trigger,
            vm_state: self.vm.state(),
            gas_consumed: self.vm.gas_consumed(),
            exception,
            stack: self
                .vm
                .result_stack()
                .iter()
                .map(AppStackItem::from_stack_item)
                .collect(),
            notifications: std::mem::take(&mut self.host.notifications),
        };
        let dao = self.host.dao.take().expect("dao present until consumed");
        (dao, result)
    }
}

impl HostState {
    fn current_script_hash(&mut self, vm: &ExecutionEngine) -> Option<UInt160> {
        let depth = vm.invocation_depth();
        while let Some((loaded_at, _)) = self.script_stack.last() {
            if *loaded_at > depth {
                self.script_stack.pop();
            } else {
                break;
            }
        }
        self.script_stack.last().map(|(_, hash)| *hash)
    }

    fn calling_script_hash(&self) -> Option<UInt160> {
        if self.script_stack.len() < 2 {
            return None;
        }
        self.script_stack
            .get(self.script_stack.len() - 2)
            .map(|(_, hash)| *hash)
    }

    fn entry_script_hash(&self) -> Option<UInt160> {
        self.script_stack.first().map(|(_, hash)| *hash)
    }

    /// Builds the per-call interop view. The DAO stays owned by the host;
    /// the context just borrows it.
    fn with_ctx<R>(
        &mut self,
        vm: &ExecutionEngine,
        f: impl FnOnce(&mut InteropContext<'_>) -> VmResult<R>,
    ) -> VmResult<R> {
        let current = self.current_script_hash(vm);
        let calling = self.calling_script_hash();
        let entry = self.entry_script_hash();
        let dao = self
            .dao
            .as_mut()
            .ok_or_else(|| VmError::InvalidOperation("dao already consumed".into()))?;
        let mut ctx = InteropContext {
            dao,
            settings: &self.settings,
            trigger: self.trigger,
            tx: self.tx.as_ref(),
            persisting_block: self.persisting_block.as_ref(),
            entry_script_hash: entry,
            calling_script_hash: calling,
            current_script_hash: current,
            notifications: &mut self.notifications,
        };
        f(&mut ctx)
    }

    fn handle_syscall(&mut self, vm: &mut ExecutionEngine, id: u32) -> VmResult<()> {
        let kind = *self
            .syscalls
            .get(&id)
            .ok_or(VmError::UnknownSyscall(id))?;
        match kind {
            Syscall::RuntimePlatform => vm.push(StackItem::byte_string(b"NEO".to_vec())),
            Syscall::RuntimeGetTrigger => {
                vm.push(StackItem::integer(i64::from(self.trigger as u8)))
            }
            Syscall::RuntimeGetTime => {
                let time = self
                    .persisting_block
                    .as_ref()
                    .map(|b| b.header.timestamp)
                    .unwrap_or(0);
                vm.push(StackItem::integer(time as i64))
            }
            Syscall::RuntimeGetNetwork => {
                vm.push(StackItem::integer(i64::from(self.settings.magic)))
            }
            Syscall::RuntimeGasLeft => vm.push(StackItem::integer(vm.gas_left())),
            Syscall::RuntimeCheckWitness => {
                let bytes = vm.pop_bytes()?;
                let account = match bytes.len() {
                    20 => UInt160::from_bytes(&bytes)
                        .map_err(|e| VmError::InvalidOperation(e.to_string()))?,
                    33 => {
                        let key = ECPoint::from_bytes(&bytes)
                            .map_err(|e| VmError::InvalidOperation(e.to_string()))?;
                        signature_address(&key)
                    }
                    other => {
                        return Err(VmError::InvalidOperation(format!(
                            "witness target of {other} bytes"
                        )))
                    }
                };
                let witnessed =
                    self.with_ctx(vm, |ctx| Ok(ctx.check_witness(&account)))?;
                vm.push(StackItem::Boolean(witnessed))
            }
            Syscall::RuntimeNotify => {
                let state_item = vm.pop()?;
                let name = String::from_utf8(vm.pop_bytes()?)
                    .map_err(|e| VmError::InvalidOperation(e.to_string()))?;
                if name.len() > 32 {
                    return Err(VmError::InvalidOperation("event name too long".into()));
                }
                let state = match &state_item {
                    StackItem::Array(items) => items
                        .borrow()
                        .iter()
                        .map(AppStackItem::from_stack_item)
                        .collect(),
                    _ => return Err(VmError::InvalidCast("notification state")),
                };
                let contract = self.current_script_hash(vm).unwrap_or_default();
                self.notifications.push(NotificationEvent {
                    contract,
                    name,
                    state,
                });
                Ok(())
            }
            Syscall::RuntimeLog => {
                let message = String::from_utf8_lossy(&vm.pop_bytes()?).into_owned();
                if message.len() > 1024 {
                    return Err(VmError::InvalidOperation("log message too long".into()));
                }
                let contract = self.current_script_hash(vm).unwrap_or_default();
                info!(%contract, message, "contract log");
                Ok(())
            }
            Syscall::StorageGetContext | Syscall::StorageGetReadOnlyContext => {
                let read_only = kind == Syscall::StorageGetReadOnlyContext;
                let current = self
                    .current_script_hash(vm)
                    .ok_or_else(|| VmError::InvalidOperation("no executing script".into()))?;
                let contract_id = self.with_ctx(vm, |ctx| {
                    get_contract_id(ctx.dao, &current)
                        .map_err(|e| VmError::InvalidOperation(e.to_string()))
                })?;
                let contract_id = contract_id.ok_or_else(|| {
                    VmError::InvalidOperation("script is not a deployed contract".into())
                })?;
                vm.push(StackItem::InteropInterface(Rc::new(StorageContext {
                    contract_id,
                    read_only,
                })))
            }
            Syscall::StorageGet => {
                let key = vm.pop_bytes()?;
                let context = pop_storage_context(vm)?;
                let value = self.with_ctx(vm, |ctx| {
                    ctx.dao
                        .get_storage_item(context.contract_id, &key)
                        .map_err(|e| VmError::InvalidOperation(e.to_string()))
                })?;
                vm.push(match value {
                    Some(bytes) => StackItem::byte_string(bytes),
                    None => StackItem::Null,
                })
            }
            Syscall::StoragePut => {
                let value = vm.pop_bytes()?;
                let key = vm.pop_bytes()?;
                let context = pop_storage_context(vm)?;
                if context.read_only {
                    return Err(VmError::InvalidOperation("read-only storage context".into()));
                }
                if key.len() > neo3_core::constants::MAX_STORAGE_KEY_SIZE {
                    return Err(VmError::InvalidOperation("storage key too long".into()));
                }
                if value.len() > neo3_core::constants::MAX_STORAGE_VALUE_SIZE {
                    return Err(VmError::InvalidOperation("storage value too long".into()));
                }
                let price = {
                    let dao = self.dao.as_ref().ok_or_else(|| {
                        VmError::InvalidOperation("dao already consumed".into())
                    })?;
                    self.natives.policy.storage_price(dao)
                };
                vm.add_gas_unscaled((key.len() + value.len()) as i64 * price)?;
                self.with_ctx(vm, |ctx| {
                    ctx.dao.put_storage_item(context.contract_id, &key, value);
                    Ok(())
                })
            }
            Syscall::StorageDelete => {
                let key = vm.pop_bytes()?;
                let context = pop_storage_context(vm)?;
                if context.read_only {
                    return Err(VmError::InvalidOperation("read-only storage context".into()));
                }
                self.with_ctx(vm, |ctx| {
                    ctx.dao.delete_storage_item(context.contract_id, &key);
                    Ok(())
                })
            }
            Syscall::StorageFind => {
                let prefix = vm.pop_bytes()?;
                let context = pop_storage_context(vm)?;
                let entries = self.with_ctx(vm, |ctx| {
                    let mut found = Vec::new();
                    ctx.dao
                        .seek_storage(context.contract_id, &prefix, &mut |key, value| {
                            found.push((key.to_vec(), value.to_vec()));
                            true
                        })
                        .map_err(|e| VmError::InvalidOperation(e.to_string()))?;
                    Ok(found)
                })?;
                let items = entries
                    .into_iter()
                    .map(|(key, value)| {
                        StackItem::struct_(vec![
                            StackItem::byte_string(key),
                            StackItem::byte_string(value),
                        ])
                    })
                    .collect();
                vm.push(StackItem::array(items))
            }
            Syscall::ContractCall => self.contract_call(vm),
            Syscall::CryptoCheckSig => {
                let key_bytes = vm.pop_bytes()?;
                let signature = vm.pop_bytes()?;
                let valid = ECPoint::from_bytes(&key_bytes)
                    .map(|key| key.verify(&self.sign_data, &signature))
                    .unwrap_or(false);
                vm.push(StackItem::Boolean(valid))
            }
            Syscall::CryptoCheckMultisig => self.check_multisig(vm),
        }
    }

    /// `System.Contract.Call`: dispatches to a native or a deployed
    /// contract, intersecting call flags.
    fn contract_call(&mut self, vm: &mut ExecutionEngine) -> VmResult<()> {
        let args_item = vm.pop()?;
        let flags_value = vm.pop()?.try_i64()?;
        let method = String::from_utf8(vm.pop_bytes()?)
            .map_err(|e| VmError::InvalidOperation(e.to_string()))?;
        let hash_bytes = vm.pop_bytes()?;
        let hash = UInt160::from_bytes(&hash_bytes)
            .map_err(|e| VmError::InvalidOperation(e.to_string()))?;
        if method.starts_with('_') {
            return Err(VmError::InvalidOperation(format!(
                "reserved method name {method}"
            )));
        }
        let requested = u8::try_from(flags_value)
            .ok()
            .and_then(CallFlags::from_bits)
            .ok_or_else(|| VmError::InvalidOperation("invalid call flags".into()))?;
        let current_flags = vm
            .current_context()
            .map(|c| c.call_flags)
            .unwrap_or(CallFlags::NONE);
        let callee_flags = current_flags.intersect(requested);
        let args: Vec<StackItem> = match &args_item {
            StackItem::Array(items) => items.borrow().clone(),
            _ => return Err(VmError::InvalidCast("argument array")),
        };

        // A native below its activation height is treated exactly like a
        // missing contract: the lookup falls through and faults below.
        let native = match self.natives.by_hash(&hash).cloned() {
            Some(native) => {
                let active = self.with_ctx(vm, |ctx| {
                    let height = ctx
                        .persisting_index()
                        .unwrap_or_else(|| ctx.current_height());
                    Ok(native.is_active(ctx.settings, height))
                })?;
                active.then_some(native)
            }
            None => None,
        };
        if let Some(native) = native {
            let descriptor = native
                .method(&method, args.len())
                .copied()
                .ok_or_else(|| {
                    VmError::InvalidOperation(format!(
                        "{} has no method {method}/{}",
                        native.name(),
                        args.len()
                    ))
                })?;
            if !callee_flags.contains(descriptor.required_flags) {
                return Err(VmError::MissingCallFlags {
                    required: descriptor.required_flags.bits(),
                    current: callee_flags.bits(),
                });
            }
            vm.add_gas(descriptor.price)?;
            let depth = vm.invocation_depth();
            self.script_stack.push((depth, hash));
            let result = self.with_ctx(vm, |ctx| {
                native
                    .invoke(ctx, &method, args)
                    .map_err(|e| VmError::InvalidOperation(e.to_string()))
            });
            self.script_stack.pop();
            vm.push(result?)?;
            return Ok(());
        }

        // Deployed contract: locate the method and load its script.
        let contract = self.with_ctx(vm, |ctx| {
            get_contract(ctx.dao, &hash).map_err(|e| VmError::InvalidOperation(e.to_string()))
        })?;
        let contract = contract
            .ok_or_else(|| VmError::InvalidOperation(format!("unknown contract {hash}")))?;
        let method_descriptor = contract
            .manifest
            .abi
            .method(&method, args.len())
            .ok_or_else(|| {
                VmError::InvalidOperation(format!(
                    "contract {hash} has no method {method}/{}",
                    args.len()
                ))
            })?
            .clone();
        vm.load_script(Script::new(contract.nef.script.clone()), -1, callee_flags)?;
        self.script_stack.push((vm.invocation_depth(), hash));
        if let Some(context) = vm.current_context_mut() {
            context.jump_to(method_descriptor.offset)?;
        }
        for arg in args.into_iter().rev() {
            vm.push(arg)?;
        }
        Ok(())
    }

    /// `System.Crypto.CheckMultisig`: m signatures over n ordered keys.
    fn check_multisig(&mut self, vm: &mut ExecutionEngine) -> VmResult<()> {
        let n = vm.pop()?.try_i64()?;
        if !(1..=1024).contains(&n) {
            return Err(VmError::InvalidOperation(format!("multisig n={n}")));
        }
        let mut keys = Vec::with_capacity(n as usize);
        for _ in 0..n {
            keys.push(vm.pop_bytes()?);
        }
        let m = vm.pop()?.try_i64()?;
        if !(1..=n).contains(&m) {
            return Err(VmError::InvalidOperation(format!("multisig m={m} of {n}")));
        }
        let mut signatures = Vec::with_capacity(m as usize);
        for _ in 0..m {
            signatures.push(vm.pop_bytes()?);
        }
        // Verification cost scales with the key count.
        vm.add_gas(PRICE_STANDARD * n)?;

        // Popping reversed both lists; restore script push order so the
        // greedy match walks keys and signatures in the same direction.
        keys.reverse();
        signatures.reverse();
        let mut key_index = 0usize;
        let mut matched = 0usize;
        for signature in &signatures {
            let mut found = false;
            while key_index < keys.len() {
                let candidate = &keys[key_index];
                key_index += 1;
                if let Ok(key) = ECPoint::from_bytes(candidate) {
                    if key.verify(&self.sign_data, signature) {
                        found = true;
                        break;
                    }
                }
            }
            if !found {
                break;
            }
            matched += 1;
        }
        vm.push(StackItem::Boolean(matched == signatures.len()))
    }
}

fn pop_storage_context(vm: &mut ExecutionEngine) -> VmResult<StorageContext> {
    let item = vm.pop()?;
    let StackItem::InteropInterface(interface) = item else {
        return Err(VmError::InvalidCast("storage context"));
    };
    interface
        .downcast_ref::<StorageContext>()
        .copied()
        .ok_or(VmError::InvalidCast("storage context"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::NativeContract;
    use neo3_persistence::MemoryStore;
    use neo3_vm::{interop_id, ScriptBuilder};

    fn engine(trigger: Trigger) -> ApplicationEngine {
        let settings = Arc::new(ProtocolSettings::default());
        let natives = Arc::new(NativeRegistry::new(true));
        let dao = DataCache::new(Arc::new(MemoryStore::new()));
        ApplicationEngine::new(trigger, None, None, dao, settings, natives, 1_000_000_000)
    }

    #[test]
    fn platform_and_trigger_syscalls() {
        let mut app = engine(Trigger::Application);
        let mut builder = ScriptBuilder::new();
        builder.emit_syscall(interop_id("System.Runtime.Platform"));
        builder.emit_syscall(interop_id("System.Runtime.GetTrigger"));
        builder.emit(neo3_vm::OpCode::Ret);
        let state = app.run(builder.into_bytes(), CallFlags::ALL);
        assert_eq!(state, VMState::Halt);
        let (_, result) = app.finish();
        assert_eq!(result.stack.len(), 2);
        assert_eq!(result.stack[0], AppStackItem::Bytes(b"NEO".to_vec()));
        assert_eq!(
            result.stack[1],
            AppStackItem::Integer((Trigger::Application as u8).into())
        );
    }

    #[test]
    fn native_call_via_contract_call() {
        let mut app = engine(Trigger::Application);
        let policy_hash = app.host.natives.policy.hash();
        let mut builder = ScriptBuilder::new();
        builder.emit(neo3_vm::OpCode::NewArray0); // no args
        builder.emit_push_i64(CallFlags::READ_ONLY.bits() as i64);
        builder.emit_push_bytes(b"getFeePerByte");
        builder.emit_push_bytes(policy_hash.as_bytes());
        builder.emit_syscall(interop_id("System.Contract.Call"));
        builder.emit(neo3_vm::OpCode::Ret);
        let state = app.run(builder.into_bytes(), CallFlags::ALL);
        assert_eq!(state, VMState::Fault); // args order: hash, method, flags, args from top
    }

    #[test]
    fn native_call_correct_arg_order() {
        let mut app = engine(Trigger::Application);
        let policy_hash = app.host.natives.policy.hash();
        // Stack at syscall (top first): args, flags, method, hash — so push
        // hash first.
        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(policy_hash.as_bytes());
        builder.emit_push_bytes(b"getFeePerByte");
        builder.emit_push_i64(CallFlags::READ_ONLY.bits() as i64);
        builder.emit(neo3_vm::OpCode::NewArray0);
        builder.emit_syscall(interop_id("System.Contract.Call"));
        builder.emit(neo3_vm::OpCode::Ret);
        let state = app.run(builder.into_bytes(), CallFlags::ALL);
        assert_eq!(state, VMState::Halt);
        let (_, result) = app.finish();
        assert_eq!(
            result.stack.last().unwrap(),
            &AppStackItem::Integer(1000.into())
        );
    }

    #[test]
    fn call_to_inactive_native_faults() {
        let mut settings = ProtocolSettings::default();
        settings
            .native_activations
            .insert(crate::native::PolicyContract::NAME.into(), vec![100]);
        let natives = Arc::new(NativeRegistry::new(false));
        let dao = DataCache::new(Arc::new(MemoryStore::new()));
        let mut app = ApplicationEngine::new(
            Trigger::Application,
            None,
            None,
            dao,
            Arc::new(settings),
            natives,
            1_000_000_000,
        );
        let policy_hash = app.host.natives.policy.hash();
        // Identical to the successful call above, but the policy contract
        // only activates at height 100 and the chain is empty.
        let mut builder = ScriptBuilder::new();
        builder.emit_push_bytes(policy_hash.as_bytes());
        builder.emit_push_bytes(b"getFeePerByte");
        builder.emit_push_i64(CallFlags::READ_ONLY.bits() as i64);
        builder.emit(neo3_vm::OpCode::NewArray0);
        builder.emit_syscall(interop_id("System.Contract.Call"));
        builder.emit(neo3_vm::OpCode::Ret);
        let state = app.run(builder.into_bytes(), CallFlags::ALL);
        assert_eq!(state, VMState::Fault);
    }

    #[test]
    fn notify_requires_flag() {
        let mut app = engine(Trigger::Application);
        let mut builder = ScriptBuilder::new();
        builder.emit(neo3_vm::OpCode::NewArray0);
        builder.emit_push_bytes(b"Event");
        builder.emit_syscall(interop_id("System.Runtime.Notify"));
        builder.emit(neo3_vm::OpCode::Ret);
        let state = app.run(builder.into_bytes(), CallFlags::READ_ONLY);
        assert_eq!(state, VMState::Fault);
    }

    #[test]
    fn notify_records_event() {
        let mut app = engine(Trigger::Application);
        let mut builder = ScriptBuilder::new();
        // Notify pops state then name: push name first, then the array.
        builder.emit_push_bytes(b"Started");
        builder.emit(neo3_vm::OpCode::NewArray0);
        builder.emit_syscall(interop_id("System.Runtime.Notify"));
        builder.emit(neo3_vm::OpCode::Ret);
        let state = app.run(builder.into_bytes(), CallFlags::ALL);
        assert_eq!(state, VMState::Halt);
        let (_, result) = app.finish();
        assert_eq!(result.notifications.len(), 1);
        assert_eq!(result.notifications[0].name, "Started");
    }
}
