//! The bytecode interpreter: fiber stack, call frames, opcode dispatch, and
//! the few cross-cutting operations (calling, property/method lookup,
//! upvalue capture, garbage collection) every instruction handler leans on.

use std::cell::RefCell;

use crate::chunk::Chunk;
use crate::compiler::Compiler;
use crate::config::{OutputSink, VmConfig};
use crate::debug;
use crate::gc::{self, Heap};
use crate::object::{
    hash_string, CallFrame, FiberState, GcHeader, GcRef, NativeFn, ObjBoundMethod, ObjClass,
    ObjClosure, ObjFiber, ObjInstance, ObjKind, ObjList, ObjRef, ObjString, ObjTable, ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

pub struct Vm {
    pub heap: Heap,
    pub globals: Table,
    pub current: GcRef<ObjFiber>,
    pub init_string: GcRef<ObjString>,
    /// Interned `"data"`, the field name the prelude's `List`/`Table`
    /// wrappers keep their raw primitive collection under.
    pub data_string: GcRef<ObjString>,
    pub config: VmConfig,
    pub output: OutputSink,
    compiler_roots: Vec<GcRef<crate::object::ObjFunction>>,
    next_fiber_id: u32,
}

fn read_byte(chunk: &Chunk, ip: &mut usize) -> u8 {
    let b = chunk.code[*ip];
    *ip += 1;
    b
}

fn read_short(chunk: &Chunk, ip: &mut usize) -> u16 {
    let hi = read_byte(chunk, ip) as u16;
    let lo = read_byte(chunk, ip) as u16;
    (hi << 8) | lo
}

fn read_constant(chunk: &Chunk, ip: &mut usize) -> Value {
    let idx = read_byte(chunk, ip);
    chunk.constants[idx as usize]
}

fn read_string(chunk: &Chunk, ip: &mut usize) -> GcRef<ObjString> {
    read_constant(chunk, ip)
        .as_obj()
        .and_then(|o| o.as_string())
        .expect("constant referenced by a name operand must be a string")
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let mut heap = Heap::new();
        heap.trace_gc = config.trace_gc;

        let main_fiber = heap.allocate(
            ObjKind::Fiber,
            ObjFiber {
                id: 0,
                parent: None,
                state: RefCell::new(FiberState::new()),
            },
        );

        let init_hash = hash_string("init");
        let init_string = heap.allocate(
            ObjKind::String,
            ObjString {
                chars: "init".to_string(),
                length: 4,
                hash: init_hash,
            },
        );
        heap.strings.set(init_string, Value::Bool(true));

        let data_hash = hash_string("data");
        let data_string = heap.allocate(
            ObjKind::String,
            ObjString {
                chars: "data".to_string(),
                length: 4,
                hash: data_hash,
            },
        );
        heap.strings.set(data_string, Value::Bool(true));

        let mut vm = Vm {
            heap,
            globals: Table::new(),
            current: main_fiber,
            init_string,
            data_string,
            config,
            output: OutputSink::new(),
            compiler_roots: Vec::new(),
            next_fiber_id: 1,
        };
        crate::native::register_all(&mut vm);
        vm.load_prelude();
        vm
    }

    /// Interprets the standard library script with output suppressed, so its
    /// own top-level evaluation never prints anything. Failure here is a bug
    /// in the prelude itself, not user error, so it panics rather than
    /// surfacing an `InterpretResult`.
    fn load_prelude(&mut self) {
        self.output.suppress(true);
        let result = self.interpret(crate::prelude::SOURCE);
        self.output.suppress(false);
        if result != InterpretResult::Ok {
            panic!("the prelude failed to load");
        }
    }

    // -- allocation / GC --------------------------------------------------

    pub fn allocate<T>(&mut self, kind: ObjKind, value: T) -> GcRef<T> {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.allocate(kind, value)
    }

    pub fn intern(&mut self, s: &str) -> GcRef<ObjString> {
        let hash = hash_string(s);
        if let Some(existing) = self.heap.strings.find_string(s, hash) {
            return existing;
        }
        let obj = self.allocate(
            ObjKind::String,
            ObjString {
                chars: s.to_string(),
                length: s.len(),
                hash,
            },
        );
        self.heap.strings.set(obj, Value::Bool(true));
        obj
    }

    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_str = self.intern(name);
        self.push(Value::Obj(ObjRef::String(name_str)));
        let native = self.allocate(ObjKind::Native, crate::object::ObjNative { function });
        self.push(Value::Obj(ObjRef::Native(native)));
        self.globals.set(name_str, Value::Obj(ObjRef::Native(native)));
        self.pop();
        self.pop();
    }

    pub fn new_fiber(&mut self) -> GcRef<ObjFiber> {
        let id = self.next_fiber_id;
        self.next_fiber_id += 1;
        let parent = Some(self.current);
        self.allocate(
            ObjKind::Fiber,
            ObjFiber {
                id,
                parent,
                state: RefCell::new(FiberState::new()),
            },
        )
    }

    pub fn push_compiler_root(&mut self, function: GcRef<crate::object::ObjFunction>) {
        self.compiler_roots.push(function);
    }

    pub fn pop_compiler_root(&mut self) {
        self.compiler_roots.pop();
    }

    pub fn collect_garbage(&mut self) {
        let mut gray: Vec<*mut GcHeader> = Vec::new();

        for root in self.compiler_roots.iter() {
            gc::mark_object(ObjRef::Function(*root), &mut gray);
        }
        for (key, value) in self.globals.iter() {
            gc::mark_object(ObjRef::String(key), &mut gray);
            gc::mark_value(value, &mut gray);
        }
        gc::mark_object(ObjRef::String(self.init_string), &mut gray);
        gc::mark_object(ObjRef::String(self.data_string), &mut gray);
        gc::mark_object(ObjRef::Fiber(self.current), &mut gray);

        while let Some(header) = gray.pop() {
            gc::blacken(header, &mut gray);
        }

        self.heap.strings.remove_white();
        let before = self.heap.bytes_allocated;
        self.heap.sweep();
        if self.config.trace_gc {
            eprintln!(
                "-- gc collected {} bytes (from {} to {})",
                before.saturating_sub(self.heap.bytes_allocated),
                before,
                self.heap.bytes_allocated
            );
        }
        self.heap.next_gc = gc::next_gc_after(self.heap.bytes_allocated);
    }

    // -- fiber stack helpers -----------------------------------------------

    fn stack_top(&self) -> usize {
        self.current.state.borrow().stack_top
    }

    fn set_stack_top(&mut self, top: usize) {
        self.current.state.borrow_mut().stack_top = top;
    }

    pub fn push(&mut self, value: Value) {
        let mut state = self.current.state.borrow_mut();
        let top = state.stack_top;
        state.stack[top] = value;
        state.stack_top = top + 1;
    }

    pub fn pop(&mut self) -> Value {
        let mut state = self.current.state.borrow_mut();
        state.stack_top -= 1;
        state.stack[state.stack_top]
    }

    fn peek(&self, distance: usize) -> Value {
        let state = self.current.state.borrow();
        state.stack[state.stack_top - 1 - distance]
    }

    fn stack_get(&self, idx: usize) -> Value {
        self.current.state.borrow().stack[idx]
    }

    fn stack_set(&mut self, idx: usize, value: Value) {
        self.current.state.borrow_mut().stack[idx] = value;
    }

    fn reset_stack(&mut self) {
        let mut state = self.current.state.borrow_mut();
        state.stack_top = 0;
        state.frames.clear();
        state.open_upvalues = None;
    }

    // -- calling -------------------------------------------------------

    fn call(&mut self, closure: GcRef<ObjClosure>, argc: u8) -> bool {
        let arity = closure.function.arity;
        if argc != arity {
            self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                arity, argc
            ));
            return false;
        }
        let frame_count = self.current.state.borrow().frames.len();
        if frame_count >= crate::common::FRAMES_MAX {
            self.runtime_error("Stack overflow.");
            return false;
        }
        let slots = self.stack_top() - argc as usize - 1;
        self.current.state.borrow_mut().frames.push(CallFrame {
            closure,
            ip: 0,
            slots,
        });
        true
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> bool {
        let obj = match callee.as_obj() {
            Some(o) => o,
            None => {
                self.runtime_error("Can only call functions and classes.");
                return false;
            }
        };
        match obj {
            ObjRef::Closure(closure) => self.call(closure, argc),
            ObjRef::Native(native) => {
                let argc = argc as usize;
                let top = self.stack_top();
                let base = top - argc - 1;
                let args: Vec<Value> = {
                    let state = self.current.state.borrow();
                    state.stack[base + 1..top].to_vec()
                };
                let result = (native.function)(self, &args);
                self.set_stack_top(base);
                self.push(result);
                true
            }
            ObjRef::Class(class) => {
                let instance = self.allocate(
                    ObjKind::Instance,
                    ObjInstance {
                        klass: class,
                        fields: RefCell::new(Table::new()),
                    },
                );
                let idx = self.stack_top() - argc as usize - 1;
                self.stack_set(idx, Value::Obj(ObjRef::Instance(instance)));
                let initializer = class.methods.borrow().get(self.init_string);
                if let Some(init) = initializer {
                    let closure = init
                        .as_obj()
                        .and_then(|o| o.as_closure())
                        .expect("methods are always closures");
                    self.call(closure, argc)
                } else if argc != 0 {
                    self.runtime_error(&format!("Expected 0 arguments but got {}.", argc));
                    false
                } else {
                    true
                }
            }
            ObjRef::BoundMethod(bound) => {
                let idx = self.stack_top() - argc as usize - 1;
                self.stack_set(idx, bound.receiver);
                self.call(bound.method, argc)
            }
            _ => {
                self.runtime_error("Can only call functions and classes.");
                false
            }
        }
    }

    /// Rotates the callee (sitting on top of `argc` already-pushed
    /// arguments) down below them, then calls normally. Used to desugar
    /// `#x` and `x # y` into plain calls to `str`/`concat`.
    fn call_value_postfix(&mut self, argc: u8) -> bool {
        let argc_usize = argc as usize;
        let top = self.stack_top();
        let base = top - argc_usize - 1;
        let callee = self.stack_get(top - 1);
        for i in (0..argc_usize).rev() {
            let v = self.stack_get(base + i);
            self.stack_set(base + i + 1, v);
        }
        self.stack_set(base, callee);
        self.call_value(callee, argc)
    }

    fn invoke_from_class(&mut self, class: GcRef<ObjClass>, name: GcRef<ObjString>, argc: u8) -> bool {
        let method = class.methods.borrow().get(name);
        match method {
            Some(value) => {
                let closure = value
                    .as_obj()
                    .and_then(|o| o.as_closure())
                    .expect("methods are always closures");
                self.call(closure, argc)
            }
            None => {
                self.runtime_error(&format!("Undefined property '{}'.", name.as_str()));
                false
            }
        }
    }

    fn invoke(&mut self, name: GcRef<ObjString>, argc: u8) -> bool {
        let receiver = self.peek(argc as usize);
        let instance = match receiver.as_obj().and_then(|o| o.as_instance()) {
            Some(i) => i,
            None => {
                self.runtime_error("Only instances have methods.");
                return false;
            }
        };
        if let Some(value) = instance.fields.borrow().get(name) {
            let idx = self.stack_top() - argc as usize - 1;
            self.stack_set(idx, value);
            return self.call_value(value, argc);
        }
        self.invoke_from_class(instance.klass, name, argc)
    }

    fn bind_method(&mut self, class: GcRef<ObjClass>, name: GcRef<ObjString>) -> bool {
        let method = class.methods.borrow().get(name);
        let method = match method {
            Some(m) => m,
            None => {
                self.runtime_error(&format!("Undefined property '{}'.", name.as_str()));
                return false;
            }
        };
        let closure = method
            .as_obj()
            .and_then(|o| o.as_closure())
            .expect("methods are always closures");
        let receiver = self.peek(0);
        self.pop();
        let bound = self.allocate(ObjKind::BoundMethod, ObjBoundMethod { receiver, method: closure });
        self.push(Value::Obj(ObjRef::BoundMethod(bound)));
        true
    }

    // -- upvalues --------------------------------------------------------

    fn capture_upvalue(&mut self, local: *mut Value) -> GcRef<ObjUpvalue> {
        let state = self.current.state.borrow();
        let mut prev: Option<GcRef<ObjUpvalue>> = None;
        let mut cursor = state.open_upvalues;
        while let Some(up) = cursor {
            if up.location.get() < local {
                break;
            }
            if up.location.get() == local {
                return up;
            }
            prev = Some(up);
            cursor = up.next_open.get();
        }
        drop(state);

        let created = self.allocate(
            ObjKind::Upvalue,
            ObjUpvalue {
                location: std::cell::Cell::new(local),
                closed: std::cell::Cell::new(Value::Nil),
                next_open: std::cell::Cell::new(cursor),
            },
        );
        let mut state = self.current.state.borrow_mut();
        match prev {
            Some(p) => p.next_open.set(Some(created)),
            None => state.open_upvalues = Some(created),
        }
        created
    }

    fn close_upvalues(&mut self, last: *mut Value) {
        let state = self.current.state.borrow();
        let mut cursor = state.open_upvalues;
        drop(state);
        while let Some(up) = cursor {
            if up.location.get() < last {
                break;
            }
            up.close();
            cursor = up.next_open.get();
        }
        self.current.state.borrow_mut().open_upvalues = cursor;
    }

    fn define_method(&mut self, name: GcRef<ObjString>) {
        let method = self.peek(0);
        let class = self
            .peek(1)
            .as_obj()
            .and_then(|o| o.as_class())
            .expect("OP_METHOD always runs with a class below the closure");
        class.methods.borrow_mut().set(name, method);
        self.pop();
    }

    /// Wraps a raw `List`/`Table` object in an instance of the matching
    /// prelude class, under its `data` field, the way every other method on
    /// that instance expects to find it. Returns `false` (after raising a
    /// runtime error) if the prelude hasn't defined the class.
    fn wrap_collection(&mut self, class_name: &str, raw: Value) -> bool {
        let class_name_str = self.intern(class_name);
        let class = match self.globals.get(class_name_str).and_then(|v| v.as_obj()).and_then(|o| o.as_class()) {
            Some(c) => c,
            None => {
                self.runtime_error(&format!("Cannot find definition of {} class.", class_name));
                return false;
            }
        };
        let instance = self.allocate(
            ObjKind::Instance,
            ObjInstance {
                klass: class,
                fields: RefCell::new(Table::new()),
            },
        );
        instance.fields.borrow_mut().set(self.data_string, raw);
        self.push(Value::Obj(ObjRef::Instance(instance)));
        true
    }

    // -- errors -----------------------------------------------------------

    pub fn runtime_error(&mut self, message: &str) {
        eprintln!("{}", message);
        let state = self.current.state.borrow();
        for frame in state.frames.iter().rev() {
            let function = frame.closure.function;
            let line = if frame.ip == 0 {
                0
            } else {
                function.chunk.lines[frame.ip - 1]
            };
            match function.name {
                Some(name) => eprintln!("[line {}] in {}()", line, name.as_str()),
                None => eprintln!("[line {}] in script", line),
            }
        }
        drop(state);
        self.reset_stack();
    }

    // -- entry points -------------------------------------------------

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let function = match Compiler::compile(self, source) {
            Some(f) => f,
            None => return InterpretResult::CompileError,
        };
        self.push(Value::Obj(ObjRef::Function(function)));
        let closure = self.allocate(
            ObjKind::Closure,
            ObjClosure {
                function,
                upvalues: Vec::new(),
            },
        );
        self.pop();
        self.push(Value::Obj(ObjRef::Closure(closure)));
        self.call(closure, 0);
        self.run()
    }

    pub fn run(&mut self) -> InterpretResult {
        loop {
            let frame_count = self.current.state.borrow().frames.len();
            if frame_count == 0 {
                return InterpretResult::Ok;
            }
            let frame_idx = frame_count - 1;
            let frame = self.current.state.borrow().frames[frame_idx];
            let closure = frame.closure;
            let function = closure.function;
            let mut ip = frame.ip;

            if self.config.trace_exec {
                let state = self.current.state.borrow();
                debug::trace_stack(&state.stack[..state.stack_top]);
                drop(state);
                debug::disassemble_instruction(&function.chunk, ip);
            }

            let byte = read_byte(&function.chunk, &mut ip);
            let op = match crate::opcode::OpCode::from_byte(byte) {
                Some(op) => op,
                None => {
                    self.runtime_error("Unknown opcode.");
                    return InterpretResult::RuntimeError;
                }
            };

            // Everything but explicit jumps resumes, on a future call
            // returning, right after this instruction's operands.
            macro_rules! writeback {
                () => {
                    self.current.state.borrow_mut().frames[frame_idx].ip = ip;
                };
            }

            use crate::opcode::OpCode::*;
            match op {
                Constant => {
                    let value = read_constant(&function.chunk, &mut ip);
                    writeback!();
                    self.push(value);
                }
                Nil => {
                    writeback!();
                    self.push(Value::Nil);
                }
                True => {
                    writeback!();
                    self.push(Value::Bool(true));
                }
                False => {
                    writeback!();
                    self.push(Value::Bool(false));
                }
                Pop => {
                    writeback!();
                    self.pop();
                }
                LocalGet => {
                    let slot = read_byte(&function.chunk, &mut ip) as usize;
                    writeback!();
                    let value = self.stack_get(frame.slots + slot);
                    self.push(value);
                }
                LocalSet => {
                    let slot = read_byte(&function.chunk, &mut ip) as usize;
                    writeback!();
                    let value = self.peek(0);
                    self.stack_set(frame.slots + slot, value);
                }
                GlobalGet => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            self.runtime_error(&format!(
                                "Undefined variable '{}'.",
                                name.as_str()
                            ));
                            return InterpretResult::RuntimeError;
                        }
                    }
                }
                GlobalDefine => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                GlobalSet => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        self.runtime_error(&format!(
                            "Undefined variable '{}'.",
                            name.as_str()
                        ));
                        return InterpretResult::RuntimeError;
                    }
                }
                UpvalueGet => {
                    let slot = read_byte(&function.chunk, &mut ip) as usize;
                    writeback!();
                    let value = closure.upvalues[slot].get();
                    self.push(value);
                }
                UpvalueSet => {
                    let slot = read_byte(&function.chunk, &mut ip) as usize;
                    writeback!();
                    let value = self.peek(0);
                    closure.upvalues[slot].set(value);
                }
                UpvalueClose => {
                    writeback!();
                    let top = self.stack_top();
                    let ptr = {
                        let mut state = self.current.state.borrow_mut();
                        &mut state.stack[top - 1] as *mut Value
                    };
                    self.close_upvalues(ptr);
                    self.pop();
                }
                PropertyGet => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    let receiver = self.peek(0);
                    let instance = match receiver.as_obj().and_then(|o| o.as_instance()) {
                        Some(i) => i,
                        None => {
                            self.runtime_error("Only instances have properties.");
                            return InterpretResult::RuntimeError;
                        }
                    };
                    if let Some(value) = instance.fields.borrow().get(name) {
                        self.pop();
                        self.push(value);
                    } else if !self.bind_method(instance.klass, name) {
                        return InterpretResult::RuntimeError;
                    }
                }
                PropertySet => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    let receiver = self.peek(1);
                    let instance = match receiver.as_obj().and_then(|o| o.as_instance()) {
                        Some(i) => i,
                        None => {
                            self.runtime_error("Only instances have fields.");
                            return InterpretResult::RuntimeError;
                        }
                    };
                    let value = self.peek(0);
                    instance.fields.borrow_mut().set(name, value);
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                SuperGet => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    let superclass = self
                        .pop()
                        .as_obj()
                        .and_then(|o| o.as_class())
                        .expect("super is always a class");
                    if !self.bind_method(superclass, name) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Equal => {
                    writeback!();
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Greater => {
                    writeback!();
                    if !self.binary_number_op(|a, b| Value::Bool(a > b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Less => {
                    writeback!();
                    if !self.binary_number_op(|a, b| Value::Bool(a < b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Add => {
                    writeback!();
                    if !self.binary_number_op(|a, b| Value::Number(a + b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Subtract => {
                    writeback!();
                    if !self.binary_number_op(|a, b| Value::Number(a - b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Multiply => {
                    writeback!();
                    if !self.binary_number_op(|a, b| Value::Number(a * b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Divide => {
                    writeback!();
                    if !self.binary_number_op(|a, b| Value::Number(a / b)) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Not => {
                    writeback!();
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Negate => {
                    writeback!();
                    match self.peek(0).as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => {
                            self.runtime_error("Operand must be a number.");
                            return InterpretResult::RuntimeError;
                        }
                    }
                }
                Jump => {
                    let offset = read_short(&function.chunk, &mut ip) as usize;
                    ip += offset;
                    writeback!();
                }
                JumpIfFalse => {
                    let offset = read_short(&function.chunk, &mut ip) as usize;
                    if self.peek(0).is_falsey() {
                        ip += offset;
                    }
                    writeback!();
                }
                Loop => {
                    let offset = read_short(&function.chunk, &mut ip) as usize;
                    ip -= offset;
                    writeback!();
                }
                Call => {
                    let argc = read_byte(&function.chunk, &mut ip);
                    writeback!();
                    if !self.call_value(self.peek(argc as usize), argc) {
                        return InterpretResult::RuntimeError;
                    }
                }
                CallPostfix => {
                    let argc = read_byte(&function.chunk, &mut ip);
                    writeback!();
                    if !self.call_value_postfix(argc) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Invoke => {
                    let name = read_string(&function.chunk, &mut ip);
                    let argc = read_byte(&function.chunk, &mut ip);
                    writeback!();
                    if !self.invoke(name, argc) {
                        return InterpretResult::RuntimeError;
                    }
                }
                InvokeSuper => {
                    let name = read_string(&function.chunk, &mut ip);
                    let argc = read_byte(&function.chunk, &mut ip);
                    writeback!();
                    let superclass = self
                        .pop()
                        .as_obj()
                        .and_then(|o| o.as_class())
                        .expect("super is always a class");
                    if !self.invoke_from_class(superclass, name, argc) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Closure => {
                    let value = read_constant(&function.chunk, &mut ip);
                    let inner = value
                        .as_obj()
                        .and_then(|o| o.as_function())
                        .expect("OP_CLOSURE constant is always a function");
                    let upvalue_count = inner.upvalue_count as usize;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = read_byte(&function.chunk, &mut ip) != 0;
                        let index = read_byte(&function.chunk, &mut ip) as usize;
                        if is_local {
                            let ptr = {
                                let mut state = self.current.state.borrow_mut();
                                &mut state.stack[frame.slots + index] as *mut Value
                            };
                            upvalues.push(self.capture_upvalue(ptr));
                        } else {
                            upvalues.push(closure.upvalues[index]);
                        }
                    }
                    writeback!();
                    let obj = self.allocate(
                        ObjKind::Closure,
                        ObjClosure {
                            function: inner,
                            upvalues,
                        },
                    );
                    self.push(Value::Obj(ObjRef::Closure(obj)));
                }
                Class => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    let class = self.allocate(
                        ObjKind::Class,
                        ObjClass {
                            name,
                            methods: RefCell::new(Table::new()),
                        },
                    );
                    self.push(Value::Obj(ObjRef::Class(class)));
                }
                Inherit => {
                    writeback!();
                    let superclass = match self.peek(1).as_obj().and_then(|o| o.as_class()) {
                        Some(c) => c,
                        None => {
                            self.runtime_error("Superclass must be a class.");
                            return InterpretResult::RuntimeError;
                        }
                    };
                    let subclass = self
                        .peek(0)
                        .as_obj()
                        .and_then(|o| o.as_class())
                        .expect("OP_INHERIT always runs with the new class on top");
                    subclass
                        .methods
                        .borrow_mut()
                        .add_all(&superclass.methods.borrow());
                    self.pop();
                }
                Method => {
                    let name = read_string(&function.chunk, &mut ip);
                    writeback!();
                    self.define_method(name);
                }
                CollectionList => {
                    let count = read_byte(&function.chunk, &mut ip) as usize;
                    writeback!();
                    let mut values = Vec::with_capacity(count);
                    for _ in 0..count {
                        values.push(self.pop());
                    }
                    values.reverse();
                    let obj = self.allocate(ObjKind::List, ObjList { values: RefCell::new(values) });
                    if !self.wrap_collection("List", Value::Obj(ObjRef::List(obj))) {
                        return InterpretResult::RuntimeError;
                    }
                }
                CollectionTable => {
                    let count = read_byte(&function.chunk, &mut ip) as usize;
                    writeback!();
                    let mut pairs = Vec::with_capacity(count);
                    for _ in 0..count {
                        let value = self.pop();
                        let key = self.pop();
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    let mut table = Table::new();
                    let mut ok = true;
                    for (key, value) in pairs {
                        match key.as_obj().and_then(|o| o.as_string()) {
                            Some(key_str) => {
                                table.set(key_str, value);
                            }
                            None => {
                                ok = false;
                                break;
                            }
                        }
                    }
                    if !ok {
                        self.runtime_error("Table literal key must be a string.");
                        return InterpretResult::RuntimeError;
                    }
                    let obj = self.allocate(ObjKind::Table, ObjTable { values: RefCell::new(table) });
                    if !self.wrap_collection("Table", Value::Obj(ObjRef::Table(obj))) {
                        return InterpretResult::RuntimeError;
                    }
                }
                Return => {
                    let result = self.pop();
                    let ptr = {
                        let mut state = self.current.state.borrow_mut();
                        &mut state.stack[frame.slots] as *mut Value
                    };
                    self.close_upvalues(ptr);
                    self.current.state.borrow_mut().frames.pop();
                    if self.current.state.borrow().frames.is_empty() {
                        self.pop();
                        return InterpretResult::Ok;
                    }
                    self.set_stack_top(frame.slots);
                    self.push(result);
                }
            }
        }
    }

    fn binary_number_op(&mut self, f: impl Fn(f64, f64) -> Value) -> bool {
        let (a, b) = match (self.peek(1).as_number(), self.peek(0).as_number()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                self.runtime_error("Operands must be numbers.");
                return false;
            }
        };
        self.pop();
        self.pop();
        self.push(f(a, b));
        true
    }
}
