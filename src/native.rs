//! Native functions registered into the global table at startup: the misc
//! grab-bag (`print`, `type`, `clock`, `gc`, ...) and the raw list/table
//! primitives the prelude's `List`/`Table` classes wrap.
//!
//! Every native here is infallible by signature, matching the reference
//! implementation's `Value (*)(int, Value*)` natives, which have no way to
//! raise a runtime error either. Where the original indexes a raw C array
//! with an unchecked index (its own `FIXME` comments acknowledge this), we
//! return `nil` instead of reading or writing out of bounds — the same
//! "missing argument" behavior the original already has for other
//! unchecked inputs, just extended to the index case instead of inheriting
//! undefined behavior there.

use std::cell::RefCell;

use crate::debug;
use crate::object::{GcRef, ObjKind, ObjList, ObjRef, ObjString, ObjTable};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

pub fn register_all(vm: &mut Vm) {
    register_misc(vm);
    register_list(vm);
    register_table(vm);
    register_fiber(vm);
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).copied().unwrap_or(Value::Nil)
}

fn as_index(value: Value) -> Option<usize> {
    let n = value.as_number()?;
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    Some(n as usize)
}

fn as_list(value: Value) -> Option<GcRef<ObjList>> {
    value.as_obj().and_then(|o| o.as_list())
}

fn as_table(value: Value) -> Option<GcRef<ObjTable>> {
    value.as_obj().and_then(|o| o.as_table())
}

fn as_string(value: Value) -> Option<GcRef<ObjString>> {
    value.as_obj().and_then(|o| o.as_string())
}

// -- misc -------------------------------------------------------------

fn register_misc(vm: &mut Vm) {
    vm.define_native("_concat_", native_concat);
    vm.define_native("clock", native_clock);
    vm.define_native("gc", native_gc);
    vm.define_native("globals", native_globals);
    vm.define_native("has", native_has);
    vm.define_native("_str_", native_str);
    vm.define_native("objects", native_objects);
    vm.define_native("print", native_print);
    vm.define_native("type", native_type);
}

fn native_concat(vm: &mut Vm, args: &[Value]) -> Value {
    let (a, b) = match (as_string(arg(args, 0)), as_string(arg(args, 1))) {
        (Some(a), Some(b)) => (a, b),
        _ => return Value::Nil,
    };
    let joined = format!("{}{}", a.as_str(), b.as_str());
    Value::Obj(ObjRef::String(vm.intern(&joined)))
}

fn native_clock(_vm: &mut Vm, _args: &[Value]) -> Value {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Value::Number(now)
}

fn native_gc(vm: &mut Vm, _args: &[Value]) -> Value {
    let before = vm.heap.bytes_allocated;
    vm.collect_garbage();
    Value::Number((before.saturating_sub(vm.heap.bytes_allocated)) as f64)
}

fn native_globals(vm: &mut Vm, _args: &[Value]) -> Value {
    let entries: Vec<(GcRef<ObjString>, Value)> = vm.globals.iter().collect();
    for (name, value) in entries {
        vm.output
            .print(&format!("{}: {}\n", name.as_str(), debug::format_value(value)));
    }
    Value::Nil
}

fn native_has(_vm: &mut Vm, args: &[Value]) -> Value {
    let target = arg(args, 0);
    let name = match as_string(arg(args, 1)) {
        Some(s) => s,
        None => return Value::Bool(false),
    };
    let has = match target.as_obj() {
        Some(ObjRef::Class(class)) => class.methods.borrow().contains(name),
        Some(ObjRef::Instance(instance)) => {
            instance.fields.borrow().contains(name) || instance.klass.methods.borrow().contains(name)
        }
        _ => false,
    };
    Value::Bool(has)
}

fn native_str(vm: &mut Vm, args: &[Value]) -> Value {
    let text = debug::format_value(arg(args, 0));
    Value::Obj(ObjRef::String(vm.intern(&text)))
}

fn native_objects(vm: &mut Vm, _args: &[Value]) -> Value {
    debug::print_all_objects(&vm.heap);
    Value::Nil
}

fn native_print(vm: &mut Vm, args: &[Value]) -> Value {
    let text = debug::format_value(arg(args, 0));
    vm.output.print(&text);
    vm.output.print("\n");
    Value::Nil
}

fn native_type(vm: &mut Vm, args: &[Value]) -> Value {
    let name = match arg(args, 0) {
        Value::Bool(_) => "bool",
        Value::Nil => "nil",
        Value::Number(_) => "number",
        Value::Obj(obj) => match obj {
            ObjRef::BoundMethod(_) => "bound method",
            ObjRef::Class(_) => "class",
            ObjRef::Closure(_) | ObjRef::Function(_) => "function",
            ObjRef::Instance(_) => "instance",
            ObjRef::Native(_) => "native",
            ObjRef::String(_) => "string",
            ObjRef::List(_) => "list",
            ObjRef::Table(_) => "table",
            ObjRef::Fiber(_) => "fiber",
            ObjRef::Upvalue(_) => "unknown",
        },
    };
    Value::Obj(ObjRef::String(vm.intern(name)))
}

// -- list ---------------------------------------------------------------

fn register_list(vm: &mut Vm) {
    vm.define_native("_list_add_", native_list_add);
    vm.define_native("_list_del_", native_list_del);
    vm.define_native("_list_get_", native_list_get);
    vm.define_native("_list_insert_", native_list_insert);
    vm.define_native("_list_len_", native_list_len);
    vm.define_native("_list_new_", native_list_new);
    vm.define_native("_list_set_", native_list_set);
    vm.define_native("_list_str_", native_list_str);
}

fn native_list_add(_vm: &mut Vm, args: &[Value]) -> Value {
    let list = match as_list(arg(args, 0)) {
        Some(l) => l,
        None => return Value::Nil,
    };
    let value = arg(args, 1);
    let mut values = list.values.borrow_mut();
    values.push(value);
    Value::Number((values.len() - 1) as f64)
}

fn native_list_del(_vm: &mut Vm, args: &[Value]) -> Value {
    let list = match as_list(arg(args, 0)) {
        Some(l) => l,
        None => return Value::Nil,
    };
    if let Some(index) = as_index(arg(args, 1)) {
        let mut values = list.values.borrow_mut();
        if index < values.len() {
            values.remove(index);
        }
    }
    Value::Nil
}

fn native_list_get(_vm: &mut Vm, args: &[Value]) -> Value {
    let list = match as_list(arg(args, 0)) {
        Some(l) => l,
        None => return Value::Nil,
    };
    match as_index(arg(args, 1)) {
        Some(index) => list.values.borrow().get(index).copied().unwrap_or(Value::Nil),
        None => Value::Nil,
    }
}

fn native_list_insert(_vm: &mut Vm, args: &[Value]) -> Value {
    let list = match as_list(arg(args, 0)) {
        Some(l) => l,
        None => return Value::Nil,
    };
    let index = match as_index(arg(args, 1)) {
        Some(i) => i,
        None => return Value::Nil,
    };
    let value = arg(args, 2);
    let mut values = list.values.borrow_mut();
    if index <= values.len() {
        values.insert(index, value);
    }
    Value::Nil
}

fn native_list_len(_vm: &mut Vm, args: &[Value]) -> Value {
    match as_list(arg(args, 0)) {
        Some(list) => Value::Number(list.values.borrow().len() as f64),
        None => Value::Nil,
    }
}

fn native_list_new(vm: &mut Vm, _args: &[Value]) -> Value {
    let list = vm.allocate(ObjKind::List, ObjList { values: RefCell::new(Vec::new()) });
    Value::Obj(ObjRef::List(list))
}

fn native_list_set(_vm: &mut Vm, args: &[Value]) -> Value {
    let list = match as_list(arg(args, 0)) {
        Some(l) => l,
        None => return Value::Nil,
    };
    let value = arg(args, 2);
    if let Some(index) = as_index(arg(args, 1)) {
        let mut values = list.values.borrow_mut();
        if index < values.len() {
            values[index] = value;
        }
    }
    Value::Nil
}

fn native_list_str(vm: &mut Vm, args: &[Value]) -> Value {
    let text = debug::format_value(arg(args, 0));
    Value::Obj(ObjRef::String(vm.intern(&text)))
}

// -- table ------------------------------------------------------------

fn register_table(vm: &mut Vm) {
    vm.define_native("_tbl_del_", native_tbl_del);
    vm.define_native("_tbl_get_", native_tbl_get);
    vm.define_native("_tbl_len_", native_tbl_len);
    vm.define_native("_tbl_new_", native_tbl_new);
    vm.define_native("_tbl_set_", native_tbl_set);
    vm.define_native("_tbl_str_", native_tbl_str);
}

fn native_tbl_del(_vm: &mut Vm, args: &[Value]) -> Value {
    let table = match as_table(arg(args, 0)) {
        Some(t) => t,
        None => return Value::Nil,
    };
    if let Some(key) = as_string(arg(args, 1)) {
        table.values.borrow_mut().delete(key);
    }
    Value::Nil
}

fn native_tbl_get(_vm: &mut Vm, args: &[Value]) -> Value {
    let table = match as_table(arg(args, 0)) {
        Some(t) => t,
        None => return Value::Nil,
    };
    match as_string(arg(args, 1)) {
        Some(key) => table.values.borrow().get(key).unwrap_or(Value::Nil),
        None => Value::Nil,
    }
}

fn native_tbl_len(_vm: &mut Vm, args: &[Value]) -> Value {
    match as_table(arg(args, 0)) {
        Some(table) => Value::Number(table.values.borrow().count_live() as f64),
        None => Value::Nil,
    }
}

fn native_tbl_new(vm: &mut Vm, _args: &[Value]) -> Value {
    let table = vm.allocate(ObjKind::Table, ObjTable { values: RefCell::new(Table::new()) });
    Value::Obj(ObjRef::Table(table))
}

fn native_tbl_set(_vm: &mut Vm, args: &[Value]) -> Value {
    let table = match as_table(arg(args, 0)) {
        Some(t) => t,
        None => return Value::Nil,
    };
    if let Some(key) = as_string(arg(args, 1)) {
        let value = arg(args, 2);
        table.values.borrow_mut().set(key, value);
    }
    Value::Nil
}

fn native_tbl_str(vm: &mut Vm, args: &[Value]) -> Value {
    let text = debug::format_value(arg(args, 0));
    Value::Obj(ObjRef::String(vm.intern(&text)))
}

// -- fiber (suspension primitives remain stubs; see DESIGN.md) -----------

fn register_fiber(vm: &mut Vm) {
    vm.define_native("_fiber_new_", native_fiber_new);
    vm.define_native("_fiber_run_", native_fiber_run);
    vm.define_native("yield", native_fiber_yield);
}

fn native_fiber_new(vm: &mut Vm, _args: &[Value]) -> Value {
    let fiber = vm.new_fiber();
    Value::Obj(ObjRef::Fiber(fiber))
}

fn native_fiber_run(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::Nil
}

fn native_fiber_yield(_vm: &mut Vm, _args: &[Value]) -> Value {
    Value::Nil
}
