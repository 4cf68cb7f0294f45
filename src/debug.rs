//! Bytecode disassembler and execution tracer, plus the value formatting
//! shared by disassembly, the `print`/`str` natives, and the REPL's
//! expression echo.

use crate::chunk::Chunk;
use crate::gc::Heap;
use crate::object::{GcRef, ObjList, ObjRef, ObjTable};
use crate::opcode::OpCode;
use crate::value::Value;

pub fn disassemble_chunk(chunk: &Chunk, name: &str) {
    println!("== {} ==", name);
    let mut offset = 0;
    while offset < chunk.count() {
        offset = disassemble_instruction(chunk, offset);
    }
}

pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> usize {
    print!("{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        print!("   | ");
    } else {
        print!("{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    let op = match OpCode::from_byte(byte) {
        Some(op) => op,
        None => {
            println!("Unknown opcode {}", byte);
            return offset + 1;
        }
    };

    use OpCode::*;
    match op {
        Constant | GlobalDefine | GlobalGet | GlobalSet | PropertyGet | PropertySet | SuperGet
        | Class | Method => constant_instruction(op, chunk, offset),
        Invoke | InvokeSuper => invoke_instruction(op, chunk, offset),
        LocalGet | LocalSet | UpvalueGet | UpvalueSet | Call | CallPostfix | CollectionList
        | CollectionTable => byte_instruction(op, chunk, offset),
        Jump | JumpIfFalse => jump_instruction(op, chunk, offset, 1),
        Loop => jump_instruction(op, chunk, offset, -1),
        Closure => closure_instruction(chunk, offset),
        Add | Subtract | Multiply | Divide | Negate | Not | Equal | Greater | Less | Nil | True
        | False | Pop | Return | Inherit | UpvalueClose => simple_instruction(op, offset),
    }
}

fn simple_instruction(op: OpCode, offset: usize) -> usize {
    println!("{}", op.name());
    offset + 1
}

fn byte_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    println!("{:<16} {:4}", op.name(), slot);
    offset + 2
}

fn jump_instruction(op: OpCode, chunk: &Chunk, offset: usize, sign: i64) -> usize {
    let hi = chunk.code[offset + 1] as u16;
    let lo = chunk.code[offset + 2] as u16;
    let jump = ((hi << 8) | lo) as i64;
    let target = offset as i64 + 3 + sign * jump;
    println!("{:<16} {:4} -> {}", op.name(), offset, target);
    offset + 3
}

fn constant_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    print!("{:<16} {:4} '", op.name(), constant);
    print!("{}", format_value(chunk.constants[constant as usize]));
    println!("'");
    offset + 2
}

fn invoke_instruction(op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let constant = chunk.code[offset + 1];
    let argc = chunk.code[offset + 2];
    print!("{:<16} ({} args) {:4} '", op.name(), argc, constant);
    print!("{}", format_value(chunk.constants[constant as usize]));
    println!("'");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset];
    offset += 1;
    let value = chunk.constants[constant as usize];
    print!("{:<16} {:4} '", "OP_CLOSURE", constant);
    print!("{}", format_value(value));
    println!("'");

    if let Some(function) = value.as_obj().and_then(|o| o.as_function()) {
        for _ in 0..function.upvalue_count {
            let is_local = chunk.code[offset];
            offset += 1;
            let index = chunk.code[offset];
            offset += 1;
            println!(
                "{:04}      |                     {} {}",
                offset - 2,
                if is_local != 0 { "local" } else { "upvalue" },
                index
            );
        }
    }
    offset
}

/// Dumps the live value stack, bottom to top, as a bracketed list; used by
/// `-x` before disassembling the instruction about to run.
pub fn trace_stack(stack: &[Value]) {
    print!("          ");
    for value in stack {
        print!("[ {} ]", format_value(*value));
    }
    println!();
}

/// Walks every object still on the heap's allocation list, in no particular
/// order, printing its address and kind. Backs both `-m` and the `objects`
/// native.
pub fn print_all_objects(heap: &Heap) {
    for header in heap.objects_iter() {
        let kind = unsafe { (*header).kind };
        println!("{:p} {}", header, kind.type_name());
    }
}

pub fn format_value(value: Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::Obj(obj) => format_obj(obj),
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn format_obj(obj: ObjRef) -> String {
    match obj {
        ObjRef::String(s) => s.as_str().to_string(),
        ObjRef::Function(f) => match f.name {
            Some(name) => format!("<fn {}>", name.as_str()),
            None => "<script>".to_string(),
        },
        ObjRef::Native(_) => "<native fn>".to_string(),
        ObjRef::Closure(c) => match c.function.name {
            Some(name) => format!("<fn {}>", name.as_str()),
            None => "<script>".to_string(),
        },
        ObjRef::Upvalue(_) => "upvalue".to_string(),
        ObjRef::Class(c) => c.name.as_str().to_string(),
        ObjRef::Instance(i) => format!("{} instance", i.klass.name.as_str()),
        ObjRef::BoundMethod(b) => match b.method.function.name {
            Some(name) => format!("<fn {}>", name.as_str()),
            None => "<script>".to_string(),
        },
        ObjRef::List(l) => format_list(l),
        ObjRef::Table(t) => format_table(t),
        ObjRef::Fiber(f) => format!("fiber {}", f.id),
    }
}

fn format_list(list: GcRef<ObjList>) -> String {
    let values = list.values.borrow();
    let mut parts = Vec::new();
    for (i, v) in values.iter().enumerate() {
        if i >= crate::common::MAX_NUM_VALUES {
            parts.push("...".to_string());
            break;
        }
        parts.push(format_value(*v));
    }
    format!("[{}]", parts.join(", "))
}

fn format_table(table: GcRef<ObjTable>) -> String {
    let inner = table.values.borrow();
    let mut parts = Vec::new();
    for (i, (k, v)) in inner.iter().enumerate() {
        if i >= crate::common::MAX_NUM_VALUES {
            parts.push("...".to_string());
            break;
        }
        parts.push(format!("{}: {}", k.as_str(), format_value(v)));
    }
    format!("{{{}}}", parts.join(", "))
}
