//! The standard library, written in the scripting language itself.
//!
//! Interpreted once at VM startup with output suppressed (see
//! `Vm::load_prelude`). It defines the `List` and `Table` classes that wrap
//! the raw primitive collections the compiler builds for `[...]` and
//! `{...}` literals: each instance keeps the primitive under a `data` field
//! and forwards every method to the matching `_list_*`/`_tbl_*` native, plus
//! the `str`/`concat` globals the compiler desugars `#` into.

pub const SOURCE: &str = r#"
fun str(value) {
  return _str_(value);
}

fun concat(a, b) {
  return _concat_(a, b);
}

class List {
  init() {
    this.data = _list_new_();
  }

  len() {
    return _list_len_(this.data);
  }

  get(index) {
    return _list_get_(this.data, index);
  }

  getAt(index) {
    return this.get(index);
  }

  set(index, value) {
    _list_set_(this.data, index, value);
    return value;
  }

  setAt(index, value) {
    return this.set(index, value);
  }

  add(value) {
    return _list_add_(this.data, value);
  }

  insert(index, value) {
    _list_insert_(this.data, index, value);
  }

  del(index) {
    _list_del_(this.data, index);
  }

  str() {
    return _list_str_(this.data);
  }
}

class Table {
  init() {
    this.data = _tbl_new_();
  }

  len() {
    return _tbl_len_(this.data);
  }

  get(key) {
    return _tbl_get_(this.data, key);
  }

  getAt(key) {
    return this.get(key);
  }

  set(key, value) {
    _tbl_set_(this.data, key, value);
    return value;
  }

  setAt(key, value) {
    return this.set(key, value);
  }

  del(key) {
    _tbl_del_(this.data, key);
  }

  str() {
    return _tbl_str_(this.data);
  }
}
"#;
