//! Python pickle streams, read by a small pickle virtual machine.
//!
//! Nothing is executed: `GLOBAL` references become named placeholders, and `REDUCE`/`NEWOBJ`/
//! `BUILD` produce objects of that type holding their arguments and state. A few well-known
//! constructors (`collections.OrderedDict`, `set`, `_codecs.encode`, NumPy arrays and scalars)
//! are reconstructed into plain values.
//!
//! Lists, dicts and sets live in an [`ObjectGraph`] so that memo references keep their identity,
//! which is what makes shared and self-referencing structures representable.

use std::collections::{HashMap, HashSet};
use std::fs;

use ndarray::{ArrayD, IxDyn, ShapeBuilder};

use crate::error::{LoadError, LoadResult};
use crate::execution::CancellationToken;
use crate::types::{ElementType, NativeValue, NumericArray, ObjectGraph, ObjectId};

use super::plugin::{LoadContext, Loaded, LoaderPlugin};
use super::safetensors::decode_buffer;

/// Type name of placeholders created by `GLOBAL` / `STACK_GLOBAL`.
pub const GLOBAL_TYPE: &str = "global";

const OPS_PER_CANCEL_CHECK: usize = 4096;

/// Extension points for formats layered on pickle.
pub trait PickleHooks {
    /// Resolve a persistent id (`PERSID`/`BINPERSID`).
    fn persistent_load(&mut self, pid: &NativeValue, _vm: &mut VmState) -> NativeValue {
        let reason = format!("unresolved persistent id {}", pid.type_name());
        NativeValue::opaque("persistent_id", reason)
    }

    /// Handle `REDUCE` of `callable`; `None` falls back to the built-in handling.
    fn reduce(
        &mut self,
        _callable: &str,
        _args: &[NativeValue],
        _vm: &mut VmState,
    ) -> Option<NativeValue> {
        None
    }
}

/// Hooks that resolve nothing.
pub struct NoHooks;

impl PickleHooks for NoHooks {}

/// Graph and helpers shared with [`PickleHooks`].
#[derive(Debug, Default)]
pub struct VmState {
    pub graph: ObjectGraph,
    globals: HashMap<ObjectId, String>,
    pending_arrays: HashSet<ObjectId>,
}

impl VmState {
    /// Qualified name if `v` is a `GLOBAL` placeholder.
    pub fn global_name(&self, v: &NativeValue) -> Option<&str> {
        match v {
            NativeValue::Object(id) => self.globals.get(id).map(String::as_str),
            _ => None,
        }
    }

    fn make_global(&mut self, name: String) -> NativeValue {
        let id = self.graph.insert(GLOBAL_TYPE, NativeValue::Str(name.clone()));
        self.globals.insert(id, name);
        NativeValue::Object(id)
    }

    /// Follow a list/tuple/set value to its items.
    pub fn items<'v>(&'v self, v: &'v NativeValue) -> Option<&'v [NativeValue]> {
        match v {
            NativeValue::List(items) => Some(items),
            NativeValue::Object(id) => match &self.graph.get(*id)?.state {
                NativeValue::List(items) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }

    /// Follow a dict value to its entries.
    pub fn entries<'v>(&'v self, v: &'v NativeValue) -> Option<&'v [(String, NativeValue)]> {
        match v {
            NativeValue::Map(entries) => Some(entries),
            NativeValue::Object(id) => match &self.graph.get(*id)?.state {
                NativeValue::Map(entries) => Some(entries),
                _ => None,
            },
            _ => None,
        }
    }

    /// String form of a dict key.
    pub fn key_string(&self, k: &NativeValue) -> String {
        match k {
            NativeValue::Str(s) => s.clone(),
            NativeValue::Int(i) => i.to_string(),
            NativeValue::Float(f) => f.to_string(),
            NativeValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            NativeValue::Null => "None".to_string(),
            NativeValue::Bytes(b) => format!("b'{}'", String::from_utf8_lossy(b)),
            NativeValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| self.key_string(i)).collect();
                format!("({})", parts.join(", "))
            }
            NativeValue::Object(id) => match self.globals.get(id) {
                Some(name) => name.clone(),
                None => format!(
                    "<{}>",
                    self.graph.get(*id).map(|o| o.type_name.as_str()).unwrap_or("object")
                ),
            },
            other => format!("<{}>", other.type_name()),
        }
    }

    fn new_container(&mut self, type_name: &str, state: NativeValue) -> NativeValue {
        NativeValue::Object(self.graph.insert(type_name, state))
    }
}

#[derive(Debug, Clone)]
enum Item {
    Mark,
    Value(NativeValue),
}

/// Result of running a pickle stream.
#[derive(Debug)]
pub struct Unpickled {
    pub value: NativeValue,
    pub graph: ObjectGraph,
    pub protocol: u8,
}

/// Run the pickle program in `data` to its `STOP` opcode.
pub fn unpickle(
    data: &[u8],
    hooks: &mut dyn PickleHooks,
    cancel: &CancellationToken,
) -> LoadResult<Unpickled> {
    let mut vm = Vm {
        data,
        pos: 0,
        stack: Vec::new(),
        memo: HashMap::new(),
        state: VmState::default(),
        protocol: 0,
    };
    let value = vm.run(hooks, cancel)?;
    Ok(Unpickled {
        value,
        graph: vm.state.graph,
        protocol: vm.protocol,
    })
}

fn corrupt(message: impl Into<String>) -> LoadError {
    LoadError::corrupt("pickle", message)
}

struct Vm<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Item>,
    memo: HashMap<u64, NativeValue>,
    state: VmState,
    protocol: u8,
}

impl<'a> Vm<'a> {
    fn take(&mut self, n: usize) -> LoadResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| corrupt(format!("unexpected end of data at offset {}", self.pos)))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> LoadResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> LoadResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> LoadResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> LoadResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn len8(&mut self) -> LoadResult<usize> {
        usize::try_from(self.u64()?).map_err(|_| corrupt("length does not fit in memory"))
    }

    fn line(&mut self) -> LoadResult<&'a str> {
        let rest = &self.data[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("unterminated text argument"))?;
        self.pos += nl + 1;
        let raw = &rest[..nl];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        std::str::from_utf8(raw)
            .map_err(|e| LoadError::corrupt_with("pickle", "text argument is not utf-8", e))
    }

    fn push(&mut self, v: NativeValue) {
        self.stack.push(Item::Value(v));
    }

    fn pop(&mut self) -> LoadResult<NativeValue> {
        match self.stack.pop() {
            Some(Item::Value(v)) => Ok(v),
            Some(Item::Mark) => Err(corrupt("unexpected MARK on stack")),
            None => Err(corrupt("stack underflow")),
        }
    }

    fn top(&mut self) -> LoadResult<&mut NativeValue> {
        match self.stack.last_mut() {
            Some(Item::Value(v)) => Ok(v),
            Some(Item::Mark) => Err(corrupt("unexpected MARK on stack")),
            None => Err(corrupt("stack underflow")),
        }
    }

    fn pop_mark(&mut self) -> LoadResult<Vec<NativeValue>> {
        let idx = self
            .stack
            .iter()
            .rposition(|i| matches!(i, Item::Mark))
            .ok_or_else(|| corrupt("MARK not found"))?;
        let items = self.stack.split_off(idx + 1);
        self.stack.pop();
        Ok(items
            .into_iter()
            .filter_map(|i| match i {
                Item::Value(v) => Some(v),
                Item::Mark => None,
            })
            .collect())
    }

    fn memo_put(&mut self, idx: u64) -> LoadResult<()> {
        let v = self.top()?.clone();
        self.memo.insert(idx, v);
        Ok(())
    }

    fn memo_get(&mut self, idx: u64) -> LoadResult<()> {
        let v = self
            .memo
            .get(&idx)
            .cloned()
            .ok_or_else(|| corrupt(format!("memo key {idx} not found")))?;
        self.push(v);
        Ok(())
    }

    fn run(
        &mut self,
        hooks: &mut dyn PickleHooks,
        cancel: &CancellationToken,
    ) -> LoadResult<NativeValue> {
        let mut ops = 0usize;
        loop {
            ops += 1;
            if ops % OPS_PER_CANCEL_CHECK == 0 {
                cancel.check()?;
            }
            let op = self.u8()?;
            match op {
                // Framing and protocol.
                0x80 => {
                    self.protocol = self.u8()?;
                    if self.protocol > 5 {
                        return Err(corrupt(format!("unsupported protocol {}", self.protocol)));
                    }
                }
                0x95 => {
                    self.u64()?;
                }
                b'.' => return self.pop(),

                // Stack manipulation.
                b'(' => self.stack.push(Item::Mark),
                b'0' => {
                    self.stack.pop().ok_or_else(|| corrupt("stack underflow"))?;
                }
                b'1' => {
                    self.pop_mark()?;
                }
                b'2' => {
                    let v = self.top()?.clone();
                    self.push(v);
                }

                // Memo.
                b'p' => {
                    let idx = parse_int(self.line()?)?;
                    self.memo_put(idx as u64)?;
                }
                b'q' => {
                    let idx = self.u8()?;
                    self.memo_put(u64::from(idx))?;
                }
                b'r' => {
                    let idx = self.u32()?;
                    self.memo_put(u64::from(idx))?;
                }
                0x94 => {
                    let idx = self.memo.len() as u64;
                    self.memo_put(idx)?;
                }
                b'g' => {
                    let idx = parse_int(self.line()?)?;
                    self.memo_get(idx as u64)?;
                }
                b'h' => {
                    let idx = self.u8()?;
                    self.memo_get(u64::from(idx))?;
                }
                b'j' => {
                    let idx = self.u32()?;
                    self.memo_get(u64::from(idx))?;
                }

                // Scalars.
                b'N' => self.push(NativeValue::Null),
                0x88 => self.push(NativeValue::Bool(true)),
                0x89 => self.push(NativeValue::Bool(false)),
                b'I' => {
                    let v = match self.line()? {
                        "01" => NativeValue::Bool(true),
                        "00" => NativeValue::Bool(false),
                        s => NativeValue::Int(parse_int(s)?),
                    };
                    self.push(v);
                }
                b'J' => {
                    let v = self.u32()? as i32;
                    self.push(NativeValue::Int(i64::from(v)));
                }
                b'K' => {
                    let v = self.u8()?;
                    self.push(NativeValue::Int(i64::from(v)));
                }
                b'M' => {
                    let v = self.u16()?;
                    self.push(NativeValue::Int(i64::from(v)));
                }
                b'L' => {
                    let s = self.line()?;
                    let s = s.strip_suffix('L').unwrap_or(s);
                    let v = match s.parse::<i64>() {
                        Ok(i) => NativeValue::Int(i),
                        Err(_) => NativeValue::Float(
                            s.parse::<f64>().map_err(|_| corrupt(format!("invalid LONG '{s}'")))?,
                        ),
                    };
                    self.push(v);
                }
                0x8a => {
                    let n = usize::from(self.u8()?);
                    let bytes = self.take(n)?;
                    self.push(decode_long(bytes));
                }
                0x8b => {
                    let n = self.u32()? as usize;
                    let bytes = self.take(n)?;
                    self.push(decode_long(bytes));
                }
                b'F' => {
                    let s = self.line()?;
                    let f = s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| corrupt(format!("invalid FLOAT '{s}'")))?;
                    self.push(NativeValue::Float(f));
                }
                b'G' => {
                    let b = self.take(8)?;
                    let f = f64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
                    self.push(NativeValue::Float(f));
                }

                // Strings and bytes.
                b'S' => {
                    let s = self.line()?;
                    self.push(NativeValue::Str(unquote(s)));
                }
                b'T' => {
                    let n = self.u32()? as usize;
                    let b = self.take(n)?;
                    self.push(NativeValue::Str(String::from_utf8_lossy(b).into_owned()));
                }
                b'U' => {
                    let n = usize::from(self.u8()?);
                    let b = self.take(n)?;
                    self.push(NativeValue::Str(String::from_utf8_lossy(b).into_owned()));
                }
                b'V' => {
                    let s = self.line()?;
                    self.push(NativeValue::Str(s.to_string()));
                }
                b'X' => {
                    let n = self.u32()? as usize;
                    let s = self.utf8(n)?;
                    self.push(NativeValue::Str(s));
                }
                0x8c => {
                    let n = usize::from(self.u8()?);
                    let s = self.utf8(n)?;
                    self.push(NativeValue::Str(s));
                }
                0x8d => {
                    let n = self.len8()?;
                    let s = self.utf8(n)?;
                    self.push(NativeValue::Str(s));
                }
                b'B' => {
                    let n = self.u32()? as usize;
                    let b = self.take(n)?.to_vec();
                    self.push(NativeValue::Bytes(b));
                }
                b'C' => {
                    let n = usize::from(self.u8()?);
                    let b = self.take(n)?.to_vec();
                    self.push(NativeValue::Bytes(b));
                }
                0x8e | 0x96 => {
                    let n = self.len8()?;
                    let b = self.take(n)?.to_vec();
                    self.push(NativeValue::Bytes(b));
                }
                0x97 => return Err(corrupt("out-of-band buffers are not supported")),
                0x98 => {}

                // Tuples (immutable, stored inline).
                b')' => self.push(NativeValue::List(Vec::new())),
                b't' => {
                    let items = self.pop_mark()?;
                    self.push(NativeValue::List(items));
                }
                0x85..=0x87 => {
                    let n = usize::from(op - 0x84);
                    if self.stack.len() < n {
                        return Err(corrupt("stack underflow"));
                    }
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    self.push(NativeValue::List(items));
                }

                // Mutable containers.
                b']' => {
                    let v = self
                        .state
                        .new_container("builtins.list", NativeValue::List(Vec::new()));
                    self.push(v);
                }
                b'l' => {
                    let items = self.pop_mark()?;
                    let v = self.state.new_container("builtins.list", NativeValue::List(items));
                    self.push(v);
                }
                b'}' => {
                    let v = self.state.new_container("builtins.dict", NativeValue::Map(Vec::new()));
                    self.push(v);
                }
                b'd' => {
                    let items = self.pop_mark()?;
                    let entries = self.pairs(items)?;
                    let v = self.state.new_container("builtins.dict", NativeValue::Map(entries));
                    self.push(v);
                }
                0x8f => {
                    let v = self.state.new_container("builtins.set", NativeValue::List(Vec::new()));
                    self.push(v);
                }
                0x91 => {
                    let items = self.pop_mark()?;
                    let v = self
                        .state
                        .new_container("builtins.frozenset", NativeValue::List(items));
                    self.push(v);
                }
                b'a' => {
                    let item = self.pop()?;
                    let target = self.top()?.clone();
                    self.extend_list(&target, vec![item])?;
                }
                b'e' | 0x90 => {
                    let items = self.pop_mark()?;
                    let target = self.top()?.clone();
                    self.extend_list(&target, items)?;
                }
                b's' => {
                    let v = self.pop()?;
                    let k = self.pop()?;
                    let target = self.top()?.clone();
                    let key = self.state.key_string(&k);
                    self.set_items(&target, vec![(key, v)])?;
                }
                b'u' => {
                    let items = self.pop_mark()?;
                    let entries = self.pairs(items)?;
                    let target = self.top()?.clone();
                    self.set_items(&target, entries)?;
                }

                // Globals and object construction.
                b'c' => {
                    let module = self.line()?;
                    let name = self.line()?;
                    let v = self.state.make_global(format!("{module}.{name}"));
                    self.push(v);
                }
                0x93 => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    match (module, name) {
                        (NativeValue::Str(m), NativeValue::Str(n)) => {
                            let v = self.state.make_global(format!("{m}.{n}"));
                            self.push(v);
                        }
                        _ => return Err(corrupt("STACK_GLOBAL expects two strings")),
                    }
                }
                b'R' => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let v = self.reduce(hooks, &callable, args)?;
                    self.push(v);
                }
                0x81 => {
                    let args = self.pop()?;
                    let cls = self.pop()?;
                    let v = self.instantiate(&cls, args);
                    self.push(v);
                }
                0x92 => {
                    let kwargs = self.pop()?;
                    let args = self.pop()?;
                    let cls = self.pop()?;
                    let v = self.instantiate(&cls, args);
                    if let NativeValue::Object(id) = v {
                        if let Some(kw) = self.state.entries(&kwargs).map(<[_]>::to_vec) {
                            if !kw.is_empty() {
                                self.merge_state(id, kw);
                            }
                        }
                    }
                    self.push(v);
                }
                b'o' => {
                    let mut items = self.pop_mark()?;
                    if items.is_empty() {
                        return Err(corrupt("OBJ without class"));
                    }
                    let cls = items.remove(0);
                    let v = self.instantiate(&cls, NativeValue::List(items));
                    self.push(v);
                }
                b'i' => {
                    let module = self.line()?;
                    let name = self.line()?;
                    let cls = self.state.make_global(format!("{module}.{name}"));
                    let items = self.pop_mark()?;
                    let v = self.instantiate(&cls, NativeValue::List(items));
                    self.push(v);
                }
                b'b' => {
                    let state = self.pop()?;
                    let target = self.top()?.clone();
                    self.build(&target, state)?;
                }

                // Persistent ids.
                b'P' => {
                    let pid = NativeValue::Str(self.line()?.to_string());
                    let v = hooks.persistent_load(&pid, &mut self.state);
                    self.push(v);
                }
                b'Q' => {
                    let pid = self.pop()?;
                    let v = hooks.persistent_load(&pid, &mut self.state);
                    self.push(v);
                }

                0x82..=0x84 => return Err(corrupt("extension registry opcodes are not supported")),
                other => {
                    return Err(corrupt(format!(
                        "unknown opcode 0x{other:02x} at offset {}",
                        self.pos - 1
                    )));
                }
            }
        }
    }

    fn utf8(&mut self, n: usize) -> LoadResult<String> {
        let b = self.take(n)?;
        String::from_utf8(b.to_vec())
            .map_err(|e| LoadError::corrupt_with("pickle", "invalid utf-8 string", e))
    }

    fn pairs(&self, items: Vec<NativeValue>) -> LoadResult<Vec<(String, NativeValue)>> {
        if items.len() % 2 != 0 {
            return Err(corrupt("odd number of items for dict"));
        }
        let mut out = Vec::with_capacity(items.len() / 2);
        let mut it = items.into_iter();
        while let (Some(k), Some(v)) = (it.next(), it.next()) {
            out.push((self.state.key_string(&k), v));
        }
        Ok(out)
    }

    fn extend_list(&mut self, target: &NativeValue, items: Vec<NativeValue>) -> LoadResult<()> {
        let NativeValue::Object(id) = target else {
            return Err(corrupt("APPEND target is not a list"));
        };
        let obj = self
            .state
            .graph
            .get_mut(*id)
            .ok_or_else(|| corrupt("APPEND target is not a list"))?;
        match &mut obj.state {
            NativeValue::List(list) => {
                list.extend(items);
                Ok(())
            }
            // `list` subclasses built with NEWOBJ start out empty.
            state @ NativeValue::Null => {
                *state = NativeValue::List(items);
                Ok(())
            }
            _ => Err(corrupt(format!("cannot append to {}", obj.type_name))),
        }
    }

    fn set_items(
        &mut self,
        target: &NativeValue,
        entries: Vec<(String, NativeValue)>,
    ) -> LoadResult<()> {
        let NativeValue::Object(id) = target else {
            return Err(corrupt("SETITEM target is not a dict"));
        };
        let obj = self
            .state
            .graph
            .get_mut(*id)
            .ok_or_else(|| corrupt("SETITEM target is not a dict"))?;
        if matches!(obj.state, NativeValue::Null) {
            obj.state = NativeValue::Map(Vec::new());
        }
        match &mut obj.state {
            NativeValue::Map(map) => {
                for (k, v) in entries {
                    map_insert(map, k, v);
                }
                Ok(())
            }
            _ => Err(corrupt(format!("cannot set items on {}", obj.type_name))),
        }
    }

    fn merge_state(&mut self, id: ObjectId, entries: Vec<(String, NativeValue)>) {
        if let Some(obj) = self.state.graph.get_mut(id) {
            match &mut obj.state {
                NativeValue::Map(map) => {
                    for (k, v) in entries {
                        map_insert(map, k, v);
                    }
                }
                NativeValue::Null => obj.state = NativeValue::Map(entries),
                other => {
                    let previous = std::mem::take(other);
                    let mut map = vec![("value".to_string(), previous)];
                    map.extend(entries);
                    *other = NativeValue::Map(map);
                }
            }
        }
    }

    fn instantiate(&mut self, cls: &NativeValue, args: NativeValue) -> NativeValue {
        let name = self
            .state
            .global_name(cls)
            .unwrap_or("builtins.object")
            .to_string();
        if let Some(v) = self.known_constructor(&name, &args) {
            return v;
        }
        let has_args = self.state.items(&args).is_some_and(|a| !a.is_empty());
        let state = if has_args {
            NativeValue::Map(vec![("args".to_string(), args)])
        } else {
            NativeValue::Null
        };
        NativeValue::Object(self.state.graph.insert(name, state))
    }

    fn reduce(
        &mut self,
        hooks: &mut dyn PickleHooks,
        callable: &NativeValue,
        args: NativeValue,
    ) -> LoadResult<NativeValue> {
        let Some(name) = self.state.global_name(callable).map(str::to_owned) else {
            return Ok(NativeValue::opaque("reduce", "callable is not a global reference"));
        };
        let arg_items: Vec<NativeValue> = self
            .state
            .items(&args)
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        if let Some(v) = hooks.reduce(&name, &arg_items, &mut self.state) {
            return Ok(v);
        }
        if let Some(v) = self.known_constructor(&name, &args) {
            return Ok(v);
        }
        match name.as_str() {
            "copyreg._reconstructor" | "copy_reg._reconstructor" => {
                let cls = arg_items.first().cloned().unwrap_or(NativeValue::Null);
                Ok(self.instantiate(&cls, NativeValue::List(Vec::new())))
            }
            "numpy.core.multiarray._reconstruct" | "numpy._core.multiarray._reconstruct" => {
                let id = self.state.graph.reserve("numpy.ndarray");
                self.state.pending_arrays.insert(id);
                Ok(NativeValue::Object(id))
            }
            "numpy.dtype" => {
                let descr = match arg_items.first() {
                    Some(NativeValue::Str(s)) => s.clone(),
                    _ => "?".to_string(),
                };
                Ok(NativeValue::Object(self.state.graph.insert(
                    "numpy.dtype",
                    NativeValue::Map(vec![
                        ("descr".to_string(), NativeValue::Str(descr)),
                        ("byteorder".to_string(), NativeValue::Str("=".to_string())),
                    ]),
                )))
            }
            "numpy.core.multiarray.scalar" | "numpy._core.multiarray.scalar" => {
                let decoded = match (arg_items.first(), arg_items.get(1)) {
                    (Some(dtype), Some(NativeValue::Bytes(raw))) => self.decode_scalar(dtype, raw),
                    _ => None,
                };
                Ok(decoded
                    .unwrap_or_else(|| NativeValue::opaque("numpy.generic", "unsupported scalar")))
            }
            _ => Ok(NativeValue::Object(self.state.graph.insert(
                name,
                NativeValue::Map(vec![("args".to_string(), NativeValue::List(arg_items))]),
            ))),
        }
    }

    fn known_constructor(&mut self, name: &str, args: &NativeValue) -> Option<NativeValue> {
        let first = self.state.items(args).and_then(|a| a.first()).cloned();
        match name {
            "collections.OrderedDict" | "builtins.dict" | "__builtin__.dict" => {
                let mut entries = Vec::new();
                if let Some(pairs) = first.as_ref().and_then(|f| self.state.items(f)) {
                    for pair in pairs {
                        if let Some([k, v]) = self.state.items(pair) {
                            entries.push((self.state.key_string(k), v.clone()));
                        }
                    }
                } else if let Some(src) = first.as_ref().and_then(|f| self.state.entries(f)) {
                    entries = src.to_vec();
                }
                let type_name = if name == "collections.OrderedDict" {
                    name
                } else {
                    "builtins.dict"
                };
                Some(self.state.new_container(type_name, NativeValue::Map(entries)))
            }
            "builtins.set" | "__builtin__.set" | "builtins.frozenset" | "__builtin__.frozenset" => {
                let items = first
                    .as_ref()
                    .and_then(|f| self.state.items(f))
                    .map(<[_]>::to_vec)
                    .unwrap_or_default();
                let type_name = if name.ends_with("frozenset") {
                    "builtins.frozenset"
                } else {
                    "builtins.set"
                };
                Some(self.state.new_container(type_name, NativeValue::List(items)))
            }
            "builtins.list" | "__builtin__.list" => {
                let items = first
                    .as_ref()
                    .and_then(|f| self.state.items(f))
                    .map(<[_]>::to_vec)
                    .unwrap_or_default();
                Some(self.state.new_container("builtins.list", NativeValue::List(items)))
            }
            "_codecs.encode" => match first {
                Some(NativeValue::Str(s)) => {
                    Some(NativeValue::Bytes(s.chars().map(|c| c as u32 as u8).collect()))
                }
                _ => None,
            },
            "builtins.bytearray"
            | "__builtin__.bytearray"
            | "builtins.bytes"
            | "__builtin__.bytes" => match first {
                Some(NativeValue::Bytes(b)) => Some(NativeValue::Bytes(b)),
                Some(NativeValue::Str(s)) => Some(NativeValue::Bytes(s.into_bytes())),
                None => Some(NativeValue::Bytes(Vec::new())),
                _ => None,
            },
            _ => None,
        }
    }

    fn build(&mut self, target: &NativeValue, state: NativeValue) -> LoadResult<()> {
        let NativeValue::Object(id) = target else {
            return Ok(());
        };
        let id = *id;
        if self.state.pending_arrays.remove(&id) {
            let value = self.decode_ndarray(&state);
            if let Some(obj) = self.state.graph.get_mut(id) {
                obj.state = value;
            }
            return Ok(());
        }

        let type_name = self.state.graph.get(id).map(|o| o.type_name.clone()).unwrap_or_default();
        if type_name == "numpy.dtype" {
            let order = self.state.items(&state).and_then(|s| s.get(1)).cloned();
            if let Some(NativeValue::Str(order)) = order {
                self.merge_state(id, vec![("byteorder".to_string(), NativeValue::Str(order))]);
            }
            return Ok(());
        }

        // `(dict_state, slots_state)` or a plain dict.
        let parts: Vec<NativeValue> = match &state {
            NativeValue::List(items) if items.len() == 2 => items.clone(),
            other => vec![other.clone()],
        };
        let mut merged = Vec::new();
        let mut plain = None;
        for part in &parts {
            if let Some(entries) = self.state.entries(part) {
                merged.extend(entries.iter().cloned());
            } else if !matches!(part, NativeValue::Null) {
                plain = Some(part.clone());
            }
        }
        match plain {
            Some(p) if merged.is_empty() => {
                let obj = self
                    .state
                    .graph
                    .get_mut(id)
                    .ok_or_else(|| corrupt("BUILD target missing"))?;
                if matches!(obj.state, NativeValue::Null) {
                    obj.state = p;
                } else {
                    self.merge_state(id, vec![("state".to_string(), p)]);
                }
            }
            _ => self.merge_state(id, merged),
        }
        Ok(())
    }

    fn dtype_of(&self, dtype: &NativeValue) -> Option<(ElementType, bool)> {
        let entries = self.state.entries(dtype)?;
        let get = |key: &str| {
            entries.iter().find(|(k, _)| k == key).and_then(|(_, v)| match v {
                NativeValue::Str(s) => Some(s.as_str()),
                _ => None,
            })
        };
        let descr = get("descr")?;
        let big_endian = get("byteorder") == Some(">");
        numpy_element_type(descr.trim_start_matches(['<', '>', '|', '=']))
            .map(|et| (et, big_endian))
    }

    fn decode_scalar(&self, dtype: &NativeValue, raw: &[u8]) -> Option<NativeValue> {
        let (et, big_endian) = self.dtype_of(dtype)?;
        let v = *decode_buffer(raw, et, big_endian).first()?;
        Some(match et {
            ElementType::Float16
            | ElementType::BFloat16
            | ElementType::Float32
            | ElementType::Float64 => {
                NativeValue::Float(v)
            }
            ElementType::Bool => NativeValue::Bool(v != 0.0),
            _ => NativeValue::Int(v as i64),
        })
    }

    /// `ndarray.__setstate__` tuple: `(version, shape, dtype, is_fortran, data)`.
    fn decode_ndarray(&self, state: &NativeValue) -> NativeValue {
        let Some(items) = self.state.items(state) else {
            return NativeValue::opaque("numpy.ndarray", "unrecognized array state");
        };
        let (shape_v, dtype, fortran, data) = match items {
            [_, shape, dtype, fortran, data] => (shape, dtype, fortran, data),
            [shape, dtype, fortran, data] => (shape, dtype, fortran, data),
            _ => return NativeValue::opaque("numpy.ndarray", "unrecognized array state"),
        };
        let shape: Option<Vec<usize>> = self.state.items(shape_v).map(|dims| {
            dims.iter()
                .filter_map(|d| match d {
                    NativeValue::Int(i) => usize::try_from(*i).ok(),
                    _ => None,
                })
                .collect()
        });
        let Some(shape) = shape else {
            return NativeValue::opaque("numpy.ndarray", "invalid shape");
        };
        let fortran = matches!(fortran, NativeValue::Bool(true) | NativeValue::Int(1));

        match data {
            NativeValue::Bytes(raw) => {
                let Some((et, big_endian)) = self.dtype_of(dtype) else {
                    return NativeValue::opaque("numpy.ndarray", "unsupported dtype");
                };
                let values = decode_buffer(raw, et, big_endian);
                let arr = if fortran {
                    ArrayD::from_shape_vec(IxDyn(&shape).f(), values)
                } else {
                    ArrayD::from_shape_vec(IxDyn(&shape), values)
                };
                match arr {
                    Ok(a) => NativeValue::Array(NumericArray::new(et, a)),
                    Err(e) => {
                        let reason = format!("data does not match shape: {e}");
                        NativeValue::opaque("numpy.ndarray", reason)
                    }
                }
            }
            // Object arrays pickle their elements as a list.
            other => match self.state.items(other) {
                Some(elems) => NativeValue::List(elems.to_vec()),
                None => NativeValue::opaque("numpy.ndarray", "unsupported array payload"),
            },
        }
    }
}

fn map_insert(map: &mut Vec<(String, NativeValue)>, key: String, value: NativeValue) {
    match map.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => map.push((key, value)),
    }
}

/// NumPy type codes (`f8`, `i4`, `b1`, ...).
pub(crate) fn numpy_element_type(code: &str) -> Option<ElementType> {
    Some(match code {
        "f8" | "d" => ElementType::Float64,
        "f4" | "f" => ElementType::Float32,
        "f2" | "e" => ElementType::Float16,
        "i8" | "q" | "l" => ElementType::Int64,
        "i4" | "i" => ElementType::Int32,
        "i2" | "h" => ElementType::Int16,
        "i1" | "b" => ElementType::Int8,
        "u8" | "Q" | "L" => ElementType::UInt64,
        "u4" | "I" => ElementType::UInt32,
        "u2" | "H" => ElementType::UInt16,
        "u1" | "B" => ElementType::UInt8,
        "b1" | "?" => ElementType::Bool,
        _ => return None,
    })
}

/// Two's-complement little-endian integer (`LONG1`/`LONG4`).
fn decode_long(bytes: &[u8]) -> NativeValue {
    if bytes.is_empty() {
        return NativeValue::Int(0);
    }
    if bytes.len() <= 8 {
        let negative = bytes[bytes.len() - 1] & 0x80 != 0;
        let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
        buf[..bytes.len()].copy_from_slice(bytes);
        return NativeValue::Int(i64::from_le_bytes(buf));
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let magnitude = bytes.iter().rev().fold(0f64, |acc, &b| {
        let b = if negative { !b } else { b };
        acc * 256.0 + f64::from(b)
    });
    NativeValue::Float(if negative { -(magnitude + 1.0) } else { magnitude })
}

fn parse_int(s: &str) -> LoadResult<i64> {
    s.trim().parse().map_err(|_| corrupt(format!("invalid integer '{s}'")))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner.to_string();
        }
    }
    s.to_string()
}

/// Loader for Python pickle files.
#[derive(Debug, Clone, Copy)]
pub struct PicklePlugin;

impl LoaderPlugin for PicklePlugin {
    fn format_tag(&self) -> &'static str {
        "pickle"
    }

    fn description(&self) -> &'static str {
        "Python pickle (data only, nothing is executed)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pkl", "pickle", "pck", "pcl"]
    }

    fn has_signature(&self) -> bool {
        true
    }

    fn sniff(&self, peeked: &[u8]) -> bool {
        matches!(peeked, [0x80, 2..=5, ..])
    }

    fn load(&self, ctx: &LoadContext<'_>) -> LoadResult<Loaded> {
        let bytes = fs::read(ctx.path)?;
        let out = unpickle(&bytes, &mut NoHooks, ctx.cancel)?;
        Ok(Loaded::new(out.value)
            .with_graph(out.graph)
            .attr("protocol", out.protocol))
    }
}
