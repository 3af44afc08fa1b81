//! S-expression trees. Every node is a fixed size record living inside of the [Gc] arena and is
//! addressed by a [Tree] handle; [Gc::node] decodes a record into the [Stree] view.
//!
//! Node layout:
//!
//! ```text
//! 0      1       4      8             12         16             40
//! | kind | flags | next | span offset | span len | payload (24) |
//! ```

use std::fmt::Display;

use crate::gc::{Addr, AllocatorFault, Gc, Result};
use crate::location::Span;

pub use special::SpecialForm;

pub mod display;
pub mod special;

/// Size of a node record.
pub const NODE_SIZE: usize = 40;

/// Atoms shorter than this live inside of the node, null terminated.
pub const INLINE_ATOM: usize = PAYLOAD_SIZE;

const KIND: usize = 0;
const FLAGS: usize = 1;
const NEXT: usize = 4;
const SPAN_OFFSET: usize = 8;
const SPAN_LEN: usize = 12;
const PAYLOAD: usize = 16;
const PAYLOAD_SIZE: usize = NODE_SIZE - PAYLOAD;

const FLAG_INLINE: u8 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TreeKind {
    False,
    True,
    Int,
    Float,
    Nil,
    Pair,
    Vector,
    ByteVector,
    Atom,
    Special,
}

impl TreeKind {
    fn from_byte(byte: u8) -> Option<TreeKind> {
        use TreeKind::*;

        [
            False, True, Int, Float, Nil, Pair, Vector, ByteVector, Atom, Special,
        ]
        .get(byte as usize)
        .copied()
    }
}

impl Display for TreeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TreeKind::False => "false",
            TreeKind::True => "true",
            TreeKind::Int => "integer",
            TreeKind::Float => "real",
            TreeKind::Nil => "nil",
            TreeKind::Pair => "pair",
            TreeKind::Vector => "vector",
            TreeKind::ByteVector => "byte vector",
            TreeKind::Atom => "atom",
            TreeKind::Special => "special form",
        };
        f.write_str(name)
    }
}

/// Handle of a node owned by a [Gc]. Two handles are equal when they point at the same node, so
/// the `nil`, `#t` and `#f` singletons can be recognised by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tree(Addr);

impl Tree {
    pub(crate) const DANGLING: Tree = Tree(Addr::DANGLING);

    pub fn addr(self) -> Addr {
        self.0
    }
}

/// Decoded view of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stree<'gc> {
    False,
    True,
    Int(i64),
    Float(f64),
    Nil,
    Pair { car: Tree, cdr: Tree },
    Vector(Items<'gc>),
    ByteVector(&'gc [u8]),
    Atom(&'gc str),
    Special(SpecialForm),
}

/// The items of a vector node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Items<'gc> {
    bytes: &'gc [u8],
}

impl Iterator for Items<'_> {
    type Item = Tree;

    fn next(&mut self) -> Option<Tree> {
        if self.bytes.len() < 4 {
            return None;
        }

        let (head, rest) = self.bytes.split_at(4);
        let mut raw = [0; 4];
        raw.copy_from_slice(head);
        self.bytes = rest;

        Some(Tree(Addr::new(u32::from_le_bytes(raw) as usize)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.bytes.len() / 4;
        (len, Some(len))
    }
}

impl ExactSizeIterator for Items<'_> {}

/// The working representation of the reader and of the lowering pass: either an immediate, a
/// tree or a special form marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    False,
    True,
    Int(i64),
    Float(f64),
    Tree(Tree),
    Special(SpecialForm),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        if value {
            Value::True
        } else {
            Value::False
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Tree> for Value {
    fn from(tree: Tree) -> Self {
        Value::Tree(tree)
    }
}

impl From<SpecialForm> for Value {
    fn from(form: SpecialForm) -> Self {
        Value::Special(form)
    }
}

impl Gc {
    pub(crate) fn seed(&mut self) -> Result<()> {
        self.nil = self.alloc_node(TreeKind::Nil)?;
        self.t = self.alloc_node(TreeKind::True)?;
        self.f = self.alloc_node(TreeKind::False)?;
        Ok(())
    }

    fn alloc_node(&mut self, kind: TreeKind) -> Result<Tree> {
        let addr = self.allocate(NODE_SIZE)?;
        let tree = Tree(addr);

        let record = self.bytes_mut(addr, NODE_SIZE);
        record.fill(0);
        record[KIND] = kind as u8;

        let next = self.last.map_or(Addr::DANGLING, Tree::addr);
        self.write_u32(addr.add(NEXT), next.raw());

        self.last = Some(tree);
        self.nodes += 1;

        Ok(tree)
    }

    fn payload(&self, tree: Tree) -> Addr {
        tree.0.add(PAYLOAD)
    }

    pub fn nil(&self) -> Tree {
        self.nil
    }

    pub fn true_tree(&self) -> Tree {
        self.t
    }

    pub fn false_tree(&self) -> Tree {
        self.f
    }

    pub fn kind(&self, tree: Tree) -> TreeKind {
        match TreeKind::from_byte(self.bytes(tree.0, 1)[KIND]) {
            Some(kind) => kind,
            None => unreachable!("{tree:?} does not point at a node"),
        }
    }

    /// Decodes the node behind `tree`.
    pub fn node(&self, tree: Tree) -> Stree<'_> {
        let payload = self.payload(tree);

        match self.kind(tree) {
            TreeKind::False => Stree::False,
            TreeKind::True => Stree::True,
            TreeKind::Int => Stree::Int(self.read_u64(payload) as i64),
            TreeKind::Float => Stree::Float(f64::from_bits(self.read_u64(payload))),
            TreeKind::Nil => Stree::Nil,
            TreeKind::Pair => Stree::Pair {
                car: self.read_tree(payload),
                cdr: self.read_tree(payload.add(4)),
            },
            TreeKind::Vector => {
                let (store, len, _) = self.store(tree);
                Stree::Vector(Items {
                    bytes: self.bytes(store, len * 4),
                })
            }
            TreeKind::ByteVector => {
                let (store, len, _) = self.store(tree);
                Stree::ByteVector(self.bytes(store, len))
            }
            TreeKind::Atom => Stree::Atom(self.atom_text(tree)),
            TreeKind::Special => match SpecialForm::from_id(self.bytes(payload, 1)[0]) {
                Some(form) => Stree::Special(form),
                None => unreachable!("{tree:?} holds an unknown special form"),
            },
        }
    }

    pub fn int(&mut self, value: i64) -> Result<Tree> {
        let tree = self.alloc_node(TreeKind::Int)?;
        self.write_u64(self.payload(tree), value as u64);
        Ok(tree)
    }

    pub fn float(&mut self, value: f64) -> Result<Tree> {
        let tree = self.alloc_node(TreeKind::Float)?;
        self.write_u64(self.payload(tree), value.to_bits());
        Ok(tree)
    }

    pub fn special(&mut self, form: SpecialForm) -> Result<Tree> {
        let tree = self.alloc_node(TreeKind::Special)?;
        let payload = self.payload(tree);
        self.bytes_mut(payload, 1)[0] = form.id();
        Ok(tree)
    }

    /// Links two values into a pair, materialising immediates as nodes first.
    pub fn pair(&mut self, car: Value, cdr: Value) -> Result<Tree> {
        let car = self.value_to_tree(car)?;
        let cdr = self.value_to_tree(cdr)?;

        let tree = self.alloc_node(TreeKind::Pair)?;
        let payload = self.payload(tree);
        self.write_u32(payload, car.0.raw());
        self.write_u32(payload.add(4), cdr.0.raw());

        Ok(tree)
    }

    /// Builds a proper list out of `items`.
    pub fn list(&mut self, items: &[Value]) -> Result<Tree> {
        items
            .iter()
            .rev()
            .try_fold(self.nil, |tail, item| self.pair(*item, tail.into()))
    }

    /// Stores the text of an atom inline when it's short enough, and in a separate null
    /// terminated allocation otherwise.
    pub fn atom(&mut self, text: &str) -> Result<Tree> {
        let tree = self.alloc_node(TreeKind::Atom)?;
        let payload = self.payload(tree);

        if text.len() < INLINE_ATOM {
            self.bytes_mut(tree.0, NODE_SIZE)[FLAGS] |= FLAG_INLINE;
            self.bytes_mut(payload, text.len())
                .copy_from_slice(text.as_bytes());
        } else {
            let string = self.allocate(text.len() + 1)?;
            self.bytes_mut(string, text.len())
                .copy_from_slice(text.as_bytes());
            self.bytes_mut(string.add(text.len()), 1)[0] = 0;

            self.write_u32(payload, string.raw());
            self.write_u32(payload.add(4), text.len() as u32);
        }

        Ok(tree)
    }

    pub fn is_inline_atom(&self, tree: Tree) -> bool {
        self.kind(tree) == TreeKind::Atom && self.bytes(tree.0, NODE_SIZE)[FLAGS] & FLAG_INLINE != 0
    }

    fn atom_text(&self, tree: Tree) -> &str {
        let payload = self.payload(tree);

        let bytes = if self.is_inline_atom(tree) {
            let inline = self.bytes(payload, PAYLOAD_SIZE);
            let len = inline
                .iter()
                .position(|byte| *byte == 0)
                .unwrap_or(PAYLOAD_SIZE);
            &inline[..len]
        } else {
            let string = Addr::new(self.read_u32(payload) as usize);
            self.bytes(string, self.read_u32(payload.add(4)) as usize)
        };

        std::str::from_utf8(bytes).unwrap_or_default()
    }

    pub fn vector(&mut self, items: &[Value]) -> Result<Tree> {
        let items = items
            .iter()
            .map(|item| self.value_to_tree(*item))
            .collect::<Result<Vec<_>>>()?;

        let tree = self.alloc_node(TreeKind::Vector)?;
        let store = self.allocate(items.len() * 4)?;

        for (index, item) in items.iter().enumerate() {
            self.write_u32(store.add(index * 4), item.0.raw());
        }

        self.write_store(tree, store, items.len(), items.len());

        Ok(tree)
    }

    /// Appends to a vector, doubling its backing store when it's full.
    pub fn vector_push(&mut self, vector: Tree, item: Value) -> Result<()> {
        self.expect_kind(vector, TreeKind::Vector)?;

        let item = self.value_to_tree(item)?;
        let (store, len, capacity) = self.grow_store(vector, 4)?;

        self.write_u32(store.add(len * 4), item.0.raw());
        self.write_store(vector, store, len + 1, capacity);

        Ok(())
    }

    pub fn byte_vector(&mut self, bytes: &[u8]) -> Result<Tree> {
        let tree = self.alloc_node(TreeKind::ByteVector)?;
        let store = self.allocate(bytes.len())?;

        self.bytes_mut(store, bytes.len()).copy_from_slice(bytes);
        self.write_store(tree, store, bytes.len(), bytes.len());

        Ok(tree)
    }

    pub fn byte_vector_push(&mut self, vector: Tree, byte: u8) -> Result<()> {
        self.expect_kind(vector, TreeKind::ByteVector)?;

        let (store, len, capacity) = self.grow_store(vector, 1)?;

        self.bytes_mut(store.add(len), 1)[0] = byte;
        self.write_store(vector, store, len + 1, capacity);

        Ok(())
    }

    fn grow_store(&mut self, vector: Tree, item_size: usize) -> Result<(Addr, usize, usize)> {
        let (store, len, capacity) = self.store(vector);

        if len < capacity {
            return Ok((store, len, capacity));
        }

        let grown = (capacity * 2).max(2);
        let store = self.reallocate(store, capacity * item_size, grown * item_size)?;

        Ok((store, len, grown))
    }

    /// The backing store of a vector as `(address, length, capacity)`.
    fn store(&self, tree: Tree) -> (Addr, usize, usize) {
        let payload = self.payload(tree);
        let store = Addr::from_raw(self.read_u32(payload)).unwrap_or(Addr::DANGLING);
        let len = self.read_u32(payload.add(4)) as usize;
        let capacity = self.read_u32(payload.add(8)) as usize;
        (store, len, capacity)
    }

    fn write_store(&mut self, tree: Tree, store: Addr, len: usize, capacity: usize) {
        let payload = self.payload(tree);
        self.write_u32(payload, store.raw());
        self.write_u32(payload.add(4), len as u32);
        self.write_u32(payload.add(8), capacity as u32);
    }

    fn read_tree(&self, addr: Addr) -> Tree {
        Tree(Addr::new(self.read_u32(addr) as usize))
    }

    fn expect_kind(&self, tree: Tree, expected: TreeKind) -> Result<()> {
        if self.kind(tree) == expected {
            Ok(())
        } else {
            Err(AllocatorFault::WrongKind {
                addr: tree.0,
                expected,
            })
        }
    }

    /// The single conversion point from values to trees. Booleans reuse the singletons, numbers
    /// and special forms get fresh nodes.
    pub fn value_to_tree(&mut self, value: Value) -> Result<Tree> {
        match value {
            Value::False => Ok(self.f),
            Value::True => Ok(self.t),
            Value::Int(value) => self.int(value),
            Value::Float(value) => self.float(value),
            Value::Tree(tree) => Ok(tree),
            Value::Special(form) => self.special(form),
        }
    }

    /// Turns leaf nodes back into immediates. Everything else stays a tree.
    pub fn tree_to_value(&self, tree: Tree) -> Value {
        match self.node(tree) {
            Stree::False => Value::False,
            Stree::True => Value::True,
            Stree::Int(value) => Value::Int(value),
            Stree::Float(value) => Value::Float(value),
            Stree::Special(form) => Value::Special(form),
            _ => Value::Tree(tree),
        }
    }

    pub fn car(&self, tree: Tree) -> Option<Tree> {
        match self.node(tree) {
            Stree::Pair { car, .. } => Some(car),
            _ => None,
        }
    }

    pub fn cdr(&self, tree: Tree) -> Option<Tree> {
        match self.node(tree) {
            Stree::Pair { cdr, .. } => Some(cdr),
            _ => None,
        }
    }

    /// Replaces the tail of a pair. Only the reader uses it, while the list is still private to
    /// it.
    pub(crate) fn set_cdr(&mut self, pair: Tree, cdr: Tree) -> Result<()> {
        self.expect_kind(pair, TreeKind::Pair)?;
        let payload = self.payload(pair);
        self.write_u32(payload.add(4), cdr.0.raw());
        Ok(())
    }

    /// Whether following the `cdr` links ends in `nil`.
    pub fn is_list(&self, mut tree: Tree) -> bool {
        loop {
            match self.node(tree) {
                Stree::Nil => return true,
                Stree::Pair { cdr, .. } => tree = cdr,
                _ => return false,
            }
        }
    }

    pub fn value_is_list(&self, value: Value) -> bool {
        match value {
            Value::Tree(tree) => self.is_list(tree),
            _ => false,
        }
    }

    /// Number of elements of a proper list.
    pub fn list_length(&self, tree: Tree) -> Option<usize> {
        self.is_list(tree).then(|| self.list_items(tree).count())
    }

    /// Iterates over the `car`s of a chain of pairs, stopping at the first non pair tail.
    pub fn list_items(&self, tree: Tree) -> ListItems<'_> {
        ListItems {
            gc: self,
            current: tree,
        }
    }

    pub fn span(&self, tree: Tree) -> Span {
        let offset = self.read_u32(tree.0.add(SPAN_OFFSET)) as usize;
        let len = self.read_u32(tree.0.add(SPAN_LEN)) as usize;
        Span::new(offset, len)
    }

    /// Records where a node came from. The singletons are shared, so they never get a span.
    pub(crate) fn set_span(&mut self, tree: Tree, span: Span) {
        if [self.nil, self.t, self.f].contains(&tree) {
            return;
        }

        let offset = u32::try_from(span.offset).unwrap_or(u32::MAX);
        let len = u32::try_from(span.len).unwrap_or(u32::MAX);
        self.write_u32(tree.0.add(SPAN_OFFSET), offset);
        self.write_u32(tree.0.add(SPAN_LEN), len);
    }

    /// Walks every node ever allocated, newest first.
    pub fn live_nodes(&self) -> LiveNodes<'_> {
        LiveNodes {
            gc: self,
            current: self.last,
        }
    }
}

pub struct ListItems<'gc> {
    gc: &'gc Gc,
    current: Tree,
}

impl Iterator for ListItems<'_> {
    type Item = Tree;

    fn next(&mut self) -> Option<Tree> {
        let Stree::Pair { car, cdr } = self.gc.node(self.current) else {
            return None;
        };
        self.current = cdr;
        Some(car)
    }
}

pub struct LiveNodes<'gc> {
    gc: &'gc Gc,
    current: Option<Tree>,
}

impl Iterator for LiveNodes<'_> {
    type Item = Tree;

    fn next(&mut self) -> Option<Tree> {
        let tree = self.current?;
        self.current = Addr::from_raw(self.gc.read_u32(tree.0.add(NEXT))).map(Tree);
        Some(tree)
    }
}
