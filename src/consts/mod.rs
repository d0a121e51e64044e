//! The constant pool: typed, size-prefixed blobs packed into a
//! [`Growable`] and addressed by their 4-byte-aligned offset divided by 4.
//!
//! Every blob starts with a `{u16 size; u16 flags_and_type}` header (type
//! in the low byte, flags in the high byte) followed by the payload padded
//! to a multiple of 4 bytes. Constants are never freed individually.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::arena::{CapacityError, CapacityResult, Growable};

/// Largest payload a single constant may carry.
pub const MAX_CONST_SIZE: usize = 65536;

/// LDT flag: the function returns a value.
pub const LDT_RETURNS: u32 = 1;

/// Function-constant flag (high header byte): the function returns a value.
pub const FUNC_RETURNS: u8 = 1;

const HEADER: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConstId(pub u32);

impl ConstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConstId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ConstType {
    String = 1,
    Int = 2,
    Float = 3,
    Ldt = 4,
    Comment = 5,
    Func = 6,
}

impl ConstType {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            1 => ConstType::String,
            2 => ConstType::Int,
            3 => ConstType::Float,
            4 => ConstType::Ldt,
            5 => ConstType::Comment,
            6 => ConstType::Func,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ConstType::String => "string",
            ConstType::Int => "int",
            ConstType::Float => "float",
            ConstType::Ldt => "ldt",
            ConstType::Comment => "comment",
            ConstType::Func => "func",
        }
    }
}

/// A decoded constant header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstDesc {
    pub id: ConstId,
    pub ty: ConstType,
    pub flags: u8,
    /// Padded payload size in bytes.
    pub size: usize,
}

impl ConstDesc {
    fn payload_offset(&self) -> usize {
        self.id.index() * 4 + HEADER
    }
}

/// The fixed part of a locals descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LdtHeader {
    pub flags: u32,
    pub numparams: u16,
    pub numlocals: u16,
}

impl LdtHeader {
    pub fn returns(&self) -> bool {
        self.flags & LDT_RETURNS != 0
    }

    pub fn slots(&self) -> usize {
        self.numparams as usize + self.numlocals as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ldt {
    pub header: LdtHeader,
    pub params: Vec<ConstId>,
    pub locals: Vec<ConstId>,
}

/// A compiled function: a handle to its separately allocated code block
/// plus the id of its LDT.
#[derive(Debug, Clone)]
pub struct FuncDesc {
    pub code: Rc<[u32]>,
    pub ldt: ConstId,
    pub returns: bool,
}

/// Property names the runtime recognises without a string comparison.
/// They are the first constants created, so their ids are fixed.
#[derive(Debug, Clone, Copy)]
pub struct SpecialProps {
    pub del: ConstId,
    pub size: ConstId,
    pub values: ConstId,
    pub keys: ConstId,
    pub first: ConstId,
    pub next: ConstId,
    pub is_done: ConstId,
    pub current: ConstId,
}

#[derive(Debug)]
pub struct Constants {
    arena: Growable,
    blobs: Vec<Rc<[u32]>>,
    interned: HashMap<ConstId, Rc<str>>,
    pub props: SpecialProps,
}

impl Constants {
    pub fn new() -> CapacityResult<Self> {
        let placeholder = ConstId(0);
        let mut c = Constants {
            arena: Growable::new(4096, 4096),
            blobs: Vec::new(),
            interned: HashMap::new(),
            props: SpecialProps {
                del: placeholder,
                size: placeholder,
                values: placeholder,
                keys: placeholder,
                first: placeholder,
                next: placeholder,
                is_done: placeholder,
                current: placeholder,
            },
        };
        c.props = SpecialProps {
            del: c.find_or_create_string("del")?,
            size: c.find_or_create_string("size")?,
            values: c.find_or_create_string("values")?,
            keys: c.find_or_create_string("keys")?,
            first: c.find_or_create_string("first")?,
            next: c.find_or_create_string("next")?,
            is_done: c.find_or_create_string("isDone")?,
            current: c.find_or_create_string("current")?,
        };
        Ok(c)
    }

    // ── Raw blobs ────────────────────────────────────────────────────

    /// Append a constant and return its id.
    pub fn create(&mut self, ty: ConstType, bytes: &[u8], flags: u8) -> CapacityResult<ConstId> {
        let padded = (bytes.len() + 3) & !3;
        if padded >= MAX_CONST_SIZE {
            return Err(CapacityError::ConstantTooLarge { size: bytes.len() });
        }
        let offset = self.arena.allocate(HEADER + padded);
        let block = self.arena.get_mut(offset, HEADER + padded)?;
        block[0..2].copy_from_slice(&(padded as u16).to_le_bytes());
        block[2..4].copy_from_slice(&(ty as u16 | (flags as u16) << 8).to_le_bytes());
        block[HEADER..HEADER + bytes.len()].copy_from_slice(bytes);
        Ok(ConstId((offset / 4) as u32))
    }

    pub fn get(&self, id: ConstId) -> Option<ConstDesc> {
        let offset = id.index() * 4;
        let header = self.arena.get(offset, HEADER).ok()?;
        let size = u16::from_le_bytes([header[0], header[1]]) as usize;
        let ft = u16::from_le_bytes([header[2], header[3]]);
        let ty = ConstType::from_byte((ft & 0xff) as u8)?;
        if !self.arena.is_inside(offset + HEADER, size) {
            return None;
        }
        Some(ConstDesc { id, ty, flags: (ft >> 8) as u8, size })
    }

    pub fn payload(&self, desc: &ConstDesc) -> &[u8] {
        self.arena.get(desc.payload_offset(), desc.size).unwrap_or(&[])
    }

    /// True if `id` is the start of a constant, found by walking the pool.
    pub fn is_valid(&self, id: ConstId) -> bool {
        self.iter().any(|d| d.id == id)
    }

    pub fn iter(&self) -> ConstIter<'_> {
        ConstIter { consts: self, offset: 0 }
    }

    /// Bytes used by the pool so far.
    pub fn used(&self) -> usize {
        self.arena.offset()
    }

    fn typed(&self, id: ConstId, ty: ConstType) -> Option<(ConstDesc, &[u8])> {
        let desc = self.get(id)?;
        if desc.ty != ty {
            return None;
        }
        Some((desc, self.payload(&desc)))
    }

    // ── Strings ──────────────────────────────────────────────────────

    pub fn find_string(&self, s: &str) -> Option<ConstId> {
        self.iter()
            .filter(|d| d.ty == ConstType::String)
            .find(|d| until_nul(self.payload(d)) == s.as_bytes())
            .map(|d| d.id)
    }

    pub fn find_or_create_string(&mut self, s: &str) -> CapacityResult<ConstId> {
        if let Some(id) = self.find_string(s) {
            return Ok(id);
        }
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.create(ConstType::String, &bytes, 0)
    }

    pub fn str(&self, id: ConstId) -> Option<&str> {
        let (_, payload) = self.typed(id, ConstType::String)?;
        std::str::from_utf8(until_nul(payload)).ok()
    }

    /// A shared copy of a string constant, cached so repeated literal
    /// pushes do not reallocate.
    pub fn string(&mut self, id: ConstId) -> Option<Rc<str>> {
        if let Some(s) = self.interned.get(&id) {
            return Some(s.clone());
        }
        let s: Rc<str> = Rc::from(self.str(id)?);
        self.interned.insert(id, s.clone());
        Some(s)
    }

    // ── Comments ─────────────────────────────────────────────────────

    /// A comment keeps the column it started at so a listing can put it
    /// back where it was.
    pub fn create_comment(&mut self, text: &str, pos: u16) -> CapacityResult<ConstId> {
        let mut bytes = Vec::with_capacity(text.len() + 3);
        bytes.extend_from_slice(&pos.to_le_bytes());
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        self.create(ConstType::Comment, &bytes, 0)
    }

    pub fn comment(&self, id: ConstId) -> Option<(u16, &str)> {
        let (_, payload) = self.typed(id, ConstType::Comment)?;
        let pos = u16::from_le_bytes([*payload.first()?, *payload.get(1)?]);
        let text = std::str::from_utf8(until_nul(&payload[2..])).ok()?;
        Some((pos, text))
    }

    // ── Numbers ──────────────────────────────────────────────────────

    pub fn find_int(&self, n: i32) -> Option<ConstId> {
        self.iter()
            .filter(|d| d.ty == ConstType::Int)
            .find(|d| read_u32(self.payload(d), 0) == Some(n as u32))
            .map(|d| d.id)
    }

    pub fn find_or_create_int(&mut self, n: i32) -> CapacityResult<ConstId> {
        match self.find_int(n) {
            Some(id) => Ok(id),
            None => self.create(ConstType::Int, &n.to_le_bytes(), 0),
        }
    }

    pub fn int(&self, id: ConstId) -> Option<i32> {
        let (_, payload) = self.typed(id, ConstType::Int)?;
        read_u32(payload, 0).map(|u| u as i32)
    }

    pub fn find_float(&self, f: f32) -> Option<ConstId> {
        self.iter()
            .filter(|d| d.ty == ConstType::Float)
            .find(|d| read_u32(self.payload(d), 0) == Some(f.to_bits()))
            .map(|d| d.id)
    }

    pub fn find_or_create_float(&mut self, f: f32) -> CapacityResult<ConstId> {
        match self.find_float(f) {
            Some(id) => Ok(id),
            None => self.create(ConstType::Float, &f.to_bits().to_le_bytes(), 0),
        }
    }

    pub fn float(&self, id: ConstId) -> Option<f32> {
        let (_, payload) = self.typed(id, ConstType::Float)?;
        read_u32(payload, 0).map(f32::from_bits)
    }

    // ── Locals descriptor tables ─────────────────────────────────────

    pub fn create_ldt(
        &mut self,
        returns: bool,
        params: &[ConstId],
        locals: &[ConstId],
    ) -> CapacityResult<ConstId> {
        let flags = if returns { LDT_RETURNS } else { 0 };
        let mut bytes = Vec::with_capacity(8 + 4 * (params.len() + locals.len()));
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&(params.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(locals.len() as u16).to_le_bytes());
        for id in params.iter().chain(locals) {
            bytes.extend_from_slice(&id.0.to_le_bytes());
        }
        self.create(ConstType::Ldt, &bytes, 0)
    }

    pub fn ldt_header(&self, id: ConstId) -> Option<LdtHeader> {
        let (_, p) = self.typed(id, ConstType::Ldt)?;
        if p.len() < 8 {
            return None;
        }
        Some(LdtHeader {
            flags: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            numparams: u16::from_le_bytes([p[4], p[5]]),
            numlocals: u16::from_le_bytes([p[6], p[7]]),
        })
    }

    pub fn ldt(&self, id: ConstId) -> Option<Ldt> {
        let header = self.ldt_header(id)?;
        let (_, p) = self.typed(id, ConstType::Ldt)?;
        let name = |i: usize| read_u32(p, 8 + 4 * i).map(ConstId);
        let np = header.numparams as usize;
        let params = (0..np).map(name).collect::<Option<Vec<_>>>()?;
        let locals = (np..header.slots()).map(name).collect::<Option<Vec<_>>>()?;
        Some(Ldt { header, params, locals })
    }

    // ── Functions ────────────────────────────────────────────────────

    pub fn create_func(&mut self, code: Vec<u32>, ldt: ConstId, returns: bool) -> CapacityResult<ConstId> {
        let blob = self.blobs.len() as u32;
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&blob.to_le_bytes());
        bytes.extend_from_slice(&ldt.0.to_le_bytes());
        let id = self.create(ConstType::Func, &bytes, if returns { FUNC_RETURNS } else { 0 })?;
        self.blobs.push(Rc::from(code));
        Ok(id)
    }

    pub fn func(&self, id: ConstId) -> Option<FuncDesc> {
        let (desc, p) = self.typed(id, ConstType::Func)?;
        let blob = read_u32(p, 0)? as usize;
        let ldt = ConstId(read_u32(p, 4)?);
        Some(FuncDesc {
            code: self.blobs.get(blob)?.clone(),
            ldt,
            returns: desc.flags & FUNC_RETURNS != 0,
        })
    }

    /// A short human-readable rendering, used by listings and traces.
    pub fn preview(&self, id: ConstId) -> String {
        let Some(desc) = self.get(id) else {
            return format!("<bad const {id}>");
        };
        match desc.ty {
            ConstType::String => format!("{:?}", self.str(id).unwrap_or("")),
            ConstType::Int => self.int(id).map(|n| n.to_string()).unwrap_or_default(),
            ConstType::Float => self.float(id).map(|f| format!("{f:.6}")).unwrap_or_default(),
            ConstType::Comment => self.comment(id).map(|(_, t)| format!("#{t}")).unwrap_or_default(),
            ConstType::Ldt => match self.ldt_header(id) {
                Some(h) => format!("ldt(params={}, locals={}, returns={})", h.numparams, h.numlocals, h.returns()),
                None => "ldt(?)".to_string(),
            },
            ConstType::Func => match self.func(id) {
                Some(f) => format!("func({} words{})", f.code.len(), if f.returns { ", returns" } else { "" }),
                None => "func(?)".to_string(),
            },
        }
    }
}

pub struct ConstIter<'a> {
    consts: &'a Constants,
    offset: usize,
}

impl Iterator for ConstIter<'_> {
    type Item = ConstDesc;

    fn next(&mut self) -> Option<ConstDesc> {
        if self.offset >= self.consts.arena.offset() {
            return None;
        }
        let desc = self.consts.get(ConstId((self.offset / 4) as u32))?;
        self.offset += HEADER + desc.size;
        Some(desc)
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}
