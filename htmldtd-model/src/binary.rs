//! The binary grammar format.
//!
//! Pre-compiled grammars are stored as a flat record stream: a version tag,
//! a string table, an entity table, and an element table. Element
//! cross-references (content-model leaves, exclusion/inclusion lists) are by
//! name, so forward references deserialize through the grammar's normal
//! placeholder mechanism. A grammar file is read once per name and cached in
//! the registry.

use crate::{
    AttDef, AttModifier, AttValueKind, ContentKind, ContentModel, ContentModelBuilder, Dtd,
    ElementSet, Entity, ModelOp, NodeId,
};
use std::io::{self, Read, Write};

/// Magic bytes identifying a compiled grammar file.
pub const MAGIC: &[u8; 4] = b"HDTD";

/// Current format version.
pub const VERSION: u16 = 1;

#[derive(Debug)]
pub enum BinaryError {
    Io(io::Error),
    InvalidMagic,
    UnsupportedVersion(u16),
    BadStringIndex(u32),
    InvalidUtf8,
    BadContentKind(u8),
    BadModelTag(u8),
    EmptyGroup,
    BadAttValueKind(u8),
    BadAttModifier(u8),
    BadEntityType(u8),
}

impl std::fmt::Display for BinaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinaryError::Io(e) => write!(f, "IO error: {}", e),
            BinaryError::InvalidMagic => write!(f, "invalid grammar magic bytes"),
            BinaryError::UnsupportedVersion(v) => write!(f, "unsupported grammar version: {}", v),
            BinaryError::BadStringIndex(i) => write!(f, "string index {} out of range", i),
            BinaryError::InvalidUtf8 => write!(f, "invalid UTF-8 in string table"),
            BinaryError::BadContentKind(c) => write!(f, "invalid content kind: 0x{:02x}", c),
            BinaryError::BadModelTag(t) => write!(f, "invalid content-model tag: 0x{:02x}", t),
            BinaryError::EmptyGroup => write!(f, "content-model group with no children"),
            BinaryError::BadAttValueKind(c) => write!(f, "invalid attribute type: 0x{:02x}", c),
            BinaryError::BadAttModifier(c) => write!(f, "invalid attribute modifier: 0x{:02x}", c),
            BinaryError::BadEntityType(c) => write!(f, "invalid entity type: 0x{:02x}", c),
        }
    }
}

impl std::error::Error for BinaryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BinaryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BinaryError {
    fn from(e: io::Error) -> Self {
        BinaryError::Io(e)
    }
}

// ---- reading ----

fn read_u8<R: Read>(r: &mut R) -> Result<u8, BinaryError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16, BinaryError> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, BinaryError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

struct StringTable(Vec<String>);

impl StringTable {
    fn get(&self, idx: u32) -> Result<&str, BinaryError> {
        self.0
            .get(idx as usize)
            .map(|s| s.as_str())
            .ok_or(BinaryError::BadStringIndex(idx))
    }
}

fn read_string_table<R: Read>(r: &mut R) -> Result<StringTable, BinaryError> {
    let count = read_u32(r)?;
    let mut strings = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_u16(r)? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        strings.push(String::from_utf8(buf).map_err(|_| BinaryError::InvalidUtf8)?);
    }
    Ok(StringTable(strings))
}

fn read_model_node<R: Read>(
    r: &mut R,
    strings: &StringTable,
    dtd: &mut Dtd,
    b: &mut ContentModelBuilder,
) -> Result<NodeId, BinaryError> {
    let tag = read_u8(r)?;
    match tag {
        1 => {
            let name_idx = read_u32(r)?;
            let elem = dtd.get_or_create(strings.get(name_idx)?);
            Ok(b.leaf(elem))
        }
        2..=4 => {
            let child = read_model_node(r, strings, dtd, b)?;
            Ok(match tag {
                2 => b.star(child),
                3 => b.opt(child),
                _ => b.plus(child),
            })
        }
        5..=7 => {
            let count = read_u16(r)? as usize;
            if count == 0 {
                return Err(BinaryError::EmptyGroup);
            }
            let mut children = Vec::with_capacity(count);
            for _ in 0..count {
                children.push(read_model_node(r, strings, dtd, b)?);
            }
            Ok(match tag {
                5 => b.seq(&children),
                6 => b.choice(&children),
                _ => b.all(&children),
            })
        }
        other => Err(BinaryError::BadModelTag(other)),
    }
}

fn read_element_set<R: Read>(
    r: &mut R,
    strings: &StringTable,
    dtd: &mut Dtd,
) -> Result<Option<ElementSet>, BinaryError> {
    let count = read_u16(r)?;
    if count == 0 {
        return Ok(None);
    }
    let mut set = ElementSet::new();
    for _ in 0..count {
        let name_idx = read_u32(r)?;
        let idx = dtd.get_or_create(strings.get(name_idx)?);
        set.insert(idx);
    }
    Ok(Some(set))
}

fn read_attributes<R: Read>(
    r: &mut R,
    strings: &StringTable,
) -> Result<Vec<AttDef>, BinaryError> {
    let count = read_u16(r)? as usize;
    let mut atts = Vec::with_capacity(count);
    for _ in 0..count {
        let name = strings.get(read_u32(r)?)?.to_string();
        let kind_code = read_u8(r)?;
        let kind =
            AttValueKind::from_code(kind_code).ok_or(BinaryError::BadAttValueKind(kind_code))?;
        let mod_code = read_u8(r)?;
        let modifier =
            AttModifier::from_code(mod_code).ok_or(BinaryError::BadAttModifier(mod_code))?;
        let default = if read_u8(r)? != 0 {
            Some(strings.get(read_u32(r)?)?.to_string())
        } else {
            None
        };
        let value_count = read_u16(r)? as usize;
        let values = if value_count == 0 {
            None
        } else {
            let mut vs = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                vs.push(strings.get(read_u32(r)?)?.to_string());
            }
            Some(vs)
        };
        atts.push(AttDef {
            name,
            kind,
            modifier,
            default,
            values,
        });
    }
    Ok(atts)
}

/// Read one compiled grammar. The grammar's name is supplied by the caller
/// (grammar files are looked up by name; the stream does not repeat it).
pub fn read_dtd<R: Read>(name: &str, r: &mut R) -> Result<Dtd, BinaryError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(BinaryError::InvalidMagic);
    }
    let version = read_u16(r)?;
    if version != VERSION {
        return Err(BinaryError::UnsupportedVersion(version));
    }

    let strings = read_string_table(r)?;
    let mut dtd = Dtd::new(name);

    let entity_count = read_u32(r)?;
    for _ in 0..entity_count {
        let ent_name = strings.get(read_u32(r)?)?.to_string();
        let type_byte = read_u8(r)?;
        let data = strings.get(read_u32(r)?)?;
        let entity = Entity::from_type_byte(&ent_name, type_byte, data)
            .ok_or(BinaryError::BadEntityType(type_byte))?;
        dtd.register_entity(entity);
    }

    let element_count = read_u32(r)?;
    for _ in 0..element_count {
        let elem_name = strings.get(read_u32(r)?)?.to_string();
        let kind_code = read_u8(r)?;
        let kind =
            ContentKind::from_code(kind_code).ok_or(BinaryError::BadContentKind(kind_code))?;
        let flags = read_u8(r)?;
        let content = if read_u8(r)? != 0 {
            let mut b = ContentModelBuilder::new();
            let root = read_model_node(r, &strings, &mut dtd, &mut b)?;
            Some(b.build(root))
        } else {
            None
        };
        let exclusions = read_element_set(r, &strings, &mut dtd)?;
        let inclusions = read_element_set(r, &strings, &mut dtd)?;
        let atts = read_attributes(r, &strings)?;
        dtd.define_element(
            &elem_name,
            kind,
            flags & 0x01 != 0,
            flags & 0x02 != 0,
            content,
            exclusions,
            inclusions,
            atts,
        );
    }

    Ok(dtd)
}

// ---- writing ----

#[derive(Default)]
struct StringInterner {
    strings: Vec<String>,
    index: fnv::FnvHashMap<String, u32>,
}

impl StringInterner {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }
}

fn write_model_node(
    out: &mut Vec<u8>,
    dtd: &Dtd,
    model: &ContentModel,
    node: NodeId,
    strings: &mut StringInterner,
) {
    let n = model.node(node);
    out.push(n.op.code());
    match n.op {
        ModelOp::Leaf(elem) => {
            let idx = strings.intern(&dtd.element_at(elem).name);
            out.extend_from_slice(&idx.to_le_bytes());
        }
        ModelOp::ZeroOrMore | ModelOp::Optional | ModelOp::OneOrMore => {
            let child = n.child.expect("unary operator node without child");
            write_model_node(out, dtd, model, child, strings);
        }
        ModelOp::Sequence | ModelOp::Choice | ModelOp::All => {
            let children: Vec<_> = model.children(node).collect();
            out.extend_from_slice(&(children.len() as u16).to_le_bytes());
            for child in children {
                write_model_node(out, dtd, model, child, strings);
            }
        }
    }
}

fn write_element_set(
    out: &mut Vec<u8>,
    dtd: &Dtd,
    set: Option<&ElementSet>,
    strings: &mut StringInterner,
) {
    match set {
        None => out.extend_from_slice(&0u16.to_le_bytes()),
        Some(set) => {
            let indices: Vec<_> = set.iter().collect();
            out.extend_from_slice(&(indices.len() as u16).to_le_bytes());
            for idx in indices {
                let s = strings.intern(&dtd.element_at(idx).name);
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }
}

/// Write a grammar in the binary format.
pub fn write_dtd<W: Write>(dtd: &Dtd, w: &mut W) -> io::Result<()> {
    let mut strings = StringInterner::default();
    let mut body = Vec::new();

    let entities: Vec<_> = dtd.entities().collect();
    body.extend_from_slice(&(entities.len() as u32).to_le_bytes());
    for ent in entities {
        let name = strings.intern(&ent.name);
        body.extend_from_slice(&name.to_le_bytes());
        body.push(ent.type_byte());
        let data = strings.intern(&ent.data);
        body.extend_from_slice(&data.to_le_bytes());
    }

    let elements: Vec<_> = dtd.elements().filter(|e| e.defined).collect();
    body.extend_from_slice(&(elements.len() as u32).to_le_bytes());
    for elem in elements {
        let name = strings.intern(&elem.name);
        body.extend_from_slice(&name.to_le_bytes());
        body.push(elem.kind.code());
        let mut flags = 0u8;
        if elem.omit_start {
            flags |= 0x01;
        }
        if elem.omit_end {
            flags |= 0x02;
        }
        body.push(flags);
        match &elem.content {
            None => body.push(0),
            Some(model) => {
                body.push(1);
                write_model_node(&mut body, dtd, model, model.root(), &mut strings);
            }
        }
        write_element_set(&mut body, dtd, elem.exclusions.as_ref(), &mut strings);
        write_element_set(&mut body, dtd, elem.inclusions.as_ref(), &mut strings);
        body.extend_from_slice(&(elem.atts.len() as u16).to_le_bytes());
        for att in &elem.atts {
            let name = strings.intern(&att.name);
            body.extend_from_slice(&name.to_le_bytes());
            body.push(att.kind.code());
            body.push(att.modifier.code());
            match &att.default {
                None => body.push(0),
                Some(d) => {
                    body.push(1);
                    let idx = strings.intern(d);
                    body.extend_from_slice(&idx.to_le_bytes());
                }
            }
            match &att.values {
                None => body.extend_from_slice(&0u16.to_le_bytes()),
                Some(vs) => {
                    body.extend_from_slice(&(vs.len() as u16).to_le_bytes());
                    for v in vs {
                        let idx = strings.intern(v);
                        body.extend_from_slice(&idx.to_le_bytes());
                    }
                }
            }
        }
    }

    w.write_all(MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&(strings.strings.len() as u32).to_le_bytes())?;
    for s in &strings.strings {
        w.write_all(&(s.len() as u16).to_le_bytes())?;
        w.write_all(s.as_bytes())?;
    }
    w.write_all(&body)?;
    Ok(())
}
