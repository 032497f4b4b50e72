pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;
pub mod validate;

use log::debug;
use thiserror::Error;

use instruction::decode::{decode_const_expr, decode_function_body};
use limits::*;
use module::{
    CustomSection, Data, Element, Export, ExportIndex, ExternalKind, FunctionType, Global, GlobalType, Import,
    Limits, Module, SegmentMode, TableType, ValueType,
};
use reader::Reader;
use validate::ValidationError;

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("magic header not detected, found {found}")]
    BadMagic { found: String },

    #[error("unknown binary version {0}")]
    UnsupportedVersion(u32),

    #[error("integer representation too long at offset {offset}")]
    IntegerTooLong { offset: usize },

    #[error("integer too large at offset {offset}")]
    IntegerTooLarge { offset: usize },

    #[error("malformed UTF-8 encoding at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("invalid value type 0x{0:02x}")]
    InvalidValueType(u8),

    #[error("too many {what}: {count} exceeds limit of {limit}")]
    TooMany { what: &'static str, count: u32, limit: u32 },

    #[error("unknown section id {id} at offset {offset}")]
    UnknownSection { id: u8, offset: usize },

    #[error("unexpected or duplicate section id {id}")]
    SectionOutOfOrder { id: u8 },

    #[error("section {id} size mismatch: declared {declared} bytes, consumed {consumed}")]
    SectionSizeMismatch { id: u8, declared: usize, consumed: usize },

    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(String),

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Position of each non-custom section in the required ordering. The data
/// count section (12) sits between the element and code sections.
fn section_rank(id: u8) -> Option<u8> {
    match id {
        1..=9 => Some(id),
        12 => Some(10),
        10 => Some(11),
        11 => Some(12),
        _ => None,
    }
}

/// Decode and validate a module binary.
pub fn parse(name: &str, bytes: &[u8]) -> Result<Module, DecodeError> {
    let mut reader = Reader::new(bytes);
    let mut module = Module::new(name);

    module.version = read_header(&mut reader)?;

    let mut last_rank = 0;
    while !reader.is_empty() {
        let offset = reader.pos();
        let id = reader.read_byte()?;
        let size = reader.read_vu32()? as usize;
        let mut section = reader.sub_reader(size)?;

        if id != 0 {
            let rank = section_rank(id).ok_or(DecodeError::UnknownSection { id, offset })?;
            if rank <= last_rank {
                return Err(DecodeError::SectionOutOfOrder { id });
            }
            last_rank = rank;
        }

        debug!("section #{} at offset {}, len = {}", id, offset, size);
        read_section(id, &mut section, &mut module)?;

        if !section.is_empty() {
            return Err(DecodeError::SectionSizeMismatch {
                id,
                declared: size,
                consumed: size - section.remaining(),
            });
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(DecodeError::Malformed(format!(
            "function and code section have inconsistent lengths: {} != {}",
            module.functions.len(),
            module.code.len()
        )));
    }
    if let Some(count) = module.data_count {
        if count as usize != module.data.len() {
            return Err(DecodeError::Malformed(format!(
                "data count and data section have inconsistent lengths: {} != {}",
                count,
                module.data.len()
            )));
        }
    }

    validate::validate_module(&module)?;
    debug!(
        "decoded module '{}': {} types, {} imports, {} functions, {} exports",
        module.name,
        module.types.len(),
        module.imports.len(),
        module.functions.len(),
        module.exports.len()
    );

    Ok(module)
}

fn read_header(reader: &mut Reader) -> Result<u32, DecodeError> {
    let available = reader.remaining().min(MAGIC.len());
    let magic = reader.read_bytes(available)?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic {
            found: hex::encode(magic),
        });
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    Ok(version)
}

fn read_section(id: u8, reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    match id {
        0 => read_section_custom(reader, &mut module.custom),
        1 => read_section_type(reader, &mut module.types),
        2 => read_section_import(reader, &mut module.imports),
        3 => read_section_function(reader, &mut module.functions),
        4 => read_section_table(reader, &mut module.tables),
        5 => read_section_memory(reader, &mut module.memories),
        6 => read_section_global(reader, &mut module.globals),
        7 => read_section_export(reader, &mut module.exports),
        8 => {
            module.start = Some(reader.read_vu32()?);
            Ok(())
        }
        9 => read_section_element(reader, &mut module.elements),
        10 => read_section_code(reader, module.functions.len(), &mut module.code),
        11 => read_section_data(reader, &mut module.data),
        12 => {
            module.data_count = Some(reader.read_vu32()?);
            Ok(())
        }
        _ => Err(DecodeError::UnknownSection {
            id,
            offset: reader.pos(),
        }),
    }
}

/* SECTION READERS ************************************************/

fn read_section_custom(reader: &mut Reader, custom: &mut Vec<CustomSection>) -> Result<(), DecodeError> {
    let name = reader.read_name()?;
    let size = reader.remaining();
    // contents are opaque to us
    reader.read_bytes(size)?;
    debug!("custom section '{}', {} bytes", name, size);
    custom.push(CustomSection { name, size });
    Ok(())
}

fn read_value_types(reader: &mut Reader) -> Result<Vec<ValueType>, DecodeError> {
    let count = reader.read_count(MAX_FUNCTION_PARAMS, "function parameters or results")?;
    (0..count)
        .map(|_| ValueType::decode(reader.read_byte()?))
        .collect()
}

fn read_section_type(reader: &mut Reader, types: &mut Vec<FunctionType>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_TYPES, "types")?;
    for _ in 0..count {
        let offset = reader.pos();
        if reader.read_byte()? != 0x60 {
            return Err(DecodeError::Malformed(format!(
                "expected 0x60 to lead function type at offset {offset}"
            )));
        }
        let parameters = read_value_types(reader)?;
        let return_types = read_value_types(reader)?;
        types.push(FunctionType::new(parameters, return_types));
    }
    Ok(())
}

fn read_limits(reader: &mut Reader) -> Result<Limits, DecodeError> {
    let offset = reader.pos();
    match reader.read_byte()? {
        0x00 => Ok(Limits {
            min: reader.read_vu32()?,
            max: None,
        }),
        0x01 => Ok(Limits {
            min: reader.read_vu32()?,
            max: Some(reader.read_vu32()?),
        }),
        flag => Err(DecodeError::Malformed(format!(
            "invalid limits flag 0x{flag:02x} at offset {offset}"
        ))),
    }
}

fn read_table_type(reader: &mut Reader) -> Result<TableType, DecodeError> {
    let offset = reader.pos();
    match reader.read_byte()? {
        0x70 => Ok(TableType {
            limits: read_limits(reader)?,
        }),
        byte => Err(DecodeError::Malformed(format!(
            "only funcref tables are supported, found element type 0x{byte:02x} at offset {offset}"
        ))),
    }
}

fn read_global_type(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
    let value_type = ValueType::decode(reader.read_byte()?)?;
    let offset = reader.pos();
    let mutable = match reader.read_byte()? {
        0x00 => false,
        0x01 => true,
        flag => {
            return Err(DecodeError::Malformed(format!(
                "invalid global mutability 0x{flag:02x} at offset {offset}"
            )))
        }
    };
    Ok(GlobalType { value_type, mutable })
}

fn read_section_import(reader: &mut Reader, imports: &mut Vec<Import>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_IMPORTS, "imports")?;
    for _ in 0..count {
        let module = reader.read_name()?;
        let name = reader.read_name()?;
        let offset = reader.pos();
        let external_kind = match reader.read_byte()? {
            0x00 => ExternalKind::Function(reader.read_vu32()?),
            0x01 => ExternalKind::Table(read_table_type(reader)?),
            0x02 => ExternalKind::Memory(read_limits(reader)?),
            0x03 => ExternalKind::Global(read_global_type(reader)?),
            kind => {
                return Err(DecodeError::Malformed(format!(
                    "invalid import kind 0x{kind:02x} at offset {offset}"
                )))
            }
        };
        imports.push(Import {
            module,
            name,
            external_kind,
        });
    }
    Ok(())
}

fn read_section_function(reader: &mut Reader, functions: &mut Vec<u32>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_FUNCTIONS, "functions")?;
    for _ in 0..count {
        functions.push(reader.read_vu32()?);
    }
    Ok(())
}

fn read_section_table(reader: &mut Reader, tables: &mut Vec<TableType>) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        tables.push(read_table_type(reader)?);
    }
    Ok(())
}

fn read_section_memory(reader: &mut Reader, memories: &mut Vec<Limits>) -> Result<(), DecodeError> {
    let count = reader.read_vu32()?;
    for _ in 0..count {
        memories.push(read_limits(reader)?);
    }
    Ok(())
}

fn read_section_global(reader: &mut Reader, globals: &mut Vec<Global>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_GLOBALS, "globals")?;
    for _ in 0..count {
        let global_type = read_global_type(reader)?;
        let init = decode_const_expr(reader)?;
        globals.push(Global { global_type, init });
    }
    Ok(())
}

fn read_section_export(reader: &mut Reader, exports: &mut Vec<Export>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_EXPORTS, "exports")?;
    for _ in 0..count {
        let name = reader.read_name()?;
        let offset = reader.pos();
        let kind = reader.read_byte()?;
        let idx = reader.read_vu32()?;
        let index = match kind {
            0x00 => ExportIndex::Function(idx),
            0x01 => ExportIndex::Table(idx),
            0x02 => ExportIndex::Memory(idx),
            0x03 => ExportIndex::Global(idx),
            _ => {
                return Err(DecodeError::Malformed(format!(
                    "invalid export kind 0x{kind:02x} at offset {offset}"
                )))
            }
        };
        exports.push(Export { name, index });
    }
    Ok(())
}

fn read_function_indices(reader: &mut Reader) -> Result<Vec<u32>, DecodeError> {
    let count = reader.read_count(MAX_TABLE_SIZE, "element segment entries")?;
    (0..count).map(|_| reader.read_vu32()).collect()
}

fn expect_funcref_kind(reader: &mut Reader) -> Result<(), DecodeError> {
    let offset = reader.pos();
    match reader.read_byte()? {
        0x00 => Ok(()),
        kind => Err(DecodeError::Malformed(format!(
            "invalid element kind 0x{kind:02x} at offset {offset}"
        ))),
    }
}

/// Element segments in the function index forms (flags 0 to 3). Forms that
/// carry expressions need reference types and are rejected.
fn read_section_element(reader: &mut Reader, elements: &mut Vec<Element>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_ELEMENT_SEGMENTS, "element segments")?;
    for _ in 0..count {
        let offset = reader.pos();
        let element = match reader.read_vu32()? {
            0 => {
                let offset = decode_const_expr(reader)?;
                Element {
                    mode: SegmentMode::Active { index: 0, offset },
                    functions: read_function_indices(reader)?,
                }
            }
            1 | 3 => {
                expect_funcref_kind(reader)?;
                Element {
                    mode: SegmentMode::Passive,
                    functions: read_function_indices(reader)?,
                }
            }
            2 => {
                let index = reader.read_vu32()?;
                let offset = decode_const_expr(reader)?;
                expect_funcref_kind(reader)?;
                Element {
                    mode: SegmentMode::Active { index, offset },
                    functions: read_function_indices(reader)?,
                }
            }
            flags => {
                return Err(DecodeError::UnsupportedOpcode(format!(
                    "element segment form {flags} at offset {offset}"
                )))
            }
        };
        elements.push(element);
    }
    Ok(())
}

fn read_section_code(reader: &mut Reader, declared: usize, code: &mut Vec<module::FunctionBody>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_FUNCTIONS, "function bodies")?;
    if count as usize != declared {
        return Err(DecodeError::Malformed(format!(
            "function and code section have inconsistent lengths: {declared} != {count}"
        )));
    }
    for index in 0..count {
        let size = reader.read_vu32()?;
        if size > MAX_FUNCTION_SIZE {
            return Err(DecodeError::TooMany {
                what: "function body bytes",
                count: size,
                limit: MAX_FUNCTION_SIZE,
            });
        }
        let mut body = reader.sub_reader(size as usize)?;
        debug!("function body #{}, len = {}", index, size);
        code.push(decode_function_body(&mut body)?);
    }
    Ok(())
}

fn read_section_data(reader: &mut Reader, data: &mut Vec<Data>) -> Result<(), DecodeError> {
    let count = reader.read_count(MAX_DATA_SEGMENTS, "data segments")?;
    for _ in 0..count {
        let offset = reader.pos();
        let mode = match reader.read_vu32()? {
            0 => SegmentMode::Active {
                index: 0,
                offset: decode_const_expr(reader)?,
            },
            1 => SegmentMode::Passive,
            2 => {
                let index = reader.read_vu32()?;
                SegmentMode::Active {
                    index,
                    offset: decode_const_expr(reader)?,
                }
            }
            flags => {
                return Err(DecodeError::Malformed(format!(
                    "invalid data segment flags {flags} at offset {offset}"
                )))
            }
        };
        let len = reader.read_vu32()? as usize;
        let bytes = reader.read_bytes(len)?.to_vec();
        data.push(Data { mode, bytes });
    }
    Ok(())
}
