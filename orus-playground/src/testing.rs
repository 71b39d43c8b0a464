//! Stand-in runtime artifact for tests.
//!
//! Builds a small wasm module that speaks the same ABI as the real Orus
//! runtime but, instead of compiling anything, reacts to the first byte
//! of the submitted source:
//!
//! - `!rest` records `rest` as the last error and returns nothing
//! - `#...`  traps
//! - `>rest` writes `rest` through the host `orus_write` import
//! - anything else is echoed back unchanged

use std::fs;
use std::io;
use std::path::Path;

use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, EntityType, ExportKind, ExportSection, Function,
    FunctionSection, GlobalSection, GlobalType, ImportSection, Instruction, MemArg,
    MemorySection, MemoryType, Module, TypeSection, ValType,
};

use crate::artifact::{RUNTIME_MANIFEST, RUNTIME_PAYLOAD};
use crate::runtime::{
    EXPORT_ALLOC, EXPORT_CLEAR_ERROR, EXPORT_INIT, EXPORT_IS_READY, EXPORT_LAST_ERROR,
    EXPORT_MEMORY, EXPORT_REGISTER_BUILTINS, EXPORT_RUN_SOURCE, EXPORT_TEARDOWN, IMPORT_MODULE,
    IMPORT_WRITE,
};

const GLOBAL_READY: u32 = 0;
const GLOBAL_BUILTINS: u32 = 1;
const GLOBAL_HEAP: u32 = 2;
const GLOBAL_ERR_PTR: u32 = 3;
const GLOBAL_ERR_LEN: u32 = 4;

const HEAP_START: i32 = 1024;

const NO_VALUES: [ValType; 0] = [];

#[derive(Debug, Clone, Default)]
pub struct TestArtifact {
    omitted: Vec<&'static str>,
}

impl TestArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave an export out of the generated module.
    pub fn without_export(mut self, name: &'static str) -> Self {
        self.omitted.push(name);
        self
    }

    /// Write the manifest and payload under their fixed names in `dir`.
    pub fn write_to(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join(RUNTIME_MANIFEST),
            r#"{"name":"orus-test-runtime","version":"0.0.0"}"#,
        )?;
        fs::write(dir.join(RUNTIME_PAYLOAD), self.payload())
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut module = Module::new();

        let mut types = TypeSection::new();
        let write_ty = types.len();
        types.ty().function([ValType::I32, ValType::I32], NO_VALUES);
        let unit_ty = types.len();
        types.ty().function(NO_VALUES, NO_VALUES);
        let query_ty = types.len();
        types.ty().function(NO_VALUES, [ValType::I32]);
        let alloc_ty = types.len();
        types.ty().function([ValType::I32], [ValType::I32]);
        let run_ty = types.len();
        types.ty().function([ValType::I32, ValType::I32], [ValType::I64]);
        let packed_ty = types.len();
        types.ty().function(NO_VALUES, [ValType::I64]);
        module.section(&types);

        let mut imports = ImportSection::new();
        imports.import(IMPORT_MODULE, IMPORT_WRITE, EntityType::Function(write_ty));
        module.section(&imports);

        // Index 0 is the imported writer; defined functions follow.
        let defined: [(&str, u32, Function); 8] = [
            (EXPORT_INIT, unit_ty, init_body()),
            (EXPORT_IS_READY, query_ty, is_ready_body()),
            (EXPORT_REGISTER_BUILTINS, unit_ty, register_builtins_body()),
            (EXPORT_ALLOC, alloc_ty, alloc_body()),
            (EXPORT_RUN_SOURCE, run_ty, run_source_body()),
            (EXPORT_LAST_ERROR, packed_ty, last_error_body()),
            (EXPORT_CLEAR_ERROR, unit_ty, clear_error_body()),
            (EXPORT_TEARDOWN, unit_ty, clear_error_body()),
        ];

        let mut functions = FunctionSection::new();
        for (_, ty, _) in &defined {
            functions.function(*ty);
        }
        module.section(&functions);

        let mut memories = MemorySection::new();
        memories.memory(MemoryType {
            minimum: 1,
            maximum: None,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
        module.section(&memories);

        let mut globals = GlobalSection::new();
        for initial in [0, 0, HEAP_START, 0, 0] {
            globals.global(
                GlobalType {
                    val_type: ValType::I32,
                    mutable: true,
                    shared: false,
                },
                &ConstExpr::i32_const(initial),
            );
        }
        module.section(&globals);

        let mut exports = ExportSection::new();
        if !self.omitted.contains(&EXPORT_MEMORY) {
            exports.export(EXPORT_MEMORY, ExportKind::Memory, 0);
        }
        for (offset, (name, _, _)) in defined.iter().enumerate() {
            if !self.omitted.contains(name) {
                exports.export(name, ExportKind::Func, offset as u32 + 1);
            }
        }
        module.section(&exports);

        let mut code = CodeSection::new();
        for (_, _, body) in &defined {
            code.function(body);
        }
        module.section(&code);

        module.finish()
    }
}

fn body(locals: Vec<(u32, ValType)>, instructions: &[Instruction<'_>]) -> Function {
    let mut function = Function::new(locals);
    for instruction in instructions {
        function.instruction(instruction);
    }
    function.instruction(&Instruction::End);
    function
}

fn init_body() -> Function {
    body(
        vec![],
        &[Instruction::I32Const(1), Instruction::GlobalSet(GLOBAL_READY)],
    )
}

fn is_ready_body() -> Function {
    body(vec![], &[Instruction::GlobalGet(GLOBAL_READY)])
}

fn register_builtins_body() -> Function {
    body(
        vec![],
        &[
            Instruction::GlobalGet(GLOBAL_BUILTINS),
            Instruction::I32Const(1),
            Instruction::I32Add,
            Instruction::GlobalSet(GLOBAL_BUILTINS),
        ],
    )
}

fn alloc_body() -> Function {
    body(
        vec![(1, ValType::I32)],
        &[
            Instruction::GlobalGet(GLOBAL_HEAP),
            Instruction::LocalTee(1),
            Instruction::LocalGet(0),
            Instruction::I32Add,
            Instruction::GlobalSet(GLOBAL_HEAP),
            Instruction::LocalGet(1),
        ],
    )
}

fn first_byte_is(byte: u8) -> [Instruction<'static>; 4] {
    [
        Instruction::LocalGet(0),
        Instruction::I32Load8U(MemArg {
            offset: 0,
            align: 0,
            memory_index: 0,
        }),
        Instruction::I32Const(i32::from(byte)),
        Instruction::I32Eq,
    ]
}

fn run_source_body() -> Function {
    let mut instructions = vec![
        Instruction::LocalGet(1),
        Instruction::I32Eqz,
        Instruction::If(BlockType::Empty),
        Instruction::I64Const(0),
        Instruction::Return,
        Instruction::End,
    ];

    instructions.extend(first_byte_is(b'!'));
    instructions.extend([
        Instruction::If(BlockType::Empty),
        Instruction::LocalGet(0),
        Instruction::I32Const(1),
        Instruction::I32Add,
        Instruction::GlobalSet(GLOBAL_ERR_PTR),
        Instruction::LocalGet(1),
        Instruction::I32Const(1),
        Instruction::I32Sub,
        Instruction::GlobalSet(GLOBAL_ERR_LEN),
        Instruction::I64Const(0),
        Instruction::Return,
        Instruction::End,
    ]);

    instructions.extend(first_byte_is(b'#'));
    instructions.extend([
        Instruction::If(BlockType::Empty),
        Instruction::Unreachable,
        Instruction::End,
    ]);

    instructions.extend(first_byte_is(b'>'));
    instructions.extend([
        Instruction::If(BlockType::Empty),
        Instruction::LocalGet(0),
        Instruction::I32Const(1),
        Instruction::I32Add,
        Instruction::LocalGet(1),
        Instruction::I32Const(1),
        Instruction::I32Sub,
        Instruction::Call(0),
        Instruction::I64Const(0),
        Instruction::Return,
        Instruction::End,
    ]);

    instructions.extend([
        Instruction::LocalGet(0),
        Instruction::I64ExtendI32U,
        Instruction::I64Const(32),
        Instruction::I64Shl,
        Instruction::LocalGet(1),
        Instruction::I64ExtendI32U,
        Instruction::I64Or,
    ]);

    body(vec![], &instructions)
}

fn last_error_body() -> Function {
    body(
        vec![],
        &[
            Instruction::GlobalGet(GLOBAL_ERR_PTR),
            Instruction::I64ExtendI32U,
            Instruction::I64Const(32),
            Instruction::I64Shl,
            Instruction::GlobalGet(GLOBAL_ERR_LEN),
            Instruction::I64ExtendI32U,
            Instruction::I64Or,
        ],
    )
}

fn clear_error_body() -> Function {
    body(
        vec![],
        &[Instruction::I32Const(0), Instruction::GlobalSet(GLOBAL_ERR_LEN)],
    )
}
