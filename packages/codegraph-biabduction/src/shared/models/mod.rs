//! Frontend input model (procedures, CFGs, instructions) and the defect taxonomy

pub mod builder;
pub mod error_kind;
pub mod instruction;
pub mod procedure;

pub use builder::{ProcedureBuilder, EXIT_NODE, START_NODE};
pub use error_kind::ErrorKind;
pub use instruction::{
    Capture, CaptureMode, CmpOp, Cond, Expr, Instr, Instruction, NodeId, ScopeId, Site,
    SourceLocation, Strength, BODY_SCOPE,
};
pub use procedure::{
    Cfg, CfgNode, FormalDecl, LocalDecl, NodeKind, ParamKind, ProcedureDesc, ProcedureId,
    Program, Storage,
};
