//! Typed CFG instructions
//!
//! The instruction set mirrors what the SIL frontend emits per CFG node:
//! loads/stores through named variables, calls, prunes for branch conditions,
//! plus the resource operations (free, destructor, closure capture, ownership
//! assignment) the checkers need.

use super::procedure::ProcedureId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// CFG node identifier (unique within one procedure)
pub type NodeId = u32;

/// Lexical/stack region identifier. Scope `0` is the procedure body.
pub type ScopeId = u32;

/// Scope that exits when the procedure returns
pub const BODY_SCOPE: ScopeId = 0;

/// Instruction site: `index`-th instruction of CFG node `node`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Site {
    pub node: NodeId,
    pub index: u32,
}

impl Site {
    pub fn new(node: NodeId, index: u32) -> Self {
        Self { node, index }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}#{}", self.node, self.index)
    }
}

/// Source position attached by the frontend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
    #[serde(default)]
    pub col: u32,
}

/// Operand expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Current value of a variable
    Var(String),
    /// Integer constant
    Int(i64),
    /// Null pointer
    Null,
    /// `expr + k`
    Offset(Box<Expr>, i64),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn offset(self, k: i64) -> Self {
        Expr::Offset(Box::new(self), k)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Int(n) => write!(f, "{}", n),
            Expr::Null => write!(f, "null"),
            Expr::Offset(e, k) => write!(f, "{} + {}", e, k),
        }
    }
}

/// Comparison operator for prune conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

/// Branch condition `lhs op rhs`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cond {
    pub op: CmpOp,
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Cond {
    pub fn new(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Self { op, lhs, rhs }
    }

    /// `var == null`
    pub fn is_null(var: impl Into<String>) -> Self {
        Self::new(CmpOp::Eq, Expr::Var(var.into()), Expr::Null)
    }

    pub fn negate(&self) -> Self {
        Self::new(self.op.negate(), self.lhs.clone(), self.rhs.clone())
    }
}

/// How a closure captures a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    ByRef,
    ByValue,
}

/// One captured variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capture {
    pub var: String,
    pub mode: CaptureMode,
}

impl Capture {
    pub fn by_ref(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            mode: CaptureMode::ByRef,
        }
    }

    pub fn by_value(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            mode: CaptureMode::ByValue,
        }
    }
}

/// Reference-counting capability of an ownership edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Strong,
    Weak,
}

/// CFG instruction kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instr {
    /// `dst = value`
    Assign { dst: String, value: Expr },

    /// `dst = base->field`
    Load {
        dst: String,
        base: String,
        field: String,
    },

    /// `base->field = value`
    Store {
        base: String,
        field: String,
        value: Expr,
    },

    /// `dst = new(...)`; `nullable` models allocators that may return null
    Alloc {
        dst: String,
        #[serde(default)]
        nullable: bool,
    },

    /// `free(var)`
    Free { var: String },

    /// `dst = &local`
    AddressOf { dst: String, local: String },

    /// `ret = callee(args...)`
    Call {
        #[serde(default)]
        ret: Option<String>,
        callee: ProcedureId,
        #[serde(default)]
        args: Vec<Expr>,
    },

    /// `dst = [captures](...) { ... }`
    CaptureClosure { dst: String, captures: Vec<Capture> },

    /// `dst = closure()`
    InvokeClosure {
        #[serde(default)]
        dst: Option<String>,
        closure: String,
    },

    /// Explicit destructor call on a non-heap resource
    Destructor { var: String },

    /// Placement-new style re-construction after a destructor
    Construct { var: String },

    /// `owner.field = target` on a reference-counted property
    OwnershipAssign {
        owner: String,
        field: String,
        target: Expr,
        strength: Strength,
    },

    /// Branch guard: continue only if `cond` (or its negation) holds
    Prune { cond: Cond, true_branch: bool },

    EnterScope { scope: ScopeId },

    ExitScope { scope: ScopeId },

    Return {
        #[serde(default)]
        value: Option<Expr>,
    },

    /// Raise an exception; control moves to the node's exception successors
    Throw {
        #[serde(default)]
        value: Option<Expr>,
    },

    /// Opcode the frontend could not translate
    Unsupported { description: String },
}

impl Instr {
    /// Callee of a call instruction
    pub fn callee(&self) -> Option<&ProcedureId> {
        match self {
            Instr::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    pub fn load(dst: &str, base: &str, field: &str) -> Self {
        Instr::Load {
            dst: dst.to_string(),
            base: base.to_string(),
            field: field.to_string(),
        }
    }

    pub fn store(base: &str, field: &str, value: Expr) -> Self {
        Instr::Store {
            base: base.to_string(),
            field: field.to_string(),
            value,
        }
    }

    pub fn assign(dst: &str, value: Expr) -> Self {
        Instr::Assign {
            dst: dst.to_string(),
            value,
        }
    }

    pub fn alloc(dst: &str) -> Self {
        Instr::Alloc {
            dst: dst.to_string(),
            nullable: false,
        }
    }

    pub fn free(var: &str) -> Self {
        Instr::Free {
            var: var.to_string(),
        }
    }

    pub fn address_of(dst: &str, local: &str) -> Self {
        Instr::AddressOf {
            dst: dst.to_string(),
            local: local.to_string(),
        }
    }

    pub fn call(ret: Option<&str>, callee: &str, args: Vec<Expr>) -> Self {
        Instr::Call {
            ret: ret.map(str::to_string),
            callee: ProcedureId::new(callee),
            args,
        }
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Instr::Return { value }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Assign { dst, value } => write!(f, "{} = {}", dst, value),
            Instr::Load { dst, base, field } => write!(f, "{} = {}->{}", dst, base, field),
            Instr::Store { base, field, value } => write!(f, "{}->{} = {}", base, field, value),
            Instr::Alloc { dst, nullable } => {
                write!(f, "{} = new{}", dst, if *nullable { "?" } else { "" })
            }
            Instr::Free { var } => write!(f, "free({})", var),
            Instr::AddressOf { dst, local } => write!(f, "{} = &{}", dst, local),
            Instr::Call { ret, callee, args } => {
                if let Some(r) = ret {
                    write!(f, "{} = ", r)?;
                }
                write!(f, "{}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Instr::CaptureClosure { dst, captures } => {
                write!(f, "{} = closure[", dst)?;
                for (i, c) in captures.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match c.mode {
                        CaptureMode::ByRef => write!(f, "&{}", c.var)?,
                        CaptureMode::ByValue => write!(f, "={}", c.var)?,
                    }
                }
                write!(f, "]")
            }
            Instr::InvokeClosure { dst, closure } => match dst {
                Some(d) => write!(f, "{} = {}()", d, closure),
                None => write!(f, "{}()", closure),
            },
            Instr::Destructor { var } => write!(f, "~{}()", var),
            Instr::Construct { var } => write!(f, "new (&{}) T()", var),
            Instr::OwnershipAssign {
                owner,
                field,
                target,
                strength,
            } => write!(f, "{}.{} = {} [{:?}]", owner, field, target, strength),
            Instr::Prune { cond, true_branch } => write!(
                f,
                "PRUNE({} {:?} {}, {})",
                cond.lhs, cond.op, cond.rhs, true_branch
            ),
            Instr::EnterScope { scope } => write!(f, "enter_scope({})", scope),
            Instr::ExitScope { scope } => write!(f, "exit_scope({})", scope),
            Instr::Return { value } => match value {
                Some(v) => write!(f, "return {}", v),
                None => write!(f, "return"),
            },
            Instr::Throw { .. } => write!(f, "throw"),
            Instr::Unsupported { description } => write!(f, "<unsupported: {}>", description),
        }
    }
}

/// Instruction plus its optional source position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(flatten)]
    pub instr: Instr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<SourceLocation>,
}

impl From<Instr> for Instruction {
    fn from(instr: Instr) -> Self {
        Self { instr, loc: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cond_negation() {
        let c = Cond::is_null("x");
        let n = c.negate();
        assert_eq!(n.op, CmpOp::Ne);
        assert_eq!(n.negate(), c);
    }

    #[test]
    fn test_instruction_json_shape() {
        let json = r#"{"kind":"load","dst":"t","base":"x","field":"next","loc":{"line":12}}"#;
        let instr: Instruction = serde_json::from_str(json).unwrap();
        assert_eq!(instr.instr, Instr::load("t", "x", "next"));
        assert_eq!(instr.loc.as_ref().map(|l| l.line), Some(12));
    }

    #[test]
    fn test_display() {
        let call = Instr::call(Some("r"), "inc", vec![Expr::var("a"), Expr::Int(1)]);
        assert_eq!(call.to_string(), "r = inc(a, 1)");
        assert_eq!(Site::new(4, 2).to_string(), "node4#2");
    }
}
