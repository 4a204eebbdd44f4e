use std::fmt;

use super::{
    BinaryOp, CastOp, CmpCond, Function, GlobalData, GlobalInit, Inst, Module, ReturnKind, Type,
    Value,
};

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::I1 => "i1",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reg(r) => write!(f, "{r}"),
            Value::Imm(v) => write!(f, "{v}"),
            Value::Global(name) => write!(f, "@{name}"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SRem => "srem",
            BinaryOp::URem => "urem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
        };
        f.write_str(name)
    }
}

impl fmt::Display for CmpCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CmpCond::Eq => "eq",
            CmpCond::Ne => "ne",
            CmpCond::Slt => "slt",
            CmpCond::Sle => "sle",
            CmpCond::Sgt => "sgt",
            CmpCond::Sge => "sge",
            CmpCond::Ult => "ult",
            CmpCond::Ule => "ule",
            CmpCond::Ugt => "ugt",
            CmpCond::Uge => "uge",
        };
        f.write_str(name)
    }
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CastOp::Zext => "zext",
            CastOp::Sext => "sext",
            CastOp::Trunc => "trunc",
        })
    }
}

fn join(values: &[Value]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Binary {
                kind,
                ty,
                dst,
                lhs,
                rhs,
            } => write!(f, "{dst} = {kind} {ty} {lhs}, {rhs}"),
            Inst::Icmp {
                cond,
                ty,
                dst,
                lhs,
                rhs,
            } => write!(f, "{dst} = icmp {cond} {ty} {lhs}, {rhs}"),
            Inst::Cast {
                kind,
                from,
                to,
                dst,
                src,
            } => write!(f, "{dst} = {kind} {from} {src} to {to}"),
            Inst::Copy { ty, dst, src } => write!(f, "{dst} = copy {ty} {src}"),
            Inst::Load {
                ty,
                dst,
                addr,
                offset,
            } => write!(f, "{dst} = load {ty}, {addr}{offset:+}"),
            Inst::Store {
                ty,
                value,
                addr,
                offset,
            } => write!(f, "store {ty} {value}, {addr}{offset:+}"),
            Inst::Alloca { dst, size, align } => {
                write!(f, "{dst} = alloca {size}, align {align}")
            }
            Inst::Call { callee, args, dsts } => {
                if !dsts.is_empty() {
                    let names: Vec<String> = dsts.iter().map(ToString::to_string).collect();
                    write!(f, "{} = ", names.join(", "))?;
                }
                write!(f, "call @{callee}({})", join(args))
            }
            Inst::Br { target } => write!(f, "br {target}"),
            Inst::CondBr {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {cond}, {then_block}, {else_block}"),
            Inst::Ret { values } if values.is_empty() => write!(f, "ret"),
            Inst::Ret { values } => write!(f, "ret {}", join(values)),
        }
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnKind::Void => write!(f, "void"),
            ReturnKind::Scalar(ty) => write!(f, "{ty}"),
            ReturnKind::Pair(a, b) => write!(f, "{{{a}, {b}}}"),
            ReturnKind::Memory { size, align } => write!(f, "memory({size}, align {align})"),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .zip(&self.signature.params)
            .map(|(reg, ty)| format!("{ty} {reg}"))
            .collect();
        writeln!(
            f,
            "define {} @{}({}) {{",
            self.signature.ret,
            self.name,
            params.join(", ")
        )?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for inst in &block.insts {
                writeln!(f, "  {inst}")?;
            }
        }
        writeln!(f, "}}")
    }
}

impl fmt::Display for GlobalData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.readonly { "constant" } else { "global" };
        write!(
            f,
            "@{} = {kind} [{} x i8], align {}",
            self.name, self.size, self.align
        )?;
        match &self.init {
            GlobalInit::Zero => write!(f, " zeroinitializer"),
            GlobalInit::Bytes(bytes) => write!(f, " bytes {bytes:?}"),
            GlobalInit::Ints { ty, values } => write!(f, " {ty} {values:?}"),
            GlobalInit::Addr { symbol, addend } => write!(f, " @{symbol}{addend:+}"),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for decl in &self.externs {
            let params: Vec<String> = decl.signature.params.iter().map(ToString::to_string).collect();
            writeln!(
                f,
                "declare {} @{}({})",
                decl.signature.ret,
                decl.name,
                params.join(", ")
            )?;
        }
        for global in &self.globals {
            writeln!(f, "{global}")?;
        }
        for function in &self.functions {
            writeln!(f)?;
            write!(f, "{function}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{BinaryOp, FunctionBuilder, ReturnKind, Signature, Type};

    #[test]
    fn test_function_display() {
        let mut b = FunctionBuilder::new(
            "inc",
            Signature::new(vec![Type::I32], ReturnKind::Scalar(Type::I32)),
        );
        let x = b.param(0);
        let y = b.binary(BinaryOp::Add, Type::I32, x, 1);
        b.ret(vec![y.into()]);
        let text = b.finish().to_string();
        assert_eq!(
            text,
            "define i32 @inc(i32 %0) {\nbb0:\n  %1 = add i32 %0, 1\n  ret %1\n}\n"
        );
    }
}
