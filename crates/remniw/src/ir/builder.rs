use super::{
    BinaryOp, Block, BlockId, CastOp, CmpCond, Function, Inst, Linkage, Signature, Type, VReg,
    Value,
};

/// Incremental construction of a [`Function`].
///
/// Blocks are appended in creation order, so the first block created is the
/// entry block. Instructions go to the block selected with [`switch_to`].
///
/// [`switch_to`]: FunctionBuilder::switch_to
pub struct FunctionBuilder {
    name: String,
    signature: Signature,
    params: Vec<VReg>,
    blocks: Vec<Block>,
    current: usize,
    next_vreg: u32,
    linkage: Linkage,
}

impl FunctionBuilder {
    /// Start a function; one parameter register per signature parameter is
    /// allocated up front, and an entry block is created and selected.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let params = (0..signature.params.len() as u32).map(VReg).collect();
        Self {
            name: name.into(),
            next_vreg: signature.params.len() as u32,
            signature,
            params,
            blocks: vec![Block {
                id: BlockId(0),
                insts: Vec::new(),
            }],
            current: 0,
            linkage: Linkage::Export,
        }
    }

    #[must_use]
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    #[must_use]
    pub fn param(&self, index: usize) -> VReg {
        self.params[index]
    }

    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        BlockId(0)
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            insts: Vec::new(),
        });
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        if let Some(index) = self.blocks.iter().position(|b| b.id == block) {
            self.current = index;
        }
    }

    pub fn fresh_vreg(&mut self) -> VReg {
        let reg = VReg(self.next_vreg);
        self.next_vreg += 1;
        reg
    }

    pub fn push(&mut self, inst: Inst) {
        self.blocks[self.current].insts.push(inst);
    }

    pub fn binary(
        &mut self,
        kind: BinaryOp,
        ty: Type,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
    ) -> VReg {
        let dst = self.fresh_vreg();
        self.push(Inst::Binary {
            kind,
            ty,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    pub fn icmp(
        &mut self,
        cond: CmpCond,
        ty: Type,
        lhs: impl Into<Value>,
        rhs: impl Into<Value>,
    ) -> VReg {
        let dst = self.fresh_vreg();
        self.push(Inst::Icmp {
            cond,
            ty,
            dst,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dst
    }

    pub fn cast(&mut self, kind: CastOp, from: Type, to: Type, src: impl Into<Value>) -> VReg {
        let dst = self.fresh_vreg();
        self.push(Inst::Cast {
            kind,
            from,
            to,
            dst,
            src: src.into(),
        });
        dst
    }

    /// Copy into a fresh register.
    pub fn copy(&mut self, ty: Type, src: impl Into<Value>) -> VReg {
        let dst = self.fresh_vreg();
        self.assign(ty, dst, src);
        dst
    }

    /// Copy into an existing register (redefinition, e.g. a loop variable).
    pub fn assign(&mut self, ty: Type, dst: VReg, src: impl Into<Value>) {
        self.push(Inst::Copy {
            ty,
            dst,
            src: src.into(),
        });
    }

    pub fn load(&mut self, ty: Type, addr: impl Into<Value>, offset: i64) -> VReg {
        let dst = self.fresh_vreg();
        self.push(Inst::Load {
            ty,
            dst,
            addr: addr.into(),
            offset,
        });
        dst
    }

    pub fn store(&mut self, ty: Type, value: impl Into<Value>, addr: impl Into<Value>, offset: i64) {
        self.push(Inst::Store {
            ty,
            value: value.into(),
            addr: addr.into(),
            offset,
        });
    }

    pub fn alloca(&mut self, size: u32, align: u32) -> VReg {
        let dst = self.fresh_vreg();
        self.push(Inst::Alloca { dst, size, align });
        dst
    }

    pub fn global_addr(&mut self, symbol: impl Into<String>) -> VReg {
        self.copy(Type::Ptr, Value::Global(symbol.into()))
    }

    /// Call returning `results` values; returns the destination registers.
    pub fn call(&mut self, callee: impl Into<String>, args: Vec<Value>, results: usize) -> Vec<VReg> {
        let dsts: Vec<VReg> = (0..results).map(|_| self.fresh_vreg()).collect();
        self.push(Inst::Call {
            callee: callee.into(),
            args,
            dsts: dsts.clone(),
        });
        dsts
    }

    pub fn br(&mut self, target: BlockId) {
        self.push(Inst::Br { target });
    }

    pub fn cond_br(&mut self, cond: impl Into<Value>, then_block: BlockId, else_block: BlockId) {
        self.push(Inst::CondBr {
            cond: cond.into(),
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, values: Vec<Value>) {
        self.push(Inst::Ret { values });
    }

    #[must_use]
    pub fn finish(self) -> Function {
        Function {
            name: self.name,
            signature: self.signature,
            params: self.params,
            blocks: self.blocks,
            linkage: self.linkage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ReturnKind;

    #[test]
    fn test_builder_numbers_params_first() {
        let mut b = FunctionBuilder::new(
            "add",
            Signature::new(vec![Type::I64, Type::I64], ReturnKind::Scalar(Type::I64)),
        );
        let (x, y) = (b.param(0), b.param(1));
        let sum = b.binary(BinaryOp::Add, Type::I64, x, y);
        b.ret(vec![sum.into()]);
        let f = b.finish();

        assert_eq!(f.params, vec![VReg(0), VReg(1)]);
        assert_eq!(sum, VReg(2));
        assert_eq!(f.blocks.len(), 1);
        assert!(f.blocks[0].terminator().is_some());
        assert_eq!(f.vreg_limit(), 3);
    }
}
