//! Per-node lowering.

use lyra_core::StrMap;
use lyra_ir::{BinOp, ChainOp, ClassMember, IfArm, Node, Opcode, UnOp};
use lyra_runtime::{FuncObj, ObjId, ObjKind, Runtime, Value};
use smallvec::SmallVec;

use crate::emit::{Compiler, Ctx};
use crate::errors::CompileError;
use crate::session::Session;

/// Compiles a unit to a code object with fresh symbol state.
pub fn compile(rt: &mut Runtime, nodes: &[Node]) -> Result<ObjId, CompileError> {
    Session::new().compile(rt, nodes)
}

/// Compiles a unit and wraps it in a zero-argument entry function.
pub fn compile_main(rt: &mut Runtime, nodes: &[Node]) -> Result<ObjId, CompileError> {
    let code = compile(rt, nodes)?;
    Ok(rt.alloc(ObjKind::Func(FuncObj {
        code: Some(code),
        native: None,
        argc: 0,
        parents: SmallVec::new(),
        refname: "main".to_owned(),
    })))
}

/// Lowers a unit under an already-seeded root context, returning the
/// code object and the root's symbol table for the session to carry.
pub(crate) fn compile_unit(
    rt: &mut Runtime,
    root: Ctx,
    nodes: &[Node],
) -> Result<(ObjId, StrMap<u32>, u32), CompileError> {
    let mut c = Compiler::new(rt, root);
    if let Err(e) = c.block(nodes) {
        c.release_pools();
        return Err(e);
    }
    let root = c.cur();
    let locals = std::mem::replace(&mut root.locals, StrMap::new());
    let local_count = root.local_count;
    let code = c.finish_ctx("main".to_owned())?;
    Ok((code, locals, local_count))
}

fn binop_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::Add,
        BinOp::Sub => Opcode::Sub,
        BinOp::Mul => Opcode::Mul,
        BinOp::Div => Opcode::Div,
        BinOp::Mod => Opcode::Mod,
        BinOp::Pow => Opcode::Pow,
        BinOp::Lt => Opcode::Lt,
        BinOp::Gt => Opcode::Gt,
        BinOp::Le => Opcode::Le,
        BinOp::Ge => Opcode::Ge,
        BinOp::Eq => Opcode::Eq,
        BinOp::Ne => Opcode::Ne,
        BinOp::And => Opcode::And,
        BinOp::Or => Opcode::Or,
        BinOp::Coalesce => Opcode::Coalesce,
    }
}

impl Compiler<'_> {
    pub(crate) fn block(&mut self, nodes: &[Node]) -> Result<(), CompileError> {
        for node in nodes {
            self.statement(node)?;
        }
        Ok(())
    }

    fn statement(&mut self, node: &Node) -> Result<(), CompileError> {
        self.expr(node)?;
        if node.produces_value() {
            self.emit_op(Opcode::Pop, node.line());
        }
        Ok(())
    }

    fn expr(&mut self, node: &Node) -> Result<(), CompileError> {
        let line = node.line();
        match node {
            Node::Int { value, .. } => self.emit_const(Value::Int(*value), line),
            Node::Float { value, .. } => self.emit_const(Value::Float(*value), line),
            Node::Str { value, .. } => {
                let s = self.rt.alloc_str(value.clone());
                self.emit_const(Value::Obj(s), line);
            }
            Node::Nil { .. } => self.emit_op(Opcode::PushNil, line),
            Node::Var { name, .. } => self.emit_var(name, false, line),
            Node::Binary { op, left, right, .. } => {
                self.expr(left)?;
                self.expr(right)?;
                self.emit_op(binop_opcode(*op), line);
            }
            Node::Assign { target, value, .. } => self.assign(target, value, line)?,
            Node::CompoundAssign {
                target, op, value, ..
            } => self.compound_assign(target, *op, value, line)?,
            Node::Unary { op, operand, .. } => {
                self.expr(operand)?;
                let opcode = match op {
                    UnOp::Not => Opcode::Not,
                    UnOp::Neg => Opcode::Negate,
                    UnOp::Print => Opcode::Print,
                    UnOp::Raise => Opcode::Raise,
                };
                self.emit_op(opcode, line);
            }
            Node::Return { value, .. } => {
                match value {
                    Some(v) => self.expr(v)?,
                    None => self.emit_op(Opcode::PushNil, line),
                }
                self.emit_op(Opcode::Return, line);
            }
            Node::Chain { op, left, right, .. } => {
                let end = self.new_label();
                self.expr(left)?;
                let jump = match op {
                    ChainOp::And => Opcode::JumpFalseElsePop,
                    ChainOp::Or => Opcode::JumpTrueElsePop,
                };
                self.emit_jump(jump, end, line);
                self.expr(right)?;
                self.bind(end, line);
            }
            Node::Ternary {
                cond, then, other, ..
            } => {
                let other_l = self.new_label();
                let end = self.new_label();
                self.expr(cond)?;
                self.emit_jump(Opcode::JumpFalse, other_l, line);
                self.expr(then)?;
                self.emit_jump(Opcode::Jump, end, line);
                self.bind(other_l, line);
                self.expr(other)?;
                self.bind(end, line);
            }
            Node::If { arms, .. } => self.if_chain(arms, line)?,
            Node::Loop {
                init,
                cond,
                step,
                body,
                ..
            } => self.loop_stmt(init.as_deref(), cond.as_deref(), step.as_deref(), body, line)?,
            Node::IterLoop {
                iter,
                var,
                index_var,
                body,
                ..
            } => self.iter_loop(iter, var, index_var.as_deref(), body, line)?,
            Node::FuncDecl {
                params,
                body,
                refname,
                ..
            } => self.function(params, body, refname.as_deref(), line)?,
            Node::ClassDecl {
                members,
                superclass,
                init,
                refname,
                ..
            } => self.class_decl(members, superclass.as_deref(), init.as_deref(), refname, line)?,
            Node::Call { callee, args, .. } => {
                if args.len() > u8::MAX as usize {
                    return Err(CompileError::MalformedAst {
                        what: "too many call arguments",
                        line,
                    });
                }
                self.expr(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit_op(Opcode::Call, line);
                self.emit_byte(args.len() as u8, line);
            }
            Node::Member { object, name, .. } => {
                self.expr(object)?;
                let idx = self.name_index(name);
                self.emit_op(Opcode::LoadMember, line);
                self.emit_quad(idx, line);
            }
            Node::Index { target, index, .. } => {
                self.expr(target)?;
                self.expr(index)?;
                self.emit_op(Opcode::LoadIndex, line);
            }
            Node::ArrayLit { items, .. } => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit_op(Opcode::MakeArray, line);
                self.emit_quad(items.len() as u32, line);
            }
            Node::TableLit { pairs, .. } => {
                for (k, v) in pairs {
                    self.expr(k)?;
                    self.expr(v)?;
                }
                self.emit_op(Opcode::MakeTable, line);
                self.emit_quad(pairs.len() as u32, line);
            }
            Node::ObjectLit {
                members, refname, ..
            } => self.object_lit(members, refname.as_deref(), line)?,
            Node::TryCatch {
                body,
                catch_name,
                catch_body,
                ..
            } => self.try_catch(body, catch_name, catch_body, line)?,
            Node::Break { line } => {
                let Some(&end) = self.cur().loop_end.last() else {
                    return Err(CompileError::LoopControlOutsideLoop(*line));
                };
                self.emit_jump(Opcode::Jump, end, *line);
            }
            Node::Continue { line } => {
                let Some(&next) = self.cur().loop_next.last() else {
                    return Err(CompileError::LoopControlOutsideLoop(*line));
                };
                self.emit_jump(Opcode::Jump, next, *line);
            }
            Node::LoadExt { name, .. } => {
                let idx = self.name_index(name);
                self.emit_op(Opcode::LoadExtension, line);
                self.emit_quad(idx, line);
            }
        }
        Ok(())
    }

    fn assign(&mut self, target: &Node, value: &Node, line: u32) -> Result<(), CompileError> {
        match target {
            Node::Var { name, .. } => {
                self.expr(value)?;
                self.emit_var(name, true, line);
            }
            Node::Member { object, name, .. } => {
                self.expr(value)?;
                self.expr(object)?;
                let idx = self.name_index(name);
                self.emit_op(Opcode::SaveMember, line);
                self.emit_quad(idx, line);
            }
            Node::Index { target, index, .. } => {
                self.expr(value)?;
                self.expr(target)?;
                self.expr(index)?;
                self.emit_op(Opcode::SaveIndex, line);
            }
            _ => {
                return Err(CompileError::MalformedAst {
                    what: "assignment target must be a variable, member, or index",
                    line,
                });
            }
        }
        Ok(())
    }

    /// `target op= value` reads, combines, and writes back through stack
    /// shuffles so each subexpression evaluates once.
    fn compound_assign(
        &mut self,
        target: &Node,
        op: BinOp,
        value: &Node,
        line: u32,
    ) -> Result<(), CompileError> {
        match target {
            Node::Var { name, .. } => {
                self.emit_var(name, false, line);
                self.expr(value)?;
                self.emit_op(binop_opcode(op), line);
                self.emit_var(name, true, line);
            }
            Node::Member { object, name, .. } => {
                self.expr(object)?;
                self.emit_op(Opcode::Dup, line);
                let idx = self.name_index(name);
                self.emit_op(Opcode::LoadMember, line);
                self.emit_quad(idx, line);
                self.expr(value)?;
                self.emit_op(binop_opcode(op), line);
                self.emit_op(Opcode::Swap, line);
                self.emit_op(Opcode::SaveMember, line);
                self.emit_quad(idx, line);
            }
            Node::Index { target, index, .. } => {
                self.expr(target)?;
                self.expr(index)?;
                self.emit_op(Opcode::Dup2, line);
                self.emit_op(Opcode::LoadIndex, line);
                self.expr(value)?;
                self.emit_op(binop_opcode(op), line);
                self.emit_op(Opcode::Sink, line);
                self.emit_op(Opcode::SaveIndex, line);
            }
            _ => {
                return Err(CompileError::MalformedAst {
                    what: "compound assignment target must be a variable, member, or index",
                    line,
                });
            }
        }
        Ok(())
    }

    fn if_chain(&mut self, arms: &[IfArm], line: u32) -> Result<(), CompileError> {
        let end = self.new_label();
        for arm in arms {
            match &arm.cond {
                Some(cond) => {
                    let next = self.new_label();
                    self.expr(cond)?;
                    self.emit_jump(Opcode::JumpFalse, next, line);
                    self.block(&arm.body)?;
                    self.emit_jump(Opcode::Jump, end, line);
                    self.bind(next, line);
                }
                None => {
                    self.block(&arm.body)?;
                    break;
                }
            }
        }
        self.bind(end, line);
        Ok(())
    }

    fn loop_stmt(
        &mut self,
        init: Option<&Node>,
        cond: Option<&Node>,
        step: Option<&Node>,
        body: &[Node],
        line: u32,
    ) -> Result<(), CompileError> {
        if let Some(init) = init {
            self.statement(init)?;
        }
        let top = self.new_label();
        let step_l = self.new_label();
        let end = self.new_label();
        self.bind(top, line);
        if let Some(cond) = cond {
            self.expr(cond)?;
            self.emit_jump(Opcode::JumpFalse, end, line);
        }
        self.cur().loop_next.push(step_l);
        self.cur().loop_end.push(end);
        self.block(body)?;
        self.cur().loop_next.pop();
        self.cur().loop_end.pop();
        self.bind(step_l, line);
        if let Some(step) = step {
            self.statement(step)?;
        }
        self.emit_jump(Opcode::Jump, top, line);
        self.bind(end, line);
        Ok(())
    }

    fn iter_loop(
        &mut self,
        iter: &Node,
        var: &str,
        index_var: Option<&str>,
        body: &[Node],
        line: u32,
    ) -> Result<(), CompileError> {
        self.expr(iter)?;
        self.emit_op(Opcode::MakeIter, line);
        let next = self.new_label();
        let out = self.new_label();
        self.bind(next, line);
        self.emit_jump(Opcode::NextIterOrJump, out, line);
        self.emit_var(var, true, line);
        self.emit_op(Opcode::Pop, line);
        if let Some(index_var) = index_var {
            self.emit_op(Opcode::IterIndex, line);
            self.emit_var(index_var, true, line);
            self.emit_op(Opcode::Pop, line);
        }
        self.cur().loop_next.push(next);
        self.cur().loop_end.push(out);
        self.block(body)?;
        self.cur().loop_next.pop();
        self.cur().loop_end.pop();
        self.emit_jump(Opcode::Jump, next, line);
        self.bind(out, line);
        // the iterator itself
        self.emit_op(Opcode::Pop, line);
        Ok(())
    }

    fn function(
        &mut self,
        params: &[String],
        body: &[Node],
        refname: Option<&str>,
        line: u32,
    ) -> Result<(), CompileError> {
        if params.len() > u8::MAX as usize {
            return Err(CompileError::MalformedAst {
                what: "too many parameters",
                line,
            });
        }
        let interactive = self.cur().interactive;
        let mut child = Ctx::new(interactive);
        // Parameters occupy the first name-table slots, in order; the
        // machine binds call arguments by these names.
        child.names.extend(params.iter().cloned());
        self.ctxs.push(child);
        self.block(body)?;
        let code = self.finish_ctx(
            refname
                .unwrap_or(FuncObj::DEFAULT_REFNAME)
                .to_owned(),
        )?;
        self.emit_const(Value::Obj(code), line);
        self.emit_op(Opcode::MakeFunction, line);
        self.emit_byte(params.len() as u8, line);
        Ok(())
    }

    fn class_decl(
        &mut self,
        members: &[ClassMember],
        superclass: Option<&Node>,
        init: Option<&Node>,
        refname: &str,
        line: u32,
    ) -> Result<(), CompileError> {
        if members.len() > u8::MAX as usize {
            return Err(CompileError::MalformedAst {
                what: "too many class members",
                line,
            });
        }
        for member in members {
            self.expr(&member.value)?;
        }
        let mut flags = 0u8;
        if let Some(sup) = superclass {
            self.expr(sup)?;
            flags |= 2;
        }
        if let Some(init) = init {
            if !matches!(init, Node::FuncDecl { .. }) {
                return Err(CompileError::MalformedAst {
                    what: "class initializer must be a function",
                    line,
                });
            }
            self.expr(init)?;
            flags |= 1;
        }
        let refname_c = self.rt.alloc_str(refname);
        self.emit_const(Value::Obj(refname_c), line);
        self.emit_op(Opcode::MakeClass, line);
        self.emit_byte(members.len() as u8, line);
        self.emit_byte(flags, line);
        // Reverse order: the machine pops the last-compiled member first.
        for member in members.iter().rev() {
            let idx = self.name_index(&member.name);
            self.emit_quad(idx, line);
        }
        Ok(())
    }

    fn object_lit(
        &mut self,
        members: &[ClassMember],
        refname: Option<&str>,
        line: u32,
    ) -> Result<(), CompileError> {
        if members.len() > u8::MAX as usize {
            return Err(CompileError::MalformedAst {
                what: "too many object members",
                line,
            });
        }
        for member in members {
            self.expr(&member.value)?;
        }
        self.emit_op(Opcode::MakeObject, line);
        self.emit_byte(members.len() as u8, line);
        for member in members.iter().rev() {
            let idx = self.name_index(&member.name);
            self.emit_quad(idx, line);
        }
        // Member functions captured this frame's bucket; binding the
        // reference name there makes the new object visible to them.
        if let Some(refname) = refname {
            self.emit_op(Opcode::Dup, line);
            let idx = self.name_index(refname);
            self.emit_op(Opcode::SaveClose, line);
            self.emit_quad(idx, line);
            self.emit_op(Opcode::Pop, line);
        }
        Ok(())
    }

    fn try_catch(
        &mut self,
        body: &[Node],
        catch_name: &str,
        catch_body: &[Node],
        line: u32,
    ) -> Result<(), CompileError> {
        let catch_l = self.new_label();
        let end = self.new_label();
        self.emit_jump(Opcode::PushCatch, catch_l, line);
        self.block(body)?;
        self.emit_op(Opcode::PopCatch, line);
        self.emit_jump(Opcode::Jump, end, line);
        self.bind(catch_l, line);
        // the machine re-enters here with the raised value pushed
        self.emit_var(catch_name, true, line);
        self.emit_op(Opcode::Pop, line);
        self.block(catch_body)?;
        self.bind(end, line);
        Ok(())
    }
}
