//! The AST handed to the compiler.
//!
//! Producers (a parser, a macro layer, tests) build these nodes directly.
//! Every node carries the source line it came from; the compiler threads
//! lines through to the bytecode's line map.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    Print,
    Raise,
}

/// Short-circuit chains are distinct from the eager `And`/`Or` binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    /// `None` marks the trailing else arm.
    pub cond: Option<Node>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMember {
    pub name: String,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Int {
        value: i64,
        line: u32,
    },
    Float {
        value: f64,
        line: u32,
    },
    Str {
        value: String,
        line: u32,
    },
    Nil {
        line: u32,
    },
    Var {
        name: String,
        line: u32,
    },
    Binary {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
        line: u32,
    },
    /// `target = value`; the target must be a variable, member, or index.
    Assign {
        target: Box<Node>,
        value: Box<Node>,
        line: u32,
    },
    /// `target op= value` for member and index targets as well as variables.
    CompoundAssign {
        target: Box<Node>,
        op: BinOp,
        value: Box<Node>,
        line: u32,
    },
    Unary {
        op: UnOp,
        operand: Box<Node>,
        line: u32,
    },
    Return {
        value: Option<Box<Node>>,
        line: u32,
    },
    Chain {
        op: ChainOp,
        left: Box<Node>,
        right: Box<Node>,
        line: u32,
    },
    Ternary {
        cond: Box<Node>,
        then: Box<Node>,
        other: Box<Node>,
        line: u32,
    },
    If {
        arms: Vec<IfArm>,
        line: u32,
    },
    Loop {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        step: Option<Box<Node>>,
        body: Vec<Node>,
        line: u32,
    },
    IterLoop {
        iter: Box<Node>,
        var: String,
        index_var: Option<String>,
        body: Vec<Node>,
        line: u32,
    },
    FuncDecl {
        params: Vec<String>,
        body: Vec<Node>,
        /// Name the function knows itself by; defaults when absent.
        refname: Option<String>,
        line: u32,
    },
    ClassDecl {
        members: Vec<ClassMember>,
        superclass: Option<Box<Node>>,
        /// Explicit initializer; must be a `FuncDecl` when present.
        init: Option<Box<Node>>,
        refname: String,
        line: u32,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        line: u32,
    },
    Member {
        object: Box<Node>,
        name: String,
        line: u32,
    },
    Index {
        target: Box<Node>,
        index: Box<Node>,
        line: u32,
    },
    ArrayLit {
        items: Vec<Node>,
        line: u32,
    },
    TableLit {
        pairs: Vec<(Node, Node)>,
        line: u32,
    },
    ObjectLit {
        members: Vec<ClassMember>,
        refname: Option<String>,
        line: u32,
    },
    TryCatch {
        body: Vec<Node>,
        catch_name: String,
        catch_body: Vec<Node>,
        line: u32,
    },
    Break {
        line: u32,
    },
    Continue {
        line: u32,
    },
    /// Loads a native extension by name.
    LoadExt {
        name: String,
        line: u32,
    },
}

impl Node {
    pub fn line(&self) -> u32 {
        match self {
            Node::Int { line, .. }
            | Node::Float { line, .. }
            | Node::Str { line, .. }
            | Node::Nil { line }
            | Node::Var { line, .. }
            | Node::Binary { line, .. }
            | Node::Assign { line, .. }
            | Node::CompoundAssign { line, .. }
            | Node::Unary { line, .. }
            | Node::Return { line, .. }
            | Node::Chain { line, .. }
            | Node::Ternary { line, .. }
            | Node::If { line, .. }
            | Node::Loop { line, .. }
            | Node::IterLoop { line, .. }
            | Node::FuncDecl { line, .. }
            | Node::ClassDecl { line, .. }
            | Node::Call { line, .. }
            | Node::Member { line, .. }
            | Node::Index { line, .. }
            | Node::ArrayLit { line, .. }
            | Node::TableLit { line, .. }
            | Node::ObjectLit { line, .. }
            | Node::TryCatch { line, .. }
            | Node::Break { line }
            | Node::Continue { line }
            | Node::LoadExt { line, .. } => *line,
        }
    }

    /// Whether evaluating this node leaves a value on the stack. Statement
    /// position compiles a trailing pop for value-producing nodes.
    pub fn produces_value(&self) -> bool {
        !matches!(
            self,
            Node::If { .. }
                | Node::Loop { .. }
                | Node::IterLoop { .. }
                | Node::TryCatch { .. }
                | Node::Return { .. }
                | Node::Break { .. }
                | Node::Continue { .. }
                | Node::Unary {
                    op: UnOp::Print | UnOp::Raise,
                    ..
                }
        )
    }
}

// Shorthand constructors, mostly for tests and embedders.
impl Node {
    pub fn int(value: i64, line: u32) -> Node {
        Node::Int { value, line }
    }

    pub fn float(value: f64, line: u32) -> Node {
        Node::Float { value, line }
    }

    pub fn str(value: impl Into<String>, line: u32) -> Node {
        Node::Str {
            value: value.into(),
            line,
        }
    }

    pub fn var(name: impl Into<String>, line: u32) -> Node {
        Node::Var {
            name: name.into(),
            line,
        }
    }

    pub fn binary(op: BinOp, left: Node, right: Node, line: u32) -> Node {
        Node::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            line,
        }
    }

    pub fn assign(target: Node, value: Node, line: u32) -> Node {
        Node::Assign {
            target: Box::new(target),
            value: Box::new(value),
            line,
        }
    }

    pub fn unary(op: UnOp, operand: Node, line: u32) -> Node {
        Node::Unary {
            op,
            operand: Box::new(operand),
            line,
        }
    }

    pub fn print(operand: Node, line: u32) -> Node {
        Node::unary(UnOp::Print, operand, line)
    }

    pub fn call(callee: Node, args: Vec<Node>, line: u32) -> Node {
        Node::Call {
            callee: Box::new(callee),
            args,
            line,
        }
    }

    pub fn member(object: Node, name: impl Into<String>, line: u32) -> Node {
        Node::Member {
            object: Box::new(object),
            name: name.into(),
            line,
        }
    }

    pub fn func(params: Vec<&str>, body: Vec<Node>, line: u32) -> Node {
        Node::FuncDecl {
            params: params.into_iter().map(str::to_owned).collect(),
            body,
            refname: None,
            line,
        }
    }
}
