use std::rc::Rc;

use ul4_source::Span;

use crate::template::Template;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    BitNot,
}

impl UnaryOp {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "neg",
            UnaryOp::Pos => "pos",
            UnaryOp::BitNot => "bitnot",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        [UnaryOp::Not, UnaryOp::Neg, UnaryOp::Pos, UnaryOp::BitNot]
            .into_iter()
            .find(|op| op.key() == key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    TrueDiv,
    Mod,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitXor,
    BitOr,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 11] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::FloorDiv,
        BinaryOp::TrueDiv,
        BinaryOp::Mod,
        BinaryOp::ShiftLeft,
        BinaryOp::ShiftRight,
        BinaryOp::BitAnd,
        BinaryOp::BitXor,
        BinaryOp::BitOr,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::FloorDiv => "floordiv",
            BinaryOp::TrueDiv => "truediv",
            BinaryOp::Mod => "mod",
            BinaryOp::ShiftLeft => "shiftleft",
            BinaryOp::ShiftRight => "shiftright",
            BinaryOp::BitAnd => "bitand",
            BinaryOp::BitXor => "bitxor",
            BinaryOp::BitOr => "bitor",
        }
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::FloorDiv => "//",
            BinaryOp::TrueDiv => "/",
            BinaryOp::Mod => "%",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitXor => "^",
            BinaryOp::BitOr => "|",
        }
    }

    /// Type key of the augmented assignment `<op>=`.
    #[must_use]
    pub fn var_key(self) -> &'static str {
        match self {
            BinaryOp::Add => "addvar",
            BinaryOp::Sub => "subvar",
            BinaryOp::Mul => "mulvar",
            BinaryOp::FloorDiv => "floordivvar",
            BinaryOp::TrueDiv => "truedivvar",
            BinaryOp::Mod => "modvar",
            BinaryOp::ShiftLeft => "shiftleftvar",
            BinaryOp::ShiftRight => "shiftrightvar",
            BinaryOp::BitAnd => "bitandvar",
            BinaryOp::BitXor => "bitxorvar",
            BinaryOp::BitOr => "bitorvar",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }

    #[must_use]
    pub fn from_var_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.var_key() == key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    NotContains,
    Is,
    IsNot,
}

impl CmpOp {
    pub const ALL: [CmpOp; 10] = [
        CmpOp::Eq,
        CmpOp::Ne,
        CmpOp::Lt,
        CmpOp::Le,
        CmpOp::Gt,
        CmpOp::Ge,
        CmpOp::Contains,
        CmpOp::NotContains,
        CmpOp::Is,
        CmpOp::IsNot,
    ];

    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
            CmpOp::Contains => "contains",
            CmpOp::NotContains => "notcontains",
            CmpOp::Is => "is",
            CmpOp::IsNot => "isnot",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }
}

/// `for target in container if condition` inside a comprehension.
#[derive(Clone, Debug, PartialEq)]
pub struct Comprehension {
    pub target: Target,
    pub container: Box<Expr>,
    pub condition: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CallExpr {
    pub span: Span,
    pub callee: Box<Expr>,
    pub args: Vec<Arg>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const {
        span: Span,
        value: Value,
    },
    Var {
        span: Span,
        name: Rc<str>,
    },
    List {
        span: Span,
        items: Vec<SeqItem>,
    },
    Set {
        span: Span,
        items: Vec<SeqItem>,
    },
    Dict {
        span: Span,
        items: Vec<DictItem>,
    },
    ListComp {
        span: Span,
        item: Box<Expr>,
        comp: Comprehension,
    },
    SetComp {
        span: Span,
        item: Box<Expr>,
        comp: Comprehension,
    },
    DictComp {
        span: Span,
        key: Box<Expr>,
        value: Box<Expr>,
        comp: Comprehension,
    },
    GenExpr {
        span: Span,
        item: Box<Expr>,
        comp: Comprehension,
    },
    Attr {
        span: Span,
        object: Box<Expr>,
        name: Rc<str>,
    },
    Item {
        span: Span,
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        span: Span,
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
    },
    Unary {
        span: Span,
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        span: Span,
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        span: Span,
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And {
        span: Span,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        span: Span,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        span: Span,
        then: Box<Expr>,
        condition: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call(CallExpr),
}

impl Expr {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Expr::Const { span, .. }
            | Expr::Var { span, .. }
            | Expr::List { span, .. }
            | Expr::Set { span, .. }
            | Expr::Dict { span, .. }
            | Expr::ListComp { span, .. }
            | Expr::SetComp { span, .. }
            | Expr::DictComp { span, .. }
            | Expr::GenExpr { span, .. }
            | Expr::Attr { span, .. }
            | Expr::Item { span, .. }
            | Expr::Slice { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Compare { span, .. }
            | Expr::And { span, .. }
            | Expr::Or { span, .. }
            | Expr::If { span, .. }
            | Expr::Call(CallExpr { span, .. }) => *span,
        }
    }

    /// The value of a folded constant.
    #[must_use]
    pub fn as_const(&self) -> Option<&Value> {
        match self {
            Expr::Const { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SeqItem {
    Item(Expr),
    Unpack { span: Span, expr: Expr },
}

#[derive(Clone, Debug, PartialEq)]
pub enum DictItem {
    Item { span: Span, key: Expr, value: Expr },
    Unpack { span: Span, expr: Expr },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Positional { span: Span, value: Expr },
    Keyword { span: Span, name: Rc<str>, value: Expr },
    UnpackList { span: Span, expr: Expr },
    UnpackDict { span: Span, expr: Expr },
}

/// Left-hand side of an assignment or loop variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Var {
        span: Span,
        name: Rc<str>,
    },
    Attr {
        span: Span,
        object: Box<Expr>,
        name: Rc<str>,
    },
    Item {
        span: Span,
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unpack {
        span: Span,
        targets: Vec<Target>,
    },
}

impl Target {
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Target::Var { span, .. }
            | Target::Attr { span, .. }
            | Target::Item { span, .. }
            | Target::Unpack { span, .. } => *span,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForBlock {
    pub span: Span,
    pub stop: Span,
    pub target: Target,
    pub container: Expr,
    pub body: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileBlock {
    pub span: Span,
    pub stop: Span,
    pub condition: Expr,
    pub body: Vec<Node>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchKind {
    If,
    Elif,
    Else,
}

impl BranchKind {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            BranchKind::If => "if",
            BranchKind::Elif => "elif",
            BranchKind::Else => "else",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Branch {
    pub kind: BranchKind,
    pub span: Span,
    pub stop: Span,
    /// `None` for `<?else?>`.
    pub condition: Option<Expr>,
    pub body: Vec<Node>,
}

/// An `if`/`elif`/`else` chain.
#[derive(Clone, Debug, PartialEq)]
pub struct IfBlock {
    pub span: Span,
    pub stop: Span,
    pub branches: Vec<Branch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Indent {
    pub span: Span,
    pub text: Option<Rc<str>>,
}

impl Indent {
    #[must_use]
    pub fn text<'a>(&'a self, source: &'a str) -> &'a str {
        match &self.text {
            Some(text) => text,
            None => self.span.text(source).unwrap_or_default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderKind {
    Render,
    RenderX,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Render {
    pub span: Span,
    pub kind: RenderKind,
    pub call: CallExpr,
    pub indent: Option<Indent>,
}

/// `<?renderblock f()?>...<?end renderblock?>`: the body becomes the
/// `content` argument.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderBlock {
    pub span: Span,
    pub stop: Span,
    pub call: CallExpr,
    pub indent: Option<Indent>,
    pub content: Template,
}

/// `<?renderblocks f()?>...<?end renderblocks?>`: variables defined in the
/// body become keyword arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderBlocks {
    pub span: Span,
    pub stop: Span,
    pub call: CallExpr,
    pub indent: Option<Indent>,
    pub body: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Text { span: Span },
    Indent(Indent),
    LineEnd { span: Span },
    Print { span: Span, expr: Expr },
    PrintX { span: Span, expr: Expr },
    Expr { span: Span, expr: Expr },
    Set { span: Span, target: Target, value: Expr },
    Modify {
        span: Span,
        op: BinaryOp,
        target: Target,
        value: Expr,
    },
    For(Box<ForBlock>),
    While(Box<WhileBlock>),
    Break { span: Span },
    Continue { span: Span },
    Return { span: Span, expr: Expr },
    If(Box<IfBlock>),
    Def(Template),
    Render(Box<Render>),
    RenderBlock(Box<RenderBlock>),
    RenderBlocks(Box<RenderBlocks>),
}

impl Node {
    /// Span of the opening tag, or of the text.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Node::Text { span }
            | Node::Indent(Indent { span, .. })
            | Node::LineEnd { span }
            | Node::Print { span, .. }
            | Node::PrintX { span, .. }
            | Node::Expr { span, .. }
            | Node::Set { span, .. }
            | Node::Modify { span, .. }
            | Node::Break { span }
            | Node::Continue { span }
            | Node::Return { span, .. } => *span,
            Node::For(block) => block.span,
            Node::While(block) => block.span,
            Node::If(block) => block.span,
            Node::Def(template) => template.span().unwrap_or_default(),
            Node::Render(render) => render.span,
            Node::RenderBlock(render) => render.span,
            Node::RenderBlocks(render) => render.span,
        }
    }

    /// Literal text nodes aren't decorated with locations when they fail.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Node::Text { .. } | Node::Indent(_) | Node::LineEnd { .. })
    }
}

/// Counts nodes, including nested bodies and local templates.
#[must_use]
pub fn count_nodes(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|node| {
            1 + match node {
                Node::For(block) => count_nodes(&block.body),
                Node::While(block) => count_nodes(&block.body),
                Node::If(block) => block
                    .branches
                    .iter()
                    .map(|branch| count_nodes(&branch.body))
                    .sum(),
                Node::Def(template) => count_nodes(template.content()),
                Node::RenderBlock(render) => count_nodes(render.content.content()),
                Node::RenderBlocks(render) => count_nodes(&render.body),
                _ => 0,
            }
        })
        .sum()
}
