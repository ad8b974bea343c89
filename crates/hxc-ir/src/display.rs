//! Human-readable IR dump for debugging (`--emit-ir`).

use std::fmt::{self, Write};

use crate::arena::{Handle, UniqueArena};
use crate::expr::{BinaryOp, Expression, Literal, SampleLevel, UnaryOp};
use crate::stmt::{Block, Statement};
use crate::types::{ImageClass, Type, TypeInner};
use crate::var::Binding;
use crate::Module;

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}u"),
            Self::F16(v) => write!(f, "{v:?}h"),
            Self::F32(v) => write!(f, "{v:?}"),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Negate => "-",
            Self::LogicalNot => "!",
            Self::BitwiseNot => "~",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::AllEqual => "all==",
            Self::AnyNotEqual => "any!=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::LogicalXor => "^^",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        })
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn(b) => write!(f, "builtin({b:?})"),
            Self::Attribute(i) => write!(f, "attribute({i})"),
            Self::User(s) => write!(f, "user({s})"),
            Self::Color(i) => write!(f, "color({i})"),
            Self::StageIn => f.write_str("stage_in"),
        }
    }
}

/// Formats a type, naming structs instead of expanding them.
pub fn format_type(ty: &Type, types: &UniqueArena<Type>) -> String {
    if let (Some(name), TypeInner::Struct { .. }) = (&ty.name, &ty.inner) {
        return name.clone();
    }
    format_type_inner(&ty.inner, types)
}

pub fn format_type_inner(inner: &TypeInner, types: &UniqueArena<Type>) -> String {
    let base = |h: Handle<Type>| {
        types
            .try_get(h)
            .map_or_else(|| format!("{h:?}"), |t| format_type(t, types))
    };
    match *inner {
        TypeInner::Scalar(s) => s.to_string(),
        TypeInner::Vector { size, scalar } => format!("{scalar}{}", size.len()),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("{scalar}{}x{}", columns.len(), rows.len()),
        TypeInner::Array { base: b, size } => format!("{}[{size}]", base(b)),
        TypeInner::Struct { ref members, .. } => {
            let fields: Vec<String> = members
                .iter()
                .map(|m| format!("{}: {}", m.name, base(m.ty)))
                .collect();
            format!("struct {{ {} }}", fields.join(", "))
        }
        TypeInner::Image {
            dim, class, scalar, ..
        } => match class {
            ImageClass::Sampled { .. } => format!("texture{dim:?}<{scalar}>"),
            ImageClass::Depth { .. } => format!("depth{dim:?}"),
            ImageClass::Storage { .. } => format!("rwtexture{dim:?}<{scalar}>"),
        },
        TypeInner::Sampler { comparison } => {
            if comparison {
                "sampler_comparison".into()
            } else {
                "sampler".into()
            }
        }
        TypeInner::Buffer { base: b, writable } => {
            format!("{}buffer<{}>", if writable { "rw" } else { "" }, base(b))
        }
        TypeInner::Patch { base: b, size } => format!("patch<{}, {size}>", base(b)),
    }
}

/// Formats an expression tree inline.
pub fn format_expr(module: &Module, handle: Handle<Expression>) -> String {
    let Some(expr) = module.expressions.try_get(handle) else {
        return format!("<bad {handle:?}>");
    };
    let sub = |h| format_expr(module, h);
    match *expr {
        Expression::Literal(lit) => lit.to_string(),
        Expression::Compose { ty, ref components } => {
            let parts: Vec<String> = components.iter().map(|&c| sub(c)).collect();
            format!("{}({})", format_type(&module.types[ty], &module.types), parts.join(", "))
        }
        Expression::ZeroValue(ty) => {
            format!("{}()", format_type(&module.types[ty], &module.types))
        }
        Expression::Variable(v) => match module.variables.try_get(v) {
            Some(var) => format!("{}{v:?}", var.display_name()),
            None => format!("<bad var {v:?}>"),
        },
        Expression::Access { base, index } => format!("{}[{}]", sub(base), sub(index)),
        Expression::AccessIndex { base, index } => format!("{}.{index}", sub(base)),
        Expression::Swizzle {
            size,
            vector,
            pattern,
        } => {
            let letters: String = pattern[..size.len() as usize]
                .iter()
                .map(|c| c.letter())
                .collect();
            format!("{}.{letters}", sub(vector))
        }
        Expression::Unary { op, expr } => format!("{op}{}", sub(expr)),
        Expression::Binary { op, left, right } => format!("({} {op} {})", sub(left), sub(right)),
        Expression::Select {
            condition,
            accept,
            reject,
        } => format!("({} ? {} : {})", sub(condition), sub(accept), sub(reject)),
        Expression::Math { fun, .. } => {
            let args: Vec<String> = expr.operands().into_iter().map(sub).collect();
            format!("{fun:?}({})", args.join(", "))
        }
        Expression::As { expr, kind, width } => format!("{kind:?}{}({})", width * 8, sub(expr)),
        Expression::ImageSample {
            image,
            sampler,
            coordinate,
            level,
            gather,
            ..
        } => {
            let op = if gather.is_some() { "gather" } else { "sample" };
            let level = match level {
                SampleLevel::Auto => String::new(),
                SampleLevel::Zero => ", lod 0".into(),
                SampleLevel::Exact(l) => format!(", lod {}", sub(l)),
                SampleLevel::Bias(b) => format!(", bias {}", sub(b)),
                SampleLevel::Gradient { x, y } => format!(", grad {} {}", sub(x), sub(y)),
            };
            format!(
                "{op}({}, {}, {}{level})",
                sub(image),
                sub(sampler),
                sub(coordinate)
            )
        }
        Expression::ImageLoad {
            image, coordinate, ..
        } => format!("load({}, {})", sub(image), sub(coordinate)),
        Expression::ImageQuery { image, query } => format!("{query:?}({})", sub(image)),
    }
}

fn dump_block(out: &mut String, module: &Module, block: &Block, depth: usize) {
    for statement in block {
        dump_statement(out, module, statement, depth);
    }
}

fn dump_statement(out: &mut String, module: &Module, statement: &Statement, depth: usize) {
    let pad = "  ".repeat(depth);
    let e = |h| format_expr(module, h);
    // Writing into a String cannot fail.
    let _ = match *statement {
        Statement::Declare(v) => {
            let var = &module.variables[v];
            let init = var.init.map(|i| format!(" = {}", e(i))).unwrap_or_default();
            writeln!(
                out,
                "{pad}{} {}{v:?}: {}{init}",
                var.mode,
                var.display_name(),
                format_type(&module.types[var.ty], &module.types)
            )
        }
        Statement::Assign { target, value } => writeln!(out, "{pad}{} = {}", e(target), e(value)),
        Statement::Expression(h) => writeln!(out, "{pad}{}", e(h)),
        Statement::Call {
            function,
            ref arguments,
            result,
        } => {
            let args: Vec<String> = arguments.iter().map(|&a| e(a)).collect();
            let name = module
                .functions
                .try_get(function)
                .map_or("<bad>", |f| f.name.as_str());
            let lhs = result.map(|r| format!("{} = ", e(r))).unwrap_or_default();
            writeln!(out, "{pad}{lhs}call {name}({})", args.join(", "))
        }
        Statement::If {
            condition,
            ref accept,
            ref reject,
        } => {
            let _ = writeln!(out, "{pad}if {} {{", e(condition));
            dump_block(out, module, accept, depth + 1);
            if !reject.is_empty() {
                let _ = writeln!(out, "{pad}}} else {{");
                dump_block(out, module, reject, depth + 1);
            }
            writeln!(out, "{pad}}}")
        }
        Statement::Loop {
            ref body,
            ref continuing,
        } => {
            let _ = writeln!(out, "{pad}loop {{");
            dump_block(out, module, body, depth + 1);
            if !continuing.is_empty() {
                let _ = writeln!(out, "{pad}}} continuing {{");
                dump_block(out, module, continuing, depth + 1);
            }
            writeln!(out, "{pad}}}")
        }
        Statement::Break => writeln!(out, "{pad}break"),
        Statement::Continue => writeln!(out, "{pad}continue"),
        Statement::Return { value } => match value {
            Some(v) => writeln!(out, "{pad}return {}", e(v)),
            None => writeln!(out, "{pad}return"),
        },
        Statement::Discard => writeln!(out, "{pad}discard"),
        Statement::Atomic {
            target, fun, value, ..
        } => writeln!(out, "{pad}atomic {fun:?}({}, {})", e(target), e(value)),
        Statement::ImageStore {
            image,
            coordinate,
            value,
            ..
        } => writeln!(out, "{pad}store({}, {}, {})", e(image), e(coordinate), e(value)),
        Statement::Barrier(b) => writeln!(out, "{pad}barrier({b:?})"),
    };
}

/// Renders the whole module as text.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();

    out.push_str("Types:\n");
    for (handle, ty) in module.types.iter() {
        let name = ty.name.as_deref().map(|n| format!("{n} = ")).unwrap_or_default();
        let _ = writeln!(
            out,
            "  {handle:?} {name}{}",
            format_type_inner(&ty.inner, &module.types)
        );
    }

    if !module.globals.is_empty() {
        out.push_str("\nGlobals:\n");
        for &handle in &module.globals {
            let var = &module.variables[handle];
            let semantic = var
                .semantic
                .as_deref()
                .map(|s| format!(" : {s}"))
                .unwrap_or_default();
            let binding = var
                .binding
                .as_ref()
                .map(|b| format!(" @{b}"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {handle:?} {} {}: {}{semantic}{binding}",
                var.mode,
                var.display_name(),
                format_type(&module.types[var.ty], &module.types)
            );
        }
    }

    for block in &module.uniform_blocks {
        let members: Vec<String> = block
            .members
            .iter()
            .map(|&m| module.variables[m].display_name().to_string())
            .collect();
        let _ = writeln!(out, "\ncbuffer {} {{ {} }}", block.name, members.join(", "));
    }

    if !module.global_body.is_empty() {
        out.push_str("\nGlobal scope:\n");
        dump_block(&mut out, module, &module.global_body, 1);
    }

    for (handle, function) in module.functions.iter() {
        let params: Vec<String> = function
            .parameters
            .iter()
            .map(|&p| {
                let var = &module.variables[p];
                let semantic = var
                    .semantic
                    .as_deref()
                    .map(|s| format!(" : {s}"))
                    .unwrap_or_default();
                format!(
                    "{} {}: {}{semantic}",
                    var.mode,
                    var.display_name(),
                    format_type(&module.types[var.ty], &module.types)
                )
            })
            .collect();
        let result = function
            .result
            .as_ref()
            .map(|r| format!(" -> {}", format_type(&module.types[r.ty], &module.types)))
            .unwrap_or_default();
        let entry = if function.is_entry_point() { " [entry]" } else { "" };
        let _ = writeln!(
            out,
            "\nfn {handle:?} {}({}){result}{entry} {{",
            function.name,
            params.join(", ")
        );
        dump_block(&mut out, module, &function.body, 1);
        out.push_str("}\n");
    }

    out
}
