//! Tables of system-value semantics and their target bindings.

use hxc_ir::{Binding, Scalar, VectorSize};

/// Which side of the stage boundary a value crosses.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Direction {
    Input,
    Output,
}

/// Type of a system value at the stage boundary.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ValueType {
    /// Whatever the shader declares, e.g. render-target colors.
    Declared,
    Scalar(Scalar),
    Vector(VectorSize, Scalar),
}

/// One recognized system-value semantic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemValue {
    /// Source semantic, e.g. `SV_VertexID`. Matched case-insensitively.
    pub semantic: String,
    pub direction: Direction,
    /// Name of the boundary parameter or output member.
    pub name: String,
    pub binding: Binding,
    pub ty: ValueType,
}

/// The system values one stage of one target profile understands.
#[derive(Clone, Debug, Default)]
pub struct SystemValueTable {
    values: Vec<SystemValue>,
}

impl SystemValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(
        mut self,
        semantic: &str,
        direction: Direction,
        name: &str,
        binding: Binding,
        ty: ValueType,
    ) -> Self {
        self.values.push(SystemValue {
            semantic: semantic.to_string(),
            direction,
            name: name.to_string(),
            binding,
            ty,
        });
        self
    }

    /// Finds `semantic` for `direction`. A semantic without an index also
    /// matches index 0, so `SV_Target` finds `SV_Target0`.
    pub fn lookup(&self, semantic: &str, direction: Direction) -> Option<&SystemValue> {
        let find = |wanted: &str| {
            self.values
                .iter()
                .find(|v| v.direction == direction && v.semantic.eq_ignore_ascii_case(wanted))
        };
        find(semantic).or_else(|| {
            if semantic.ends_with(|c: char| c.is_ascii_digit()) {
                None
            } else {
                find(&format!("{semantic}0"))
            }
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// `true` for semantics in the reserved `SV_` namespace.
pub fn is_system_semantic(semantic: &str) -> bool {
    semantic
        .get(..3)
        .is_some_and(|p| p.eq_ignore_ascii_case("SV_"))
}

/// Splits `TEXCOORD12` into `("TEXCOORD", 12)`; no suffix means index 0.
pub fn split_index(semantic: &str) -> (&str, u32) {
    let digits = semantic
        .bytes()
        .rev()
        .take_while(u8::is_ascii_digit)
        .count();
    let (name, index) = semantic.split_at(semantic.len() - digits);
    (name, index.parse().unwrap_or(0))
}
