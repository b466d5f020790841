//! Immediate values.

/// Handle into the runtime's heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub usize);

/// A runtime value. Nil and numbers live in the enum itself; everything
/// else is a handle into the heap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Obj(ObjId),
}

impl Value {
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn truthy(self) -> bool {
        match self {
            Value::Nil => false,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::Obj(_) => true,
        }
    }

    pub fn as_obj(self) -> Option<ObjId> {
        match self {
            Value::Obj(id) => Some(id),
            _ => None,
        }
    }

    pub fn from_bool(b: bool) -> Value {
        Value::Int(b as i64)
    }

    /// Numeric view used by arithmetic promotion.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(i as f64),
            Value::Float(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.truthy());
        assert!(!Value::Int(0).truthy());
        assert!(!Value::Float(0.0).truthy());
        assert!(Value::Int(-3).truthy());
        assert!(Value::Obj(ObjId(0)).truthy());
    }
}
