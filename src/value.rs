//! 运行时值：原子（symbol / string / integer / float）与多字段（multifield）

use std::fmt;

/// 标量原子
#[derive(Debug, Clone)]
pub enum Atom {
    Symbol(String),
    Str(String),
    Integer(i64),
    Float(f64),
}

impl Atom {
    pub fn symbol(s: impl Into<String>) -> Self { Self::Symbol(s.into()) }
    pub fn string(s: impl Into<String>) -> Self { Self::Str(s.into()) }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Symbol(_)  => "SYMBOL",
            Self::Str(_)     => "STRING",
            Self::Integer(_) => "INTEGER",
            Self::Float(_)   => "FLOAT",
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self { Self::Symbol(s) => Some(s), _ => None }
    }

    /// 数值原子转为 f64；非数值返回 None
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v)   => Some(*v),
            _ => None,
        }
    }

    /// symbol 或 string 的文本内容
    pub fn lexeme(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) | Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// 类型 + 值相等；浮点按位比较，与哈希保持一致
impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Symbol(a),  Self::Symbol(b))  => a == b,
            (Self::Str(a),     Self::Str(b))     => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a),   Self::Float(b))   => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Atom {}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(s)  => write!(f, "{s}"),
            Self::Str(s)     => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"'  => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        _    => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v)   => {
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
        }
    }
}

/// 单元格 / 键 / 表达式结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Atom(Atom),
    /// 有序原子序列（不嵌套）
    Multifield(Vec<Atom>),
}

impl Value {
    pub const TRUE_SYMBOL:  &'static str = "TRUE";
    pub const FALSE_SYMBOL: &'static str = "FALSE";

    pub fn symbol(s: impl Into<String>) -> Self { Self::Atom(Atom::symbol(s)) }
    pub fn string(s: impl Into<String>) -> Self { Self::Atom(Atom::string(s)) }
    pub fn integer(v: i64) -> Self { Self::Atom(Atom::Integer(v)) }
    pub fn float(v: f64) -> Self { Self::Atom(Atom::Float(v)) }

    pub fn boolean(b: bool) -> Self {
        Self::symbol(if b { Self::TRUE_SYMBOL } else { Self::FALSE_SYMBOL })
    }
    pub fn false_value() -> Self { Self::boolean(false) }

    /// 只有 symbol FALSE 为假
    pub fn is_true(&self) -> bool {
        !matches!(self, Self::Atom(Atom::Symbol(s)) if s == Self::FALSE_SYMBOL)
    }

    pub fn as_atom(&self) -> Option<&Atom> {
        match self { Self::Atom(a) => Some(a), Self::Multifield(_) => None }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self { Self::Atom(Atom::Integer(v)) => Some(*v), _ => None }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Atom(a)       => a.type_name(),
            Self::Multifield(_) => "MULTIFIELD",
        }
    }

    /// 多字段按元素展开，原子视为单元素
    pub fn into_atoms(self) -> Vec<Atom> {
        match self {
            Self::Atom(a)        => vec![a],
            Self::Multifield(xs) => xs,
        }
    }
}

impl From<Atom> for Value {
    fn from(a: Atom) -> Self { Self::Atom(a) }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(a) => write!(f, "{a}"),
            Self::Multifield(xs) => {
                write!(f, "(")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 { write!(f, " ")?; }
                    write!(f, "{x}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_false_symbol_is_false() {
        assert!(!Value::false_value().is_true());
        assert!(Value::integer(0).is_true());
        assert!(Value::string("FALSE").is_true());
        assert!(Value::Multifield(vec![]).is_true());
    }

    #[test]
    fn integer_and_float_are_distinct_atoms() {
        assert_ne!(Atom::Integer(1), Atom::Float(1.0));
        assert_eq!(Atom::Float(f64::NAN), Atom::Float(f64::NAN));
        assert_ne!(Atom::Symbol("a".into()), Atom::Str("a".into()));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::string("a\"b").to_string(), "\"a\\\"b\"");
        assert_eq!(Value::float(10.0).to_string(), "10.0");
        let mf = Value::Multifield(vec![Atom::symbol("a"), Atom::Integer(2)]);
        assert_eq!(mf.to_string(), "(a 2)");
    }
}
