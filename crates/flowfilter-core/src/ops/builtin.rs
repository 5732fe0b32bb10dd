//! The built-in operator set.
//!
//! Covers arithmetic across the numeric types, bitwise across the integral
//! types, comparison across the ordered types, logicals on bool, string
//! concatenation and substring search, IP prefix containment, list
//! membership, the implicit field comparison (including the flags mask
//! test), the implicit conversion set, the truthiness casts used at the
//! expression root, and the IP-list-to-trie constructor.
//!
//! Integer arithmetic wraps in two's complement; division and modulus by
//! zero fail with [`OpError::DivisionByZero`]. Floats follow IEEE-754 with
//! quiet NaN propagation.

use std::cmp::Ordering;

use crate::trie::{IpTrie, TRIE_TYPE_ID};
use crate::types::{DataType, TypeTag};
use crate::value::{IpAddr, MacAddr, Opaque, Value};

use super::{BinaryOp, OpEntry, OpError, UnaryOp};

macro_rules! binop {
    ($name:ident, ($l:pat, $r:pat) => $body:expr) => {
        fn $name(l: &Value, r: &Value) -> Result<Value, OpError> {
            match (l, r) {
                ($l, $r) => $body,
                _ => Err(OpError::TypeMismatch),
            }
        }
    };
}

macro_rules! unop {
    ($name:ident, $v:pat => $body:expr) => {
        fn $name(v: &Value) -> Result<Value, OpError> {
            match v {
                $v => $body,
                _ => Err(OpError::TypeMismatch),
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

binop!(add_uint, (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a.wrapping_add(*b))));
binop!(add_int, (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))));
binop!(add_float, (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)));
binop!(sub_uint, (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a.wrapping_sub(*b))));
binop!(sub_int, (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))));
binop!(sub_float, (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)));
binop!(mul_uint, (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a.wrapping_mul(*b))));
binop!(mul_int, (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))));
binop!(mul_float, (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)));

binop!(div_uint, (Value::UInt(a), Value::UInt(b)) => {
    if *b == 0 {
        Err(OpError::DivisionByZero)
    } else {
        Ok(Value::UInt(a / b))
    }
});
binop!(div_int, (Value::Int(a), Value::Int(b)) => {
    if *b == 0 {
        Err(OpError::DivisionByZero)
    } else {
        Ok(Value::Int(a.wrapping_div(*b)))
    }
});
binop!(div_float, (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)));
binop!(mod_uint, (Value::UInt(a), Value::UInt(b)) => {
    if *b == 0 {
        Err(OpError::DivisionByZero)
    } else {
        Ok(Value::UInt(a % b))
    }
});
binop!(mod_int, (Value::Int(a), Value::Int(b)) => {
    if *b == 0 {
        Err(OpError::DivisionByZero)
    } else {
        Ok(Value::Int(a.wrapping_rem(*b)))
    }
});
binop!(mod_float, (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a % b)));

unop!(neg_uint, Value::UInt(a) => Ok(Value::Int((*a as i64).wrapping_neg())));
unop!(neg_int, Value::Int(a) => Ok(Value::Int(a.wrapping_neg())));
unop!(neg_float, Value::Float(a) => Ok(Value::Float(-a)));

binop!(concat_str, (Value::Str(a), Value::Str(b)) => {
    let mut s = String::with_capacity(a.len() + b.len());
    s.push_str(a);
    s.push_str(b);
    Ok(Value::str(s))
});

// ---------------------------------------------------------------------------
// Bitwise
// ---------------------------------------------------------------------------

binop!(bitand_uint, (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a & b)));
binop!(bitand_int, (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)));
binop!(bitand_flags, (Value::Flags(a), Value::Flags(b)) => Ok(Value::Flags(a & b)));
binop!(bitor_uint, (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a | b)));
binop!(bitor_int, (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)));
binop!(bitor_flags, (Value::Flags(a), Value::Flags(b)) => Ok(Value::Flags(a | b)));
binop!(bitxor_uint, (Value::UInt(a), Value::UInt(b)) => Ok(Value::UInt(a ^ b)));
binop!(bitxor_int, (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a ^ b)));
binop!(bitxor_flags, (Value::Flags(a), Value::Flags(b)) => Ok(Value::Flags(a ^ b)));

unop!(bitnot_uint, Value::UInt(a) => Ok(Value::UInt(!a)));
unop!(bitnot_int, Value::Int(a) => Ok(Value::Int(!a)));
unop!(bitnot_flags, Value::Flags(a) => Ok(Value::Flags(!a)));

// ---------------------------------------------------------------------------
// Logical
// ---------------------------------------------------------------------------

binop!(logic_and, (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)));
binop!(logic_or, (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)));
unop!(logic_not, Value::Bool(a) => Ok(Value::Bool(!a)));

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

fn eq_values(l: &Value, r: &Value) -> Result<Value, OpError> {
    Ok(Value::Bool(l == r))
}

fn ne_values(l: &Value, r: &Value) -> Result<Value, OpError> {
    Ok(Value::Bool(l != r))
}

// NaN comparisons yield None and thus false, per IEEE-754.
fn lt_values(l: &Value, r: &Value) -> Result<Value, OpError> {
    Ok(Value::Bool(l.partial_cmp(r) == Some(Ordering::Less)))
}

fn gt_values(l: &Value, r: &Value) -> Result<Value, OpError> {
    Ok(Value::Bool(l.partial_cmp(r) == Some(Ordering::Greater)))
}

fn le_values(l: &Value, r: &Value) -> Result<Value, OpError> {
    Ok(Value::Bool(matches!(
        l.partial_cmp(r),
        Some(Ordering::Less | Ordering::Equal)
    )))
}

fn ge_values(l: &Value, r: &Value) -> Result<Value, OpError> {
    Ok(Value::Bool(matches!(
        l.partial_cmp(r),
        Some(Ordering::Greater | Ordering::Equal)
    )))
}

// ---------------------------------------------------------------------------
// Implicit comparison
// ---------------------------------------------------------------------------

binop!(match_ip, (Value::Ip(a), Value::Ip(b)) => Ok(Value::Bool(a.matches(b))));

// Field mask test: true when every bit of the mask is set in the field.
binop!(match_flags_uint, (Value::Flags(a), Value::UInt(b)) => Ok(Value::Bool(a & b == *b)));
binop!(match_flags, (Value::Flags(a), Value::Flags(b)) => Ok(Value::Bool(a & b == *b)));

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

binop!(ip_within, (Value::Ip(a), Value::Ip(b)) => Ok(Value::Bool(a.is_within(b))));

binop!(list_has, (l, Value::List(items)) => Ok(Value::Bool(items.iter().any(|v| v == l))));

binop!(ip_in_list, (Value::Ip(a), Value::List(items)) => {
    Ok(Value::Bool(items.iter().any(|v| match v {
        Value::Ip(net) => a.is_within(net),
        _ => false,
    })))
});

binop!(str_has, (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a.contains(&**b))));

binop!(list_holds, (Value::List(items), r) => Ok(Value::Bool(items.iter().any(|v| v == r))));

binop!(ip_list_holds, (Value::List(items), Value::Ip(a)) => {
    Ok(Value::Bool(items.iter().any(|v| match v {
        Value::Ip(net) => a.is_within(net),
        _ => false,
    })))
});

binop!(ip_in_trie, (Value::Ip(a), Value::Opaque(o)) => {
    match o.downcast_ref::<IpTrie>() {
        Some(trie) => Ok(Value::Bool(trie.contains(a))),
        None => Err(OpError::TypeMismatch),
    }
});

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

unop!(uint_to_int, Value::UInt(a) => Ok(Value::Int(*a as i64)));
unop!(uint_to_float, Value::UInt(a) => Ok(Value::Float(*a as f64)));
unop!(int_to_float, Value::Int(a) => Ok(Value::Float(*a as f64)));
unop!(int_to_flags, Value::Int(a) => Ok(Value::Flags(*a as u64)));
unop!(flags_to_uint, Value::Flags(a) => Ok(Value::UInt(*a)));

unop!(str_to_ip, Value::Str(s) => {
    s.parse::<IpAddr>().map(Value::Ip).map_err(|_| OpError::Conversion {
        value: format!("{s:?}"),
        target: DataType::IP,
    })
});
unop!(ip_to_str, Value::Ip(a) => Ok(Value::str(a.to_string())));
unop!(str_to_mac, Value::Str(s) => {
    s.parse::<MacAddr>().map(Value::Mac).map_err(|_| OpError::Conversion {
        value: format!("{s:?}"),
        target: DataType::MAC,
    })
});
unop!(mac_to_str, Value::Mac(a) => Ok(Value::str(a.to_string())));

// Truthiness casts, applied only where a bool is explicitly required.
unop!(uint_to_bool, Value::UInt(a) => Ok(Value::Bool(*a != 0)));
unop!(int_to_bool, Value::Int(a) => Ok(Value::Bool(*a != 0)));
unop!(float_to_bool, Value::Float(a) => Ok(Value::Bool(*a != 0.0)));
unop!(flags_to_bool, Value::Flags(a) => Ok(Value::Bool(*a != 0)));
unop!(str_to_bool, Value::Str(s) => Ok(Value::Bool(!s.is_empty())));
unop!(ip_to_bool, Value::Ip(_) => Ok(Value::Bool(true)));
unop!(mac_to_bool, Value::Mac(_) => Ok(Value::Bool(true)));
unop!(list_to_bool, Value::List(items) => Ok(Value::Bool(!items.is_empty())));

// ---------------------------------------------------------------------------
// Trie constructor
// ---------------------------------------------------------------------------

unop!(ip_list_to_trie, Value::List(items) => {
    let mut trie = IpTrie::new();
    for item in items.iter() {
        match item {
            Value::Ip(addr) => trie.add(addr),
            _ => return Err(OpError::TypeMismatch),
        }
    }
    Ok(Value::Opaque(Opaque::new(TRIE_TYPE_ID, trie)))
});

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

fn unary(op: UnaryOp, operand: DataType, result: DataType, apply: super::UnaryFn) -> OpEntry {
    OpEntry::Unary {
        op,
        operand,
        result,
        apply,
    }
}

fn binary(
    op: BinaryOp,
    lhs: DataType,
    rhs: DataType,
    result: DataType,
    apply: super::BinaryFn,
) -> OpEntry {
    OpEntry::Binary {
        op,
        lhs,
        rhs,
        result,
        apply,
    }
}

fn cast(from: DataType, to: DataType, cost: u32, apply: super::UnaryFn) -> OpEntry {
    OpEntry::Cast {
        from,
        to,
        cost,
        implicit: true,
        apply,
    }
}

fn explicit_cast(from: DataType, to: DataType, apply: super::UnaryFn) -> OpEntry {
    OpEntry::Cast {
        from,
        to,
        cost: 0,
        implicit: false,
        apply,
    }
}

pub(super) fn entries() -> Vec<OpEntry> {
    use BinaryOp::*;
    use DataType as T;
    use UnaryOp::*;

    let trie = DataType::custom(TRIE_TYPE_ID);
    let mut entries = vec![
        // Arithmetic.
        binary(Add, T::UINT, T::UINT, T::UINT, add_uint),
        binary(Add, T::INT, T::INT, T::INT, add_int),
        binary(Add, T::FLOAT, T::FLOAT, T::FLOAT, add_float),
        binary(Add, T::STR, T::STR, T::STR, concat_str),
        binary(Sub, T::UINT, T::UINT, T::UINT, sub_uint),
        binary(Sub, T::INT, T::INT, T::INT, sub_int),
        binary(Sub, T::FLOAT, T::FLOAT, T::FLOAT, sub_float),
        binary(Mul, T::UINT, T::UINT, T::UINT, mul_uint),
        binary(Mul, T::INT, T::INT, T::INT, mul_int),
        binary(Mul, T::FLOAT, T::FLOAT, T::FLOAT, mul_float),
        binary(Div, T::UINT, T::UINT, T::UINT, div_uint),
        binary(Div, T::INT, T::INT, T::INT, div_int),
        binary(Div, T::FLOAT, T::FLOAT, T::FLOAT, div_float),
        binary(Mod, T::UINT, T::UINT, T::UINT, mod_uint),
        binary(Mod, T::INT, T::INT, T::INT, mod_int),
        binary(Mod, T::FLOAT, T::FLOAT, T::FLOAT, mod_float),
        unary(Neg, T::UINT, T::INT, neg_uint),
        unary(Neg, T::INT, T::INT, neg_int),
        unary(Neg, T::FLOAT, T::FLOAT, neg_float),
        // Bitwise.
        binary(BitAnd, T::UINT, T::UINT, T::UINT, bitand_uint),
        binary(BitAnd, T::INT, T::INT, T::INT, bitand_int),
        binary(BitAnd, T::FLAGS, T::FLAGS, T::FLAGS, bitand_flags),
        binary(BitOr, T::UINT, T::UINT, T::UINT, bitor_uint),
        binary(BitOr, T::INT, T::INT, T::INT, bitor_int),
        binary(BitOr, T::FLAGS, T::FLAGS, T::FLAGS, bitor_flags),
        binary(BitXor, T::UINT, T::UINT, T::UINT, bitxor_uint),
        binary(BitXor, T::INT, T::INT, T::INT, bitxor_int),
        binary(BitXor, T::FLAGS, T::FLAGS, T::FLAGS, bitxor_flags),
        unary(BitNot, T::UINT, T::UINT, bitnot_uint),
        unary(BitNot, T::INT, T::INT, bitnot_int),
        unary(BitNot, T::FLAGS, T::FLAGS, bitnot_flags),
        // Logical.
        binary(And, T::BOOL, T::BOOL, T::BOOL, logic_and),
        binary(Or, T::BOOL, T::BOOL, T::BOOL, logic_or),
        unary(Not, T::BOOL, T::BOOL, logic_not),
    ];

    // Equality and ordering.
    for ty in [
        T::UINT,
        T::INT,
        T::FLOAT,
        T::BOOL,
        T::STR,
        T::IP,
        T::MAC,
        T::FLAGS,
    ] {
        entries.push(binary(Eq, ty, ty, T::BOOL, eq_values));
        entries.push(binary(Ne, ty, ty, T::BOOL, ne_values));
    }
    for ty in [T::UINT, T::INT, T::FLOAT, T::STR, T::IP] {
        entries.push(binary(Lt, ty, ty, T::BOOL, lt_values));
        entries.push(binary(Gt, ty, ty, T::BOOL, gt_values));
        entries.push(binary(Le, ty, ty, T::BOOL, le_values));
        entries.push(binary(Ge, ty, ty, T::BOOL, ge_values));
    }

    // Implicit field comparison.
    for ty in [T::UINT, T::INT, T::FLOAT, T::BOOL, T::STR, T::MAC] {
        entries.push(binary(Matches, ty, ty, T::BOOL, eq_values));
    }
    entries.push(binary(Matches, T::IP, T::IP, T::BOOL, match_ip));
    entries.push(binary(Matches, T::FLAGS, T::UINT, T::BOOL, match_flags_uint));
    entries.push(binary(Matches, T::FLAGS, T::FLAGS, T::BOOL, match_flags));

    // Containment.
    entries.push(binary(In, T::IP, T::IP, T::BOOL, ip_within));
    entries.push(binary(In, T::IP, T::list(TypeTag::Ip), T::BOOL, ip_in_list));
    entries.push(binary(
        Contains,
        T::list(TypeTag::Ip),
        T::IP,
        T::BOOL,
        ip_list_holds,
    ));
    for elem in [
        TypeTag::UInt,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::Str,
        TypeTag::Mac,
    ] {
        entries.push(binary(In, T::of(elem), T::list(elem), T::BOOL, list_has));
        entries.push(binary(
            Contains,
            T::list(elem),
            T::of(elem),
            T::BOOL,
            list_holds,
        ));
    }
    entries.push(binary(Contains, T::STR, T::STR, T::BOOL, str_has));
    entries.push(binary(In, T::IP, trie, T::BOOL, ip_in_trie));

    // Implicit conversions.
    entries.extend([
        cast(T::UINT, T::INT, 1, uint_to_int),
        cast(T::INT, T::FLOAT, 2, int_to_float),
        cast(T::UINT, T::FLOAT, 3, uint_to_float),
        cast(T::INT, T::FLAGS, 1, int_to_flags),
        cast(T::FLAGS, T::UINT, 1, flags_to_uint),
        cast(T::STR, T::IP, 2, str_to_ip),
        cast(T::IP, T::STR, 3, ip_to_str),
        cast(T::STR, T::MAC, 2, str_to_mac),
        cast(T::MAC, T::STR, 3, mac_to_str),
    ]);

    // Truthiness casts (explicit target only).
    entries.extend([
        explicit_cast(T::UINT, T::BOOL, uint_to_bool),
        explicit_cast(T::INT, T::BOOL, int_to_bool),
        explicit_cast(T::FLOAT, T::BOOL, float_to_bool),
        explicit_cast(T::FLAGS, T::BOOL, flags_to_bool),
        explicit_cast(T::STR, T::BOOL, str_to_bool),
        explicit_cast(T::IP, T::BOOL, ip_to_bool),
        explicit_cast(T::MAC, T::BOOL, mac_to_bool),
    ]);
    for elem in [
        TypeTag::UInt,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::Str,
        TypeTag::Ip,
        TypeTag::Mac,
    ] {
        entries.push(explicit_cast(T::list(elem), T::BOOL, list_to_bool));
    }

    // Compile-time trie construction from literal IP lists.
    entries.push(OpEntry::Constructor {
        from: T::list(TypeTag::Ip),
        to: trie,
        apply: ip_list_to_trie,
    });

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint_arithmetic_wraps() {
        let v = add_uint(&Value::UInt(u64::MAX), &Value::UInt(1)).unwrap();
        assert_eq!(v, Value::UInt(0));
    }

    #[test]
    fn int_arithmetic_wraps() {
        let v = add_int(&Value::Int(i64::MAX), &Value::Int(1)).unwrap();
        assert_eq!(v, Value::Int(i64::MIN));
    }

    #[test]
    fn integer_division_by_zero_fails() {
        assert!(matches!(
            div_uint(&Value::UInt(1), &Value::UInt(0)),
            Err(OpError::DivisionByZero)
        ));
        assert!(matches!(
            mod_int(&Value::Int(1), &Value::Int(0)),
            Err(OpError::DivisionByZero)
        ));
    }

    #[test]
    fn float_division_by_zero_is_ieee() {
        let v = div_float(&Value::Float(1.0), &Value::Float(0.0)).unwrap();
        assert_eq!(v, Value::Float(f64::INFINITY));
    }

    #[test]
    fn nan_comparisons_are_false() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(lt_values(&nan, &Value::Float(1.0)).unwrap(), Value::Bool(false));
        assert_eq!(ge_values(&nan, &nan).unwrap(), Value::Bool(false));
        assert_eq!(eq_values(&nan, &nan).unwrap(), Value::Bool(false));
    }

    #[test]
    fn string_concat_and_contains() {
        let ab = concat_str(&Value::str("a"), &Value::str("b")).unwrap();
        assert_eq!(ab, Value::str("ab"));
        assert_eq!(
            str_has(&Value::str("flow record"), &Value::str("reco")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            str_has(&Value::str("flow"), &Value::str("x")).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn mixed_version_ip_equality_is_false() {
        let v4: IpAddr = "127.0.0.1".parse().unwrap();
        let v6: IpAddr = "::1".parse().unwrap();
        assert_eq!(
            eq_values(&Value::Ip(v4), &Value::Ip(v6)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            match_ip(&Value::Ip(v4), &Value::Ip(v6)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn ip_prefix_containment() {
        let net: IpAddr = "192.168.0.0/24".parse().unwrap();
        let inside: IpAddr = "192.168.0.7".parse().unwrap();
        let outside: IpAddr = "192.168.1.7".parse().unwrap();
        assert_eq!(
            ip_within(&Value::Ip(inside), &Value::Ip(net)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            ip_within(&Value::Ip(outside), &Value::Ip(net)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn flags_mask_test() {
        assert_eq!(
            match_flags_uint(&Value::Flags(0b0110), &Value::UInt(0b0010)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            match_flags_uint(&Value::Flags(0b0110), &Value::UInt(0b1010)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn trie_construction_and_lookup() {
        let list = Value::list(vec![
            Value::Ip("127.0.0.1".parse().unwrap()),
            Value::Ip("10.0.0.0/8".parse().unwrap()),
            Value::Ip("aabb:ccdd::".parse().unwrap()),
        ]);
        let trie = ip_list_to_trie(&list).unwrap();
        assert_eq!(trie.data_type(), DataType::custom(TRIE_TYPE_ID));

        let hit = Value::Ip("10.1.2.3".parse().unwrap());
        let miss = Value::Ip("11.1.2.3".parse().unwrap());
        assert_eq!(ip_in_trie(&hit, &trie).unwrap(), Value::Bool(true));
        assert_eq!(ip_in_trie(&miss, &trie).unwrap(), Value::Bool(false));
    }

    #[test]
    fn str_to_ip_conversion_is_fallible() {
        assert!(str_to_ip(&Value::str("192.168.0.1")).is_ok());
        assert!(matches!(
            str_to_ip(&Value::str("not an address")),
            Err(OpError::Conversion { .. })
        ));
    }
}
