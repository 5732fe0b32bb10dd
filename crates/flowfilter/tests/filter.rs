//! End-to-end filter tests: compile expressions against a symbol table and
//! evaluate them against records with (possibly multi-valued) fields.

use indexmap::IndexMap;

use flowfilter::{
    BinaryOp, DataType, DiagCode, Fetch, FieldId, Filter, IpAddr, OpEntry, OpError, Resolver,
    Symbol, Value, ValueSource, TRIE_TYPE_ID,
};

/// Symbol table plus per-record field values, like a collector would build
/// around one decoded flow record.
#[derive(Default)]
struct Harness {
    symbols: IndexMap<String, Entry>,
}

struct Entry {
    id: FieldId,
    ty: DataType,
    constant: bool,
    values: Vec<Value>,
}

impl Harness {
    fn new() -> Harness {
        Harness::default()
    }

    fn set_field(&mut self, name: &str, ty: DataType, values: Vec<Value>) -> &mut Harness {
        let id = FieldId(self.symbols.len() as u32);
        let id = self.symbols.get(name).map_or(id, |e| e.id);
        self.symbols.insert(
            name.to_string(),
            Entry {
                id,
                ty,
                constant: false,
                values,
            },
        );
        self
    }

    fn set_const(&mut self, name: &str, value: Value) -> &mut Harness {
        let id = FieldId(self.symbols.len() as u32);
        let id = self.symbols.get(name).map_or(id, |e| e.id);
        self.symbols.insert(
            name.to_string(),
            Entry {
                id,
                ty: value.data_type(),
                constant: true,
                values: vec![value],
            },
        );
        self
    }

    fn compile(&self, expr: &str) -> Filter {
        self.try_compile(expr).unwrap_or_else(|filter| {
            panic!(
                "'{expr}' failed to compile: {:?}",
                filter.diagnostics()
            )
        })
    }

    fn try_compile(&self, expr: &str) -> Result<Filter, Filter> {
        let mut filter = Filter::new();
        match filter.compile(expr, self) {
            Ok(()) => Ok(filter),
            Err(_) => Err(filter),
        }
    }

    fn evaluate(&self, expr: &str) -> bool {
        let mut filter = self.compile(expr);
        let matched = filter.evaluate(&mut Record::over(self));
        assert!(
            filter.diagnostics().is_empty(),
            "'{expr}' raised runtime diagnostics: {:?}",
            filter.diagnostics()
        );
        matched
    }
}

impl Resolver for Harness {
    fn resolve(&self, name: &str) -> Option<Symbol> {
        let entry = self.symbols.get(name)?;
        if entry.constant {
            Some(Symbol::constant(entry.id, entry.values[0].clone()))
        } else {
            Some(Symbol::field(entry.id, entry.ty))
        }
    }
}

/// Value source over one harness record, one cursor per field.
struct Record<'a> {
    harness: &'a Harness,
    cursors: IndexMap<u32, usize>,
}

impl<'a> Record<'a> {
    fn over(harness: &'a Harness) -> Record<'a> {
        Record {
            harness,
            cursors: IndexMap::new(),
        }
    }
}

impl ValueSource for Record<'_> {
    fn field(&mut self, id: FieldId, reset: bool) -> Fetch {
        let Some(entry) = self
            .harness
            .symbols
            .values()
            .find(|e| e.id == id && !e.constant)
        else {
            return Fetch::Absent;
        };
        let cursor = self.cursors.entry(id.0).or_insert(0);
        if reset {
            *cursor = 0;
        }
        if *cursor >= entry.values.len() {
            return Fetch::Absent;
        }
        let value = entry.values[*cursor].clone();
        *cursor += 1;
        if *cursor == entry.values.len() {
            Fetch::Value(value)
        } else {
            Fetch::More(value)
        }
    }
}

fn ip(s: &str) -> Value {
    Value::Ip(s.parse::<IpAddr>().unwrap())
}

fn ips(addresses: &[&str]) -> Vec<Value> {
    addresses.iter().map(|s| ip(s)).collect()
}

fn uints(values: &[u64]) -> Vec<Value> {
    values.iter().map(|u| Value::UInt(*u)).collect()
}

// ---------------------------------------------------------------------------
// Multi-valued fields
// ---------------------------------------------------------------------------

#[test]
fn ip_field_matches_any_of_its_values() {
    let mut h = Harness::new();
    for order in [
        ["85.123.45.6", "127.0.0.1", "192.168.0.1"],
        ["127.0.0.1", "85.123.45.6", "192.168.0.1"],
        ["85.123.45.6", "192.168.0.1", "127.0.0.1"],
    ] {
        h.set_field("ip", DataType::IP, ips(&order));
        assert!(h.evaluate("ip 127.0.0.1"), "order {order:?}");
    }

    h.set_field("ip", DataType::IP, ips(&["85.123.45.6", "192.168.0.1"]));
    assert!(!h.evaluate("ip 127.0.0.1"));
}

#[test]
fn negation_binds_outside_the_existential() {
    let mut h = Harness::new();
    h.set_field(
        "ip",
        DataType::IP,
        ips(&["85.123.45.6", "127.0.0.1", "192.168.0.1"]),
    );
    // Some value equals 127.0.0.1, so the negation is false.
    assert!(!h.evaluate("not ip 127.0.0.1"));
    // No value equals 1.2.3.4, so the negation holds.
    assert!(h.evaluate("not ip 1.2.3.4"));
}

#[test]
fn ip_and_port_combinations() {
    let mut h = Harness::new();
    h.set_field(
        "ip",
        DataType::IP,
        ips(&["192.168.0.1", "127.0.0.1", "85.123.45.6"]),
    );
    h.set_field("port", DataType::UINT, uints(&[80, 443, 22]));

    assert!(h.evaluate("ip 127.0.0.1 and port 80"));
    assert!(!h.evaluate("ip 127.0.0.1 and not port 80"));
    assert!(h.evaluate("ip 127.0.0.1 and not port 60"));
    assert!(!h.evaluate("ip 127.0.1.1 and not port 60"));
    assert!(!h.evaluate("not ip 192.168.0.1 or not port 443"));
    assert!(h.evaluate("not ip 192.168.0.1 or not port 55"));
}

#[test]
fn absent_field_makes_the_predicate_false() {
    let mut h = Harness::new();
    h.set_field("ip", DataType::IP, Vec::new());
    h.set_field("port", DataType::UINT, uints(&[80, 443, 22]));

    assert!(!h.evaluate("ip 127.0.0.1"));
    assert!(!h.evaluate("ip 127.0.0.1 and port 80"));
    assert!(h.evaluate("not ip 127.0.0.1 and port 80"));
    assert!(!h.evaluate("ip 127.0.0.1 and not port 80"));
    assert!(h.evaluate("not ip 192.168.0.1 or not port 443"));
}

#[test]
fn bare_field_is_an_existence_test() {
    let mut h = Harness::new();
    h.set_field("ip", DataType::IP, ips(&["127.0.0.1"]));
    assert!(h.evaluate("ip"));

    h.set_field("ip", DataType::IP, Vec::new());
    assert!(!h.evaluate("ip"));
}

#[test]
fn cartesian_product_over_two_fields() {
    let mut h = Harness::new();
    h.set_field("a", DataType::UINT, uints(&[1, 2, 3]));
    h.set_field("b", DataType::UINT, uints(&[10, 20]));
    // Only the pair (3, 20) sums to 23.
    assert!(h.evaluate("a + b == 23"));
    assert!(!h.evaluate("a + b == 24"));
}

// ---------------------------------------------------------------------------
// Arithmetic and constants
// ---------------------------------------------------------------------------

#[test]
fn literal_arithmetic() {
    let h = Harness::new();
    assert!(h.evaluate("10 + 20 == 30"));
    assert!(h.evaluate("(10 * 20) + 30 > 100"));
}

#[test]
fn resolver_constants_behave_like_literals() {
    let mut h = Harness::new();
    h.set_const("a", Value::UInt(10));
    h.set_const("b", Value::UInt(20));
    h.set_field("c", DataType::UINT, uints(&[30]));

    assert!(h.evaluate("a + b == c"));
    assert!(h.evaluate("(a * b) + c > 100"));
    assert!(h.evaluate("60 * (a * b) + c > 100"));
    assert!(h.evaluate("60 * ((a * b) + c) > 100"));
}

#[test]
fn all_constant_expression_folds_to_a_constant_program() {
    let mut h = Harness::new();
    h.set_const("a", Value::UInt(10));
    h.set_const("b", Value::UInt(20));
    h.set_const("c", Value::UInt(30));

    let filter = h.compile("a + b == c");
    let ast = filter.ast().unwrap();
    assert_eq!(ast.display(ast.root()).to_string(), "true");
    assert!(h.evaluate("a + b == c"));
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

#[test]
fn membership_in_literal_lists() {
    let mut h = Harness::new();
    h.set_const("a", Value::UInt(10));
    h.set_const("b", Value::UInt(20));
    h.set_field("c", DataType::UINT, uints(&[30]));

    assert!(h.evaluate("10 in [10, 20, 30]"));
    assert!(h.evaluate("10 in [20, 10, 30]"));
    assert!(h.evaluate("10 in [20, 30, 10]"));
    assert!(h.evaluate("10 in [a, b]"));
    assert!(h.evaluate("127.0.0.1 in [192.168.0.1, 127.0.0.1]"));

    // A record field cannot appear in a list literal.
    let filter = h.try_compile("10 in [a, b, c]").unwrap_err();
    assert_eq!(filter.diagnostics()[0].code, DiagCode::List);
}

#[test]
fn empty_list_membership_is_false() {
    let h = Harness::new();
    let mut filter = h.compile("10 in []");
    assert!(!filter.evaluate(&mut Record::over(&h)));
}

// ---------------------------------------------------------------------------
// Multi-word identifiers
// ---------------------------------------------------------------------------

#[test]
fn identifiers_with_spaces_resolve() {
    let mut h = Harness::new();
    h.set_field("src ip", DataType::IP, ips(&["127.0.0.1"]));

    assert!(h.evaluate("src ip 127.0.0.1"));
    assert!(h.evaluate("not src ip 127.0.0.2"));
}

// ---------------------------------------------------------------------------
// IP semantics
// ---------------------------------------------------------------------------

#[test]
fn ipv4_prefix_matching() {
    let mut h = Harness::new();
    h.set_field("ip", DataType::IP, vec![ip("192.168.0.1")]);
    assert!(h.evaluate("ip 192.168.0.0/24"));
    assert!(!h.evaluate("ip 192.168.1.0/24"));
}

#[test]
fn ipv4_prefix_containment() {
    let h = Harness::new();
    assert!(h.evaluate("192.168.0.7 in 192.168.0.0/24"));
    assert!(!h.evaluate("192.168.1.7 in 192.168.0.0/24"));
}

#[test]
fn ipv6_literal_forms_compile() {
    let h = Harness::new();
    for expr in ["::1", "1::", "aabb:ccdd::", "f::f", "f::1:2:3:4:56", "1:2:3:4::/64", "::f/120"] {
        h.compile(expr);
    }

    let filter = h.try_compile("f::a::f").unwrap_err();
    assert_eq!(filter.diagnostics()[0].code, DiagCode::Lex);
}

#[test]
fn ipv6_field_matching() {
    let mut h = Harness::new();
    h.set_field(
        "ip",
        DataType::IP,
        ips(&[
            "aabb:ccdd::",
            "1122:3344:5500::",
            "ffff:ffff:ff00::",
        ]),
    );
    assert!(h.evaluate("ip aabb:ccdd::"));
    assert!(h.evaluate("not ip 0011:2233:4455:6677:8899:aabb:ccdd:eeff"));
}

#[test]
fn mixed_version_equality_is_false_not_an_error() {
    let mut h = Harness::new();
    h.set_field("ip", DataType::IP, ips(&["::1"]));
    assert!(!h.evaluate("ip == 127.0.0.1"));
    assert!(h.evaluate("ip != 127.0.0.1"));
}

// ---------------------------------------------------------------------------
// Trie-compiled IP lists
// ---------------------------------------------------------------------------

#[test]
fn constant_ip_list_lookup_compiles_to_a_trie() {
    let h = Harness::new();
    let mut filter =
        h.compile("127.0.0.1 in [127.0.0.1, 127.0.0.2, 192.168.1.21, 1.1.1.1, 8.8.8.8, 4.4.4.4]");
    assert!(filter.evaluate(&mut Record::over(&h)));
    // The literal list was rebuilt into a trie artifact at compile time.
    let ast = filter.ast().unwrap();
    assert!(ast
        .nodes()
        .any(|n| n.ty == DataType::custom(TRIE_TYPE_ID)));
}

#[test]
fn ip_field_against_mixed_version_trie_list() {
    let mut h = Harness::new();
    h.set_field(
        "ip",
        DataType::IP,
        ips(&[
            "aabb:ccdd::",
            "1122:3344:5500::",
            "ffff:ffff:ff00::",
        ]),
    );

    assert!(!h.evaluate(
        "ip in [127.0.0.1, 192.168.1.25, 85.132.197.60, 1.1.1.1, 8.8.8.8, 4.4.4.4, 11:2233:4455::]"
    ));
    assert!(h.evaluate(
        "ip in [127.0.0.1, 192.168.1.25, aabb:ccdd::, 85.132.197.60, 1.1.1.1, 8.8.8.8, 4.4.4.4, 11:2233:4455::]"
    ));
}

// ---------------------------------------------------------------------------
// Strings and other operators
// ---------------------------------------------------------------------------

#[test]
fn string_operations() {
    let mut h = Harness::new();
    h.set_field("iface", DataType::STR, vec![Value::str("eth0")]);
    assert!(h.evaluate("iface == \"eth0\""));
    assert!(h.evaluate("iface contains \"th\""));
    assert!(!h.evaluate("iface contains \"wlan\""));
    assert!(h.evaluate("iface + \"x\" == \"eth0x\""));
}

#[test]
fn flags_mask_matching() {
    let mut h = Harness::new();
    // TCP SYN|ACK.
    h.set_field("flags", DataType::FLAGS, vec![Value::Flags(0b010010)]);
    assert!(h.evaluate("flags 2"));
    assert!(h.evaluate("flags 18"));
    assert!(!h.evaluate("flags 1"));
    assert!(h.evaluate("flags == 18"));
}

#[test]
fn symbolic_operator_aliases() {
    let mut h = Harness::new();
    h.set_field("port", DataType::UINT, uints(&[80, 443]));
    assert!(h.evaluate("port == 80 && port == 443"));
    assert!(h.evaluate("port == 80 || port == 8080"));
    assert!(h.evaluate("!(port == 8080)"));
}

// ---------------------------------------------------------------------------
// Operator extensions
// ---------------------------------------------------------------------------

fn contains_ci(l: &Value, r: &Value) -> Result<Value, OpError> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => {
            Ok(Value::Bool(a.to_lowercase().contains(&b.to_lowercase())))
        }
        _ => Err(OpError::TypeMismatch),
    }
}

#[test]
fn user_extensions_shadow_builtins() {
    let h = Harness::new();

    // Byte-exact by default.
    assert!(!h.evaluate("\"FLOW\" contains \"low\""));

    let mut filter = Filter::new();
    filter.extend_ops([OpEntry::Binary {
        op: BinaryOp::Contains,
        lhs: DataType::STR,
        rhs: DataType::STR,
        result: DataType::BOOL,
        apply: contains_ci,
    }]);
    filter.compile("\"FLOW\" contains \"low\"", &h).unwrap();
    assert!(filter.evaluate(&mut Record::over(&h)));
}

// ---------------------------------------------------------------------------
// Round-trip law: a single-valued field behaves like its literal
// ---------------------------------------------------------------------------

#[test]
fn field_value_and_literal_text_agree() {
    let cases: &[(DataType, Value, &str)] = &[
        (DataType::UINT, Value::UInt(443), "443"),
        (DataType::STR, Value::str("eth0"), "\"eth0\""),
        (DataType::IP, ip("10.0.0.1"), "10.0.0.1"),
        (
            DataType::MAC,
            Value::Mac("aa:bb:cc:dd:ee:ff".parse().unwrap()),
            "aa:bb:cc:dd:ee:ff",
        ),
    ];
    for (ty, value, literal) in cases {
        let mut h = Harness::new();
        h.set_field("x", *ty, vec![value.clone()]);
        let with_field = h.evaluate(&format!("x == {literal}"));
        let with_literal = h.evaluate(&format!("{literal} == {literal}"));
        assert_eq!(with_field, with_literal, "{literal}");
        assert!(with_field, "{literal}");
    }
}
