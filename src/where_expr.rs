//! Purpose: Textual row predicates and computed updates written as jq expressions.
//! Exports: `WherePredicate`, `WhereClause`, `ExprUpdate`, `compile_where_clause`.
//! Role: Lets callers without a Rust closure (the CLI, config-driven tools) select and rewrite rows.
//! Invariants: Each row is presented to jq as one object keyed by column name.
//! Invariants: Compile failures are usage errors; predicate runtime errors count as "no match".
//! Invariants: Integers stay integers through `+ - * %` and exact division.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::ops::Math;
use jaq_core::path::Opt;
use jaq_core::{Compiler, Ctx, Error as JaqError, Native, RcIter, ValX};

use crate::core::error::{Error, ErrorKind};
use crate::core::row::RowView;
use crate::core::table::{Compute, Predicate};
use crate::core::value::Value;

type Filter = jaq_core::Filter<Native<ExprValue>>;

/// One compiled boolean expression, e.g. `.Age > 30`.
#[derive(Clone)]
pub struct WherePredicate {
    expr: String,
    filter: Filter,
}

impl fmt::Debug for WherePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WherePredicate")
            .field("expr", &self.expr)
            .finish()
    }
}

impl WherePredicate {
    pub fn compile(expr: &str) -> Result<Self, Error> {
        Ok(Self {
            expr: expr.to_string(),
            filter: compile_filter(expr)?,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// True if any output is `true`. A runtime error (e.g. comparing a string
    /// with a number in arithmetic) is `false`; a non-boolean output is a
    /// usage error.
    pub fn evaluate(&self, row: &RowView<'_>) -> Result<bool, Error> {
        let inputs = RcIter::new(std::iter::empty::<Result<ExprValue, String>>());
        let out = self
            .filter
            .run((Ctx::new([], &inputs), ExprValue::from_row(row)));

        let mut any_true = false;
        for item in out {
            match item {
                Ok(ExprValue::Bool(b)) => any_true |= b,
                Ok(other) => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("where expression must yield booleans")
                        .with_hint(format!(
                            "Expression `{}` yielded non-boolean value: {other}",
                            self.expr
                        )));
                }
                Err(_) => return Ok(false),
            }
        }
        Ok(any_true)
    }
}

impl Predicate for WherePredicate {
    fn matches(&self, row: &RowView<'_>) -> bool {
        match self.evaluate(row) {
            Ok(matched) => matched,
            Err(err) => {
                tracing::debug!(expr = %self.expr, error = %err, "where expression treated as no match");
                false
            }
        }
    }
}

/// Conjunction of predicates; an empty clause matches every row.
#[derive(Clone, Debug, Default)]
pub struct WhereClause {
    predicates: Vec<WherePredicate>,
}

impl WhereClause {
    pub fn predicates(&self) -> &[WherePredicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl Predicate for WhereClause {
    fn matches(&self, row: &RowView<'_>) -> bool {
        self.predicates.iter().all(|predicate| predicate.matches(row))
    }
}

pub fn compile_where_clause<S: AsRef<str>>(exprs: &[S]) -> Result<WhereClause, Error> {
    let predicates = exprs
        .iter()
        .map(|expr| WherePredicate::compile(expr.as_ref()))
        .collect::<Result<_, _>>()?;
    Ok(WhereClause { predicates })
}

/// Computed column value, e.g. `.Age + 1`. The first output becomes the
/// cell; no output yields `Null`.
#[derive(Clone)]
pub struct ExprUpdate {
    expr: String,
    filter: Filter,
}

impl fmt::Debug for ExprUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprUpdate").field("expr", &self.expr).finish()
    }
}

impl ExprUpdate {
    pub fn compile(expr: &str) -> Result<Self, Error> {
        Ok(Self {
            expr: expr.to_string(),
            filter: compile_filter(expr)?,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }
}

impl Compute for ExprUpdate {
    fn compute(&self, row: &RowView<'_>) -> Result<Value, Error> {
        let inputs = RcIter::new(std::iter::empty::<Result<ExprValue, String>>());
        let mut out = self
            .filter
            .run((Ctx::new([], &inputs), ExprValue::from_row(row)));
        match out.next() {
            None => Ok(Value::Null),
            Some(Ok(ExprValue::Num(n))) if !n.is_finite() => Err(Error::new(ErrorKind::Usage)
                .with_message("update expression produced a non-finite number")
                .with_hint(format!(
                    "Expression `{}` yielded {n} for row {}",
                    self.expr,
                    row.to_json()
                ))),
            Some(Ok(value)) => Ok(value.into_cell()),
            Some(Err(_)) => Err(Error::new(ErrorKind::Usage)
                .with_message("update expression failed")
                .with_hint(format!(
                    "Expression `{}` raised an error for row {}",
                    self.expr,
                    row.to_json()
                ))),
        }
    }
}

fn compile_filter(expr: &str) -> Result<Filter, Error> {
    let arena = Arena::default();
    let loader = Loader::new(std::iter::empty());
    let program = File {
        code: expr,
        path: (),
    };
    let modules = loader
        .load(&arena, program)
        .map_err(|errs| compile_error(expr, errs))?;

    Compiler::default()
        .with_funs(jaq_std::base_funs::<ExprValue>())
        .compile(modules)
        .map_err(|errs| compile_error(expr, errs))
}

fn compile_error<E: fmt::Debug>(expr: &str, err: E) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("invalid expression")
        .with_hint(format!(
            "Failed to parse/compile `{expr}`.\nDetails: {err:?}\nExample: '.Age > 30 and .Status == \"active\"'"
        ))
}

#[derive(Clone, Debug)]
enum ExprValue {
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    Arr(Vec<ExprValue>),
    Obj(BTreeMap<String, ExprValue>),
}

impl ExprValue {
    fn from_row(row: &RowView<'_>) -> Self {
        Self::Obj(
            row.iter()
                .map(|(name, value)| (name.to_string(), Self::from_cell(value)))
                .collect(),
        )
    }

    fn from_cell(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(n) => Self::Int(*n),
            Value::Float(f) => Self::Num(*f),
            Value::Str(s) => Self::Str(s.clone()),
        }
    }

    fn into_cell(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(n) => Value::Int(n),
            Self::Num(f) => Value::Float(f),
            Self::Str(s) => Value::Str(s),
            other => Value::Str(other.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Num(_) => 2,
            Self::Str(_) => 3,
            Self::Arr(_) => 4,
            Self::Obj(_) => 5,
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral numbers usable as array indices.
    fn integer(&self) -> Option<isize> {
        match self {
            Self::Int(n) => isize::try_from(*n).ok(),
            Self::Num(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as isize),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        self.number() == Some(0.0)
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn arith(
        self,
        op: Math,
        rhs: Self,
        int: fn(i64, i64) -> Option<i64>,
        float: fn(f64, f64) -> f64,
    ) -> Result<Self, JaqError<Self>> {
        if let (Self::Int(a), Self::Int(b)) = (&self, &rhs) {
            if let Some(n) = int(*a, *b) {
                return Ok(Self::Int(n));
            }
        }
        match (self.number(), rhs.number()) {
            (Some(a), Some(b)) => Ok(Self::Num(float(a, b))),
            _ => Err(JaqError::math(self, op, rhs)),
        }
    }
}

fn normalize(idx: isize, len: isize) -> isize {
    if idx < 0 { len + idx } else { idx }
}

fn first_or_null<'a, I>(mut outputs: I) -> ValX<'a, ExprValue>
where
    I: Iterator<Item = ValX<'a, ExprValue>>,
{
    outputs.next().unwrap_or(Ok(ExprValue::Null))
}

impl fmt::Display for ExprValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => match serde_json::to_string(s) {
                Ok(encoded) => write!(f, "{encoded}"),
                Err(_) => write!(f, "\"<invalid string>\""),
            },
            Self::Arr(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Obj(fields) => {
                write!(f, "{{")?;
                for (idx, (k, v)) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    let k = serde_json::to_string(k).unwrap_or_else(|_| "\"<key>\"".to_string());
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for ExprValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<isize> for ExprValue {
    fn from(value: isize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for ExprValue {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<String> for ExprValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl FromIterator<Self> for ExprValue {
    fn from_iter<T: IntoIterator<Item = Self>>(iter: T) -> Self {
        Self::Arr(iter.into_iter().collect())
    }
}

impl PartialEq for ExprValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ExprValue {}

impl PartialOrd for ExprValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExprValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Arr(a), Self::Arr(b)) => a.cmp(b),
            (Self::Obj(a), Self::Obj(b)) => a.cmp(b),
            (a, b) => match (a.number(), b.number()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => Ordering::Equal,
            },
        }
    }
}

impl std::ops::Add for ExprValue {
    type Output = Result<Self, JaqError<Self>>;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Null, other) | (other, Self::Null) => Ok(other),
            (Self::Str(a), Self::Str(b)) => Ok(Self::Str(a + &b)),
            (Self::Arr(mut a), Self::Arr(b)) => {
                a.extend(b);
                Ok(Self::Arr(a))
            }
            (Self::Obj(mut a), Self::Obj(b)) => {
                a.extend(b);
                Ok(Self::Obj(a))
            }
            (l, r) => l.arith(Math::Add, r, i64::checked_add, |a, b| a + b),
        }
    }
}

impl std::ops::Sub for ExprValue {
    type Output = Result<Self, JaqError<Self>>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.arith(Math::Sub, rhs, i64::checked_sub, |a, b| a - b)
    }
}

impl std::ops::Mul for ExprValue {
    type Output = Result<Self, JaqError<Self>>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.arith(Math::Mul, rhs, i64::checked_mul, |a, b| a * b)
    }
}

impl std::ops::Div for ExprValue {
    type Output = Result<Self, JaqError<Self>>;

    fn div(self, rhs: Self) -> Self::Output {
        if rhs.is_zero() {
            return Err(JaqError::math(self, Math::Div, rhs));
        }
        let exact = |a: i64, b: i64| match a.checked_rem(b) {
            Some(0) => a.checked_div(b),
            _ => None,
        };
        self.arith(Math::Div, rhs, exact, |a, b| a / b)
    }
}

impl std::ops::Rem for ExprValue {
    type Output = Result<Self, JaqError<Self>>;

    fn rem(self, rhs: Self) -> Self::Output {
        if rhs.is_zero() {
            return Err(JaqError::math(self, Math::Rem, rhs));
        }
        self.arith(Math::Rem, rhs, i64::checked_rem, |a, b| a % b)
    }
}

impl std::ops::Neg for ExprValue {
    type Output = Result<Self, JaqError<Self>>;

    fn neg(self) -> Self::Output {
        match self {
            Self::Int(n) => Ok(n.checked_neg().map_or(Self::Num(-(n as f64)), Self::Int)),
            Self::Num(n) => Ok(Self::Num(-n)),
            other => Err(JaqError::typ(other, "number")),
        }
    }
}

impl jaq_core::ValT for ExprValue {
    fn from_num(n: &str) -> Result<Self, JaqError<Self>> {
        if let Ok(int) = n.parse::<i64>() {
            return Ok(Self::Int(int));
        }
        n.parse::<f64>().map(Self::Num).map_err(JaqError::str)
    }

    fn from_map<I: IntoIterator<Item = (Self, Self)>>(iter: I) -> Result<Self, JaqError<Self>> {
        let mut map = BTreeMap::new();
        for (k, v) in iter {
            let Some(key) = k.text() else {
                return Err(JaqError::typ(k, "string"));
            };
            map.insert(key.to_string(), v);
        }
        Ok(Self::Obj(map))
    }

    fn values(self) -> Box<dyn Iterator<Item = Result<Self, JaqError<Self>>>> {
        match self {
            Self::Arr(items) => Box::new(items.into_iter().map(Ok)),
            Self::Obj(fields) => Box::new(fields.into_values().map(Ok)),
            other => Box::new(std::iter::once(Err(JaqError::typ(other, "iterable")))),
        }
    }

    /// Missing keys and out-of-range positions read as `null`, as in jq.
    fn index(self, index: &Self) -> Result<Self, JaqError<Self>> {
        match (self, index) {
            (Self::Null, _) => Ok(Self::Null),
            (Self::Obj(mut fields), Self::Str(key)) => Ok(fields.remove(key).unwrap_or(Self::Null)),
            (Self::Arr(items), idx) => {
                let Some(pos) = idx.integer() else {
                    return Err(JaqError::typ(idx.clone(), "integer"));
                };
                let pos = normalize(pos, items.len() as isize);
                Ok(usize::try_from(pos)
                    .ok()
                    .and_then(|pos| items.get(pos).cloned())
                    .unwrap_or(Self::Null))
            }
            (l, r) => Err(JaqError::index(l, r.clone())),
        }
    }

    fn range(self, range: jaq_core::val::Range<&Self>) -> Result<Self, JaqError<Self>> {
        let bound = |v: &Self| -> Result<isize, JaqError<Self>> {
            v.integer()
                .ok_or_else(|| JaqError::typ(v.clone(), "integer"))
        };
        match self {
            Self::Arr(items) => {
                let len = items.len() as isize;
                let start = range.start.map(bound).transpose()?.unwrap_or(0);
                let end = range.end.map(bound).transpose()?.unwrap_or(len);
                let start = normalize(start, len).clamp(0, len) as usize;
                let end = normalize(end, len).clamp(0, len) as usize;
                Ok(Self::Arr(items.get(start..end).map(<[Self]>::to_vec).unwrap_or_default()))
            }
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as isize;
                let start = range.start.map(bound).transpose()?.unwrap_or(0);
                let end = range.end.map(bound).transpose()?.unwrap_or(len);
                let start = normalize(start, len).clamp(0, len) as usize;
                let end = normalize(end, len).clamp(0, len) as usize;
                Ok(Self::Str(
                    chars.get(start..end).map(String::from_iter).unwrap_or_default(),
                ))
            }
            other => Err(JaqError::typ(other, "array")),
        }
    }

    fn map_values<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => items
                .into_iter()
                .map(|item| first_or_null(f(item)))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Arr),
            Self::Obj(fields) => fields
                .into_iter()
                .map(|(k, v)| first_or_null(f(v)).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Obj),
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::typ(other, "iterable").into()),
            },
        }
    }

    fn map_index<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        index: &Self,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Obj(mut fields) => {
                let Some(key) = index.text() else {
                    return Err(JaqError::typ(index.clone(), "string").into());
                };
                let current = fields.remove(key).unwrap_or(Self::Null);
                let next = first_or_null(f(current))?;
                fields.insert(key.to_string(), next);
                Ok(Self::Obj(fields))
            }
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::index(other, index.clone()).into()),
            },
        }
    }

    fn map_range<'a, I: Iterator<Item = ValX<'a, Self>>>(
        self,
        range: jaq_core::val::Range<&Self>,
        opt: Opt,
        f: impl Fn(Self) -> I,
    ) -> ValX<'a, Self> {
        match self {
            Self::Arr(items) => {
                let slice = Self::Arr(items).range(range)?;
                first_or_null(f(slice))
            }
            other => match opt {
                Opt::Optional => Ok(other),
                Opt::Essential => Err(JaqError::typ(other, "array").into()),
            },
        }
    }

    fn as_bool(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    fn as_str(&self) -> Option<&str> {
        self.text()
    }
}

impl jaq_std::ValT for ExprValue {
    fn into_seq<S: FromIterator<Self>>(self) -> Result<S, Self> {
        match self {
            Self::Arr(items) => Ok(items.into_iter().collect()),
            other => Err(other),
        }
    }

    fn as_isize(&self) -> Option<isize> {
        self.integer()
    }

    fn as_f64(&self) -> Result<f64, JaqError<Self>> {
        self.number()
            .ok_or_else(|| JaqError::typ(self.clone(), "number"))
    }
}

#[cfg(test)]
mod tests {
    use super::{ExprUpdate, WherePredicate, compile_where_clause};
    use crate::core::error::ErrorKind;
    use crate::core::row::RowView;
    use crate::core::table::{Compute, Predicate};
    use crate::core::value::Value;

    fn sample() -> (Vec<String>, Vec<Value>) {
        (
            vec!["ID".to_string(), "Age".to_string(), "Name".to_string()],
            vec![Value::Int(2), Value::Int(35), Value::from("Bob")],
        )
    }

    #[test]
    fn where_matches_numeric_comparison() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        let pred = WherePredicate::compile(".Age > 30").unwrap();
        assert!(pred.matches(&row));
        let pred = WherePredicate::compile(".Age > 30.5 and .Name == \"Ann\"").unwrap();
        assert!(!pred.matches(&row));
    }

    #[test]
    fn int_and_float_compare_equal() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        assert!(WherePredicate::compile(".Age == 35.0").unwrap().matches(&row));
    }

    #[test]
    fn missing_column_is_null() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        assert!(!WherePredicate::compile(".Missing == 1").unwrap().matches(&row));
        let update = ExprUpdate::compile(".Missing").unwrap();
        assert_eq!(update.compute(&row).unwrap(), Value::Null);
    }

    #[test]
    fn non_boolean_output_is_usage_error_and_no_match() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        let pred = WherePredicate::compile(".Name").unwrap();
        let err = pred.evaluate(&row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(!pred.matches(&row));
    }

    #[test]
    fn runtime_error_is_false() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        let pred = WherePredicate::compile(".Name - 1 > 0").unwrap();
        assert!(!pred.evaluate(&row).unwrap());
    }

    #[test]
    fn invalid_expression_is_usage_error() {
        let err = WherePredicate::compile(".Age >").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.hint().is_some());
    }

    #[test]
    fn clause_is_conjunction() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        let clause = compile_where_clause(&[".Age > 30", ".ID == 2"]).unwrap();
        assert!(clause.matches(&row));
        let clause = compile_where_clause(&[".Age > 30", ".ID == 1"]).unwrap();
        assert!(!clause.matches(&row));
        let empty = compile_where_clause::<&str>(&[]).unwrap();
        assert!(empty.is_empty());
        assert!(empty.matches(&row));
    }

    #[test]
    fn update_expression_keeps_integers() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        let update = ExprUpdate::compile(".Age + 1").unwrap();
        assert_eq!(update.compute(&row).unwrap(), Value::Int(36));
        let update = ExprUpdate::compile(".Age / 2").unwrap();
        assert_eq!(update.compute(&row).unwrap(), Value::Float(17.5));
        let update = ExprUpdate::compile(".Name + \"!\"").unwrap();
        assert_eq!(update.compute(&row).unwrap(), Value::from("Bob!"));
    }

    #[test]
    fn update_expression_error_is_usage() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        let update = ExprUpdate::compile(".Name * .Age").unwrap();
        let err = update.compute(&row).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let (columns, values) = sample();
        let row = RowView::new(&columns, &values);
        for expr in [".Age / 0", ".Age % 0", ".Age / 0.0", "(.Age + 0.5) / 0"] {
            let update = ExprUpdate::compile(expr).unwrap();
            let err = update.compute(&row).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage, "{expr}");
        }
        assert!(!WherePredicate::compile(".Age / 0 > 1").unwrap().matches(&row));
    }
}
