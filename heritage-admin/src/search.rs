//! Query-string driven filtering shared by every admin listing.
//!
//! A request such as `?city=plata&opening_year__ge=1900&order_by=site_name&sorted_by=desc`
//! is parsed into a [`SearchQuery`]; each entity describes its filterable columns
//! through [`Searchable`] and [`build_query`] folds the conditions into a boxed
//! diesel query. Count queries are built from the same conditions without
//! ordering.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use heritage_shared::errors::{AppError, AppResult};

pub const RESERVED_KEYS: &[&str] = &[
    "q",
    "search_text",
    "date_from",
    "date_to",
    "order_by",
    "sorted_by",
    "page",
    "per_page",
];

const OP_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    ILike,
    StartsWith,
    EndsWith,
    In,
    NotIn,
}

impl FilterOp {
    pub fn is_list(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Lt => "lt",
            FilterOp::Le => "le",
            FilterOp::Gt => "gt",
            FilterOp::Ge => "ge",
            FilterOp::Like => "like",
            FilterOp::ILike => "ilike",
            FilterOp::StartsWith => "startswith",
            FilterOp::EndsWith => "endswith",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Ok(FilterOp::Eq),
            "ne" => Ok(FilterOp::Ne),
            "lt" => Ok(FilterOp::Lt),
            "le" | "lte" => Ok(FilterOp::Le),
            "gt" => Ok(FilterOp::Gt),
            "ge" | "gte" => Ok(FilterOp::Ge),
            "like" => Ok(FilterOp::Like),
            "ilike" => Ok(FilterOp::ILike),
            "startswith" => Ok(FilterOp::StartsWith),
            "endswith" => Ok(FilterOp::EndsWith),
            "in" => Ok(FilterOp::In),
            "not_in" | "notin" => Ok(FilterOp::NotIn),
            other => Err(format!("unknown filter operator: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Boolean,
    Timestamp,
}

impl ColumnKind {
    pub fn default_op(self) -> FilterOp {
        match self {
            ColumnKind::Text => FilterOp::ILike,
            _ => FilterOp::Eq,
        }
    }

    pub fn supports(self, op: FilterOp) -> bool {
        match self {
            ColumnKind::Text => true,
            ColumnKind::Integer => !matches!(
                op,
                FilterOp::Like | FilterOp::ILike | FilterOp::StartsWith | FilterOp::EndsWith
            ),
            ColumnKind::Boolean => matches!(op, FilterOp::Eq | FilterOp::Ne),
            ColumnKind::Timestamp => matches!(
                op,
                FilterOp::Eq | FilterOp::Ne | FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge
            ),
        }
    }
}

/// Typed right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Texts(Vec<String>),
    Integer(i32),
    Integers(Vec<i32>),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Option<FilterOp>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("desc") => Direction::Desc,
            _ => Direction::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
    pub order_by: Option<String>,
    pub direction: Direction,
}

impl SearchQuery {
    /// Parses raw query-string pairs. Empty values are skipped and unknown
    /// operator suffixes leave the whole key as the field name.
    pub fn from_params<'a, I>(params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut search = SearchQuery::default();
        let mut sorted_by = None;

        for (key, value) in params {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "q" | "search_text" => search.text = Some(value.to_string()),
                "date_from" => search.date_from = parse_date(value, false),
                "date_to" => search.date_to = parse_date(value, true),
                "order_by" => search.order_by = Some(value.to_string()),
                "sorted_by" => sorted_by = Some(value.to_string()),
                k if RESERVED_KEYS.contains(&k) => {}
                _ => search.conditions.push(parse_condition(key, value)),
            }
        }

        search.direction = Direction::parse(sorted_by.as_deref());
        search
    }

    pub fn condition(&self, field: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.field == field)
    }

    /// Removes a condition and returns its raw value.
    pub fn take(&mut self, field: &str) -> Option<String> {
        let idx = self.conditions.iter().position(|c| c.field == field)?;
        Some(self.conditions.remove(idx).value)
    }

    pub fn push(&mut self, field: &str, op: Option<FilterOp>, value: impl Into<String>) {
        self.conditions.push(Condition {
            field: field.to_string(),
            op,
            value: value.into(),
        });
    }
}

fn parse_condition(key: &str, value: &str) -> Condition {
    if let Some((field, op)) = key.rsplit_once(OP_SEPARATOR) {
        if let Ok(op) = op.parse::<FilterOp>() {
            return Condition {
                field: field.to_string(),
                op: Some(op),
                value: value.to_string(),
            };
        }
    }
    Condition {
        field: key.to_string(),
        op: None,
        value: value.to_string(),
    }
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`. A bare date expands to the
/// start of the day, or to 23:59:59 when `end_of_day` is set.
pub fn parse_date(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.and_utc());
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)?
    };
    Some(date.and_time(time).and_utc())
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Comma-separated integer list; blanks are skipped.
pub fn parse_id_list(value: &str) -> AppResult<Vec<i32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i32>()
                .map_err(|_| AppError::validation(format!("'{s}' is not a valid id")))
        })
        .collect()
}

pub fn parse_value(field: &str, kind: ColumnKind, op: FilterOp, raw: &str) -> AppResult<FilterValue> {
    let invalid = || AppError::validation(format!("invalid value '{raw}' for {field}"));

    if op.is_list() {
        let items = raw.split(',').map(str::trim).filter(|s| !s.is_empty());
        return match kind {
            ColumnKind::Text => Ok(FilterValue::Texts(items.map(String::from).collect())),
            ColumnKind::Integer => items
                .map(|s| s.parse::<i32>().map_err(|_| invalid()))
                .collect::<AppResult<Vec<_>>>()
                .map(FilterValue::Integers),
            ColumnKind::Boolean | ColumnKind::Timestamp => Err(invalid()),
        };
    }

    match kind {
        ColumnKind::Text => Ok(FilterValue::Text(raw.to_string())),
        ColumnKind::Integer => raw.trim().parse::<i32>().map(FilterValue::Integer).map_err(|_| invalid()),
        ColumnKind::Boolean => parse_bool(raw).map(FilterValue::Boolean).ok_or_else(invalid),
        ColumnKind::Timestamp => parse_date(raw, matches!(op, FilterOp::Le | FilterOp::Lt))
            .map(FilterValue::Timestamp)
            .ok_or_else(invalid),
    }
}

/// Escapes LIKE wildcards and wraps the value.
pub fn like_pattern(value: &str, leading: bool, trailing: bool) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    if leading {
        escaped.push('%');
    }
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    if trailing {
        escaped.push('%');
    }
    escaped
}

pub trait Searchable {
    type Query;

    /// Filterable columns and their kinds.
    fn fields() -> &'static [(&'static str, ColumnKind)];

    fn apply_filter(query: Self::Query, field: &str, op: FilterOp, value: FilterValue) -> Self::Query;

    fn apply_text(query: Self::Query, text: &str) -> Self::Query;

    fn apply_dates(
        query: Self::Query,
        _from: Option<DateTime<Utc>>,
        _to: Option<DateTime<Utc>>,
    ) -> Self::Query {
        query
    }

    /// `field` is whatever the client asked for; unknown names keep the default order.
    fn apply_order(query: Self::Query, field: Option<&str>, direction: Direction) -> Self::Query;
}

pub fn build_query<S: Searchable>(mut query: S::Query, search: &SearchQuery) -> AppResult<S::Query> {
    for condition in &search.conditions {
        let Some(kind) = S::fields()
            .iter()
            .find(|(name, _)| *name == condition.field)
            .map(|(_, kind)| *kind)
        else {
            continue;
        };

        let op = condition.op.unwrap_or_else(|| kind.default_op());
        if !kind.supports(op) {
            return Err(AppError::validation(format!(
                "operator '{op}' is not supported for {}",
                condition.field
            )));
        }
        let value = parse_value(&condition.field, kind, op, &condition.value)?;
        query = S::apply_filter(query, &condition.field, op, value);
    }

    if let Some(text) = search.text.as_deref() {
        query = S::apply_text(query, text);
    }
    if search.date_from.is_some() || search.date_to.is_some() {
        query = S::apply_dates(query, search.date_from, search.date_to);
    }
    Ok(query)
}

pub fn apply_ordering<S: Searchable>(query: S::Query, search: &SearchQuery) -> S::Query {
    S::apply_order(query, search.order_by.as_deref(), search.direction)
}

macro_rules! text_condition {
    ($query:ident, $column:expr, $op:expr, $value:expr) => {{
        #[allow(unused_imports)]
        use diesel::prelude::*;
        use $crate::search::{like_pattern, FilterOp, FilterValue};
        match ($op, $value) {
            (FilterOp::Eq, FilterValue::Text(v)) => $query.filter($column.eq(v)),
            (FilterOp::Ne, FilterValue::Text(v)) => $query.filter($column.ne(v)),
            (FilterOp::Lt, FilterValue::Text(v)) => $query.filter($column.lt(v)),
            (FilterOp::Le, FilterValue::Text(v)) => $query.filter($column.le(v)),
            (FilterOp::Gt, FilterValue::Text(v)) => $query.filter($column.gt(v)),
            (FilterOp::Ge, FilterValue::Text(v)) => $query.filter($column.ge(v)),
            (FilterOp::Like, FilterValue::Text(v)) => $query.filter($column.like(like_pattern(&v, true, true))),
            (FilterOp::ILike, FilterValue::Text(v)) => $query.filter($column.ilike(like_pattern(&v, true, true))),
            (FilterOp::StartsWith, FilterValue::Text(v)) => $query.filter($column.ilike(like_pattern(&v, false, true))),
            (FilterOp::EndsWith, FilterValue::Text(v)) => $query.filter($column.ilike(like_pattern(&v, true, false))),
            (FilterOp::In, FilterValue::Texts(v)) => $query.filter($column.eq_any(v)),
            (FilterOp::NotIn, FilterValue::Texts(v)) => $query.filter($column.ne_all(v)),
            _ => $query,
        }
    }};
}

macro_rules! integer_condition {
    ($query:ident, $column:expr, $op:expr, $value:expr) => {{
        #[allow(unused_imports)]
        use diesel::prelude::*;
        use $crate::search::{FilterOp, FilterValue};
        match ($op, $value) {
            (FilterOp::Eq, FilterValue::Integer(v)) => $query.filter($column.eq(v)),
            (FilterOp::Ne, FilterValue::Integer(v)) => $query.filter($column.ne(v)),
            (FilterOp::Lt, FilterValue::Integer(v)) => $query.filter($column.lt(v)),
            (FilterOp::Le, FilterValue::Integer(v)) => $query.filter($column.le(v)),
            (FilterOp::Gt, FilterValue::Integer(v)) => $query.filter($column.gt(v)),
            (FilterOp::Ge, FilterValue::Integer(v)) => $query.filter($column.ge(v)),
            (FilterOp::In, FilterValue::Integers(v)) => $query.filter($column.eq_any(v)),
            (FilterOp::NotIn, FilterValue::Integers(v)) => $query.filter($column.ne_all(v)),
            _ => $query,
        }
    }};
}

macro_rules! bool_condition {
    ($query:ident, $column:expr, $op:expr, $value:expr) => {{
        #[allow(unused_imports)]
        use diesel::prelude::*;
        use $crate::search::{FilterOp, FilterValue};
        match ($op, $value) {
            (FilterOp::Eq, FilterValue::Boolean(v)) => $query.filter($column.eq(v)),
            (FilterOp::Ne, FilterValue::Boolean(v)) => $query.filter($column.ne(v)),
            _ => $query,
        }
    }};
}

macro_rules! timestamp_condition {
    ($query:ident, $column:expr, $op:expr, $value:expr) => {{
        #[allow(unused_imports)]
        use diesel::prelude::*;
        use $crate::search::{FilterOp, FilterValue};
        match ($op, $value) {
            (FilterOp::Eq, FilterValue::Timestamp(v)) => $query.filter($column.eq(v)),
            (FilterOp::Ne, FilterValue::Timestamp(v)) => $query.filter($column.ne(v)),
            (FilterOp::Lt, FilterValue::Timestamp(v)) => $query.filter($column.lt(v)),
            (FilterOp::Le, FilterValue::Timestamp(v)) => $query.filter($column.le(v)),
            (FilterOp::Gt, FilterValue::Timestamp(v)) => $query.filter($column.gt(v)),
            (FilterOp::Ge, FilterValue::Timestamp(v)) => $query.filter($column.ge(v)),
            _ => $query,
        }
    }};
}

/// Orders by one column and breaks ties on the primary key.
macro_rules! order_by_column {
    ($query:ident, $column:expr, $id:expr, $direction:expr) => {{
        #[allow(unused_imports)]
        use diesel::prelude::*;
        match $direction {
            $crate::search::Direction::Asc => $query.order($column.asc()).then_order_by($id.asc()),
            $crate::search::Direction::Desc => $query.order($column.desc()).then_order_by($id.desc()),
        }
    }};
}

pub(crate) use bool_condition;
pub(crate) use integer_condition;
pub(crate) use order_by_column;
pub(crate) use text_condition;
pub(crate) use timestamp_condition;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    /// Records what the builder asked for instead of touching a database.
    struct Recorder;

    impl Searchable for Recorder {
        type Query = Vec<String>;

        fn fields() -> &'static [(&'static str, ColumnKind)] {
            &[
                ("city", ColumnKind::Text),
                ("opening_year", ColumnKind::Integer),
                ("active", ColumnKind::Boolean),
                ("created_at", ColumnKind::Timestamp),
            ]
        }

        fn apply_filter(mut query: Vec<String>, field: &str, op: FilterOp, value: FilterValue) -> Vec<String> {
            query.push(format!("{field} {op} {value:?}"));
            query
        }

        fn apply_text(mut query: Vec<String>, text: &str) -> Vec<String> {
            query.push(format!("text {text}"));
            query
        }

        fn apply_dates(
            mut query: Vec<String>,
            from: Option<DateTime<Utc>>,
            to: Option<DateTime<Utc>>,
        ) -> Vec<String> {
            query.push(format!("dates {} {}", from.is_some(), to.is_some()));
            query
        }

        fn apply_order(mut query: Vec<String>, field: Option<&str>, direction: Direction) -> Vec<String> {
            query.push(format!("order {} {}", field.unwrap_or("default"), direction.as_str()));
            query
        }
    }

    #[test]
    fn parses_reserved_and_field_keys() {
        let search = SearchQuery::from_params([
            ("q", "casa"),
            ("city", "La Plata"),
            ("opening_year__ge", "1900"),
            ("order_by", "site_name"),
            ("sorted_by", "DESC"),
            ("page", "3"),
            ("province", ""),
        ]);
        assert_eq!(search.text.as_deref(), Some("casa"));
        assert_eq!(search.order_by.as_deref(), Some("site_name"));
        assert_eq!(search.direction, Direction::Desc);
        assert_eq!(search.conditions.len(), 2);
        assert_eq!(search.condition("opening_year").unwrap().op, Some(FilterOp::Ge));
        assert!(search.condition("province").is_none());
    }

    #[test]
    fn unknown_operator_suffix_stays_in_field_name() {
        let search = SearchQuery::from_params([("city__around", "x")]);
        assert_eq!(search.conditions[0].field, "city__around");
        assert_eq!(search.conditions[0].op, None);
    }

    #[test]
    fn date_bounds_cover_whole_day() {
        let start = parse_date("2024-03-10", false).unwrap();
        let end = parse_date("2024-03-10", true).unwrap();
        assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));
        assert_eq!(end.day(), 10);

        let exact = parse_date("2024-03-10 14:30:00", true).unwrap();
        assert_eq!(exact.hour(), 14);
        assert!(parse_date("10/03/2024", false).is_none());
    }

    #[test]
    fn unparsable_dates_are_ignored() {
        let search = SearchQuery::from_params([("date_from", "yesterday")]);
        assert!(search.date_from.is_none());
    }

    #[test]
    fn default_operators_follow_column_kind() {
        let search = SearchQuery::from_params([("city", "plata"), ("active", "true")]);
        let query = build_query::<Recorder>(Vec::new(), &search).unwrap();
        assert_eq!(query[0], "city ilike Text(\"plata\")");
        assert_eq!(query[1], "active eq Boolean(true)");
    }

    #[test]
    fn unknown_columns_are_ignored() {
        let search = SearchQuery::from_params([("password_hash", "x")]);
        assert!(build_query::<Recorder>(Vec::new(), &search).unwrap().is_empty());
    }

    #[test]
    fn bad_values_are_validation_errors() {
        let search = SearchQuery::from_params([("opening_year", "nineteen")]);
        let err = build_query::<Recorder>(Vec::new(), &search).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);

        let search = SearchQuery::from_params([("active__gt", "true")]);
        assert!(build_query::<Recorder>(Vec::new(), &search).is_err());
    }

    #[test]
    fn timestamp_columns_take_dates() {
        let search = SearchQuery::from_params([("created_at__le", "2024-03-10"), ("created_at__gt", "2024-01-01 08:00:00")]);
        let query = build_query::<Recorder>(Vec::new(), &search).unwrap();
        assert_eq!(query.len(), 2);
        assert!(query[0].starts_with("created_at le Timestamp(2024-03-10T23:59:59"));
        assert!(query[1].starts_with("created_at gt Timestamp(2024-01-01T08:00:00"));

        let search = SearchQuery::from_params([("created_at__ilike", "2024")]);
        assert!(build_query::<Recorder>(Vec::new(), &search).is_err());
        let search = SearchQuery::from_params([("created_at", "last week")]);
        assert!(build_query::<Recorder>(Vec::new(), &search).is_err());
    }

    #[test]
    fn list_operators_split_on_commas() {
        let search = SearchQuery::from_params([("opening_year__in", "1890, 1950,")]);
        let query = build_query::<Recorder>(Vec::new(), &search).unwrap();
        assert_eq!(query[0], "opening_year in Integers([1890, 1950])");
    }

    #[test]
    fn text_and_dates_are_applied_after_conditions() {
        let search = SearchQuery::from_params([("date_to", "2024-01-31"), ("search_text", "museo")]);
        let query = build_query::<Recorder>(Vec::new(), &search).unwrap();
        assert_eq!(query, vec!["text museo".to_string(), "dates false true".to_string()]);

        let ordered = apply_ordering::<Recorder>(Vec::new(), &search);
        assert_eq!(ordered, vec!["order default asc".to_string()]);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off", true, true), "%50\\%\\_off%");
        assert_eq!(like_pattern("abc", false, true), "abc%");
    }

    #[test]
    fn id_lists_reject_garbage() {
        assert_eq!(parse_id_list("1,2, 3").unwrap(), vec![1, 2, 3]);
        assert!(parse_id_list("1,x").is_err());
    }
}
