//! Declarative query criteria compiled to SQL against a mapper's table.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::fieldset::ID_FIELD;
use crate::{DataMapper, ModelError, Params, ValidationError, Value};

/// Comparison operator of a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    Like,
    In,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Lte => "<=",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

/// Right-hand side of a criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Bound as a named parameter.
    Bound(Value),
    /// Rendered inline; already quoted.
    Inline(String),
    /// Could not be rendered; compiling the filter fails with this code.
    Rejected(ValidationError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Point-in-time copy of a filter's state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSnapshot {
    pub criteria: Vec<Criterion>,
    pub order_by: Vec<(String, Order)>,
    pub offset: u64,
    /// Zero when no limit was set.
    pub limit: u64,
}

/// Fluent builder for `find`/`count` criteria.
///
/// Criteria are ANDed together. Setting the same operator on a field twice
/// replaces the first value; different operators on one field coexist, which
/// is how [`Filter::between`] works.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    state: FilterSnapshot,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(mut self) -> Self {
        self.state = FilterSnapshot::default();
        self
    }

    pub fn equals(self, field: &str, value: impl Into<Value>) -> Self {
        self.bound(field, Operator::Eq, value.into())
    }

    pub fn not_equals(self, field: &str, value: impl Into<Value>) -> Self {
        self.bound(field, Operator::NotEq, value.into())
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.bound(field, Operator::Lt, value.into())
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.bound(field, Operator::Gt, value.into())
    }

    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.bound(field, Operator::Lte, value.into())
    }

    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.bound(field, Operator::Gte, value.into())
    }

    pub fn like(self, field: &str, pattern: impl Into<Value>) -> Self {
        self.bound(field, Operator::Like, pattern.into())
    }

    /// Inclusive range: `field >= low AND field <= high`.
    pub fn between(self, field: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.gte(field, low).lte(field, high)
    }

    /// `field IN (...)`, quoting values unless they are all numeric.
    pub fn r#in<V: Into<Value>>(self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.in_values(field, values, None)
    }

    /// `field IN (...)` with explicit control over quoting.
    ///
    /// `Some(false)` quotes every value; `Some(true)` leaves numeric values
    /// bare. Non-numeric values are always quoted and escaped. NaN and
    /// infinite floats have no SQL literal and fail compilation.
    pub fn in_values<V: Into<Value>>(
        self,
        field: &str,
        values: impl IntoIterator<Item = V>,
        numeric: Option<bool>,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values
            .iter()
            .any(|value| matches!(value, Value::Float(n) if !n.is_finite()))
        {
            return self.criterion(
                field,
                Operator::In,
                Operand::Rejected(ValidationError::Type),
            );
        }
        let numeric = numeric.unwrap_or_else(|| values.iter().all(Value::is_numeric));
        let rendered = if values.is_empty() {
            "NULL".to_string()
        } else {
            values
                .iter()
                .map(|value| {
                    if numeric && value.is_numeric() {
                        value.to_text().trim().to_string()
                    } else {
                        quote(&value.to_text())
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        };
        self.criterion(field, Operator::In, Operand::Inline(rendered))
    }

    /// Add a sort key. Re-ordering by the same field replaces its direction
    /// in place.
    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        let field = field.trim();
        match self.state.order_by.iter_mut().find(|(f, _)| f == field) {
            Some(entry) => entry.1 = order,
            None => self.state.order_by.push((field.to_string(), order)),
        }
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.state.offset = offset;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = limit;
        self
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        self.state.clone()
    }

    fn bound(self, field: &str, operator: Operator, value: Value) -> Self {
        self.criterion(field, operator, Operand::Bound(value))
    }

    fn criterion(mut self, field: &str, operator: Operator, operand: Operand) -> Self {
        let field = field.trim();
        let existing = self
            .state
            .criteria
            .iter_mut()
            .find(|c| c.field == field && c.operator == operator);
        match existing {
            Some(criterion) => criterion.operand = operand,
            None => self.state.criteria.push(Criterion {
                field: field.to_string(),
                operator,
                operand,
            }),
        }
        self
    }

    /// `SELECT` of matching ids with ordering and paging.
    ///
    /// Without an explicit order the query sorts by id ascending; without a
    /// limit `default_limit` applies.
    pub fn compile_select(
        &self,
        mapper: &dyn DataMapper,
        default_limit: u64,
    ) -> Result<CompiledQuery, ModelError> {
        let table = Table::of(mapper)?;
        let (where_clause, mut params) = self.where_clause(mapper, &table)?;

        let default_order = [(ID_FIELD.to_string(), Order::Asc)];
        let order_by = if self.state.order_by.is_empty() {
            &default_order[..]
        } else {
            &self.state.order_by[..]
        };
        let order = order_by
            .iter()
            .map(|(field, order)| {
                Ok(format!(
                    "{}.`{}` {}",
                    table.alias,
                    mapper.column(field)?,
                    order.as_sql()
                ))
            })
            .collect::<Result<Vec<_>, ModelError>>()?
            .join(", ");

        let limit = if self.state.limit == 0 {
            default_limit
        } else {
            self.state.limit
        };
        params.insert("offset".to_string(), Value::from(self.state.offset));
        params.insert("limit".to_string(), Value::from(limit));

        let mut sql = format!(
            "SELECT {alias}.`{id}`\nFROM `{name}` AS {alias}",
            alias = table.alias,
            id = table.id_column,
            name = table.name
        );
        if let Some(where_clause) = where_clause {
            sql.push('\n');
            sql.push_str(&where_clause);
        }
        sql.push_str(&format!("\nORDER BY {order}\nLIMIT :offset, :limit"));

        Ok(CompiledQuery {
            sql,
            params: Params::Named(params),
        })
    }

    /// `SELECT COUNT` of matching rows. Order, offset and limit are ignored.
    pub fn compile_count(&self, mapper: &dyn DataMapper) -> Result<CompiledQuery, ModelError> {
        let table = Table::of(mapper)?;
        let (where_clause, params) = self.where_clause(mapper, &table)?;

        let mut sql = format!(
            "SELECT COUNT({alias}.`{id}`)\nFROM `{name}` AS {alias}",
            alias = table.alias,
            id = table.id_column,
            name = table.name
        );
        if let Some(where_clause) = where_clause {
            sql.push('\n');
            sql.push_str(&where_clause);
        }

        Ok(CompiledQuery {
            sql,
            params: Params::Named(params),
        })
    }

    fn where_clause(
        &self,
        mapper: &dyn DataMapper,
        table: &Table,
    ) -> Result<(Option<String>, IndexMap<String, Value>), ModelError> {
        let mut params = IndexMap::new();
        if self.state.criteria.is_empty() {
            return Ok((None, params));
        }

        // paging parameters own these names
        let mut used: HashMap<String, usize> =
            HashMap::from([("offset".to_string(), 1), ("limit".to_string(), 1)]);

        let mut conditions = Vec::with_capacity(self.state.criteria.len());
        for criterion in &self.state.criteria {
            let column = mapper.column(&criterion.field)?;
            let operand = match &criterion.operand {
                Operand::Inline(rendered) => format!("({rendered})"),
                Operand::Rejected(code) => {
                    return Err(ModelError::InvalidOperand {
                        field: criterion.field.clone(),
                        code: *code,
                    });
                }
                Operand::Bound(value) => {
                    let name = param_name(&mut used, &criterion.field);
                    params.insert(name.clone(), value.clone());
                    format!(":{name}")
                }
            };
            conditions.push(format!(
                "{}.`{column}` {} {operand}",
                table.alias,
                criterion.operator.as_sql()
            ));
        }
        Ok((Some(format!("WHERE {}", conditions.join("\nAND "))), params))
    }
}

/// SQL plus the parameters it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Params,
}

struct Table {
    name: String,
    alias: String,
    id_column: String,
}

impl Table {
    fn of(mapper: &dyn DataMapper) -> Result<Self, ModelError> {
        let name = mapper.table().to_string();
        let alias = name
            .chars()
            .next()
            .filter(char::is_ascii_alphabetic)
            .map(String::from)
            .unwrap_or_else(|| "t".to_string());
        Ok(Self {
            id_column: mapper.column(ID_FIELD)?,
            alias,
            name,
        })
    }
}

// `used` maps every name handed out so far to the last suffix tried for it.
// A suffixed name is itself taken, so a real field called `age_2` can't
// collide with the second use of `age`.
fn param_name(used: &mut HashMap<String, usize>, field: &str) -> String {
    let mut count = used.get(field).copied().unwrap_or(0);
    loop {
        count += 1;
        let name = if count == 1 {
            field.to_string()
        } else {
            format!("{field}_{count}")
        };
        if !used.contains_key(&name) {
            used.insert(field.to_string(), count);
            used.entry(name.clone()).or_insert(1);
            return name;
        }
    }
}

fn quote(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        Data, EntityType, FieldDefinition, FieldType, Fieldset, GenericMapper, Id, Storage,
        StorageError,
    };

    struct NoStorage;

    impl Storage for NoStorage {
        fn execute(&self, _: &str, _: &Params) -> Result<u64, StorageError> {
            Err(StorageError::NotConnected)
        }

        fn get_all(&self, _: &str, _: &Params) -> Result<Vec<Data>, StorageError> {
            Err(StorageError::NotConnected)
        }

        fn insert_id(&self) -> Result<Id, StorageError> {
            Err(StorageError::NotConnected)
        }

        fn begin(&self) -> Result<(), StorageError> {
            Err(StorageError::NotConnected)
        }

        fn commit(&self) -> Result<(), StorageError> {
            Err(StorageError::NotConnected)
        }

        fn rollback(&self) -> Result<(), StorageError> {
            Err(StorageError::NotConnected)
        }
    }

    fn mapper_for(table: &str) -> GenericMapper {
        let fields = Fieldset::builder()
            .id()
            .field(FieldDefinition::new("status", FieldType::Text))
            .field(FieldDefinition::new("created", FieldType::DateTime).column("created_on"))
            .field(FieldDefinition::new("age", FieldType::Integer))
            .field(FieldDefinition::new("age_2", FieldType::Integer))
            .field(FieldDefinition::new("limit", FieldType::Integer))
            .build()
            .unwrap();
        GenericMapper::new(EntityType::new("User", fields), Arc::new(NoStorage), table).unwrap()
    }

    fn users() -> GenericMapper {
        mapper_for("users")
    }

    #[test]
    fn equals_order_and_limit() {
        let query = Filter::new()
            .equals("status", "active")
            .order_by("created", Order::Desc)
            .limit(10)
            .compile_select(&users(), 25)
            .unwrap();

        assert_eq!(
            query.sql,
            "SELECT u.`id`\nFROM `users` AS u\nWHERE u.`status` = :status\nORDER BY u.`created_on` DESC\nLIMIT :offset, :limit"
        );
        assert_eq!(
            query.params,
            Params::named([
                ("status", Value::from("active")),
                ("offset", Value::Int(0)),
                ("limit", Value::Int(10)),
            ])
        );
    }

    #[test]
    fn defaults_to_id_order_and_page_size() {
        let query = Filter::new().compile_select(&users(), 25).unwrap();
        assert_eq!(
            query.sql,
            "SELECT u.`id`\nFROM `users` AS u\nORDER BY u.`id` ASC\nLIMIT :offset, :limit"
        );
        assert_eq!(query.params.get("limit"), Some(&Value::Int(25)));
    }

    #[test]
    fn in_lists_are_inlined() {
        let query = Filter::new()
            .r#in("age", [18, 21])
            .r#in("status", ["new", "it's"])
            .compile_select(&users(), 25)
            .unwrap();
        assert!(query.sql.contains("WHERE u.`age` IN (18, 21)\nAND u.`status` IN ('new', 'it\\'s')"));
        assert_eq!(query.params.len(), 2);

        let forced = Filter::new()
            .in_values("status", ["1", "2"], Some(false))
            .compile_count(&users())
            .unwrap();
        assert!(forced.sql.ends_with("WHERE u.`status` IN ('1', '2')"));

        let empty = Filter::new()
            .r#in("age", Vec::<i64>::new())
            .compile_count(&users())
            .unwrap();
        assert!(empty.sql.ends_with("IN (NULL)"));
    }

    #[test]
    fn between_binds_two_parameters() {
        let query = Filter::new()
            .between("age", 18, 30)
            .compile_count(&users())
            .unwrap();
        assert_eq!(
            query.sql,
            "SELECT COUNT(u.`id`)\nFROM `users` AS u\nWHERE u.`age` >= :age\nAND u.`age` <= :age_2"
        );
        assert_eq!(query.params.get("age"), Some(&Value::Int(18)));
        assert_eq!(query.params.get("age_2"), Some(&Value::Int(30)));
    }

    #[test]
    fn repeated_operator_replaces_value() {
        let filter = Filter::new().equals("status", "a").equals("status", "b");
        let snapshot = filter.snapshot();
        assert_eq!(snapshot.criteria.len(), 1);
        assert_eq!(snapshot.criteria[0].operand, Operand::Bound(Value::from("b")));
        assert!(filter.clear().snapshot().criteria.is_empty());
    }

    #[test]
    fn field_names_do_not_clash_with_paging() {
        let query = Filter::new()
            .equals("limit", 3)
            .limit(5)
            .compile_select(&users(), 25)
            .unwrap();
        assert!(query.sql.contains("u.`limit` = :limit_2"));
        assert_eq!(query.params.get("limit_2"), Some(&Value::Int(3)));
        assert_eq!(query.params.get("limit"), Some(&Value::Int(5)));
    }

    #[test]
    fn unknown_fields_fail_compilation() {
        let result = Filter::new().equals("shoe_size", 9).compile_count(&users());
        assert!(matches!(result, Err(ModelError::UnknownField(_))));
        let result = Filter::new()
            .order_by("shoe_size", Order::Asc)
            .compile_select(&users(), 25);
        assert!(matches!(result, Err(ModelError::UnknownField(_))));
    }

    #[test]
    fn suffixed_field_names_keep_their_own_parameter() {
        let query = Filter::new()
            .between("age", 18, 30)
            .equals("age_2", 99)
            .compile_count(&users())
            .unwrap();
        assert_eq!(
            query.sql,
            "SELECT COUNT(u.`id`)\nFROM `users` AS u\nWHERE u.`age` >= :age\nAND u.`age` <= :age_2\nAND u.`age_2` = :age_2_2"
        );
        assert_eq!(
            query.params,
            Params::named([
                ("age", Value::Int(18)),
                ("age_2", Value::Int(30)),
                ("age_2_2", Value::Int(99)),
            ])
        );

        // the real field first, then the repeated one
        let query = Filter::new()
            .equals("age_2", 99)
            .between("age", 18, 30)
            .compile_count(&users())
            .unwrap();
        assert_eq!(query.params.len(), 3);
        assert!(query.sql.contains("u.`age_2` = :age_2\n"));
        assert!(query.sql.ends_with("u.`age` <= :age_3"));
        assert_eq!(query.params.get("age_3"), Some(&Value::Int(30)));
    }

    #[test]
    fn non_finite_floats_are_rejected_in_lists() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = Filter::new()
                .r#in("age", [Value::Int(1), Value::Float(bad)])
                .compile_count(&users());
            assert!(matches!(
                result,
                Err(ModelError::InvalidOperand { ref field, code: ValidationError::Type }) if field == "age"
            ));
        }

        let query = Filter::new()
            .r#in("age", [1.5, 2.0])
            .compile_count(&users())
            .unwrap();
        assert!(query.sql.ends_with("IN (1.5, 2)"));
    }

    #[test]
    fn alias_falls_back_when_table_starts_oddly() {
        let query = Filter::new()
            .equals("status", "x")
            .compile_count(&mapper_for("2fa"))
            .unwrap();
        assert_eq!(
            query.sql,
            "SELECT COUNT(t.`id`)\nFROM `2fa` AS t\nWHERE t.`status` = :status"
        );
        let query = Filter::new().compile_count(&mapper_for("_log")).unwrap();
        assert!(query.sql.contains("AS t"));
    }
}
